//! 存储层模块
//!
//! 线程/参与者/目录数据的持久化访问

pub mod dao;
pub mod models;

pub use dao::{init_db_with_connection, DirectoryDao, ParticipantDao, ThreadDao};
pub use models::{
    ChatThread, ChatThreadParticipant, NewParticipant, NewThread, OrgMembership, Organization,
    ParticipantRole, Profile, QuoteContext, ShipperThreadRole, ThreadConversationType,
    ThreadShipper,
};
