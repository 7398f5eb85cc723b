//! 线程模块
//!
//! 报价单线程与货运方点对点线程的查找或创建

pub mod metadata;
pub mod peer;
pub mod service;

pub use metadata::{ParticipantSummary, ShipperSummary, ThreadMetadata};
pub use peer::{PeerThreadInput, PeerThreadOrchestrator, PeerThreadResult};
pub use service::ThreadOrchestrator;
