//! 参与者模块

pub mod service;

pub use service::{EnsureParticipantInput, ParticipantResolver, RoleTokenConfig};
