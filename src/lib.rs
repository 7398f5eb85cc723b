pub mod chat;

// 重新导出常用类型和函数，方便外部使用
pub use chat::{
    error::{ChatError, ChatResult, SyncOutcome},
    participant::{ParticipantResolver, RoleTokenConfig},
    realtime::{RealtimeConfig, RealtimeSubscriptionManager},
    scope::{EnsureThreadInput, ScopeField},
    thread::{PeerThreadInput, PeerThreadOrchestrator, ThreadOrchestrator},
};
