//! 聊天核心模块
//!
//! 实现会话范围编排与实时同步：线程范围解析、幂等的线程/会话创建复用、
//! 参与者角色与身份解析、点对点线程规范化，以及竞价变更的实时订阅生命周期。

pub mod error;
pub mod naming;
pub mod participant;
pub mod provider;
pub mod realtime;
pub mod scope;
pub mod store;
pub mod thread;

// 重新导出主要类型和函数
pub use error::{ChatError, ChatResult, SyncOutcome};
pub use participant::{EnsureParticipantInput, ParticipantResolver, RoleTokenConfig};
pub use realtime::{RealtimeConfig, RealtimeSubscriptionManager};
pub use scope::{ConversationScope, EnsureThreadInput, ScopeField};
pub use thread::{PeerThreadInput, PeerThreadOrchestrator, ThreadOrchestrator};
