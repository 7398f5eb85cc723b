//! 外部会话服务商接口
//!
//! 线程只持有服务商会话资源的引用（SID + 唯一名），所有服务商操作走这里。
//! 重名会话是预期内的并发信号，统一映射为 [`ChatError::Conflict`]，
//! 由调用方按唯一名回查恢复。

pub mod api;
#[cfg(test)]
pub mod testing;
pub mod types;

use async_trait::async_trait;

use crate::chat::error::ChatResult;

pub use api::HttpConversationProvider;
pub use types::{ConversationRef, CreateConversationParams, ProviderConfig};

/// 会话服务商操作契约
#[async_trait]
pub trait ConversationProvider: Send + Sync {
    /// 创建会话，重名返回 [`crate::chat::error::ChatError::Conflict`]
    async fn create_conversation(
        &self,
        params: CreateConversationParams,
    ) -> ChatResult<ConversationRef>;

    /// 按唯一名取已有会话
    async fn fetch_conversation(&self, unique_name: &str) -> ChatResult<ConversationRef>;

    /// 把身份挂载到会话，身份已存在返回 Conflict
    async fn add_participant(
        &self,
        conversation_sid: &str,
        identity: &str,
        role_sid: &str,
    ) -> ChatResult<()>;

    /// 更新会话属性
    async fn update_conversation_attributes(
        &self,
        conversation_sid: &str,
        attributes: &str,
    ) -> ChatResult<()>;
}
