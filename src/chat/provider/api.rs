//! 会话服务商 HTTP API 客户端
//!
//! 负责所有服务商相关的 HTTP 请求

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::error::{ChatError, ChatResult};
use crate::chat::provider::types::{ConversationRef, CreateConversationParams, ProviderConfig};
use crate::chat::provider::ConversationProvider;

/// 基于 reqwest 的服务商客户端
pub struct HttpConversationProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpConversationProvider {
    pub fn new(client: reqwest::Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    /// 统一处理服务商响应：409 归类为冲突，其余非 2xx 归类为瞬时失败
    async fn handle_response(
        response: reqwest::Response,
        operation_name: &str,
    ) -> ChatResult<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChatError::provider(format!("{} 读取响应失败: {}", operation_name, e)))?;

        if status == reqwest::StatusCode::CONFLICT {
            warn!(
                "[ProviderAPI] {} 命中重名冲突（409），走回查路径",
                operation_name
            );
            return Err(ChatError::conflict(format!("{} 资源已存在", operation_name)));
        }
        if !status.is_success() {
            error!(
                "[ProviderAPI] {} 请求失败，HTTP状态: {}, 响应: {}",
                operation_name, status, body
            );
            return Err(ChatError::provider(format!(
                "{} HTTP 错误 {}: {}",
                operation_name, status, body
            )));
        }
        debug!(
            "[ProviderAPI] {} 请求成功，HTTP状态: {}",
            operation_name, status
        );
        Ok(body)
    }
}

#[async_trait::async_trait]
impl ConversationProvider for HttpConversationProvider {
    async fn create_conversation(
        &self,
        params: CreateConversationParams,
    ) -> ChatResult<ConversationRef> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/v1/Conversations", self.config.api_base_url);

        info!(
            "[ProviderAPI] 📡 创建会话 uniqueName={}, 操作ID: {}",
            params.unique_name, operation_id
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("UniqueName", params.unique_name.as_str()),
                ("FriendlyName", params.friendly_name.as_str()),
                ("Attributes", params.attributes.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ChatError::provider(format!("创建会话请求失败: {}", e)))?;

        let body = Self::handle_response(response, "创建会话").await?;
        let conversation: ConversationRef = serde_json::from_str(&body)?;
        info!("[ProviderAPI] ✅ 会话已创建 sid={}", conversation.sid);
        Ok(conversation)
    }

    async fn fetch_conversation(&self, unique_name: &str) -> ChatResult<ConversationRef> {
        let url = format!(
            "{}/v1/Conversations/{}",
            self.config.api_base_url, unique_name
        );
        info!("[ProviderAPI] 📡 按唯一名取会话 uniqueName={}", unique_name);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await
            .map_err(|e| ChatError::provider(format!("查询会话请求失败: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ChatError::not_found(format!("服务商会话 {}", unique_name)));
        }
        let body = Self::handle_response(response, "查询会话").await?;
        let conversation: ConversationRef = serde_json::from_str(&body)?;
        Ok(conversation)
    }

    async fn add_participant(
        &self,
        conversation_sid: &str,
        identity: &str,
        role_sid: &str,
    ) -> ChatResult<()> {
        let url = format!(
            "{}/v1/Conversations/{}/Participants",
            self.config.api_base_url, conversation_sid
        );
        info!(
            "[ProviderAPI] 📡 挂载参与者 sid={}, identity={}",
            conversation_sid, identity
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("Identity", identity), ("RoleSid", role_sid)])
            .send()
            .await
            .map_err(|e| ChatError::provider(format!("挂载参与者请求失败: {}", e)))?;

        Self::handle_response(response, "挂载参与者").await?;
        Ok(())
    }

    async fn update_conversation_attributes(
        &self,
        conversation_sid: &str,
        attributes: &str,
    ) -> ChatResult<()> {
        let url = format!(
            "{}/v1/Conversations/{}",
            self.config.api_base_url, conversation_sid
        );
        debug!("[ProviderAPI] 📡 更新会话属性 sid={}", conversation_sid);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("Attributes", attributes)])
            .send()
            .await
            .map_err(|e| ChatError::provider(format!("更新会话属性请求失败: {}", e)))?;

        Self::handle_response(response, "更新会话属性").await?;
        Ok(())
    }
}
