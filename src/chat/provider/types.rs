//! 会话服务商接口类型

use serde::Deserialize;

/// 服务商配置
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// REST API 基础地址
    pub api_base_url: String,
    /// 账号 SID（basic auth 用户名）
    pub account_sid: String,
    /// 鉴权 token（basic auth 密码）
    pub auth_token: String,
}

/// 创建会话参数
#[derive(Clone, Debug)]
pub struct CreateConversationParams {
    /// 幂等键：同名创建会被服务商以重名冲突拒绝
    pub unique_name: String,
    /// 展示名
    pub friendly_name: String,
    /// 会话属性（JSON 文本）
    pub attributes: String,
}

/// 服务商侧会话资源引用
#[derive(Clone, Debug, Deserialize)]
pub struct ConversationRef {
    pub sid: String,
}
