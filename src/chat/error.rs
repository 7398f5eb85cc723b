//! 聊天核心统一错误类型
//!
//! 按错误语义分类，调用方可以据此区分"可恢复冲突"和"真正的失败"。
//! 唯一键冲突（存储层唯一约束、服务商重名会话）是预期内的并发信号，
//! 统一映射为 [`ChatError::Conflict`]，由上层重查恢复，不再依赖错误文案匹配。

use thiserror::Error;

/// 聊天核心错误
#[derive(Debug, Error)]
pub enum ChatError {
    /// 资源不存在（报价单、线程、组织等），直接返回调用方，不重试
    #[error("资源不存在: {what}")]
    NotFound { what: String },

    /// 用户不具备目标组织成员资格
    #[error("无权限: {message}")]
    Unauthorized { message: String },

    /// 唯一键冲突（存储唯一约束 / 服务商重名资源），预期内，由调用方重查恢复
    #[error("资源冲突: {message}")]
    Conflict { message: String },

    /// 必需配置缺失（如角色 token），启动级致命错误，不重试
    #[error("配置缺失: {message}")]
    Config { message: String },

    /// 会话服务商调用失败（网络/服务端瞬时错误），本地状态仍为准
    #[error("服务商调用失败: {message}")]
    Provider { message: String },

    /// 调用方参数非法
    #[error("参数非法: {message}")]
    InvalidArgument { message: String },

    /// 存储层错误
    #[error("存储错误: {0}")]
    Store(#[from] sqlx::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// 是否为可通过重查恢复的冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, ChatError::Conflict { .. })
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ChatError::NotFound { what: what.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ChatError::Conflict {
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        ChatError::Provider {
            message: message.into(),
        }
    }
}

/// 尽力而为的服务商副作用结果
///
/// 会话属性同步、参与者挂载这类调用失败时只记日志不终止主流程（本地状态为准，
/// 后续幂等调用会补齐）。用显式类型而不是裸 try/catch，测试可以直接断言。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 服务商侧已同步
    Synced,
    /// 服务商调用失败，已记录，等待后续幂等调用补齐
    Deferred,
}

pub type ChatResult<T> = Result<T, ChatError>;
