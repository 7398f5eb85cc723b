//! 连接状态监听器回调接口

use async_trait::async_trait;

/// 连接状态监听器（UI 据此展示连接提示）
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    /// 进入重连等待，携带本次计算出的退避延迟
    async fn on_reconnecting(&self, channel_key: &str, delay_ms: u64);

    /// 重连成功
    async fn on_reconnected(&self, channel_key: &str);
}

/// 空实现（默认监听器）
pub struct EmptyConnectionListener;

#[async_trait]
impl ConnectionListener for EmptyConnectionListener {
    async fn on_reconnecting(&self, _channel_key: &str, _delay_ms: u64) {}
    async fn on_reconnected(&self, _channel_key: &str) {}
}
