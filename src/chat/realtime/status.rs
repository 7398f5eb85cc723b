//! 通道状态机
//!
//! 把订阅通道的生命周期建成显式状态类型 + 纯转移函数，退避重连逻辑
//! 不依赖任何真实网络即可单测。

use serde::{Deserialize, Serialize};

/// 重连退避基础延迟
pub const BASE_RETRY_DELAY_MS: u64 = 1_000;
/// 重连退避上限
pub const MAX_RETRY_DELAY_MS: u64 = 15_000;

/// 订阅通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    /// 解析订阅接口给出的状态串
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUBSCRIBED" => Some(ChannelStatus::Subscribed),
            "CHANNEL_ERROR" => Some(ChannelStatus::ChannelError),
            "TIMED_OUT" => Some(ChannelStatus::TimedOut),
            "CLOSED" => Some(ChannelStatus::Closed),
            _ => None,
        }
    }

    /// 是否为故障态（驱动退避重连）
    pub fn is_failure(&self) -> bool {
        !matches!(self, ChannelStatus::Subscribed)
    }
}

/// 面向用户的连接提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Reconnecting,
    Reconnected,
}

/// 连接提示内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionToast {
    pub kind: ToastKind,
    pub message: String,
}

/// 单个通道的连接状态（订阅时创建，手动销毁时清空）
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub reconnecting: bool,
    pub toast: Option<ConnectionToast>,
    pub next_retry_delay_ms: Option<u64>,
    pub last_activity: Option<i64>,
}

impl ConnectionState {
    /// 连接成功：清退避状态、盖活跃时间戳；此前在重连中则翻转为
    /// "已恢复"提示（提示的自动消隐由 UI 负责，这里只置值）。
    /// 返回此前是否处于重连中。
    pub fn mark_connected(&mut self, now_ms: i64) -> bool {
        let was_reconnecting = self.reconnecting
            || matches!(
                self.toast,
                Some(ConnectionToast {
                    kind: ToastKind::Reconnecting,
                    ..
                })
            );
        self.reconnecting = false;
        self.next_retry_delay_ms = None;
        self.last_activity = Some(now_ms);
        self.toast = if was_reconnecting {
            Some(ConnectionToast {
                kind: ToastKind::Reconnected,
                message: "实时连接已恢复".to_string(),
            })
        } else {
            None
        };
        was_reconnecting
    }

    /// 进入重连等待：暴露计算出的延迟供观测/测试
    pub fn mark_reconnecting(&mut self, delay_ms: u64) {
        self.reconnecting = true;
        self.next_retry_delay_ms = Some(delay_ms);
        self.toast = Some(ConnectionToast {
            kind: ToastKind::Reconnecting,
            message: "实时连接中断，正在重连…".to_string(),
        });
    }
}

/// 指数退避延迟（带上限）
pub fn retry_delay_with(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    base_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_ms)
}

/// 默认参数下的退避延迟：1000, 2000, 4000, 8000, 15000, 15000, …
pub fn retry_delay_ms(attempt: u32) -> u64 {
    retry_delay_with(BASE_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS, attempt)
}

/// 状态转移结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 连上了：清退避、重置尝试计数
    Connected,
    /// 安排一次重连
    ScheduleRetry { delay_ms: u64, next_attempt: u32 },
    /// 手动销毁后不再重连
    Suppressed,
}

/// 纯转移函数：手动销毁标记区分"用户关掉的"和"网络断掉的"
pub fn on_status(
    status: ChannelStatus,
    manual_teardown: bool,
    attempt: u32,
    base_ms: u64,
    max_ms: u64,
) -> Transition {
    match status {
        ChannelStatus::Subscribed => Transition::Connected,
        ChannelStatus::ChannelError | ChannelStatus::TimedOut | ChannelStatus::Closed => {
            if manual_teardown {
                Transition::Suppressed
            } else {
                Transition::ScheduleRetry {
                    delay_ms: retry_delay_with(base_ms, max_ms, attempt),
                    next_attempt: attempt + 1,
                }
            }
        }
    }
}
