//! 实时订阅管理器
//!
//! 每个（订阅面、租户）通道一个独立控制器任务，任务内部自持退避计数与
//! 重连等待，因此"每个通道至多一个待触发的重连定时器"由所有权结构保证，
//! 不需要任何全局可变状态。订阅接口的状态串经显式状态机分类后驱动重连。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::realtime::feed::{BidFeed, ChannelKey, FeedSignal};
use crate::chat::realtime::listener::ConnectionListener;
use crate::chat::realtime::refresh::{BidRefreshQueue, RefreshSink};
use crate::chat::realtime::status::{
    on_status, ChannelStatus, ConnectionState, Transition, BASE_RETRY_DELAY_MS,
    MAX_RETRY_DELAY_MS,
};

/// 实时订阅配置
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// 刷新队列防抖窗口
    pub refresh_debounce_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_retry_delay_ms: BASE_RETRY_DELAY_MS,
            max_retry_delay_ms: MAX_RETRY_DELAY_MS,
            refresh_debounce_ms: 300,
        }
    }
}

/// 实时订阅管理器
pub struct RealtimeSubscriptionManager {
    feed: Arc<dyn BidFeed>,
    listener: Arc<dyn ConnectionListener>,
    queue: Arc<BidRefreshQueue>,
    config: RealtimeConfig,
    channels: Mutex<HashMap<String, JoinHandle<()>>>,
    states: Arc<Mutex<HashMap<String, ConnectionState>>>,
    /// 手动销毁标记：区分"用户关掉的"和"网络断掉的"
    teardown: Arc<AtomicBool>,
}

impl RealtimeSubscriptionManager {
    pub fn new(
        feed: Arc<dyn BidFeed>,
        listener: Arc<dyn ConnectionListener>,
        sink: Arc<dyn RefreshSink>,
        config: RealtimeConfig,
    ) -> Self {
        let queue = Arc::new(BidRefreshQueue::new(
            sink,
            Duration::from_millis(config.refresh_debounce_ms),
        ));
        Self {
            feed,
            listener,
            queue,
            config,
            channels: Mutex::new(HashMap::new()),
            states: Arc::new(Mutex::new(HashMap::new())),
            teardown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅指定租户组织的竞价变更
    ///
    /// 同一 key 重复订阅会先销毁旧通道再建新通道，避免重复监听。
    pub fn subscribe_to_gallery_bids(&self, org_id: &str) {
        let key = ChannelKey::gallery_bids(org_id);
        let key_str = key.as_string();

        let mut channels = self.channels.lock().unwrap();
        if let Some(existing) = channels.remove(&key_str) {
            info!("[Realtime] 通道 {} 已存在，先销毁再重建", key_str);
            existing.abort();
        }
        self.states
            .lock()
            .unwrap()
            .insert(key_str.clone(), ConnectionState::default());

        info!("[Realtime] 📡 订阅竞价通道 {}", key_str);
        let task = tokio::spawn(run_channel(
            self.feed.clone(),
            self.listener.clone(),
            self.queue.clone(),
            self.states.clone(),
            self.teardown.clone(),
            key,
            self.config.clone(),
        ));
        channels.insert(key_str, task);
    }

    /// 查询通道连接状态（观测用）
    pub fn connection_state(&self, key: &ChannelKey) -> Option<ConnectionState> {
        self.states.lock().unwrap().get(&key.as_string()).cloned()
    }

    /// 手动销毁全部通道
    ///
    /// 置销毁标记 → 逐通道注销（互相隔离）→ 清刷新队列与连接状态 →
    /// 清销毁标记，之后新的订阅调用行为照常。
    pub fn unsubscribe_from_all(&self) {
        self.teardown.store(true, Ordering::SeqCst);

        let handles: Vec<(String, JoinHandle<()>)> =
            self.channels.lock().unwrap().drain().collect();
        for (key, handle) in handles {
            handle.abort();
            debug!("[Realtime] 通道 {} 已注销", key);
        }

        self.queue.clear();
        self.states.lock().unwrap().clear();

        self.teardown.store(false, Ordering::SeqCst);
        info!("[Realtime] 全部通道已手动销毁");
    }
}

/// 单通道控制器：打开 → 消费信号 → 故障分类 → 退避重连
async fn run_channel(
    feed: Arc<dyn BidFeed>,
    listener: Arc<dyn ConnectionListener>,
    queue: Arc<BidRefreshQueue>,
    states: Arc<Mutex<HashMap<String, ConnectionState>>>,
    teardown: Arc<AtomicBool>,
    key: ChannelKey,
    config: RealtimeConfig,
) {
    let key_str = key.as_string();
    let mut attempt: u32 = 0;

    loop {
        if teardown.load(Ordering::SeqCst) {
            break;
        }

        let failure = match feed.open_channel(&key).await {
            Ok(mut rx) => {
                let mut failure_status = None;
                while let Some(signal) = rx.recv().await {
                    match signal {
                        FeedSignal::Status(ChannelStatus::Subscribed) => {
                            attempt = 0;
                            let was_reconnecting = {
                                let mut states = states.lock().unwrap();
                                let state = states.entry(key_str.clone()).or_default();
                                state.mark_connected(chrono::Utc::now().timestamp_millis())
                            };
                            if was_reconnecting {
                                info!("[Realtime] ✅ 通道 {} 重连成功", key_str);
                                listener.on_reconnected(&key_str).await;
                            }
                        }
                        FeedSignal::Status(status) => {
                            failure_status = Some(status);
                            break;
                        }
                        FeedSignal::Event(change) => {
                            let Some(bid) = change.entity() else { continue };
                            // 租户隔离：非本组织的事件不入队
                            if bid.gallery_org_id != key.org_id {
                                debug!(
                                    "[Realtime] 跳过其他租户事件 galleryOrg={}",
                                    bid.gallery_org_id
                                );
                                continue;
                            }
                            queue.enqueue(&bid.quote_id);
                        }
                    }
                }
                // 信号流结束等价于通道关闭
                failure_status.unwrap_or(ChannelStatus::Closed)
            }
            Err(e) => {
                warn!("[Realtime] ❌ 打开通道 {} 失败: {}", key_str, e);
                ChannelStatus::ChannelError
            }
        };

        match on_status(
            failure,
            teardown.load(Ordering::SeqCst),
            attempt,
            config.base_retry_delay_ms,
            config.max_retry_delay_ms,
        ) {
            Transition::Connected => continue,
            Transition::Suppressed => {
                debug!("[Realtime] 通道 {} 已手动销毁，不再重连", key_str);
                break;
            }
            Transition::ScheduleRetry {
                delay_ms,
                next_attempt,
            } => {
                attempt = next_attempt;
                {
                    let mut states = states.lock().unwrap();
                    states
                        .entry(key_str.clone())
                        .or_default()
                        .mark_reconnecting(delay_ms);
                }
                listener.on_reconnecting(&key_str, delay_ms).await;
                info!(
                    "[Realtime] 🔄 通道 {} 将在 {}ms 后重连（第 {} 次尝试）",
                    key_str, delay_ms, next_attempt
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}
