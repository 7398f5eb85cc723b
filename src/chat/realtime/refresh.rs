//! 竞价刷新队列
//!
//! 防抖合并队列：同一静默窗口内对同一键的 N 次刷新请求合并为一次下游
//! 调用。窗口内只保留"哪些键要刷"，不保留事件到达顺序。单键失败互相隔离，
//! 也不影响后续入队。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chat::error::ChatResult;

/// 下游刷新回调（读路径）
#[async_trait]
pub trait RefreshSink: Send + Sync {
    /// 重新拉取指定报价单的竞价数据
    async fn refresh_quote_bids(&self, quote_id: &str) -> ChatResult<()>;
}

struct QueueInner {
    pending: HashSet<String>,
    timer: Option<JoinHandle<()>>,
}

/// 防抖合并刷新队列
pub struct BidRefreshQueue {
    sink: Arc<dyn RefreshSink>,
    delay: Duration,
    inner: Mutex<QueueInner>,
}

impl BidRefreshQueue {
    pub fn new(sink: Arc<dyn RefreshSink>, delay: Duration) -> Self {
        Self {
            sink,
            delay,
            inner: Mutex::new(QueueInner {
                pending: HashSet::new(),
                timer: None,
            }),
        }
    }

    /// 登记一个待刷新键；无定时器时启动一个，有则等它到点统一冲刷
    pub fn enqueue(self: &Arc<Self>, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.insert(key.to_string());
        if inner.timer.is_none() {
            let queue = Arc::clone(self);
            inner.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(queue.delay).await;
                queue.flush().await;
            }));
        }
    }

    /// 原子换出待刷集合并逐键下发，单键失败只记日志
    pub async fn flush(&self) {
        let keys: Vec<String> = {
            let mut inner = self.inner.lock().unwrap();
            inner.timer = None;
            inner.pending.drain().collect()
        };
        if keys.is_empty() {
            return;
        }
        debug!("[RefreshQ] 冲刷 {} 个待刷新键", keys.len());

        let tasks = keys.into_iter().map(|key| {
            let sink = Arc::clone(&self.sink);
            async move {
                if let Err(e) = sink.refresh_quote_bids(&key).await {
                    warn!("[RefreshQ] ⚠️ 刷新 {} 失败（忽略）: {}", key, e);
                }
            }
        });
        futures_util::future::join_all(tasks).await;
    }

    /// 取消定时器并丢弃待刷键（手动销毁路径）
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.pending.clear();
    }
}
