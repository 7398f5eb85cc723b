//! 竞价实时订阅源
//!
//! 通道按（订阅面、租户组织）建 key，服务端按租户列过滤。WebSocket 实现
//! 走 phoenix 风格协议：入会 → 回执 → 变更事件推送，25 秒心跳保活。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::chat::error::{ChatError, ChatResult};
use crate::chat::realtime::status::ChannelStatus;

/// 入会回执等待上限，超时按 TIMED_OUT 处理
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
/// 心跳间隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// 竞价变更事件（线上载荷，本子系统不落库）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryBidEvent {
    pub id: String,
    pub quote_id: String,
    pub gallery_org_id: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub updated_at: String,
}

/// 变更载荷：{ new?, old? }
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BidChange {
    #[serde(default)]
    pub new: Option<GalleryBidEvent>,
    #[serde(default)]
    pub old: Option<GalleryBidEvent>,
}

impl BidChange {
    /// 事件对应的实体（新值优先）
    pub fn entity(&self) -> Option<&GalleryBidEvent> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// 通道标识：（订阅面, 租户组织）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub feed: String,
    pub org_id: String,
}

impl ChannelKey {
    pub fn gallery_bids(org_id: &str) -> Self {
        Self {
            feed: "gallery-bids".to_string(),
            org_id: org_id.to_string(),
        }
    }

    pub fn as_string(&self) -> String {
        format!("{}:{}", self.feed, self.org_id)
    }
}

/// 通道信号：状态转移或变更事件
#[derive(Debug)]
pub enum FeedSignal {
    Status(ChannelStatus),
    Event(BidChange),
}

/// 订阅源契约
///
/// 返回的接收端在通道故障或关闭时给出故障态信号后结束；重连由上层的
/// 订阅管理器驱动，这里只负责单次打开。
#[async_trait]
pub trait BidFeed: Send + Sync {
    async fn open_channel(&self, key: &ChannelKey) -> ChatResult<mpsc::Receiver<FeedSignal>>;
}

/// 实时订阅源配置
#[derive(Clone, Debug)]
pub struct RealtimeFeedConfig {
    /// WebSocket 服务地址
    pub ws_url: String,
    /// 接入 key
    pub api_key: String,
}

/// phoenix 风格消息帧
#[derive(Debug, Serialize, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

/// 基于 WebSocket 的订阅源实现
pub struct WebSocketBidFeed {
    config: RealtimeFeedConfig,
}

impl WebSocketBidFeed {
    pub fn new(config: RealtimeFeedConfig) -> Self {
        Self { config }
    }

    fn topic_for(key: &ChannelKey) -> String {
        format!(
            "realtime:public:gallery_bids:gallery_org_id=eq.{}",
            key.org_id
        )
    }
}

#[async_trait]
impl BidFeed for WebSocketBidFeed {
    async fn open_channel(&self, key: &ChannelKey) -> ChatResult<mpsc::Receiver<FeedSignal>> {
        let url = format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.config.ws_url, self.config.api_key
        );
        info!("[Feed] 📡 打开实时通道 {}", key.as_string());

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| ChatError::provider(format!("WebSocket 连接失败: {}", e)))?;
        let (write, mut read) = ws_stream.split();
        let writer = Arc::new(Mutex::new(write));

        // 入会
        let topic = Self::topic_for(key);
        let join = PhoenixFrame {
            topic: topic.clone(),
            event: "phx_join".to_string(),
            payload: serde_json::json!({}),
            reference: Some("1".to_string()),
        };
        writer
            .lock()
            .await
            .send(WsMessage::Text(serde_json::to_string(&join)?))
            .await
            .map_err(|e| ChatError::provider(format!("发送入会消息失败: {}", e)))?;

        // 心跳：发送失败即退出（连接已死，读端会给出故障信号）
        let writer_for_heartbeat = writer.clone();
        let heartbeat_topic = topic.clone();
        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let frame = PhoenixFrame {
                    topic: heartbeat_topic.clone(),
                    event: "heartbeat".to_string(),
                    payload: serde_json::json!({}),
                    reference: None,
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(_) => break,
                };
                let mut w = writer_for_heartbeat.lock().await;
                if w.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let (tx, rx) = mpsc::channel(64);
        let channel_key = key.as_string();
        tokio::spawn(async move {
            let mut joined = false;
            loop {
                let next = if joined {
                    read.next().await
                } else {
                    // 入会回执超时按 TIMED_OUT 上报
                    match tokio::time::timeout(JOIN_TIMEOUT, read.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!("[Feed] ⏱️ 通道 {} 入会回执超时", channel_key);
                            let _ = tx.send(FeedSignal::Status(ChannelStatus::TimedOut)).await;
                            return;
                        }
                    }
                };

                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!("[Feed] ❌ 通道 {} 读取失败: {}", channel_key, e);
                        let _ = tx
                            .send(FeedSignal::Status(ChannelStatus::ChannelError))
                            .await;
                        return;
                    }
                    None => {
                        debug!("[Feed] 通道 {} 流结束", channel_key);
                        let _ = tx.send(FeedSignal::Status(ChannelStatus::Closed)).await;
                        return;
                    }
                };

                let text = match message {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => {
                        let _ = tx.send(FeedSignal::Status(ChannelStatus::Closed)).await;
                        return;
                    }
                    _ => continue,
                };

                let frame: PhoenixFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("[Feed] 跳过无法解析的帧: {} ({})", text, e);
                        continue;
                    }
                };

                match frame.event.as_str() {
                    "phx_reply" if !joined => {
                        let ok = frame
                            .payload
                            .get("status")
                            .and_then(|v| v.as_str())
                            .map(|s| s == "ok")
                            .unwrap_or(false);
                        if ok {
                            joined = true;
                            info!("[Feed] ✅ 通道 {} 订阅成功", channel_key);
                            if tx
                                .send(FeedSignal::Status(ChannelStatus::Subscribed))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        } else {
                            warn!("[Feed] ❌ 通道 {} 入会被拒: {}", channel_key, frame.payload);
                            let _ = tx
                                .send(FeedSignal::Status(ChannelStatus::ChannelError))
                                .await;
                            return;
                        }
                    }
                    "phx_error" => {
                        let _ = tx
                            .send(FeedSignal::Status(ChannelStatus::ChannelError))
                            .await;
                        return;
                    }
                    "phx_close" => {
                        let _ = tx.send(FeedSignal::Status(ChannelStatus::Closed)).await;
                        return;
                    }
                    "INSERT" | "UPDATE" | "DELETE" => {
                        match serde_json::from_value::<BidChange>(frame.payload) {
                            Ok(change) => {
                                if tx.send(FeedSignal::Event(change)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                debug!("[Feed] 跳过无法解析的变更载荷: {}", e);
                            }
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(rx)
    }
}
