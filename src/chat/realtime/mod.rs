//! 实时同步模块
//!
//! 竞价变更的订阅生命周期：连接、故障分类、退避重连、防抖合并刷新

pub mod feed;
pub mod listener;
pub mod manager;
pub mod refresh;
pub mod status;

pub use feed::{BidChange, BidFeed, ChannelKey, FeedSignal, GalleryBidEvent, RealtimeFeedConfig, WebSocketBidFeed};
pub use listener::{ConnectionListener, EmptyConnectionListener};
pub use manager::{RealtimeConfig, RealtimeSubscriptionManager};
pub use refresh::{BidRefreshQueue, RefreshSink};
pub use status::{ChannelStatus, ConnectionState, ConnectionToast, ToastKind};
