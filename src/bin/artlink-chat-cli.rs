//! Artlink 聊天核心 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示聊天核心功能：
//! 启动时按参数连接存储与实时订阅源，可选地确权一条报价单线程，
//! 之后持续展示连接状态变化与竞价刷新回调。

use anyhow::{Context, Result};
use artlink_chat_core::chat::participant::ParticipantResolver;
use artlink_chat_core::chat::provider::{HttpConversationProvider, ProviderConfig};
use artlink_chat_core::chat::realtime::{
    ConnectionListener, RealtimeFeedConfig, RefreshSink, WebSocketBidFeed,
};
use artlink_chat_core::chat::scope::ScopeField;
use artlink_chat_core::chat::store::{self, DirectoryDao, ParticipantDao, ThreadDao};
use artlink_chat_core::{
    EnsureThreadInput, RealtimeConfig, RealtimeSubscriptionManager, RoleTokenConfig,
    ThreadOrchestrator,
};
use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// Artlink 聊天核心 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "artlink-chat-cli")]
#[command(about = "Artlink 聊天核心 CLI - 用于测试和展示线程编排与实时同步", long_about = None)]
struct Args {
    /// SQLite 数据库 URL
    #[arg(long, default_value = "sqlite://artlink-chat.db?mode=rwc")]
    db_url: String,

    /// 会话服务商 API 基础地址
    #[arg(long, default_value = "http://localhost:4010")]
    provider_url: String,

    /// 服务商账号 SID
    #[arg(long, default_value = "AC_dev")]
    account_sid: String,

    /// 服务商鉴权 token
    #[arg(long, default_value = "dev-token")]
    auth_token: String,

    /// client 角色 token
    #[arg(long, default_value = "RL_client_dev")]
    client_role_sid: String,

    /// shipper 角色 token
    #[arg(long, default_value = "RL_shipper_dev")]
    shipper_role_sid: String,

    /// 实时订阅源 WebSocket 地址
    #[arg(long, default_value = "ws://localhost:4011")]
    realtime_url: String,

    /// 实时订阅源接入 key
    #[arg(long, default_value = "dev-key")]
    realtime_key: String,

    /// 订阅竞价变更的画廊组织 ID
    #[arg(short, long, default_value = "G1")]
    org_id: String,

    /// 启动时确权线程的报价单 ID（可选）
    #[arg(short, long)]
    quote_id: Option<String>,

    /// 确权线程用的发起人用户 ID
    #[arg(short, long, default_value = "U1")]
    user_id: String,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,artlink_chat_core=debug）
    #[arg(long, default_value = "info,artlink_chat_core=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 连接状态监听器：打印所有连接状态变化
struct CliConnectionListener;

#[async_trait::async_trait]
impl ConnectionListener for CliConnectionListener {
    async fn on_reconnecting(&self, channel_key: &str, delay_ms: u64) {
        info!(
            "[CLI/Realtime] 🔄 通道 {} 掉线，{}ms 后重连",
            channel_key, delay_ms
        );
    }

    async fn on_reconnected(&self, channel_key: &str) {
        info!("[CLI/Realtime] ✅ 通道 {} 重连成功", channel_key);
    }
}

/// 刷新回调：打印合并后的刷新请求
struct CliRefreshSink;

#[async_trait::async_trait]
impl RefreshSink for CliRefreshSink {
    async fn refresh_quote_bids(
        &self,
        quote_id: &str,
    ) -> artlink_chat_core::ChatResult<()> {
        info!("[CLI/Refresh] 📬 刷新报价单 {} 的竞价数据", quote_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    info!("[CLI] 🚀 启动 Artlink 聊天核心 CLI");
    info!("[CLI]   数据库: {}", args.db_url);
    info!("[CLI]   服务商: {}", args.provider_url);
    info!("[CLI]   订阅组织: {}", args.org_id);

    // 连接数据库并初始化表结构
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&args.db_url)
        .await
        .context(format!("连接 SQLite 数据库失败: {}", args.db_url))?;
    store::init_db_with_connection(&pool)
        .await
        .context("初始化数据库表结构失败")?;

    // 组装服务商客户端与编排服务
    let provider = Arc::new(HttpConversationProvider::new(
        reqwest::Client::new(),
        ProviderConfig {
            api_base_url: args.provider_url.clone(),
            account_sid: args.account_sid.clone(),
            auth_token: args.auth_token.clone(),
        },
    ));
    let roles = RoleTokenConfig::new(args.client_role_sid.clone(), args.shipper_role_sid.clone())
        .context("角色 token 配置非法")?;
    let participants = Arc::new(ParticipantResolver::new(
        ThreadDao::new(pool.clone()),
        ParticipantDao::new(pool.clone()),
        DirectoryDao::new(pool.clone()),
        provider.clone(),
        roles,
    ));
    let orchestrator = ThreadOrchestrator::new(
        ThreadDao::new(pool.clone()),
        DirectoryDao::new(pool.clone()),
        provider,
        participants,
    );

    // 可选：启动时确权一条报价单线程
    if let Some(quote_id) = &args.quote_id {
        info!("[CLI] 🧵 确权报价单 {} 的协商线程", quote_id);
        match orchestrator
            .ensure_thread_for_quote(EnsureThreadInput {
                quote_id: quote_id.clone(),
                initiator_user_id: args.user_id.clone(),
                shipment_id: ScopeField::NotProvided,
                shipper_branch_org_id: ScopeField::NotProvided,
                gallery_branch_org_id: ScopeField::NotProvided,
            })
            .await
        {
            Ok(thread) => info!(
                "[CLI] ✅ 线程就绪: id={}, conversationSid={}, uniqueName={}",
                thread.id, thread.conversation_sid, thread.conversation_unique_name
            ),
            Err(e) => error!("[CLI] ❌ 线程确权失败: {}", e),
        }
    }

    // 订阅竞价变更
    let manager = RealtimeSubscriptionManager::new(
        Arc::new(WebSocketBidFeed::new(RealtimeFeedConfig {
            ws_url: args.realtime_url.clone(),
            api_key: args.realtime_key.clone(),
        })),
        Arc::new(CliConnectionListener),
        Arc::new(CliRefreshSink),
        RealtimeConfig::default(),
    );
    manager.subscribe_to_gallery_bids(&args.org_id);

    if args.duration > 0 {
        info!("[CLI] ⏱️ 运行 {} 秒后退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] 持续运行，Ctrl+C 退出");
        tokio::signal::ctrl_c().await.context("等待退出信号失败")?;
    }

    info!("[CLI] 🧹 注销全部实时通道");
    manager.unsubscribe_from_all();
    info!("[CLI] 👋 退出");
    Ok(())
}
