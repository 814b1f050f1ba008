//! 主应用程序入口
//!
//! 加载配置、连接 PostgreSQL 与 Redis、启动实时推送中心和 Axum Web API 服务。

use std::{env, sync::Arc, time::Duration};

use application::{
    ConnectionHub, EngagementRanker, FeedAssembler, FeedService, HubConfig, HubHandle,
    LoggingPresenceObserver, PresenceObserver, Rescorer,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService, SessionConfig};

const STATS_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match env::var("FEEDHUB_CONFIG_FILE") {
        Ok(path) => AppConfig::from_file(path)?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate()?;

    let infrastructure = Infrastructure::connect(&config).await?;
    let posts = infrastructure.post_repository();

    let ranker = Arc::new(EngagementRanker::new(
        posts.clone(),
        infrastructure.score_store(),
    ));
    let feed = Arc::new(FeedService::new(ranker.clone(), FeedAssembler::new(posts)));

    let observer: Arc<dyn PresenceObserver> = Arc::new(LoggingPresenceObserver);
    let (hub, hub_task) = ConnectionHub::spawn(HubConfig::from(&config.realtime), Some(observer));
    let stats_task = tokio::spawn(log_hub_stats(hub.clone()));

    let state = AppState::new(
        hub,
        feed,
        ranker as Arc<dyn Rescorer>,
        Arc::new(JwtService::new(config.jwt.clone())),
        SessionConfig::from(&config.realtime),
    );

    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("feedhub 服务器启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 所有句柄释放后推送中心退出；仍有未关闭的长连接时不再等待
    stats_task.abort();
    if tokio::time::timeout(SHUTDOWN_GRACE, hub_task).await.is_err() {
        tracing::warn!("推送中心未在限定时间内退出");
    }
    tracing::info!("服务器已停止");
    Ok(())
}

async fn log_hub_stats(hub: HubHandle) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let stats = hub.stats();
        tracing::info!(
            online_users = stats.online_users,
            sessions = stats.sessions,
            delivered = stats.delivered,
            dropped = stats.dropped,
            evicted = stats.evicted,
            "推送中心统计"
        );
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
