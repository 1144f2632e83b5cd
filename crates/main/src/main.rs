//! 主应用程序入口
//!
//! 加载配置，选择存储后端，启动 Axum Web 服务。

use std::sync::Arc;

use application::{Clock, InMemoryStorage, SystemClock};
use config::AppConfig;
use infrastructure::{FsMediaStore, Infrastructure, InfrastructureConfig};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService, Repositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // 初始化日志，RUST_LOG 优先于配置文件
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repositories = build_repositories(&config, clock.clone()).await?;
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(repositories, jwt_service, clock);
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("聊天室服务器启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// 配置了数据库时使用 PostgreSQL，否则退回内存存储；媒体文件总是写到本地目录
async fn build_repositories(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Repositories> {
    match &config.database.url {
        Some(database_url) => {
            tracing::info!(
                "连接数据库: {}",
                database_url.rsplit('@').next().unwrap_or("unknown")
            );
            let infrastructure = Infrastructure::connect(InfrastructureConfig {
                database_url: database_url.clone(),
                max_connections: config.database.max_connections,
                media_root: config.media.root.clone().into(),
            })
            .await?;
            let storage = infrastructure.storage;

            Ok(Repositories {
                users: storage.user_repository.clone(),
                rooms: storage.room_repository.clone(),
                messages: storage.message_repository.clone(),
            })
        }
        None => {
            tracing::warn!("未配置数据库，使用内存存储，重启后数据丢失");
            let media = Arc::new(FsMediaStore::new(config.media.root.as_str()));
            let storage = Arc::new(InMemoryStorage::with_clock(media, clock));

            Ok(Repositories {
                users: storage.clone(),
                rooms: storage.clone(),
                messages: storage,
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，停止服务");
}
