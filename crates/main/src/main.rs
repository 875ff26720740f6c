//! 主应用程序入口
//!
//! 加载配置，选择存储后端，启动 Axum Web API 与 WebSocket 服务。

use std::{sync::Arc, time::Duration};

use application::{memory::MemoryObjectStore, ObjectStore, SystemClock};
use config::AppConfig;
use infrastructure::{BcryptPasswordHasher, CloudinaryObjectStore, Infrastructure};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, Collaborators};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let collaborators = build_collaborators(&config).await?;
    let (state, persistence_worker) = AppState::assemble(collaborators, config.clone());
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "服务已启动");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 路由释放后持久化队列的发送端全部关闭，等待剩余消息写完；
    // 仍在运行的 WebSocket 任务会持有发送端，因此只等待有限时间
    match tokio::time::timeout(DRAIN_TIMEOUT, persistence_worker).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "持久化任务异常退出"),
        Err(_) => tracing::warn!("等待持久化队列清空超时"),
    }
    tracing::info!("服务已停止");
    Ok(())
}

/// 配置了数据库时使用 Postgres，否则使用内存存储
async fn build_collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    let mut collaborators = if config.database.url.is_some() {
        let infra = Infrastructure::connect(&config.database, config.bcrypt_cost).await?;
        Collaborators {
            users: infra.user_repository(),
            chats: infra.chat_repository(),
            messages: infra.message_repository(),
            requests: infra.request_repository(),
            revoked_tokens: infra.revoked_tokens(),
            object_store: Arc::new(MemoryObjectStore::default()),
            password_hasher: infra.password_hasher.clone(),
            clock: Arc::new(SystemClock),
        }
    } else {
        tracing::warn!("未配置数据库，使用内存存储，重启后数据丢失");
        Collaborators::in_memory(Arc::new(BcryptPasswordHasher::new(config.bcrypt_cost)))
    };

    match &config.storage {
        Some(storage) => {
            let store: Arc<dyn ObjectStore> = Arc::new(CloudinaryObjectStore::new(storage));
            collaborators.object_store = store;
        }
        None => tracing::warn!("未配置对象存储，上传的文件只保存在内存中"),
    }

    Ok(collaborators)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
    }
    tracing::info!("收到关闭信号");
}
