// ==========================================
// 医疗数据导入系统 - HTTP 服务入口
// ==========================================
// 配置: 环境变量（见 config::app_config::env_keys）
// 技术栈: tokio + axum + rusqlite
// ==========================================

use anyhow::Context;
use healthcare_ingest::app::{router, AppState};
use healthcare_ingest::config::AppConfig;
use healthcare_ingest::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", healthcare_ingest::APP_NAME);
    tracing::info!("系统版本: {}", healthcare_ingest::VERSION);
    tracing::info!("==================================================");

    let config = AppConfig::from_env().map_err(anyhow::Error::msg)?;
    tracing::info!(db_path = %config.db_path, bind = %config.bind_addr, "运行配置已加载");

    let state = AppState::new(&config)
        .await
        .map_err(anyhow::Error::msg)
        .context("无法初始化AppState")?;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("无法监听地址 {}", config.bind_addr))?;
    tracing::info!("HTTP 服务启动于 {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP 服务已退出");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("无法监听退出信号: {}", e);
        std::future::pending::<()>().await;
    }
}
