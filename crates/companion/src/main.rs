mod api;
mod companion;
mod completion;
mod config;
mod database;
mod store;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use crate::companion::{CompanionService, ModelSettings};
use crate::completion::OpenAiClient;
use crate::config::Config;
use crate::database::setup_database;
use crate::store::MessageStore;
use crate::utils::init_logger;
use crate::utils::signal::terminate;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logger(&config.log_level);
    info!("companion-rs {} 启动中", env!("CARGO_PKG_VERSION"));
    debug!("{:?}", config);

    let target = config.database_target()?;
    let connection = setup_database(&target).await?;

    let client = OpenAiClient::new(&config.api_base_url, config.api_key.clone(), config.completion_timeout())?;
    if config.api_key.is_none() {
        warn!("未配置 API_KEY，对话请求将返回 500");
    }

    let service = Arc::new(CompanionService::new(
        MessageStore::new(connection.clone()),
        Arc::new(client),
        ModelSettings::from(&config),
        config.serialize_sessions,
    ));
    let app = api::router(service);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("绑定地址 {} 失败", config.bind))?;
    info!("开始监听 http://{}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(terminate()).await?;

    connection.close().await?;
    info!("companion-rs 已退出");
    Ok(())
}
