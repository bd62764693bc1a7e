mod config;
mod http;
mod resolver;
mod session;
mod transcoder;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 摄像头 HLS 转码网关
#[derive(Parser, Debug)]
#[command(name = "stream-gateway", version, about)]
struct Args {
    /// TOML 配置文件，不指定时使用内置默认值
    #[arg(short, long, env = "STREAM_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// 覆盖配置中的监听端口
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("🚀 Stream gateway starting...");

    // 加载配置
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    info!("✓ Configuration loaded");
    info!("   Vendors: {}", config.vendors.entries.keys().cloned().collect::<Vec<_>>().join(", "));
    info!("   Transcoder: {}", config.transcoder.program);

    tokio::fs::create_dir_all(&config.output.root)
        .await
        .with_context(|| format!("Failed to create output root {}", config.output.root.display()))?;
    info!("✓ Output root: {}", config.output.root.display());

    // 创建会话管理器
    let discovery = Arc::new(resolver::OnvifClient::new(config.discovery.timeout())?);
    let manager = session::SessionManager::from_config(&config, discovery);
    info!("✓ Session manager initialized");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!("Invalid listen address {}:{}", config.server.host, config.server.port)
        })?;
    let server = http::HttpServer::new(addr, manager.clone(), config.output.clone());

    info!("✅ Stream gateway ready!");
    server.run(shutdown_signal()).await?;

    // 停止所有会话，等待转码进程退出、输出目录删除
    manager.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
