use anyhow::Context;
use clap::Parser;
use didrelay_config::{ConfigManager, LogLevel, RelayConfig};
use didrelay_gateway::Gateway;
use didrelay_observability::Observability;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "didrelay")]
#[command(about = "Real-time WebSocket relay between DID endpoints")]
#[command(version)]
struct Cli {
    /// Config file path (default: ~/.didrelay/config.json)
    #[arg(long, env = "DIDRELAY_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(long, env = "DIDRELAY_BIND")]
    bind: Option<String>,

    /// Log level (overrides config)
    #[arg(long, env = "DIDRELAY_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Emit JSON logs (overrides config)
    #[arg(long, env = "DIDRELAY_JSON_LOGS")]
    json_logs: bool,

    /// Prometheus exporter address; enables metrics (overrides config)
    #[arg(long, env = "DIDRELAY_METRICS_BIND")]
    metrics_bind: Option<String>,
}

impl Cli {
    /// CLI 参数覆盖配置文件
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(bind) = &self.bind {
            config.gateway.bind = bind.clone();
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
        if let Some(addr) = &self.metrics_bind {
            config.metrics.enabled = true;
            config.metrics.prometheus_bind = Some(addr.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => {
            // 展开配置文件路径
            let config_path = didrelay_config::expand_tilde(path)
                .unwrap_or_else(|| std::path::PathBuf::from(path));
            ConfigManager::load(&config_path)
                .await
                .with_context(|| format!("Failed to load config from {:?}", config_path))?
        }
        None => ConfigManager::load_default()
            .await
            .context("Failed to load default config")?,
    };

    // CLI 参数覆盖配置文件，覆盖后重新校验
    config_manager
        .update(|config| cli.apply(config))
        .await
        .context("Invalid configuration")?;
    let config = config_manager.snapshot().await;

    let _observability =
        Observability::init(&config).context("Failed to initialize observability")?;
    info!("Config loaded from {:?}", config_manager.path());

    let gateway = Gateway::new(config.gateway);
    info!("Starting {}", gateway);
    gateway.run_until(shutdown_signal()).await?;

    info!("Relay stopped with {} identifiers registered", gateway.hub().len());
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
