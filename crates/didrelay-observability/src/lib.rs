//! didrelay Observability Infrastructure
//!
//! 提供统一的日志和指标功能。

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{ObservabilityError, Result};
pub use logging::LogManager;
pub use metrics::{ConnectionMetrics, MetricsCollector, RelayMetrics};

use didrelay_config::RelayConfig;

/// 统一的观测性句柄
#[derive(Debug)]
pub struct Observability {
    /// 日志管理器
    log_manager: LogManager,
    /// 指标收集器
    metrics: MetricsCollector,
}

impl Observability {
    /// 初始化观测性基础设施
    pub fn init(config: &RelayConfig) -> Result<Self> {
        let log_manager = LogManager::init(&config.logging)?;
        let metrics = MetricsCollector::init(&config.metrics)?;

        tracing::info!(
            target: "didrelay_observability",
            "Observability infrastructure initialized"
        );

        Ok(Self {
            log_manager,
            metrics,
        })
    }

    /// 获取日志管理器
    pub fn log_manager(&self) -> &LogManager {
        &self.log_manager
    }

    /// 获取指标收集器
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}
