//! 结构化日志模块
//!
//! 提供基于 tracing 的结构化日志功能。

use didrelay_config::{LogLevel, LoggingConfig};
use tracing_subscriber::{
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::error::{ObservabilityError, Result};

/// 日志级别重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

/// 日志管理器
#[derive(Debug)]
pub struct LogManager {
    config: LoggingConfig,
    /// 过滤器重新加载句柄
    reload_handle: ReloadHandle,
}

impl LogManager {
    /// 初始化全局日志订阅器
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let filter = build_filter(config)?;
        let (filter, reload_handle) = reload::Layer::new(filter);
        let registry = tracing_subscriber::registry().with(filter);

        let installed = if config.json_format {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_line_number(true)
                .with_ansi(false);
            registry.with(layer).try_init()
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_ansi(config.ansi_colors);
            registry.with(layer).try_init()
        };

        installed.map_err(|e| {
            ObservabilityError::logging(format!("Failed to install subscriber: {}", e))
        })?;

        tracing::info!(
            target: "didrelay_observability",
            "Log manager initialized with level: {}",
            config.level
        );

        Ok(Self {
            config: config.clone(),
            reload_handle,
        })
    }

    /// 动态更新日志级别，保留模块级别的过滤器
    pub fn update_level(&mut self, level: LogLevel) -> Result<()> {
        let mut config = self.config.clone();
        config.level = level;
        let new_filter = build_filter(&config)?;

        self.reload_handle
            .modify(|filter| *filter = new_filter)
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;
        self.config = config;

        tracing::info!(
            target: "didrelay_observability",
            "Log level updated to: {}",
            level
        );
        Ok(())
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

/// 构建环境过滤器
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(config.level.as_str())
        .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

    // 添加模块级别的过滤器
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(
            format!("{}={}", module, level)
                .parse()
                .map_err(|e| ObservabilityError::logging(format!("Invalid directive: {}", e)))?,
        );
    }

    Ok(filter)
}

/// 创建带有连接上下文的 span
pub fn connection_span(connection_id: &str, peer: Option<std::net::SocketAddr>) -> tracing::Span {
    match peer {
        Some(addr) => tracing::info_span!(
            "connection",
            connection_id = %connection_id,
            peer = %addr,
        ),
        None => tracing::info_span!("connection", connection_id = %connection_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use didrelay_config::LogLevel;

    #[test]
    fn test_build_filter_with_module_levels() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            ..LoggingConfig::default()
        };
        config
            .module_levels
            .insert("didrelay_gateway".to_string(), "debug".to_string());

        let filter = build_filter(&config).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("didrelay_gateway=debug"));
        assert!(rendered.contains("warn"));
    }

    #[test]
    fn test_build_filter_rejects_bad_directive() {
        let mut config = LoggingConfig::default();
        config
            .module_levels
            .insert("didrelay_gateway".to_string(), "loud".to_string());

        let err = build_filter(&config).unwrap_err();
        assert_eq!(err.category(), "logging");
    }

    // Only one global subscriber can ever be installed per process, so the
    // whole lifecycle lives in a single test.
    #[test]
    fn test_init_once_then_update_level() {
        let config = LoggingConfig {
            ansi_colors: false,
            ..LoggingConfig::default()
        };
        let mut manager = LogManager::init(&config).unwrap();
        assert!(LogManager::init(&config).is_err());

        manager.update_level(LogLevel::Debug).unwrap();
        assert_eq!(manager.config().level, LogLevel::Debug);
        assert!(tracing::enabled!(tracing::Level::DEBUG));
    }
}
