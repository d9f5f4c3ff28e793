use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl RelayConfig {
    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["gateway", "bind"] => Some(self.gateway.bind.clone()),
            ["gateway", "max_connections"] => Some(self.gateway.max_connections.to_string()),
            ["gateway", "close_superseded"] => Some(self.gateway.close_superseded.to_string()),
            ["gateway", "outbound_queue"] => Some(self.gateway.outbound_queue.to_string()),
            ["logging", "level"] => Some(self.logging.level.as_str().to_string()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            ["logging", "ansi_colors"] => Some(self.logging.ansi_colors.to_string()),
            ["metrics", "enabled"] => Some(self.metrics.enabled.to_string()),
            ["metrics", "prometheus_bind"] => self.metrics.prometheus_bind.clone(),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["gateway", "bind"] => {
                self.gateway.bind = value.to_string();
            }
            ["gateway", "max_connections"] => {
                self.gateway.max_connections = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid number: {}", value))
                })?;
            }
            ["gateway", "close_superseded"] => {
                self.gateway.close_superseded = parse_bool(value)?;
            }
            ["gateway", "outbound_queue"] => {
                self.gateway.outbound_queue = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid number: {}", value))
                })?;
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "json_format"] => {
                self.logging.json_format = parse_bool(value)?;
            }
            ["logging", "ansi_colors"] => {
                self.logging.ansi_colors = parse_bool(value)?;
            }
            ["metrics", "enabled"] => {
                self.metrics.enabled = parse_bool(value)?;
            }
            ["metrics", "prometheus_bind"] => {
                self.metrics.prometheus_bind = Some(value.to_string());
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> ConfigResult<bool> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid boolean: {}", value)))
}

/// Gateway 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// 绑定地址 (e.g., "127.0.0.1:8787")
    pub bind: String,
    /// 最大并发连接数
    pub max_connections: usize,
    /// 同一标识被重新注册时，是否关闭被替换的旧连接
    pub close_superseded: bool,
    /// 每个连接待发送队列的容量，写满时视为发送失败
    pub outbound_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            max_connections: 10_000,
            close_superseded: false,
            outbound_queue: 256,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// 是否使用 JSON 格式
    pub json_format: bool,
    /// 是否启用 ANSI 颜色
    pub ansi_colors: bool,
    /// 模块级别的日志配置，例如 `{"didrelay_gateway": "debug"}`
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            ansi_colors: true,
            module_levels: HashMap::new(),
        }
    }
}

/// 指标配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// 是否启用指标收集
    pub enabled: bool,
    /// Prometheus 导出器监听地址；为空时不启动导出器
    pub prometheus_bind: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus_bind: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.gateway.bind, "127.0.0.1:8787");
        assert!(!config.gateway.close_superseded);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.metrics.prometheus_bind.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RelayConfig =
            serde_json::from_str(r#"{"gateway": {"bind": "0.0.0.0:9000"}}"#).unwrap();
        assert_eq!(config.gateway.bind, "0.0.0.0:9000");
        assert_eq!(config.gateway.max_connections, 10_000);
        assert_eq!(config.gateway.outbound_queue, 256);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_get_and_set_value() {
        let mut config = RelayConfig::default();
        config.set_value("gateway.close_superseded", "true").unwrap();
        config.set_value("logging.level", "WARNING").unwrap();
        config.set_value("metrics.prometheus_bind", "127.0.0.1:9100").unwrap();
        config.set_value("gateway.outbound_queue", "32").unwrap();

        assert_eq!(config.get_value("gateway.close_superseded").as_deref(), Some("true"));
        assert_eq!(config.get_value("logging.level").as_deref(), Some("warn"));
        assert_eq!(
            config.get_value("metrics.prometheus_bind").as_deref(),
            Some("127.0.0.1:9100")
        );
        assert_eq!(config.gateway.outbound_queue, 32);
        assert!(config.get_value("gateway.nope").is_none());
    }

    #[test]
    fn test_set_value_rejects_bad_input() {
        let mut config = RelayConfig::default();
        assert!(matches!(
            config.set_value("gateway.max_connections", "lots"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            config.set_value("logging.level", "loud"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            config.set_value("storage.path", "/tmp"),
            Err(ConfigError::KeyNotFound(_))
        ));
    }
}
