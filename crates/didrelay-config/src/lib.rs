pub mod config;
pub mod manager;

pub use config::{
    ConfigError, ConfigResult, GatewayConfig, LogLevel, LoggingConfig, MetricsConfig, RelayConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// 获取 didrelay 配置目录路径
pub fn didrelay_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".didrelay"))
}

/// 获取默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    didrelay_dir().map(|dir| dir.join("config.json"))
}

/// 展开路径中的 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}
