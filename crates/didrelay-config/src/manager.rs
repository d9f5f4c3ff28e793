use crate::config::{ConfigError, ConfigResult, LogLevel, RelayConfig};
use regex::Regex;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<RelayConfig>>,
}

impl ConfigManager {
    /// 加载配置文件，文件不存在时使用默认配置
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            let content = tokio::fs::read_to_string(path).await?;
            let content = Self::expand_env_vars(&content)?;
            let config: RelayConfig = serde_json::from_str(&content)?;
            Self::validate(&config)?;
            config
        } else {
            info!("Config file not found at {:?}, using defaults", path);
            RelayConfig::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// 从默认位置加载配置
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = Self::default_config_path()?;
        Self::load(&config_path).await
    }

    /// 获取默认配置路径 (~/.didrelay/config.json)
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    /// 创建一个新的配置管理器（用于测试）
    pub fn new(config: RelayConfig, path: PathBuf) -> Self {
        Self {
            path,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// 获取当前配置的快照
    pub async fn snapshot(&self) -> RelayConfig {
        self.config.read().await.clone()
    }

    /// 更新配置（仅内存，不写回文件）
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut RelayConfig),
    {
        let mut config = self.config.write().await;
        let mut candidate = config.clone();
        f(&mut candidate);
        Self::validate(&candidate)?;
        *config = candidate;
        Ok(())
    }

    /// 验证配置
    pub fn validate(config: &RelayConfig) -> ConfigResult<()> {
        config.gateway.bind.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Validation(format!(
                "Invalid gateway bind address '{}': {}",
                config.gateway.bind, e
            ))
        })?;

        if config.gateway.max_connections == 0 {
            return Err(ConfigError::Validation(
                "Gateway max_connections must be greater than 0".to_string(),
            ));
        }

        if config.gateway.outbound_queue == 0 {
            return Err(ConfigError::Validation(
                "Gateway outbound_queue must be greater than 0".to_string(),
            ));
        }

        if let Some(ref bind) = config.metrics.prometheus_bind {
            bind.parse::<SocketAddr>().map_err(|e| {
                ConfigError::Validation(format!(
                    "Invalid prometheus bind address '{}': {}",
                    bind, e
                ))
            })?;
        }

        for (module, level) in &config.logging.module_levels {
            level.parse::<LogLevel>().map_err(|_| {
                ConfigError::Validation(format!(
                    "Invalid log level '{}' for module '{}'",
                    level, module
                ))
            })?;
        }

        Ok(())
    }

    /// 展开环境变量 ${VAR} 或 ${VAR:-default}
    fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::Validation(format!("Invalid env pattern: {}", e)))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let (Some(full_match), Some(var_expr)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let var_expr = var_expr.as_str();

            // 处理 ${VAR:-default} 语法
            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match std::env::var(var_name) {
                Ok(val) => val,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    None => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
                },
            };

            result = result.replace(full_match.as_str(), &replacement);
        }

        Ok(result)
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}
