//! 观测性错误类型

/// 观测性错误类型
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ObservabilityError {
    /// 配置错误
    #[error("Configuration error: {message}")]
    Config {
        /// 错误描述
        message: String,
    },

    /// 日志错误
    #[error("Logging error: {message}")]
    Logging {
        /// 错误描述
        message: String,
    },

    /// 指标错误
    #[error("Metrics error: {message}")]
    Metrics {
        /// 错误描述
        message: String,
    },
}

impl ObservabilityError {
    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// 创建日志错误
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// 创建指标错误
    pub fn metrics(message: impl Into<String>) -> Self {
        Self::Metrics {
            message: message.into(),
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Logging { .. } => "logging",
            Self::Metrics { .. } => "metrics",
        }
    }
}

/// 观测性结果类型
pub type Result<T> = std::result::Result<T, ObservabilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(ObservabilityError::logging("bad level").category(), "logging");
        assert_eq!(ObservabilityError::metrics("no recorder").category(), "metrics");
        assert_eq!(
            ObservabilityError::config("bad addr").to_string(),
            "Configuration error: bad addr"
        );
    }
}
