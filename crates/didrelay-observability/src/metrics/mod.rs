//! 指标收集模块
//!
//! 提供基于 metrics 库的指标收集功能。未安装 recorder 时所有记录均为空操作。

use didrelay_config::MetricsConfig;
use metrics::{describe_counter, describe_gauge, Unit};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{ObservabilityError, Result};

/// Metric names emitted by the relay.
pub mod names {
    #![allow(missing_docs)]

    pub const CONNECTIONS_ACCEPTED: &str = "didrelay_connections_accepted_total";
    pub const CONNECTIONS_REJECTED: &str = "didrelay_connections_rejected_total";
    pub const CONNECTIONS_ACTIVE: &str = "didrelay_connections_active";
    pub const REGISTRATIONS: &str = "didrelay_registrations_total";
    pub const IDENTIFIERS_REGISTERED: &str = "didrelay_identifiers_registered";
    pub const MESSAGES_RELAYED: &str = "didrelay_messages_relayed_total";
    pub const MESSAGES_DROPPED: &str = "didrelay_messages_dropped_total";
    pub const DECODE_ERRORS: &str = "didrelay_decode_errors_total";
}

/// 指标收集器
#[derive(Debug)]
pub struct MetricsCollector {
    config: MetricsConfig,
    exporter_running: bool,
}

impl MetricsCollector {
    /// 初始化指标收集器
    ///
    /// 配置了 `prometheus_bind` 时会安装全局 recorder 并启动 HTTP 导出器。
    pub fn init(config: &MetricsConfig) -> Result<Self> {
        let mut collector = Self {
            config: config.clone(),
            exporter_running: false,
        };

        if !config.enabled {
            return Ok(collector);
        }

        if let Some(ref bind) = config.prometheus_bind {
            collector.install_exporter(bind)?;
        }

        register_descriptions();

        tracing::info!(
            target: "didrelay_observability",
            "Metrics collector initialized (exporter: {})",
            collector.exporter_running
        );

        Ok(collector)
    }

    #[cfg(feature = "prometheus")]
    fn install_exporter(&mut self, bind: &str) -> Result<()> {
        let addr: std::net::SocketAddr = bind.parse().map_err(|e| {
            ObservabilityError::config(format!("Invalid prometheus bind '{}': {}", bind, e))
        })?;

        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| {
                ObservabilityError::metrics(format!("Failed to install exporter: {}", e))
            })?;

        self.exporter_running = true;
        tracing::info!(target: "didrelay_observability", "Prometheus exporter on http://{}", addr);
        Ok(())
    }

    #[cfg(not(feature = "prometheus"))]
    fn install_exporter(&mut self, bind: &str) -> Result<()> {
        Err(ObservabilityError::metrics(format!(
            "Prometheus support not compiled in, cannot listen on {}",
            bind
        )))
    }

    /// 是否已启动导出器
    pub fn exporter_running(&self) -> bool {
        self.exporter_running
    }

    /// 获取当前配置
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }
}

/// 注册指标描述
fn register_descriptions() {
    describe_counter!(
        names::CONNECTIONS_ACCEPTED,
        Unit::Count,
        "WebSocket connections that completed the upgrade"
    );
    describe_counter!(
        names::CONNECTIONS_REJECTED,
        Unit::Count,
        "Requests refused before upgrade, by reason"
    );
    describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        Unit::Count,
        "Currently open WebSocket connections"
    );
    describe_counter!(
        names::REGISTRATIONS,
        Unit::Count,
        "Accepted register envelopes"
    );
    describe_gauge!(
        names::IDENTIFIERS_REGISTERED,
        Unit::Count,
        "Identifiers currently present in the routing table"
    );
    describe_counter!(
        names::MESSAGES_RELAYED,
        Unit::Count,
        "Routed envelopes handed to a live target"
    );
    describe_counter!(
        names::MESSAGES_DROPPED,
        Unit::Count,
        "Routed envelopes dropped, by reason"
    );
    describe_counter!(
        names::DECODE_ERRORS,
        Unit::Count,
        "Inbound frames that were not a recognised envelope"
    );
}

/// 连接指标记录器
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    /// 记录完成升级的连接
    pub fn record_accepted() {
        metrics::counter!(names::CONNECTIONS_ACCEPTED).increment(1);
        metrics::gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
    }

    /// 记录连接关闭
    pub fn record_closed() {
        metrics::gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }

    /// 记录升级前被拒绝的请求
    pub fn record_rejected(reason: &'static str) {
        metrics::counter!(names::CONNECTIONS_REJECTED, "reason" => reason).increment(1);
    }
}

/// 路由指标记录器
pub struct RelayMetrics;

impl RelayMetrics {
    /// 记录注册
    pub fn record_registration() {
        metrics::counter!(names::REGISTRATIONS).increment(1);
    }

    /// 设置路由表大小
    pub fn set_registered(count: usize) {
        metrics::gauge!(names::IDENTIFIERS_REGISTERED).set(count as f64);
    }

    /// 记录成功转发
    pub fn record_relayed() {
        metrics::counter!(names::MESSAGES_RELAYED).increment(1);
    }

    /// 记录丢弃
    pub fn record_dropped(reason: &'static str) {
        metrics::counter!(names::MESSAGES_DROPPED, "reason" => reason).increment(1);
    }

    /// 记录解码错误
    pub fn record_decode_error() {
        metrics::counter!(names::DECODE_ERRORS).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_collector_installs_nothing() {
        let config = MetricsConfig {
            enabled: false,
            prometheus_bind: Some("127.0.0.1:0".to_string()),
        };
        let collector = MetricsCollector::init(&config).unwrap();
        assert!(!collector.exporter_running());
    }

    #[test]
    fn test_collector_without_exporter() {
        let collector = MetricsCollector::init(&MetricsConfig::default()).unwrap();
        assert!(!collector.exporter_running());

        // Recording without a recorder is a no-op.
        RelayMetrics::record_relayed();
        RelayMetrics::record_dropped("no_route");
        ConnectionMetrics::record_rejected("upgrade_required");
    }

    #[test]
    fn test_invalid_exporter_address() {
        let config = MetricsConfig {
            enabled: true,
            prometheus_bind: Some("not-an-address".to_string()),
        };
        let err = MetricsCollector::init(&config).unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
