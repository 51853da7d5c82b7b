//! # Prometheus 指标收集模块
//!
//! 记录失效通知的投递结果、尝试次数和耗时。

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 全局失效通知指标
pub static METRICS: Lazy<RevalidateMetrics> = Lazy::new(RevalidateMetrics::new);

/// 失效通知指标
pub struct RevalidateMetrics {
    /// 投递结果计数
    pub delivery_total: IntCounterVec,
    /// HTTP 尝试次数（含重试）
    pub delivery_attempts_total: IntCounterVec,
    /// 单个路由投递耗时（秒，含退避等待）
    pub delivery_duration_seconds: HistogramVec,
    /// 查找失败次数
    pub lookup_failure_total: IntCounterVec,
}

impl RevalidateMetrics {
    pub fn new() -> Self {
        let delivery_total = IntCounterVec::new(
            Opts::new(
                "revalidate_delivery_total",
                "Total number of revalidation deliveries by outcome",
            ),
            &["route", "outcome"],
        )
        .expect("Failed to create revalidate_delivery_total metric");

        let delivery_attempts_total = IntCounterVec::new(
            Opts::new(
                "revalidate_delivery_attempts_total",
                "Total number of HTTP attempts, including retries",
            ),
            &["route"],
        )
        .expect("Failed to create revalidate_delivery_attempts_total metric");

        let delivery_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "revalidate_delivery_duration_seconds",
                "Per-route delivery duration in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["route"],
        )
        .expect("Failed to create revalidate_delivery_duration_seconds metric");

        let lookup_failure_total = IntCounterVec::new(
            Opts::new(
                "revalidate_lookup_failure_total",
                "Total number of record or category lookups degraded to empty values",
            ),
            &["kind"],
        )
        .expect("Failed to create revalidate_lookup_failure_total metric");

        // 注册指标，忽略重复注册错误
        let _ = REGISTRY.register(Box::new(delivery_total.clone()));
        let _ = REGISTRY.register(Box::new(delivery_attempts_total.clone()));
        let _ = REGISTRY.register(Box::new(delivery_duration_seconds.clone()));
        let _ = REGISTRY.register(Box::new(lookup_failure_total.clone()));

        Self {
            delivery_total,
            delivery_attempts_total,
            delivery_duration_seconds,
            lookup_failure_total,
        }
    }

    pub fn record_outcome(&self, route: &str, outcome: &str) {
        self.delivery_total.with_label_values(&[route, outcome]).inc();
    }

    pub fn record_attempt(&self, route: &str) {
        self.delivery_attempts_total.with_label_values(&[route]).inc();
    }

    pub fn observe_duration(&self, route: &str, seconds: f64) {
        self.delivery_duration_seconds
            .with_label_values(&[route])
            .observe(seconds);
    }

    pub fn record_lookup_failure(&self, kind: &str) {
        self.lookup_failure_total.with_label_values(&[kind]).inc();
    }
}

impl Default for RevalidateMetrics {
    fn default() -> Self {
        Self::new()
    }
}
