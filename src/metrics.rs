//! Metrics collection and export for component pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Instrumentation hooks the pool reports into
///
/// Every method has a no-op default so sinks only implement what they
/// record. Calls happen on pool threads and must not block.
pub trait MetricsSink: Send + Sync {
    /// Current split between free and leased components
    fn record_sizes(&self, _pool: &str, _free: usize, _processing: usize) {}

    /// Time spent acquiring and serving one component
    fn record_acquire_time(&self, _pool: &str, _elapsed: Duration) {}

    /// An acquisition gave up waiting on a full pool
    fn record_acquire_timeout(&self, _pool: &str) {}

    /// Duration of a completed lease
    fn record_lease_time(&self, _pool: &str, _lease: Duration) {}

    fn record_creation(&self, _pool: &str) {}

    fn record_termination(&self, _pool: &str) {}
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {}

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use esox_componentpool::PoolMetrics;
///
/// let metrics = PoolMetrics::default();
/// assert_eq!(metrics.export()["total_served"], "0");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Components handed out to callers
    pub total_served: usize,

    /// Components returned to the pool
    pub total_returned: usize,

    /// Instances created by the factory
    pub total_created: usize,

    /// Instances terminated and closed
    pub total_terminated: usize,

    /// Acquisitions that timed out on a full pool
    pub acquire_timeouts: usize,

    /// Instances rejected by validation on create or acquire
    pub validation_failures: usize,

    /// Creation attempts that failed or timed out
    pub creation_failures: usize,

    /// Current number of components (free and leased)
    pub pool_size: usize,

    /// Current number of free components
    pub free_size: usize,

    /// Current number of leased components
    pub processing_size: usize,

    /// Leased share of the maximum size (0.0 when unbounded)
    pub utilization: f64,

    /// Maximum pool size, 0 for unbounded
    pub max_capacity: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_served".to_string(), self.total_served.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_terminated".to_string(), self.total_terminated.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("pool_size".to_string(), self.pool_size.to_string());
        metrics.insert("free_size".to_string(), self.free_size.to_string());
        metrics.insert("processing_size".to_string(), self.processing_size.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus text format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_componentpool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&PoolMetrics::default(), "db", Some(&tags));
    /// assert!(output.contains("componentpool_components_processing"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauge metrics
        Self::push(&mut output, "componentpool_components_total", "gauge", "Current pool size", &labels, metrics.pool_size);
        Self::push(&mut output, "componentpool_components_free", "gauge", "Current free components", &labels, metrics.free_size);
        Self::push(&mut output, "componentpool_components_processing", "gauge", "Current leased components", &labels, metrics.processing_size);
        output.push_str("# HELP componentpool_utilization Pool utilization ratio\n");
        output.push_str("# TYPE componentpool_utilization gauge\n");
        output.push_str(&format!("componentpool_utilization{{{}}} {:.2}\n", labels, metrics.utilization));

        // Counter metrics
        Self::push(&mut output, "componentpool_served_total", "counter", "Components served", &labels, metrics.total_served);
        Self::push(&mut output, "componentpool_returned_total", "counter", "Components returned", &labels, metrics.total_returned);
        Self::push(&mut output, "componentpool_created_total", "counter", "Instances created", &labels, metrics.total_created);
        Self::push(&mut output, "componentpool_terminated_total", "counter", "Instances terminated", &labels, metrics.total_terminated);
        Self::push(&mut output, "componentpool_acquire_timeouts_total", "counter", "Acquire timeouts", &labels, metrics.acquire_timeouts);
        Self::push(&mut output, "componentpool_validation_failures_total", "counter", "Validation failures", &labels, metrics.validation_failures);
        Self::push(&mut output, "componentpool_creation_failures_total", "counter", "Creation failures", &labels, metrics.creation_failures);

        output
    }

    fn push(output: &mut String, name: &str, kind: &str, help: &str, labels: &str, value: usize) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_served: AtomicUsize,
    pub total_returned: AtomicUsize,
    pub total_created: AtomicUsize,
    pub total_terminated: AtomicUsize,
    pub acquire_timeouts: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub creation_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, pool_size: usize, free_size: usize, capacity: usize) -> PoolMetrics {
        let processing_size = pool_size.saturating_sub(free_size);
        let utilization = if capacity > 0 {
            processing_size as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_served: self.total_served.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_terminated: self.total_terminated.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            pool_size,
            free_size,
            processing_size,
            utilization,
            max_capacity: capacity,
        }
    }
}

#[cfg(feature = "metrics")]
pub use self::prometheus_sink::PrometheusMetricsSink;

#[cfg(feature = "metrics")]
mod prometheus_sink {
    use super::MetricsSink;
    use prometheus::{
        Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
        TextEncoder,
    };
    use std::time::Duration;

    /// [`MetricsSink`] backed by a `prometheus` registry
    ///
    /// All series carry a `pool` label, so one sink can serve several pools.
    pub struct PrometheusMetricsSink {
        registry: Registry,
        free: IntGaugeVec,
        processing: IntGaugeVec,
        acquire_timeouts: IntCounterVec,
        created: IntCounterVec,
        terminated: IntCounterVec,
        acquire_time: HistogramVec,
        lease_time: HistogramVec,
    }

    impl PrometheusMetricsSink {
        /// Register the pool series on a fresh registry
        pub fn new() -> prometheus::Result<Self> {
            Self::with_registry(Registry::new())
        }

        /// Register the pool series on an existing registry
        pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
            let free = IntGaugeVec::new(
                Opts::new("componentpool_components_free", "Current free components"),
                &["pool"],
            )?;
            let processing = IntGaugeVec::new(
                Opts::new("componentpool_components_processing", "Current leased components"),
                &["pool"],
            )?;
            let acquire_timeouts = IntCounterVec::new(
                Opts::new("componentpool_acquire_timeouts_total", "Acquire timeouts"),
                &["pool"],
            )?;
            let created = IntCounterVec::new(
                Opts::new("componentpool_created_total", "Instances created"),
                &["pool"],
            )?;
            let terminated = IntCounterVec::new(
                Opts::new("componentpool_terminated_total", "Instances terminated"),
                &["pool"],
            )?;
            let acquire_time = HistogramVec::new(
                HistogramOpts::new("componentpool_acquire_seconds", "Time to acquire a component"),
                &["pool"],
            )?;
            let lease_time = HistogramVec::new(
                HistogramOpts::new("componentpool_lease_seconds", "Time a component stayed leased"),
                &["pool"],
            )?;

            registry.register(Box::new(free.clone()))?;
            registry.register(Box::new(processing.clone()))?;
            registry.register(Box::new(acquire_timeouts.clone()))?;
            registry.register(Box::new(created.clone()))?;
            registry.register(Box::new(terminated.clone()))?;
            registry.register(Box::new(acquire_time.clone()))?;
            registry.register(Box::new(lease_time.clone()))?;

            Ok(Self {
                registry,
                free,
                processing,
                acquire_timeouts,
                created,
                terminated,
                acquire_time,
                lease_time,
            })
        }

        pub fn registry(&self) -> &Registry {
            &self.registry
        }

        /// Render the registry in the text exposition format
        pub fn gather_text(&self) -> String {
            let mut buffer = Vec::new();
            if let Err(error) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                tracing::warn!(%error, "Failed to encode prometheus metrics");
            }
            String::from_utf8_lossy(&buffer).into_owned()
        }
    }

    impl MetricsSink for PrometheusMetricsSink {
        fn record_sizes(&self, pool: &str, free: usize, processing: usize) {
            self.free.with_label_values(&[pool]).set(free as i64);
            self.processing.with_label_values(&[pool]).set(processing as i64);
        }

        fn record_acquire_time(&self, pool: &str, elapsed: Duration) {
            self.acquire_time.with_label_values(&[pool]).observe(elapsed.as_secs_f64());
        }

        fn record_acquire_timeout(&self, pool: &str) {
            self.acquire_timeouts.with_label_values(&[pool]).inc();
        }

        fn record_lease_time(&self, pool: &str, lease: Duration) {
            self.lease_time.with_label_values(&[pool]).observe(lease.as_secs_f64());
        }

        fn record_creation(&self, pool: &str) {
            self.created.with_label_values(&[pool]).inc();
        }

        fn record_termination(&self, pool: &str) {
            self.terminated.with_label_values(&[pool]).inc();
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_derives_processing_and_utilization() {
        let tracker = MetricsTracker::new();
        MetricsTracker::increment(&tracker.total_served);
        MetricsTracker::increment(&tracker.total_served);

        let metrics = tracker.get_metrics(4, 1, 10);
        assert_eq!(metrics.total_served, 2);
        assert_eq!(metrics.processing_size, 3);
        assert!((metrics.utilization - 0.3).abs() < f64::EPSILON);

        let unbounded = tracker.get_metrics(4, 1, 0);
        assert_eq!(unbounded.utilization, 0.0);
    }

    #[test]
    fn test_prometheus_text_contains_pool_label() {
        let metrics = PoolMetrics {
            pool_size: 2,
            free_size: 1,
            processing_size: 1,
            ..PoolMetrics::default()
        };
        let output = MetricsExporter::export_prometheus(&metrics, "cache", None);
        assert!(output.contains("componentpool_components_total{pool=\"cache\"} 2"));
        assert!(output.contains("# TYPE componentpool_served_total counter"));
    }
}
