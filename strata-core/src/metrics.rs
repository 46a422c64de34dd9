//! In-process metrics
//!
//! Counters, gauges and histograms rendered in the Prometheus text format.
//! Data loading records into the statics of `standard`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Renders itself in Prometheus exposition format
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;
    fn to_prometheus(&self) -> String;
}

fn header(name: &str, help: &str, kind: &str) -> String {
    format!("# HELP {} {}\n# TYPE {} {}\n", name, help, name, kind)
}

/// Monotonically increasing count
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Metric for Counter {
    fn name(&self) -> &str {
        self.name
    }

    fn to_prometheus(&self) -> String {
        format!(
            "{}{} {}\n",
            header(self.name, self.help, "counter"),
            self.name,
            self.get()
        )
    }
}

/// Value that can go up or down
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Metric for Gauge {
    fn name(&self) -> &str {
        self.name
    }

    fn to_prometheus(&self) -> String {
        format!(
            "{}{} {}\n",
            header(self.name, self.help, "gauge"),
            self.name,
            self.get()
        )
    }
}

/// Latency distribution in seconds
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    /// Buckets from one millisecond to one minute
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(
            name,
            help,
            &[0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0],
        )
    }

    pub fn with_buckets(name: &'static str, help: &'static str, bounds: &[f64]) -> Self {
        Self {
            buckets: bounds.iter().map(|&b| (b, AtomicU64::new(0))).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        for (bound, count) in &self.buckets {
            if seconds <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Run `f` and record how long it took
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Metric for Histogram {
    fn name(&self) -> &str {
        self.name
    }

    fn to_prometheus(&self) -> String {
        let mut out = header(self.name, self.help, "histogram");
        for (bound, count) in &self.buckets {
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            self.name,
            self.count()
        ));
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        out.push_str(&format!("{}_sum {}\n", self.name, sum));
        out.push_str(&format!("{}_count {}\n", self.name, self.count()));
        out
    }
}

/// Standard data-loading metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static SAMPLES_SERVED: Counter =
        Counter::new("strata_samples_served_total", "Samples returned by Dataset::get");

    pub static SAMPLES_VETOED: Counter = Counter::new(
        "strata_samples_vetoed_total",
        "Samples dropped by a pipeline stage",
    );

    pub static RECORDS_DECODED: Counter = Counter::new(
        "strata_records_decoded_total",
        "Records materialized from decoded sample files",
    );

    pub static BYTES_FETCHED: Counter = Counter::new(
        "strata_bytes_fetched_total",
        "Archive bytes downloaded",
    );

    pub static DATASETS_LOADED: Gauge =
        Gauge::new("strata_datasets_loaded", "Datasets currently constructed");

    pub static DECODE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new(
            "strata_decode_duration_seconds",
            "Time to decode one split of a sample file pair",
        )
    });

    pub static FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("strata_fetch_duration_seconds", "Time to fetch one archive")
    });
}

/// Render every standard metric
pub fn gather_metrics() -> String {
    let metrics: [&dyn Metric; 7] = [
        &standard::SAMPLES_SERVED,
        &standard::SAMPLES_VETOED,
        &standard::RECORDS_DECODED,
        &standard::BYTES_FETCHED,
        &standard::DATASETS_LOADED,
        &*standard::DECODE_DURATION,
        &*standard::FETCH_DURATION,
    ];
    metrics.iter().map(|m| m.to_prometheus()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
        assert!(counter.to_prometheus().ends_with("test_counter 6\n"));
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.set(10);
        gauge.add(-3);
        assert_eq!(gauge.get(), 7);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new("test_histogram", "Test histogram");
        histogram.observe(0.001);
        histogram.observe(0.2);
        histogram.observe(120.0);

        let text = histogram.to_prometheus();
        assert!(text.contains("test_histogram_bucket{le=\"0.001\"} 1"));
        assert!(text.contains("test_histogram_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("test_histogram_count 3"));
    }

    #[test]
    fn test_gather_lists_standard_metrics() {
        let text = gather_metrics();
        assert!(text.contains("strata_samples_served_total"));
        assert!(text.contains("strata_fetch_duration_seconds_count"));
    }
}
