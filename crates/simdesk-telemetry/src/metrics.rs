use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// Point-in-time value of one metric series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<HistogramSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Series identity: name plus labels sorted by key.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

/// Gauge values are stored as f64 bits so they can go negative.
struct Gauge(AtomicU64);

impl Gauge {
    fn new() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Samples kept per histogram series for percentile estimates.
pub const HISTOGRAM_WINDOW: usize = 1024;

/// Lifetime count and sum, percentiles over the most recent
/// [`HISTOGRAM_WINDOW`] samples.
#[derive(Default)]
struct HistogramState {
    recent: VecDeque<f64>,
    count: u64,
    sum: f64,
}

#[derive(Default)]
struct Histogram(Mutex<HistogramState>);

impl Histogram {
    fn observe(&self, value: f64) {
        let mut state = self.0.lock();
        if state.recent.len() == HISTOGRAM_WINDOW {
            state.recent.pop_front();
        }
        state.recent.push_back(value);
        state.count += 1;
        state.sum += value;
    }

    fn summary(&self) -> HistogramSummary {
        let (mut recent, count, sum) = {
            let state = self.0.lock();
            (state.recent.iter().copied().collect::<Vec<f64>>(), state.count, state.sum)
        };
        if recent.is_empty() {
            return HistogramSummary::default();
        }
        recent.sort_by(|a, b| a.total_cmp(b));
        let n = recent.len();
        let at = |q: f64| recent[((n as f64 * q) as usize).min(n - 1)];
        HistogramSummary {
            count,
            sum,
            p50: at(0.5),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

/// Thread-safe in-memory metrics. Values reset on restart.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, AtomicU64>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            c.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters
            .read()
            .get(&key)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.with_gauge(name, labels, |g| g.set(value));
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map_or(0.0, Gauge::get)
    }

    fn with_gauge(&self, name: &str, labels: &[(&str, &str)], f: impl FnOnce(&Gauge)) {
        let key = MetricKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            f(g);
            return;
        }
        f(self.gauges.write().entry(key).or_insert_with(Gauge::new));
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(h) = self.histograms.read().get(&key) {
            h.observe(value);
            return;
        }
        self.histograms.write().entry(key).or_default().observe(value);
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    /// Every series, sorted by name then labels.
    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        let timestamp = Utc::now().to_rfc3339();
        let mut out = Vec::new();

        for (key, c) in self.counters.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: timestamp.clone(),
                name: key.name.clone(),
                labels: key.label_map(),
                metric_type: MetricType::Counter,
                value: c.load(Ordering::Relaxed) as f64,
                summary: None,
            });
        }
        for (key, g) in self.gauges.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: timestamp.clone(),
                name: key.name.clone(),
                labels: key.label_map(),
                metric_type: MetricType::Gauge,
                value: g.get(),
                summary: None,
            });
        }
        for (key, h) in self.histograms.read().iter() {
            let summary = h.summary();
            out.push(MetricsSnapshot {
                timestamp: timestamp.clone(),
                name: key.name.clone(),
                labels: key.label_map(),
                metric_type: MetricType::Histogram,
                value: summary.count as f64,
                summary: Some(summary),
            });
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        out
    }
}
