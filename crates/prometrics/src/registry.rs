use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::error::{MetricsError, Result};
use crate::types::{CollectedMetric, MetricDescriptor, MetricSample, MetricType, MetricValue};

type LabelValues = Vec<String>;

trait RegisteredMetric: Send + Sync {
    fn descriptor(&self) -> MetricDescriptor;
    fn collect(&self) -> Vec<MetricSample>;
}

/// Owns the named collectors. The name map is mutated only during setup
/// time registration; request serving only ever reads it.
pub struct MetricsRegistry {
    metrics: RwLock<HashMap<String, Arc<dyn RegisteredMetric>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_counter(&self, name: &str, help: &str) -> Result<Arc<Counter>> {
        let metric = Arc::new(Counter::new(name, help));
        self.register(metric.clone())?;
        Ok(metric)
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        variable_labels: &[&str],
        buckets: &[f64],
    ) -> Result<Arc<HistogramVec>> {
        let metric = Arc::new(HistogramVec::new(name, help, variable_labels, buckets)?);
        self.register(metric.clone())?;
        Ok(metric)
    }

    pub fn collect_all(&self) -> Vec<CollectedMetric> {
        let metrics = match self.metrics.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };

        let mut collected = metrics
            .values()
            .map(|metric| CollectedMetric {
                descriptor: metric.descriptor(),
                samples: metric.collect(),
            })
            .collect::<Vec<_>>();

        collected.sort_by(|left, right| left.descriptor.name.cmp(&right.descriptor.name));
        collected
    }

    /// Renders the current state in the Prometheus text exposition format.
    /// Output is fully sorted and carries no timestamps; unchanged state
    /// renders byte-identically.
    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        for metric in self.collect_all() {
            let name = &metric.descriptor.name;

            output.push_str("# HELP ");
            output.push_str(name);
            output.push(' ');
            output.push_str(&escape_help(&metric.descriptor.help));
            output.push('\n');

            output.push_str("# TYPE ");
            output.push_str(name);
            output.push(' ');
            output.push_str(metric.descriptor.metric_type.as_exposition_type());
            output.push('\n');

            for sample in metric.samples {
                match sample.value {
                    MetricValue::Counter(value) => {
                        output.push_str(&sample_line(name, &sample.labels, &value.to_string()));
                    }
                    MetricValue::Histogram {
                        buckets,
                        count,
                        sum,
                    } => {
                        for (bound, cumulative) in buckets {
                            let mut labels = sample.labels.clone();
                            labels.push(("le".to_string(), format_bucket_bound(bound)));
                            output.push_str(&sample_line(
                                &format!("{name}_bucket"),
                                &labels,
                                &cumulative.to_string(),
                            ));
                        }

                        output.push_str(&sample_line(
                            &format!("{name}_sum"),
                            &sample.labels,
                            &format_float(sum),
                        ));
                        output.push_str(&sample_line(
                            &format!("{name}_count"),
                            &sample.labels,
                            &count.to_string(),
                        ));
                    }
                }
            }
        }

        output
    }

    fn register<M: RegisteredMetric + 'static>(&self, metric: Arc<M>) -> Result<()> {
        let name = metric.descriptor().name;
        let mut metrics = self
            .metrics
            .write()
            .map_err(|_| MetricsError::Internal("metrics registry lock poisoned".to_string()))?;

        if metrics.contains_key(&name) {
            return Err(MetricsError::AlreadyRegistered(name));
        }

        metrics.insert(name, metric);
        Ok(())
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Counter {
    descriptor: MetricDescriptor,
    value: AtomicU64,
}

impl Counter {
    fn new(name: &str, help: &str) -> Self {
        Self {
            descriptor: MetricDescriptor {
                name: name.to_string(),
                help: help.to_string(),
                metric_type: MetricType::Counter,
                variable_labels: Vec::new(),
            },
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl RegisteredMetric for Counter {
    fn descriptor(&self) -> MetricDescriptor {
        self.descriptor.clone()
    }

    fn collect(&self) -> Vec<MetricSample> {
        vec![MetricSample {
            labels: Vec::new(),
            value: MetricValue::Counter(self.value()),
        }]
    }
}

/// A histogram partitioned by label values. Cells are created lazily on
/// first observation and live for the registry's lifetime; cardinality is
/// bounded only by the label domain.
pub struct HistogramVec {
    descriptor: MetricDescriptor,
    bounds: Vec<f64>,
    cells: RwLock<HashMap<LabelValues, Arc<Mutex<HistogramCell>>>>,
}

struct HistogramCell {
    // one cumulative slot per finite bound, +Inf last
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl HistogramCell {
    fn empty(finite_bounds: usize) -> Self {
        Self {
            bucket_counts: vec![0; finite_bounds + 1],
            count: 0,
            sum: 0.0,
        }
    }
}

impl HistogramVec {
    fn new(name: &str, help: &str, variable_labels: &[&str], bounds: &[f64]) -> Result<Self> {
        validate_bounds(bounds)?;

        Ok(Self {
            descriptor: MetricDescriptor {
                name: name.to_string(),
                help: help.to_string(),
                metric_type: MetricType::Histogram,
                variable_labels: variable_labels
                    .iter()
                    .map(|label| (*label).to_string())
                    .collect(),
            },
            bounds: bounds.to_vec(),
            cells: RwLock::new(HashMap::new()),
        })
    }

    /// Records `value` into the cell for `labels`: count, sum, and every
    /// bucket whose upper bound admits the value. `labels` must match the
    /// declared label arity exactly.
    pub fn observe(&self, labels: &[&str], value: f64) {
        let expected = self.descriptor.variable_labels.len();
        assert_eq!(
            labels.len(),
            expected,
            "metric {} takes {} label value(s), got {}",
            self.descriptor.name,
            expected,
            labels.len(),
        );

        let cell = self.cell_for(labels);
        let Ok(mut cell) = cell.lock() else {
            return;
        };

        for (index, bound) in self.bounds.iter().enumerate() {
            if value <= *bound {
                cell.bucket_counts[index] += 1;
            }
        }
        let inf_index = self.bounds.len();
        cell.bucket_counts[inf_index] += 1;
        cell.count += 1;
        cell.sum += value;
    }

    fn cell_for(&self, labels: &[&str]) -> Arc<Mutex<HistogramCell>> {
        let label_values: LabelValues =
            labels.iter().map(|value| (*value).to_string()).collect();

        if let Ok(guard) = self.cells.read()
            && let Some(existing) = guard.get(&label_values)
        {
            return Arc::clone(existing);
        }

        match self.cells.write() {
            Ok(mut guard) => guard
                .entry(label_values)
                .or_insert_with(|| Arc::new(Mutex::new(HistogramCell::empty(self.bounds.len()))))
                .clone(),
            Err(_) => Arc::new(Mutex::new(HistogramCell::empty(self.bounds.len()))),
        }
    }
}

impl RegisteredMetric for HistogramVec {
    fn descriptor(&self) -> MetricDescriptor {
        self.descriptor.clone()
    }

    fn collect(&self) -> Vec<MetricSample> {
        let cells = match self.cells.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };

        let mut samples = cells
            .iter()
            .map(|(label_values, cell)| {
                let (buckets, count, sum) = match cell.lock() {
                    Ok(cell) => {
                        let mut buckets = self
                            .bounds
                            .iter()
                            .enumerate()
                            .map(|(index, bound)| (*bound, cell.bucket_counts[index]))
                            .collect::<Vec<_>>();
                        buckets.push((f64::INFINITY, cell.bucket_counts[self.bounds.len()]));
                        (buckets, cell.count, cell.sum)
                    }
                    Err(_) => (Vec::new(), 0, 0.0),
                };

                MetricSample {
                    labels: materialize_labels(&self.descriptor, label_values),
                    value: MetricValue::Histogram {
                        buckets,
                        count,
                        sum,
                    },
                }
            })
            .collect::<Vec<_>>();

        samples.sort_by(|left, right| left.labels.cmp(&right.labels));
        samples
    }
}

fn validate_bounds(bounds: &[f64]) -> Result<()> {
    if bounds
        .iter()
        .any(|bound| !bound.is_finite() || *bound <= 0.0)
    {
        return Err(MetricsError::InvalidBuckets(
            "bounds must be finite and positive".to_string(),
        ));
    }

    if bounds.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(MetricsError::InvalidBuckets(
            "bounds must be strictly ascending".to_string(),
        ));
    }

    Ok(())
}

fn materialize_labels(descriptor: &MetricDescriptor, values: &[String]) -> Vec<(String, String)> {
    descriptor
        .variable_labels
        .iter()
        .zip(values.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn sample_line(name: &str, labels: &[(String, String)], value: &str) -> String {
    let mut rendered = String::new();
    rendered.push_str(name);

    if !labels.is_empty() {
        rendered.push('{');
        for (index, (key, value)) in labels.iter().enumerate() {
            if index > 0 {
                rendered.push(',');
            }
            rendered.push_str(key);
            rendered.push_str("=\"");
            rendered.push_str(&escape_label_value(value));
            rendered.push('"');
        }
        rendered.push('}');
    }

    rendered.push(' ');
    rendered.push_str(value);
    rendered.push('\n');
    rendered
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn format_bucket_bound(value: f64) -> String {
    if value.is_infinite() {
        "+Inf".to_string()
    } else {
        value.to_string()
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{MetricsRegistry, validate_bounds};
    use crate::error::MetricsError;
    use crate::types::MetricValue;

    #[test]
    fn counter_increments_by_exactly_one() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter("jobs_total", "Total jobs").unwrap();

        assert_eq!(counter.value(), 0);
        counter.inc();
        assert_eq!(counter.value(), 1);
        counter.inc();
        counter.inc();
        assert_eq!(counter.value(), 3);
    }

    #[test]
    fn counter_totals_survive_concurrent_increments() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter("jobs_total", "Total jobs").unwrap();

        let handles = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.inc();
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.value(), 8000);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = MetricsRegistry::new();
        registry
            .register_counter("requests", "Requests received")
            .unwrap();

        let err = registry
            .register_counter("requests", "Requests received again")
            .unwrap_err();
        assert!(matches!(err, MetricsError::AlreadyRegistered(name) if name == "requests"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::new();
        let histogram = registry
            .register_histogram("latency_seconds", "Latency", &["route"], &[0.1, 1.0, 10.0])
            .unwrap();

        histogram.observe(&["/a"], 0.05);
        histogram.observe(&["/a"], 0.2);
        histogram.observe(&["/a"], 5.0);

        let collected = registry.collect_all();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].samples.len(), 1);

        let MetricValue::Histogram {
            buckets,
            count,
            sum,
        } = &collected[0].samples[0].value
        else {
            panic!("expected a histogram sample");
        };

        assert_eq!(buckets[0], (0.1, 1));
        assert_eq!(buckets[1], (1.0, 2));
        assert_eq!(buckets[2], (10.0, 3));
        assert!(buckets[3].0.is_infinite());
        assert_eq!(buckets[3].1, 3);
        assert_eq!(*count, 3);
        assert!((sum - 5.25).abs() < f64::EPSILON);
    }

    #[test]
    fn histogram_creates_one_cell_per_label_set() {
        let registry = MetricsRegistry::new();
        let histogram = registry
            .register_histogram("latency_seconds", "Latency", &["route"], &[1.0])
            .unwrap();

        histogram.observe(&["/a"], 0.5);
        histogram.observe(&["/b"], 0.5);

        let collected = registry.collect_all();
        let samples = &collected[0].samples;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].labels, vec![("route".to_string(), "/a".to_string())]);
        assert_eq!(samples[1].labels, vec![("route".to_string(), "/b".to_string())]);
    }

    #[test]
    fn malformed_bounds_are_rejected() {
        assert!(matches!(
            validate_bounds(&[1.0, 0.5]),
            Err(MetricsError::InvalidBuckets(_))
        ));
        assert!(matches!(
            validate_bounds(&[-1.0, 0.5]),
            Err(MetricsError::InvalidBuckets(_))
        ));
        assert!(matches!(
            validate_bounds(&[0.5, f64::INFINITY]),
            Err(MetricsError::InvalidBuckets(_))
        ));
        assert!(validate_bounds(&[0.5, 2.0]).is_ok());
    }

    #[test]
    #[should_panic(expected = "label value")]
    fn label_arity_mismatch_panics() {
        let registry = MetricsRegistry::new();
        let histogram = registry
            .register_histogram("latency_seconds", "Latency", &["route"], &[1.0])
            .unwrap();

        histogram.observe(&[], 0.5);
    }

    #[test]
    fn exposition_output_is_stable_and_exact() {
        let registry = MetricsRegistry::new();
        let counter = registry
            .register_counter("request_start", "Number of requests received")
            .unwrap();
        let histogram = registry
            .register_histogram("latency_seconds", "Latency", &["route"], &[0.5, 2.0])
            .unwrap();

        counter.inc();
        counter.inc();
        histogram.observe(&["/x"], 0.25);

        let expected = "\
# HELP latency_seconds Latency
# TYPE latency_seconds histogram
latency_seconds_bucket{route=\"/x\",le=\"0.5\"} 1
latency_seconds_bucket{route=\"/x\",le=\"2\"} 1
latency_seconds_bucket{route=\"/x\",le=\"+Inf\"} 1
latency_seconds_sum{route=\"/x\"} 0.25
latency_seconds_count{route=\"/x\"} 1
# HELP request_start Number of requests received
# TYPE request_start counter
request_start 2
";

        let first = registry.render_prometheus();
        let second = registry.render_prometheus();
        assert_eq!(first, expected);
        assert_eq!(first, second);
    }
}
