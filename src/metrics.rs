//! C6 Metrics Registry
//!
//! Rolling-window counters/gauges/histograms with percentile computation and
//! threshold-driven recommendations. Percentile index is
//! `sorted[min(floor(p * n), n - 1)]` so a reported p95/p99 always
//! corresponds to an element that was actually recorded in the window.
//! [`SystemSampler`] feeds the same registry with OS-level gauges (CPU,
//! memory, disk I/O, network I/O) on a configurable interval.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use sysinfo::System;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Timer,
}

#[derive(Debug, Clone)]
struct Sample {
    value: f64,
    recorded_at: Instant,
}

struct Metric {
    kind: MetricType,
    samples: VecDeque<Sample>,
}

pub struct MetricsRegistry {
    metrics: DashMap<String, Mutex<Metric>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    /// Samples per second over `window`, i.e. `count / window_seconds`.
    pub rate: f64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            metrics: DashMap::new(),
        }
    }

    fn entry(&self, name: &str, kind: MetricType) -> dashmap::mapref::one::Ref<'_, String, Mutex<Metric>> {
        self.metrics
            .entry(name.to_string())
            .or_insert_with(|| {
                Mutex::new(Metric {
                    kind,
                    samples: VecDeque::with_capacity(MAX_SAMPLES),
                })
            });
        self.metrics.get(name).unwrap()
    }

    pub fn record(&self, name: &str, kind: MetricType, value: f64) {
        let entry = self.entry(name, kind);
        let mut metric = entry.lock();
        if metric.samples.len() >= MAX_SAMPLES {
            metric.samples.pop_front();
        }
        metric.samples.push_back(Sample {
            value,
            recorded_at: Instant::now(),
        });
    }

    pub fn increment(&self, name: &str) {
        self.record(name, MetricType::Counter, 1.0);
    }

    pub fn gauge(&self, name: &str, value: f64) {
        self.record(name, MetricType::Gauge, value);
    }

    /// Time an async operation, recording a histogram sample on completion
    /// and an error counter (labeled in the metric name) on failure.
    pub async fn time_operation<F, T, E>(&self, name: &str, future: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = future.await;
        self.record(name, MetricType::Histogram, start.elapsed().as_secs_f64());
        self.increment(&format!("{name}.operations"));
        if result.is_err() {
            self.increment(&format!("{name}.errors"));
        }
        result
    }

    pub fn summary(&self, name: &str, window: Duration) -> Option<MetricSummary> {
        let entry = self.metrics.get(name)?;
        let metric = entry.lock();
        let cutoff = Instant::now().checked_sub(window);
        let mut values: Vec<f64> = metric
            .samples
            .iter()
            .filter(|s| cutoff.map(|c| s.recorded_at >= c).unwrap_or(true))
            .map(|s| s.value)
            .collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let count = values.len();
        let sum: f64 = values.iter().sum();
        Some(MetricSummary {
            count,
            sum,
            min: values[0],
            max: values[count - 1],
            avg: sum / count as f64,
            p50: percentile(&values, 0.5),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
            rate: count as f64 / window.as_secs_f64(),
        })
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    let n = sorted_values.len();
    let index = ((p * n as f64).floor() as usize).min(n - 1);
    sorted_values[index]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub max_p95: Option<f64>,
    pub max_error_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub metric: String,
    pub message: String,
}

/// Compare current summaries against configured thresholds.
pub fn check_thresholds(registry: &MetricsRegistry, thresholds: &[Threshold], window: Duration) -> Vec<Alert> {
    let mut alerts = Vec::new();
    for threshold in thresholds {
        if let Some(summary) = registry.summary(&threshold.metric, window) {
            if let Some(max_p95) = threshold.max_p95 {
                if summary.p95 > max_p95 {
                    alerts.push(Alert {
                        metric: threshold.metric.clone(),
                        message: format!(
                            "p95 {:.3} exceeds threshold {:.3}",
                            summary.p95, max_p95
                        ),
                    });
                }
            }
        }
        if let Some(max_rate) = threshold.max_error_rate {
            let ops = registry.summary(&format!("{}.operations", threshold.metric), window);
            let errors = registry.summary(&format!("{}.errors", threshold.metric), window);
            if let (Some(ops), Some(errors)) = (ops, errors) {
                let rate = errors.count as f64 / ops.count.max(1) as f64;
                if rate > max_rate {
                    alerts.push(Alert {
                        metric: threshold.metric.clone(),
                        message: format!("error rate {:.3} exceeds threshold {:.3}", rate, max_rate),
                    });
                }
            }
        }
    }
    alerts
}

/// Turn pool-utilization, cache-hit-rate, and error-rate summaries into
/// actionable text.
pub fn generate_recommendations(
    pool_utilization: f64,
    cache_hit_rate: Option<f64>,
    error_rate: Option<f64>,
) -> Vec<String> {
    let mut recommendations = Vec::new();
    if pool_utilization > 0.8 {
        recommendations.push("pool utilization is consistently high: increase max_per_kind".to_string());
    } else if pool_utilization < 0.2 {
        recommendations.push("pool utilization is consistently low: decrease max_per_kind".to_string());
    }
    if let Some(rate) = cache_hit_rate {
        if rate < 0.7 {
            recommendations.push("cache hit rate is low: raise cache size or default_ttl".to_string());
        }
    }
    if let Some(rate) = error_rate {
        if rate > 0.05 {
            recommendations.push("error rate is high: review retry policy and error handling configuration".to_string());
        }
    }
    recommendations
}

/// Background sampler that feeds CPU, memory, disk I/O, and network I/O
/// gauges into a [`MetricsRegistry`] on a fixed interval. Disk and network
/// counters are cumulative totals since boot, not deltas since the last tick.
pub struct SystemSampler {
    cancel: CancellationToken,
}

impl SystemSampler {
    /// Spawn the sampling loop. Dropping the returned sampler (or calling
    /// [`SystemSampler::stop`]) ends the background task.
    pub fn spawn(registry: Arc<MetricsRegistry>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut system = System::new_all();
            let mut ticks = IntervalStream::new(tokio::time::interval(interval));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    tick = ticks.next() => {
                        if tick.is_none() {
                            break;
                        }
                        sample_once(&registry, &mut system);
                    }
                }
            }
        });
        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SystemSampler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn sample_once(registry: &MetricsRegistry, system: &mut System) {
    system.refresh_cpu_usage();
    system.refresh_memory();
    registry.gauge("system.cpu_percent", system.global_cpu_usage() as f64);

    let memory_percent = if system.total_memory() > 0 {
        system.used_memory() as f64 / system.total_memory() as f64 * 100.0
    } else {
        0.0
    };
    registry.gauge("system.memory_percent", memory_percent);

    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    let (mut disk_read, mut disk_write) = (0u64, 0u64);
    for process in system.processes().values() {
        let usage = process.disk_usage();
        disk_read += usage.read_bytes;
        disk_write += usage.written_bytes;
    }
    registry.gauge("system.disk_io_read", disk_read as f64);
    registry.gauge("system.disk_io_write", disk_write as f64);

    let networks = sysinfo::Networks::new_with_refreshed_list();
    let (mut sent, mut received) = (0u64, 0u64);
    for (_, data) in networks.iter() {
        sent += data.total_transmitted();
        received += data.total_received();
    }
    registry.gauge("system.network_sent", sent as f64);
    registry.gauge("system.network_recv", received as f64);

    debug!(cpu = system.global_cpu_usage(), memory = memory_percent, "sampled system metrics");
}
