//! Opt-in perf counters (`SHORELINE_PERF=1`), latency batches and logging.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Everything shoreline measures about itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Time spent closing a type-ahead window, in microseconds.
    TypeAheadMerge,
    /// Backend events held back by the window that just closed.
    TypeAheadBuffered,
    /// Input events waiting for the drain task.
    InputQueueDepth,
    /// Mean submit-to-send latency of each input batch, in microseconds.
    InputLatency,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::TypeAheadMerge,
        Metric::TypeAheadBuffered,
        Metric::InputQueueDepth,
        Metric::InputLatency,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::TypeAheadMerge => "typeahead_merge_us",
            Metric::TypeAheadBuffered => "typeahead_buffered_events",
            Metric::InputQueueDepth => "input_queue_depth",
            Metric::InputLatency => "input_latency_us",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricStat {
    pub count: u64,
    pub last: u64,
    pub max: u64,
    pub total: u64,
}

impl MetricStat {
    fn observe(&mut self, value: u64) {
        self.count += 1;
        self.last = value;
        self.max = self.max.max(value);
        self.total = self.total.saturating_add(value);
    }

    pub fn mean(&self) -> u64 {
        self.total / self.count.max(1)
    }
}

const REPORT_EVERY: u64 = 200;

static PERF_ENABLED: Lazy<bool> = Lazy::new(|| {
    std::env::var("SHORELINE_PERF").is_ok_and(|value| !value.is_empty() && value != "0")
});

static METRICS: Lazy<Mutex<HashMap<Metric, MetricStat>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn enabled() -> bool {
    *PERF_ENABLED
}

pub fn record(metric: Metric, value: u64) {
    if enabled() {
        observe(&mut METRICS.lock(), metric, value);
    }
}

pub fn record_duration(metric: Metric, duration: Duration) {
    record(metric, duration.as_micros() as u64);
}

/// Current totals for `metric`; `None` until something was recorded.
pub fn stat(metric: Metric) -> Option<MetricStat> {
    METRICS.lock().get(&metric).copied()
}

fn observe(metrics: &mut HashMap<Metric, MetricStat>, metric: Metric, value: u64) {
    let stat = metrics.entry(metric).or_default();
    stat.observe(value);
    if stat.count % REPORT_EVERY == 0 {
        debug!(
            target = "shoreline::perf",
            metric = metric.label(),
            count = stat.count,
            last = stat.last,
            mean = stat.mean(),
            max = stat.max,
            "perf counters"
        );
    }
}

/// Records the lifetime of the guard under `metric` when perf is enabled.
pub struct PerfGuard {
    metric: Metric,
    start: Instant,
}

impl PerfGuard {
    pub fn new(metric: Metric) -> Option<Self> {
        enabled().then(|| Self {
            metric,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.metric, self.start.elapsed());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
}

pub type LatencyReporter = Box<dyn FnMut(LatencySummary) + Send>;

/// Collects latency samples and reports a summary every `batch_size` samples.
pub struct LatencyBatch {
    label: &'static str,
    batch_size: usize,
    samples: Vec<Duration>,
    reporter: Option<LatencyReporter>,
}

impl LatencyBatch {
    /// A `batch_size` of zero is treated as one.
    pub fn new(label: &'static str, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            label,
            batch_size,
            samples: Vec::with_capacity(batch_size),
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: LatencyReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn pending(&self) -> usize {
        self.samples.len()
    }

    /// Returns the summary when this sample completed a batch.
    pub fn record(&mut self, sample: Duration) -> Option<LatencySummary> {
        self.samples.push(sample);
        if self.samples.len() < self.batch_size {
            return None;
        }
        let summary = summarize(&self.samples);
        self.samples.clear();
        debug!(
            target = "shoreline::input",
            label = self.label,
            count = summary.count,
            min_us = summary.min.as_micros() as u64,
            max_us = summary.max.as_micros() as u64,
            mean_us = summary.mean.as_micros() as u64,
            "latency batch"
        );
        record_duration(Metric::InputLatency, summary.mean);
        if let Some(reporter) = self.reporter.as_mut() {
            reporter(summary);
        }
        Some(summary)
    }
}

impl std::fmt::Debug for LatencyBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyBatch")
            .field("label", &self.label)
            .field("batch_size", &self.batch_size)
            .field("pending", &self.samples.len())
            .finish()
    }
}

fn summarize(samples: &[Duration]) -> LatencySummary {
    let min = samples.iter().copied().min().unwrap_or_default();
    let max = samples.iter().copied().max().unwrap_or_default();
    let total: Duration = samples.iter().sum();
    LatencySummary {
        count: samples.len(),
        min,
        max,
        mean: total / samples.len().max(1) as u32,
    }
}

pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(build_env_filter(config.level.to_filter()))
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(config.level >= LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;
        let _ = GUARD.set(guard);
        Ok(())
    }

    fn build_env_filter(level: LevelFilter) -> EnvFilter {
        match std::env::var("SHORELINE_LOG_FILTER") {
            Ok(filter) => EnvFilter::new(filter),
            Err(_) => EnvFilter::new(default_filter_for(level)),
        }
    }

    pub(crate) fn default_filter_for(level: LevelFilter) -> &'static str {
        match level {
            LevelFilter::TRACE => "info,shoreline_core=trace,shoreline=trace",
            LevelFilter::DEBUG => "info,shoreline_core=debug,shoreline=debug",
            LevelFilter::INFO => "info",
            LevelFilter::WARN => "warn",
            LevelFilter::ERROR => "error",
            LevelFilter::OFF => "off",
        }
    }

    /// Hex/ASCII dump used when tracing raw input bytes.
    pub fn hexdump(bytes: &[u8]) -> String {
        use std::fmt::Write as _;
        const WIDTH: usize = 16;
        let mut out = String::new();
        for (i, chunk) in bytes.chunks(WIDTH).enumerate() {
            let _ = write!(out, "{:08x}  ", i * WIDTH);
            for byte in chunk {
                let _ = write!(out, "{byte:02x} ");
            }
            for _ in chunk.len()..WIDTH {
                out.push_str("   ");
            }
            out.push(' ');
            out.extend(chunk.iter().map(|&byte| {
                if (0x20..=0x7e).contains(&byte) {
                    byte as char
                } else {
                    '.'
                }
            }));
            out.push('\n');
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn debug_level_enables_crate_targets() {
            assert_eq!(
                default_filter_for(LogLevel::Debug.to_filter()),
                "info,shoreline_core=debug,shoreline=debug"
            );
            assert_eq!(default_filter_for(LogLevel::Warn.to_filter()), "warn");
        }

        #[test]
        fn hexdump_renders_printable_column() {
            let dump = hexdump(b"ls\r");
            assert!(dump.starts_with("00000000  6c 73 0d "));
            assert!(dump.trim_end().ends_with("ls."));
        }
    }
}
