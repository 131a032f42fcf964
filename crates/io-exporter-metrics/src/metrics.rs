//! Probe gauges and Prometheus exporter
//!
//! # Prometheus Metrics
//!
//! - `io_exporter_io_operation` - 1 if every enabled probe succeeded, else 0
//! - `io_exporter_io_read_operation` - Read probe result (1=ok, 0=fail)
//! - `io_exporter_io_write_operation` - Write probe result (1=ok, 0=fail)
//! - `io_exporter_io_read_latency` - Read probe latency in seconds (0 on failure)
//! - `io_exporter_io_write_latency` - Write probe latency in seconds (0 on failure)
//!
//! Every series carries `file`, `maxwait`, `exectime` and the configured
//! static labels.

use std::fmt::Write;

use io_exporter_common::{CycleOutcome, MetricsSink, OpKind, ProbeConfig, ProbeMode, ProbeResult};
use parking_lot::RwLock;

use crate::process::ProcessStats;

/// Latest result per operation kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub read: Option<ProbeResult>,
    pub write: Option<ProbeResult>,
}

impl Snapshot {
    pub fn result(&self, op: OpKind) -> Option<ProbeResult> {
        match op {
            OpKind::Read => self.read,
            OpKind::Write => self.write,
        }
    }

    fn slot_mut(&mut self, op: OpKind) -> &mut Option<ProbeResult> {
        match op {
            OpKind::Read => &mut self.read,
            OpKind::Write => &mut self.write,
        }
    }

    /// True when every probe enabled by `mode` has a successful result
    pub fn healthy(&self, mode: ProbeMode) -> bool {
        OpKind::ALL
            .into_iter()
            .filter(|op| match op {
                OpKind::Read => mode.reads(),
                OpKind::Write => mode.writes(),
            })
            .all(|op| self.result(op).is_some_and(|r| r.is_success()))
    }
}

/// Last published results, replaced a whole cycle at a time
#[derive(Debug)]
pub struct ProbeMetrics {
    mode: ProbeMode,
    latest: RwLock<Snapshot>,
}

impl ProbeMetrics {
    pub fn new(mode: ProbeMode) -> Self {
        Self {
            mode,
            latest: RwLock::new(Snapshot::default()),
        }
    }

    pub fn mode(&self) -> ProbeMode {
        self.mode
    }

    /// Both results as of the same publish
    pub fn snapshot(&self) -> Snapshot {
        *self.latest.read()
    }

    /// Latest result for `op`, `None` before its first publish
    pub fn latest(&self, op: OpKind) -> Option<ProbeResult> {
        self.latest.read().result(op)
    }

    /// True when every enabled probe's latest result is a success
    pub fn healthy(&self) -> bool {
        self.snapshot().healthy(self.mode)
    }
}

impl MetricsSink for ProbeMetrics {
    fn publish(&self, op: OpKind, result: ProbeResult) {
        *self.latest.write().slot_mut(op) = Some(result);
    }

    fn publish_cycle(&self, outcome: &CycleOutcome) {
        let mut latest = self.latest.write();
        for op in OpKind::ALL {
            if let Some(result) = outcome.result(op) {
                *latest.slot_mut(op) = Some(result);
            }
        }
    }
}

/// Renders [`ProbeMetrics`] in Prometheus text format
#[derive(Debug)]
pub struct PrometheusExporter {
    /// Metrics prefix (e.g., "io_exporter")
    prefix: String,
    /// Label block rendered once at startup, reused on every scrape
    labels: String,
    /// Also export process internals
    internals: bool,
}

impl PrometheusExporter {
    /// Build the exporter for a configuration.
    ///
    /// `exectime_ms` is the process start time in unix milliseconds; it tells
    /// series of different exporter runs apart.
    pub fn new(prefix: impl Into<String>, config: &ProbeConfig, exectime_ms: i64) -> Self {
        let file = config.target.to_string_lossy();
        let maxwait = config.maxwait();
        let exectime = exectime_ms.to_string();

        let mut labels: Vec<(&str, &str)> = vec![
            ("file", file.as_ref()),
            ("maxwait", maxwait.as_str()),
            ("exectime", exectime.as_str()),
        ];
        labels.extend(
            config
                .labels
                .iter()
                .map(|l| (l.name.as_str(), l.value.as_str())),
        );

        Self {
            prefix: prefix.into(),
            labels: render_labels(&labels),
            internals: false,
        }
    }

    /// Also export resource usage of the exporter process
    #[must_use]
    pub fn with_internals(mut self, internals: bool) -> Self {
        self.internals = internals;
        self
    }

    /// Rendered label block, e.g. `{file="/mnt/test/probe.bin",maxwait="1"}`
    pub fn labels(&self) -> &str {
        &self.labels
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self, metrics: &ProbeMetrics) -> String {
        let mut output = String::with_capacity(2 * 1024);

        self.export_probe_metrics(&mut output, metrics);

        if self.internals {
            if let Some(stats) = ProcessStats::collect() {
                stats.export(&mut output);
            }
        }

        output
    }

    fn export_probe_metrics(&self, output: &mut String, metrics: &ProbeMetrics) {
        // one read of the store so every series comes from the same cycle
        let snapshot = metrics.snapshot();
        let Snapshot { read, write } = snapshot;

        if read.is_some() || write.is_some() {
            let overall = if snapshot.healthy(metrics.mode()) { 1.0 } else { 0.0 };
            self.write_gauge(
                output,
                "io_operation",
                "whether io is working on the target, 1=ok, 0=fail",
                overall,
            );
        }

        for (op, result) in [(OpKind::Read, read), (OpKind::Write, write)] {
            let Some(result) = result else {
                continue;
            };

            self.write_gauge(
                output,
                &format!("io_{op}_operation"),
                &format!("whether the {op} probe succeeded, 1=ok, 0=fail"),
                result.success_value(),
            );
            self.write_gauge(
                output,
                &format!("io_{op}_latency"),
                &format!("how long does the {op} operation take in seconds"),
                result.latency_seconds(),
            );
        }
    }

    fn write_gauge(&self, output: &mut String, name: &str, help: &str, value: f64) {
        self.write_help(output, name, help);
        self.write_type(output, name, "gauge");
        let _ = writeln!(output, "{}_{}{} {}", self.prefix, name, self.labels, value);
    }

    fn write_help(&self, output: &mut String, name: &str, help: &str) {
        let _ = writeln!(output, "# HELP {}_{} {}", self.prefix, name, help);
    }

    fn write_type(&self, output: &mut String, name: &str, metric_type: &str) {
        let _ = writeln!(output, "# TYPE {}_{} {}", self.prefix, name, metric_type);
    }
}

/// Render `{k="v",...}`, or nothing for an empty label set
fn render_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let labels_str: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    format!("{{{}}}", labels_str.join(","))
}

/// Escape a label value for the text exposition format
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
