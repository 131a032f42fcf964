//! Probe result types and the metrics sink seam

use std::fmt;
use std::time::Duration;

/// Kind of probe operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Read,
    Write,
}

impl OpKind {
    /// Cycle order: the write probe always precedes the read probe
    pub const ALL: [Self; 2] = [Self::Write, Self::Read];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single probe.
///
/// A failed probe never carries a latency: the constructors enforce
/// `!success => elapsed == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeResult {
    success: bool,
    elapsed: Duration,
}

impl ProbeResult {
    #[must_use]
    pub const fn success(elapsed: Duration) -> Self {
        Self {
            success: true,
            elapsed,
        }
    }

    #[must_use]
    pub const fn failure() -> Self {
        Self {
            success: false,
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Success collapsed to the gauge value 1/0
    #[must_use]
    pub fn success_value(&self) -> f64 {
        if self.success { 1.0 } else { 0.0 }
    }

    /// Latency in seconds
    #[must_use]
    pub fn latency_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Downgrade to a failure, dropping the latency
    #[must_use]
    pub const fn downgrade(self) -> Self {
        Self::failure()
    }
}

/// Results of one scheduler cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleOutcome {
    /// Write result, `None` when the write probe is disabled
    pub write: Option<ProbeResult>,
    /// Read result, `None` when the read probe is disabled
    pub read: Option<ProbeResult>,
    /// Content comparison, only when both probes ran and succeeded
    pub content_match: Option<bool>,
}

impl CycleOutcome {
    pub fn result(&self, op: OpKind) -> Option<ProbeResult> {
        match op {
            OpKind::Read => self.read,
            OpKind::Write => self.write,
        }
    }

    /// True when every probe that ran succeeded (and at least one ran)
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        let ran = [self.write, self.read];
        ran.iter().any(Option::is_some)
            && ran.iter().flatten().all(ProbeResult::is_success)
    }
}

/// Receives published probe results.
///
/// Values are gauges: each publish overwrites the previous value for that
/// operation kind. Implementations must tolerate concurrent readers.
pub trait MetricsSink: Send + Sync {
    fn publish(&self, op: OpKind, result: ProbeResult);

    /// Publish every result of one cycle, write before read.
    ///
    /// Sinks that serve concurrent readers override this to swap all
    /// results in at once, so a reader never mixes two cycles.
    fn publish_cycle(&self, outcome: &CycleOutcome) {
        for op in OpKind::ALL {
            if let Some(result) = outcome.result(op) {
                self.publish(op, result);
            }
        }
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for std::sync::Arc<S> {
    fn publish(&self, op: OpKind, result: ProbeResult) {
        (**self).publish(op, result);
    }

    fn publish_cycle(&self, outcome: &CycleOutcome) {
        (**self).publish_cycle(outcome);
    }
}
