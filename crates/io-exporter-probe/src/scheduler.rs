//! Periodic probe loop
//!
//! One cycle: clear buffers, write probe (optional), read probe (optional),
//! compare (only when both ran and succeeded), publish, sleep. Cycles never
//! overlap and the write always finishes, or is abandoned, before the read
//! starts.

use crate::buffer::BufferPool;
use crate::engine::{ProbeEngine, ProbeTarget};
use io_exporter_common::{
    CycleOutcome, Error, MetricsSink, OpKind, ProbeConfig, ProbeResult, Result,
};
use tracing::{debug, info};

pub struct ProbeScheduler<T: ProbeTarget, S: MetricsSink> {
    config: ProbeConfig,
    engine: ProbeEngine<T>,
    buffers: BufferPool,
    sink: S,
    cycles: u64,
}

impl<T: ProbeTarget, S: MetricsSink> ProbeScheduler<T, S> {
    /// Validate the configuration and allocate the probe buffers
    pub fn new(config: ProbeConfig, engine: ProbeEngine<T>, sink: S) -> Result<Self> {
        config.validate()?;
        let buffers = BufferPool::new(config.block_size)?;

        Ok(Self {
            config,
            engine,
            buffers,
            sink,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run forever: one cycle, then sleep for the configured interval
    pub async fn run(mut self) {
        info!(
            file = %self.config.target.display(),
            mode = %self.config.mode,
            timeout = ?self.config.timeout,
            interval = ?self.config.interval,
            block_size = self.buffers.len(),
            "starting probe loop"
        );

        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// Run one probe cycle and publish its results
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let mode = self.config.mode;
        let timeout = self.config.timeout;
        let mut outcome = CycleOutcome::default();

        self.buffers.clear();

        if mode.writes() {
            self.buffers.fill_write_pattern();
            let probe = self
                .engine
                .write_probe(&self.config.target, self.buffers.take_write(), timeout)
                .await;
            self.buffers.restore_write(probe.block);
            log_probe(OpKind::Write, probe.result);
            outcome.write = Some(probe.result);
        }

        if mode.reads() {
            let probe = self
                .engine
                .read_probe(&self.config.target, self.buffers.take_read(), timeout)
                .await;
            self.buffers.restore_read(probe.block);
            log_probe(OpKind::Read, probe.result);
            outcome.read = Some(probe.result);
        }

        // A mismatch right after a successful write is blamed on the read path.
        if let (Some(write), Some(read)) = (outcome.write, outcome.read) {
            if write.is_success() && read.is_success() {
                let matched = self.buffers.contents_equal();
                outcome.content_match = Some(matched);

                if !matched {
                    let e = Error::ContentMismatch;
                    debug!(
                        file = %self.config.target.display(),
                        error.kind = e.kind(),
                        error = %e,
                        "consistency check failed"
                    );
                    outcome.read = Some(read.downgrade());
                }
            }
        }

        self.sink.publish_cycle(&outcome);

        self.cycles += 1;
        outcome
    }
}

fn log_probe(op: OpKind, result: ProbeResult) {
    debug!(
        op = %op,
        success = result.is_success(),
        elapsed = result.latency_seconds(),
        "probe finished"
    );
}
