//! io-exporter probe engine
//!
//! This crate implements the part of io-exporter that touches storage:
//! - Raw file access bypassing the page cache (O_DIRECT / F_NOCACHE)
//! - Block-aligned probe buffers, cleared and refilled every cycle
//! - Deadline-bounded write and read probes
//! - The periodic scheduler that turns probe outcomes into published gauges

pub mod buffer;
pub mod engine;
pub mod raw_io;
pub mod scheduler;

// Re-exports
pub use buffer::{BufferPool, SENTINEL};
pub use engine::{DirectIo, Probe, ProbeEngine, ProbeFile, ProbeTarget, transfer_and_close};
pub use raw_io::{ALIGNMENT, AlignedBuffer, DirectFile};
pub use scheduler::ProbeScheduler;
