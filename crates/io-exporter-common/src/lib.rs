//! io-exporter Common - Shared types and utilities
//!
//! This crate provides the configuration snapshot, error definitions and
//! probe result types used by the probe engine, the metrics sink and the
//! exporter binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Label, ProbeConfig, ProbeMode, parse_label, parse_labels};
pub use error::{Error, Result};
pub use types::*;
