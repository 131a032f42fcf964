//! Configuration types for io-exporter
//!
//! [`ProbeConfig`] is the immutable snapshot handed to the scheduler at
//! startup. It is assembled by the binary from command-line flags and an
//! optional config file, then validated once.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-operation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default sleep between probe cycles
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default probe block size (one storage block)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Smallest I/O granularity accepted for the probe block
pub const MIN_BLOCK_SIZE: usize = 512;

/// Label names the exporter always attaches itself
pub const RESERVED_LABELS: [&str; 3] = ["file", "maxwait", "exectime"];

/// Which probes run each cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Read probe only
    Read,
    /// Write probe only
    Write,
    /// Write, then read back and compare
    #[default]
    ReadWrite,
}

impl ProbeMode {
    /// Build a mode from the two enable flags; at least one must be set
    pub fn from_flags(read: bool, write: bool) -> Result<Self> {
        match (read, write) {
            (true, true) => Ok(Self::ReadWrite),
            (true, false) => Ok(Self::Read),
            (false, true) => Ok(Self::Write),
            (false, false) => Err(Error::config(
                "at least one of read or write mode must be enabled",
            )),
        }
    }

    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
        }
    }
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A static `name=value` label attached to every exported series
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Parse a `name=value` label spec.
///
/// Empty specs are skipped (`Ok(None)`), so a trailing empty `-l ""` is
/// harmless.
pub fn parse_label(spec: &str) -> Result<Option<Label>> {
    if spec.is_empty() {
        return Ok(None);
    }

    let mut parts = spec.split('=');
    let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::config(format!(
            "invalid label spec: {spec}, expected label=value"
        )));
    };

    if !is_valid_label_name(name) {
        return Err(Error::config(format!(
            "invalid label spec: {spec}, {name:?} is not a valid label name"
        )));
    }

    Ok(Some(Label::new(name, value)))
}

/// Parse every label spec, rejecting reserved and duplicate names
pub fn parse_labels<S: AsRef<str>>(specs: &[S]) -> Result<Vec<Label>> {
    let mut labels: Vec<Label> = Vec::with_capacity(specs.len());

    for spec in specs {
        let Some(label) = parse_label(spec.as_ref())? else {
            continue;
        };

        if RESERVED_LABELS.contains(&label.name.as_str()) {
            return Err(Error::config(format!(
                "label {} is reserved by the exporter",
                label.name
            )));
        }
        if labels.iter().any(|l| l.name == label.name) {
            return Err(Error::config(format!("duplicate label {}", label.name)));
        }

        labels.push(label);
    }

    Ok(labels)
}

/// Prometheus label names: `[a-zA-Z_][a-zA-Z0-9_]*`, `__` prefix reserved
fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

/// Probe configuration snapshot, immutable for the process lifetime
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// File or mount point under test
    pub target: PathBuf,
    /// Deadline for each individual write or read probe
    pub timeout: Duration,
    /// Sleep between cycles
    pub interval: Duration,
    /// Enabled probes
    pub mode: ProbeMode,
    /// Static labels, in configuration order
    pub labels: Vec<Label>,
    /// Probe buffer length in bytes
    pub block_size: usize,
}

impl ProbeConfig {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            mode: ProbeMode::default(),
            labels: Vec::new(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Check the snapshot before the scheduler starts
    pub fn validate(&self) -> Result<()> {
        if self.target.as_os_str().is_empty() {
            return Err(Error::config("target path is empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be greater than zero"));
        }
        if self.interval.is_zero() {
            return Err(Error::config("sleep time must be greater than zero"));
        }
        if self.block_size == 0 || self.block_size % MIN_BLOCK_SIZE != 0 {
            return Err(Error::config(format!(
                "block size {} is not a non-zero multiple of {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        Ok(())
    }

    /// Timeout rendered for the `maxwait` label, in whole seconds when exact
    #[must_use]
    pub fn maxwait(&self) -> String {
        if self.timeout.subsec_nanos() == 0 {
            self.timeout.as_secs().to_string()
        } else {
            self.timeout.as_secs_f64().to_string()
        }
    }
}
