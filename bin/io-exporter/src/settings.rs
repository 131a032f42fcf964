//! Command line and config file settings
//!
//! Command line values take precedence over the config file; anything set in
//! neither falls back to the defaults in `io_exporter_common::config`.

use clap::Parser;
use io_exporter_common::config::{DEFAULT_BLOCK_SIZE, DEFAULT_INTERVAL, DEFAULT_TIMEOUT};
use io_exporter_common::{Error, ProbeConfig, ProbeMode, Result, parse_labels};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Prometheus listen port
pub const DEFAULT_PORT: u16 = 9187;

#[derive(Parser, Debug, Default)]
#[command(name = "io-exporter")]
#[command(about = "Probe a file with direct I/O and export the results to Prometheus")]
#[command(disable_version_flag = true)]
pub struct Args {
    /// File to probe (created or truncated by the write probe)
    pub file: Option<PathBuf>,

    /// When should the operation timeout in seconds
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Time to sleep between checks in seconds [default: 5]
    #[arg(short, long, value_name = "SECS")]
    pub sleeptime: Option<u64>,

    /// Add label to exported metrics (repeatable)
    #[arg(short = 'l', long = "label", value_name = "LABEL=VALUE")]
    pub labels: Vec<String>,

    /// Run the read probe (with neither -r nor -w both run)
    #[arg(short, long)]
    pub read: bool,

    /// Run the write probe (with neither -r nor -w both run)
    #[arg(short, long)]
    pub write: bool,

    /// Also export resource usage of the exporter itself
    #[arg(short, long)]
    pub internals: bool,

    /// Prometheus metrics port to listen on [default: 9187]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Log level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Show program version
    #[arg(short = 'v', long)]
    pub version: bool,
}

/// Config file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Seconds
    #[serde(default)]
    pub sleeptime: Option<u64>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub write: Option<bool>,
    #[serde(default)]
    pub internals: bool,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub block_size: Option<usize>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::config(format!("invalid config file {}: {e}", path.display())))
    }

    fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Everything the binary needs after merging flags and config file
#[derive(Debug, Clone)]
pub struct Settings {
    pub probe: ProbeConfig,
    pub port: u16,
    pub internals: bool,
    pub log_level: String,
}

impl Args {
    /// Merge with the config file (if any) and validate
    pub fn into_settings(self) -> Result<Settings> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        self.merge(file)
    }

    fn merge(self, file: FileConfig) -> Result<Settings> {
        let Some(target) = self.file.or(file.file) else {
            return Err(Error::config("no file to probe given"));
        };

        let mode = if self.read || self.write {
            ProbeMode::from_flags(self.read, self.write)?
        } else if file.read.is_some() || file.write.is_some() {
            ProbeMode::from_flags(file.read.unwrap_or(false), file.write.unwrap_or(false))?
        } else {
            ProbeMode::ReadWrite
        };

        // labels from both sources; duplicates are rejected
        let mut label_specs = file.labels;
        label_specs.extend(self.labels);

        let probe = ProbeConfig {
            target,
            timeout: self
                .timeout
                .or(file.timeout)
                .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
            interval: self
                .sleeptime
                .or(file.sleeptime)
                .map_or(DEFAULT_INTERVAL, Duration::from_secs),
            mode,
            labels: parse_labels(&label_specs)?,
            block_size: file.block_size.unwrap_or(DEFAULT_BLOCK_SIZE),
        };
        probe.validate()?;

        let log_level = if self.debug {
            "debug".to_string()
        } else {
            self.log_level
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string())
        };

        Ok(Settings {
            probe,
            port: self.port.or(file.port).unwrap_or(DEFAULT_PORT),
            internals: self.internals || file.internals,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use io_exporter_common::Label;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("io-exporter").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = parse(&["/mnt/test/probe.bin"]).into_settings().unwrap();

        assert_eq!(settings.probe.target, PathBuf::from("/mnt/test/probe.bin"));
        assert_eq!(settings.probe.timeout, Duration::from_secs(1));
        assert_eq!(settings.probe.interval, Duration::from_secs(5));
        assert_eq!(settings.probe.mode, ProbeMode::ReadWrite);
        assert_eq!(settings.probe.block_size, 4096);
        assert!(settings.probe.labels.is_empty());
        assert_eq!(settings.port, 9187);
        assert!(!settings.internals);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_all_flags() {
        let settings = parse(&[
            "-t", "3", "-s", "10", "-l", "pvc=data-0", "-l", "ns=prod", "-r", "-i", "-p", "9000",
            "-d", "/mnt/probe",
        ])
        .into_settings()
        .unwrap();

        assert_eq!(settings.probe.timeout, Duration::from_secs(3));
        assert_eq!(settings.probe.interval, Duration::from_secs(10));
        assert_eq!(settings.probe.mode, ProbeMode::Read);
        assert_eq!(
            settings.probe.labels,
            vec![Label::new("pvc", "data-0"), Label::new("ns", "prod")]
        );
        assert_eq!(settings.port, 9000);
        assert!(settings.internals);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_write_only() {
        let settings = parse(&["-w", "probe.bin"]).into_settings().unwrap();
        assert_eq!(settings.probe.mode, ProbeMode::Write);
    }

    #[test]
    fn test_version_flag_needs_no_file() {
        let args = parse(&["-v"]);
        assert!(args.version);
        assert!(args.file.is_none());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = parse(&[]).into_settings().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        for argv in [
            &["-l", "novalue", "probe.bin"][..],
            &["-l", "a=b=c", "probe.bin"],
            &["-l", "file=x", "probe.bin"],
            &["-l", "a=1", "-l", "a=2", "probe.bin"],
            &["-t", "0", "probe.bin"],
            &["-s", "0", "probe.bin"],
        ] {
            let err = parse(argv).into_settings().unwrap_err();
            assert!(err.is_fatal(), "{argv:?} should be rejected");
        }
    }

    #[test]
    fn test_non_numeric_timeout_rejected_by_parser() {
        assert!(Args::try_parse_from(["io-exporter", "-t", "soon", "probe.bin"]).is_err());
    }

    #[test]
    fn test_file_config_merge() {
        let file = FileConfig::parse(
            r#"
            file = "/mnt/from-config"
            timeout = 2
            sleeptime = 30
            labels = ["pvc=data-0"]
            write = true
            port = 9999
            block_size = 8192
            "#,
        )
        .unwrap();

        let args = Args {
            timeout: Some(4),
            labels: vec!["ns=prod".to_string()],
            ..Args::default()
        };
        let settings = args.merge(file).unwrap();

        assert_eq!(settings.probe.target, PathBuf::from("/mnt/from-config"));
        // CLI wins
        assert_eq!(settings.probe.timeout, Duration::from_secs(4));
        assert_eq!(settings.probe.interval, Duration::from_secs(30));
        assert_eq!(settings.probe.mode, ProbeMode::Write);
        assert_eq!(
            settings.probe.labels,
            vec![Label::new("pvc", "data-0"), Label::new("ns", "prod")]
        );
        assert_eq!(settings.port, 9999);
        assert_eq!(settings.probe.block_size, 8192);
    }

    #[test]
    fn test_file_config_disabling_both_probes_rejected() {
        let file = FileConfig::parse("file = \"probe.bin\"\nread = false\nwrite = false\n").unwrap();
        let err = Args::default().merge(file).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_file_config_errors() {
        assert!(FileConfig::parse("timeout = \"soon\"").is_err());
        assert!(FileConfig::parse("unknown_key = 1").is_err());

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(FileConfig::load(&missing).unwrap_err().is_fatal());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "file = [").unwrap();
        assert!(FileConfig::load(&broken).unwrap_err().is_fatal());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io-exporter.toml");
        std::fs::write(&path, "file = \"/mnt/probe\"\ninternals = true\n").unwrap();

        let settings = parse(&["-c", path.to_str().unwrap()]).into_settings().unwrap();
        assert_eq!(settings.probe.target, PathBuf::from("/mnt/probe"));
        assert!(settings.internals);
    }
}
