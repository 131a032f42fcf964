//! Resource usage of the exporter process
//!
//! Exported only when internals are enabled. Values come from `/proc/self`;
//! on other platforms nothing is collected.

use std::fmt::Write;

/// Snapshot of the exporter's own resource usage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessStats {
    pub cpu_seconds: f64,
    pub resident_memory_bytes: u64,
    pub threads: i64,
    pub open_fds: usize,
}

impl ProcessStats {
    /// Read the current process' stats, `None` if `/proc` is unavailable
    #[cfg(target_os = "linux")]
    pub fn collect() -> Option<Self> {
        use procfs::process::Process;

        let process = match Process::myself() {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "cannot open /proc/self");
                return None;
            }
        };
        let stat = match process.stat() {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "cannot read /proc/self/stat");
                return None;
            }
        };

        let ticks = procfs::ticks_per_second().max(1);
        #[allow(clippy::cast_precision_loss)]
        let cpu_seconds = (stat.utime + stat.stime) as f64 / ticks as f64;

        Some(Self {
            cpu_seconds,
            resident_memory_bytes: stat.rss * procfs::page_size(),
            threads: stat.num_threads,
            open_fds: process.fd_count().unwrap_or(0),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn collect() -> Option<Self> {
        None
    }

    /// Append the process gauges in Prometheus text format
    pub fn export(&self, output: &mut String) {
        write_gauge(
            output,
            "process_cpu_seconds_total",
            "counter",
            "Total user and system CPU time spent in seconds.",
            &self.cpu_seconds.to_string(),
        );
        write_gauge(
            output,
            "process_resident_memory_bytes",
            "gauge",
            "Resident memory size in bytes.",
            &self.resident_memory_bytes.to_string(),
        );
        write_gauge(
            output,
            "process_threads",
            "gauge",
            "Number of OS threads in the process.",
            &self.threads.to_string(),
        );
        write_gauge(
            output,
            "process_open_fds",
            "gauge",
            "Number of open file descriptors.",
            &self.open_fds.to_string(),
        );
    }
}

fn write_gauge(output: &mut String, name: &str, metric_type: &str, help: &str, value: &str) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {metric_type}");
    let _ = writeln!(output, "{name} {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_format() {
        let stats = ProcessStats {
            cpu_seconds: 1.5,
            resident_memory_bytes: 8192,
            threads: 4,
            open_fds: 7,
        };

        let mut output = String::new();
        stats.export(&mut output);

        assert!(output.contains("# TYPE process_cpu_seconds_total counter\n"));
        assert!(output.contains("process_cpu_seconds_total 1.5\n"));
        assert!(output.contains("process_resident_memory_bytes 8192\n"));
        assert!(output.contains("process_threads 4\n"));
        assert!(output.contains("process_open_fds 7\n"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_collect_self() {
        let stats = ProcessStats::collect().expect("/proc/self readable");
        assert!(stats.threads >= 1);
        assert!(stats.resident_memory_bytes > 0);
        assert!(stats.open_fds > 0);
    }
}
