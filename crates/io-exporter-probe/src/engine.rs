//! Deadline-bounded write and read probes
//!
//! Each probe runs its blocking I/O on tokio's blocking pool and races it
//! against a timer. When the timer wins the probe reports failure right
//! away; the blocking call cannot be interrupted and keeps running in the
//! background with the buffer it was given. Its eventual completion is
//! never observed.

use crate::raw_io::{AlignedBuffer, DirectFile};
use io_exporter_common::{Error, OpKind, ProbeResult, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Blocking block I/O against the probe target
///
/// Implementations return the number of bytes transferred; the engine
/// decides whether a short count is a failure.
pub trait ProbeTarget: Send + Sync + 'static {
    /// Create/truncate `path` and write `block` in one call
    fn write_block(&self, path: &Path, block: &[u8]) -> Result<usize>;

    /// Open `path` read-only and read up to `block.len()` bytes
    fn read_block(&self, path: &Path, block: &mut [u8]) -> Result<usize>;
}

/// An open probe file whose close can fail
pub trait ProbeFile: Sized {
    fn close(self) -> Result<()>;
}

impl ProbeFile for DirectFile {
    fn close(self) -> Result<()> {
        DirectFile::close(self)
    }
}

/// Run `transfer` on `file`, then close it on every path.
///
/// A close failure is soft: it is logged and the transfer's outcome is
/// returned unchanged.
pub fn transfer_and_close<F, T>(mut file: F, transfer: T) -> Result<usize>
where
    F: ProbeFile,
    T: FnOnce(&mut F) -> Result<usize>,
{
    let outcome = transfer(&mut file);
    if let Err(e) = file.close() {
        debug!(error.kind = e.kind(), error = %e, "failed to close probe file");
    }
    outcome
}

/// Production target: direct I/O bypassing the page cache
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectIo;

impl ProbeTarget for DirectIo {
    fn write_block(&self, path: &Path, block: &[u8]) -> Result<usize> {
        let file = DirectFile::create_truncate(path)?;
        transfer_and_close(file, |f| f.write_block(block))
    }

    fn read_block(&self, path: &Path, block: &mut [u8]) -> Result<usize> {
        let file = DirectFile::open_read(path)?;
        transfer_and_close(file, |f| f.read_block(block))
    }
}

/// Result of one probe plus the block lent to it.
///
/// `block` is `None` when the operation was abandoned at its deadline or
/// its task died.
#[derive(Debug)]
pub struct Probe {
    pub result: ProbeResult,
    pub block: Option<AlignedBuffer>,
}

/// Executes write and read probes with deadlines
#[derive(Debug)]
pub struct ProbeEngine<T = DirectIo> {
    target: Arc<T>,
}

impl ProbeEngine<DirectIo> {
    pub fn direct() -> Self {
        Self::new(DirectIo)
    }
}

impl<T: ProbeTarget> ProbeEngine<T> {
    pub fn new(target: T) -> Self {
        Self {
            target: Arc::new(target),
        }
    }

    /// Write the whole block to `path` within `deadline`.
    ///
    /// Succeeds only if exactly `block.len()` bytes were written.
    pub async fn write_probe(&self, path: &Path, block: AlignedBuffer, deadline: Duration) -> Probe {
        let target = Arc::clone(&self.target);
        let path = path.to_path_buf();

        self.race(OpKind::Write, deadline, move || {
            let expected = block.len();
            let outcome = target
                .write_block(&path, block.as_slice())
                .and_then(|actual| {
                    if actual == expected {
                        Ok(())
                    } else {
                        Err(Error::ShortWrite { expected, actual })
                    }
                });
            (block, outcome)
        })
        .await
    }

    /// Read exactly `block.len()` bytes from `path` within `deadline`.
    ///
    /// A short read is a failure even though some bytes arrived.
    pub async fn read_probe(&self, path: &Path, mut block: AlignedBuffer, deadline: Duration) -> Probe {
        let target = Arc::clone(&self.target);
        let path: PathBuf = path.to_path_buf();

        self.race(OpKind::Read, deadline, move || {
            let expected = block.len();
            let outcome = target
                .read_block(&path, block.as_mut_slice())
                .and_then(|actual| {
                    if actual == expected {
                        Ok(())
                    } else {
                        Err(Error::ShortRead { expected, actual })
                    }
                });
            (block, outcome)
        })
        .await
    }

    async fn race<F>(&self, op: OpKind, deadline: Duration, work: F) -> Probe
    where
        F: FnOnce() -> (AlignedBuffer, Result<()>) + Send + 'static,
    {
        let start = Instant::now();
        let task = tokio::task::spawn_blocking(work);

        // Dropping the JoinHandle on timeout detaches the task; it is never joined.
        let (block, outcome) = match tokio::time::timeout(deadline, task).await {
            Ok(Ok((block, outcome))) => (Some(block), outcome),
            Ok(Err(join_err)) => (
                None,
                Err(Error::internal(format!("{op} probe task failed: {join_err}"))),
            ),
            Err(_) => (None, Err(Error::DeadlineExceeded { timeout: deadline })),
        };
        let elapsed = start.elapsed();

        let result = match outcome {
            Ok(()) => ProbeResult::success(elapsed),
            Err(e @ Error::DeadlineExceeded { .. }) => {
                warn!(op = %op, error.kind = e.kind(), error = %e, "probe abandoned");
                ProbeResult::failure()
            }
            Err(e) => {
                debug!(op = %op, error.kind = e.kind(), error = %e, "probe failed");
                ProbeResult::failure()
            }
        };

        Probe { result, block }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SENTINEL;
    use crate::raw_io::direct_io_scratch_dir;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    /// In-memory target with knobs for short counts and stalls
    #[derive(Default)]
    struct FakeTarget {
        data: Mutex<Vec<u8>>,
        short_by: usize,
        stall: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl FakeTarget {
        fn stalled() -> (Self, mpsc::Sender<()>) {
            let (release, gate) = mpsc::channel();
            let target = Self {
                stall: Mutex::new(Some(gate)),
                ..Self::default()
            };
            (target, release)
        }

        fn wait_if_stalled(&self) {
            let gate = self.stall.lock().take();
            if let Some(gate) = gate {
                // returns once the test drops or signals the sender
                let _ = gate.recv();
            }
        }
    }

    impl ProbeTarget for FakeTarget {
        fn write_block(&self, _path: &Path, block: &[u8]) -> Result<usize> {
            self.wait_if_stalled();
            let n = block.len() - self.short_by;
            *self.data.lock() = block[..n].to_vec();
            Ok(n)
        }

        fn read_block(&self, _path: &Path, block: &mut [u8]) -> Result<usize> {
            self.wait_if_stalled();
            let data = self.data.lock();
            let n = data.len().min(block.len()).saturating_sub(self.short_by);
            block[..n].copy_from_slice(&data[..n]);
            Ok(n)
        }
    }

    /// File whose transfer succeeds and whose close always fails
    struct FailingClose {
        closed: Arc<AtomicBool>,
    }

    impl ProbeFile for FailingClose {
        fn close(self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Err(Error::Close {
                path: "probe.bin".into(),
                source: std::io::Error::from_raw_os_error(libc::EIO),
            })
        }
    }

    /// Target that goes through `transfer_and_close` with a failing close
    #[derive(Default)]
    struct FailingCloseTarget {
        closed: Arc<AtomicBool>,
    }

    impl ProbeTarget for FailingCloseTarget {
        fn write_block(&self, _path: &Path, block: &[u8]) -> Result<usize> {
            let file = FailingClose {
                closed: Arc::clone(&self.closed),
            };
            transfer_and_close(file, |_| Ok(block.len()))
        }

        fn read_block(&self, _path: &Path, block: &mut [u8]) -> Result<usize> {
            let file = FailingClose {
                closed: Arc::clone(&self.closed),
            };
            transfer_and_close(file, |_| {
                block.fill(SENTINEL);
                Ok(block.len())
            })
        }
    }

    fn sentinel_block() -> AlignedBuffer {
        let mut block = AlignedBuffer::new(4096).unwrap();
        block.fill(SENTINEL);
        block
    }

    const DEADLINE: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_write_then_read_succeeds() {
        let engine = ProbeEngine::new(FakeTarget::default());
        let path = Path::new("/mnt/test/probe.bin");

        let write = engine.write_probe(path, sentinel_block(), DEADLINE).await;
        assert!(write.result.is_success());
        assert!(write.result.elapsed() < DEADLINE);
        assert!(write.block.is_some());

        let read = engine
            .read_probe(path, AlignedBuffer::new(4096).unwrap(), DEADLINE)
            .await;
        assert!(read.result.is_success());
        let block = read.block.unwrap();
        assert!(block.as_slice().iter().all(|&b| b == SENTINEL));
    }

    #[tokio::test]
    async fn test_short_write_is_failure() {
        let engine = ProbeEngine::new(FakeTarget {
            short_by: 512,
            ..FakeTarget::default()
        });

        let probe = engine
            .write_probe(Path::new("probe.bin"), sentinel_block(), DEADLINE)
            .await;
        assert!(!probe.result.is_success());
        assert_eq!(probe.result.elapsed(), Duration::ZERO);
        // completed (not abandoned), so the block comes back
        assert!(probe.block.is_some());
    }

    #[tokio::test]
    async fn test_short_read_is_failure() {
        let target = FakeTarget::default();
        *target.data.lock() = vec![SENTINEL; 100];
        let engine = ProbeEngine::new(target);

        let probe = engine
            .read_probe(
                Path::new("probe.bin"),
                AlignedBuffer::new(4096).unwrap(),
                DEADLINE,
            )
            .await;
        assert!(!probe.result.is_success());
        assert_eq!(probe.result.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_close_failure_keeps_transfer_outcome() {
        let closed = Arc::new(AtomicBool::new(false));

        let ok = transfer_and_close(
            FailingClose {
                closed: Arc::clone(&closed),
            },
            |_| Ok(4096),
        );
        assert_eq!(ok.unwrap(), 4096);
        assert!(closed.load(Ordering::SeqCst));

        closed.store(false, Ordering::SeqCst);
        let failed = transfer_and_close(
            FailingClose {
                closed: Arc::clone(&closed),
            },
            |_| Err(Error::ShortRead { expected: 4096, actual: 0 }),
        );
        assert!(matches!(failed, Err(Error::ShortRead { .. })));
        // closed even though the transfer failed
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_failure_does_not_fail_probe() {
        let target = FailingCloseTarget::default();
        let closed = Arc::clone(&target.closed);
        let engine = ProbeEngine::new(target);
        let path = Path::new("probe.bin");

        let write = engine.write_probe(path, sentinel_block(), DEADLINE).await;
        assert!(write.result.is_success());
        assert!(write.result.elapsed() > Duration::ZERO);

        let read = engine
            .read_probe(path, AlignedBuffer::new(4096).unwrap(), DEADLINE)
            .await;
        assert!(read.result.is_success());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_returns_without_waiting() {
        let (target, release) = FakeTarget::stalled();
        let engine = ProbeEngine::new(target);
        let deadline = Duration::from_millis(50);

        let start = Instant::now();
        let probe = engine
            .read_probe(
                Path::new("probe.bin"),
                AlignedBuffer::new(4096).unwrap(),
                deadline,
            )
            .await;
        let waited = start.elapsed();

        assert!(!probe.result.is_success());
        assert_eq!(probe.result.elapsed(), Duration::ZERO);
        assert!(probe.block.is_none());
        assert!(waited >= deadline);
        assert!(waited < Duration::from_millis(500), "waited {waited:?}");

        // let the abandoned operation finish so the runtime can shut down
        drop(release);
    }

    #[tokio::test]
    async fn test_direct_io_round_trip() {
        let Some(dir) = direct_io_scratch_dir() else {
            eprintln!("skipping: no filesystem with direct I/O support");
            return;
        };
        let path = dir.path().join("probe.bin");
        let engine = ProbeEngine::direct();

        let write = engine.write_probe(&path, sentinel_block(), DEADLINE).await;
        assert!(write.result.is_success());

        let read = engine
            .read_probe(&path, AlignedBuffer::new(4096).unwrap(), DEADLINE)
            .await;
        assert!(read.result.is_success());
        assert_eq!(
            read.block.unwrap().as_slice(),
            write.block.unwrap().as_slice()
        );
    }

    #[tokio::test]
    async fn test_direct_io_short_file_read_fails() {
        let Some(dir) = direct_io_scratch_dir() else {
            eprintln!("skipping: no filesystem with direct I/O support");
            return;
        };
        let path = dir.path().join("short.bin");
        std::fs::write(&path, [SENTINEL; 100]).unwrap();

        let probe = ProbeEngine::direct()
            .read_probe(&path, AlignedBuffer::new(4096).unwrap(), DEADLINE)
            .await;
        assert!(!probe.result.is_success());
    }

    #[tokio::test]
    async fn test_direct_io_missing_parent_fails() {
        let path = Path::new("/nonexistent-io-exporter-dir/probe.bin");

        let probe = ProbeEngine::direct()
            .write_probe(path, sentinel_block(), DEADLINE)
            .await;
        assert!(!probe.result.is_success());
        assert_eq!(probe.result.elapsed(), Duration::ZERO);
    }
}
