//! Platform-specific raw file I/O
//!
//! Provides file access bypassing the OS page cache, so probe timings
//! reflect the device rather than memory:
//! - Linux: O_DIRECT flag
//! - macOS: F_NOCACHE fcntl
//!
//! Writes additionally use O_DSYNC: a completed write has reached the device.

use io_exporter_common::{Error, Result};
use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Memory alignment for direct I/O buffers (page size on common platforms)
pub const ALIGNMENT: usize = 4096;

/// Length granularity for direct I/O (logical sector size)
pub const SECTOR_SIZE: usize = 512;

/// Raw file handle opened for direct I/O
pub struct DirectFile {
    file: File,
    path: PathBuf,
}

impl DirectFile {
    /// Open the target for writing, creating it if absent and truncating
    /// any existing content.
    ///
    /// Block devices are opened as-is (they can be neither created nor
    /// truncated).
    pub fn create_truncate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut options = OpenOptions::new();
        options.write(true).mode(0o640);

        if !is_block_device(path) {
            options.create(true).truncate(true);
        }

        options.custom_flags(libc::O_DSYNC | direct_flag());

        Self::open_with(path, &options)
    }

    /// Open the target read-only
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).custom_flags(direct_flag());

        Self::open_with(path.as_ref(), &options)
    }

    fn open_with(path: &Path, options: &OpenOptions) -> Result<Self> {
        let file = options.open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;

        // On macOS, use F_NOCACHE after opening
        #[cfg(target_os = "macos")]
        {
            use std::os::unix::io::AsRawFd;
            #[allow(unsafe_code)]
            let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
            if ret == -1 {
                return Err(Error::Open {
                    path: path.to_path_buf(),
                    source: std::io::Error::last_os_error(),
                });
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issue a single write of the whole buffer.
    ///
    /// The returned count may be smaller than `buf.len()`; callers decide
    /// whether that is acceptable.
    pub fn write_block(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.file.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(Error::Write {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Read until the buffer is full or end of file is reached.
    ///
    /// Returns the number of bytes read; fewer than `buf.len()` means the
    /// file is shorter than the buffer.
    pub fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(Error::Read {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }

        Ok(filled)
    }

    /// Close the handle, reporting the close error instead of dropping it
    pub fn close(self) -> Result<()> {
        let Self { file, path } = self;
        let fd = file.into_raw_fd();

        #[allow(unsafe_code)]
        let ret = unsafe { libc::close(fd) };
        if ret == -1 {
            return Err(Error::Close {
                path,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for DirectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectFile").field("path", &self.path).finish()
    }
}

#[cfg(target_os = "linux")]
const fn direct_flag() -> libc::c_int {
    libc::O_DIRECT
}

#[cfg(not(target_os = "linux"))]
const fn direct_flag() -> libc::c_int {
    0
}

/// Check if path is a block device
fn is_block_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    // A missing path is not a block device; it will be created as a regular file
    std::fs::metadata(path)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

/// Aligned buffer for direct I/O operations
///
/// With O_DIRECT the buffer address must be aligned to the device's I/O
/// granularity and the length must be a multiple of the sector size. The
/// buffer is zeroed on allocation and never resized.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer exclusively owns its allocation.
#[allow(unsafe_code)]
unsafe impl Send for AlignedBuffer {}
#[allow(unsafe_code)]
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Create a new aligned buffer of at least `size` bytes
    pub fn new(size: usize) -> Result<Self> {
        Self::with_alignment(size, ALIGNMENT)
    }

    /// Create a new aligned buffer with custom alignment
    pub fn with_alignment(size: usize, alignment: usize) -> Result<Self> {
        Ok(Self::zeroed(Self::layout_for(size, alignment)?))
    }

    /// Layout for a buffer of `size` bytes, rounded up to whole sectors
    pub fn layout_for(size: usize, alignment: usize) -> Result<Layout> {
        let invalid = || Error::Alignment {
            len: size,
            alignment,
        };

        if size == 0 || alignment < SECTOR_SIZE {
            return Err(invalid());
        }

        let aligned_size = size
            .div_ceil(SECTOR_SIZE)
            .checked_mul(SECTOR_SIZE)
            .ok_or_else(invalid)?;

        Layout::from_size_align(aligned_size, alignment).map_err(|_| invalid())
    }

    /// Allocate a zeroed buffer for a layout produced by [`Self::layout_for`]
    pub(crate) fn zeroed(layout: Layout) -> Self {
        debug_assert!(layout.size() > 0);

        #[allow(unsafe_code)]
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };

        Self { ptr, layout }
    }

    /// Get the buffer as a slice
    pub fn as_slice(&self) -> &[u8] {
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size())
        }
    }

    /// Get the buffer as a mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size())
        }
    }

    /// Get the buffer size
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false: zero-length buffers cannot be allocated
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    pub(crate) fn layout(&self) -> Layout {
        self.layout
    }

    /// Overwrite every byte with `value`
    pub fn fill(&mut self, value: u8) {
        self.as_mut_slice().fill(value);
    }

    /// Whether the start address honours the alignment
    pub fn is_aligned(&self) -> bool {
        self.ptr.as_ptr() as usize % self.layout.align() == 0
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        #[allow(unsafe_code)]
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .field("alignment", &self.alignment())
            .finish()
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for AlignedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

/// Scratch directory on a filesystem that accepts direct I/O, if any.
///
/// tmpfs rejects O_DIRECT, so tests fall back to the crate directory and
/// skip themselves when neither location supports it.
#[cfg(test)]
pub(crate) fn direct_io_scratch_dir() -> Option<tempfile::TempDir> {
    let candidates = [
        tempfile::tempdir().ok(),
        tempfile::tempdir_in(env!("CARGO_MANIFEST_DIR")).ok(),
    ];

    candidates.into_iter().flatten().find(|dir| {
        let probe = dir.path().join(".direct-io-check");
        DirectFile::create_truncate(&probe)
            .and_then(DirectFile::close)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_buffer() {
        let mut buf = AlignedBuffer::new(4096).unwrap();
        assert_eq!(buf.len(), 4096);
        assert!(buf.is_aligned());
        assert!(buf.as_slice().iter().all(|&b| b == 0));

        buf.fill(b'A');
        assert!(buf.as_slice().iter().all(|&b| b == b'A'));
    }

    #[test]
    fn test_aligned_buffer_rounds_to_sector() {
        let buf = AlignedBuffer::new(1000).unwrap();
        assert_eq!(buf.len(), 1024);
        assert_eq!(buf.alignment(), ALIGNMENT);
        assert!(buf.is_aligned());
    }

    #[test]
    fn test_aligned_buffer_rejects_invalid_layouts() {
        assert!(matches!(
            AlignedBuffer::new(0),
            Err(Error::Alignment { len: 0, .. })
        ));
        assert!(AlignedBuffer::with_alignment(4096, 3000).is_err());
    }

    #[test]
    fn test_open_missing_parent_fails() {
        let err = DirectFile::create_truncate("/nonexistent-io-exporter-dir/probe.bin")
            .unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
    }

    #[test]
    fn test_direct_file_write_and_read() {
        let Some(dir) = direct_io_scratch_dir() else {
            eprintln!("skipping: no filesystem with direct I/O support");
            return;
        };
        let path = dir.path().join("probe.bin");

        let mut block = AlignedBuffer::new(4096).unwrap();
        block.fill(b'A');

        let mut file = DirectFile::create_truncate(&path).unwrap();
        assert_eq!(file.write_block(block.as_slice()).unwrap(), 4096);
        file.close().unwrap();

        let mut read = AlignedBuffer::new(4096).unwrap();
        let mut file = DirectFile::open_read(&path).unwrap();
        assert_eq!(file.read_block(read.as_mut_slice()).unwrap(), 4096);
        file.close().unwrap();

        assert_eq!(block.as_slice(), read.as_slice());
    }
}
