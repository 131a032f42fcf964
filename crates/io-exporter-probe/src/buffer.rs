//! Probe buffer pool
//!
//! Owns the write and read blocks used by the probes. The blocks are lent
//! to the probe engine for the duration of one operation and handed back
//! when the operation completes. A block lent to an operation that missed
//! its deadline is never returned: it stays with the abandoned operation,
//! and [`BufferPool::clear`] allocates a zeroed replacement of the same
//! layout. Nothing an abandoned operation does can leak into a later cycle.

use crate::raw_io::AlignedBuffer;
use io_exporter_common::Result;
use std::alloc::Layout;

/// Byte pattern written by the write probe
pub const SENTINEL: u8 = b'A';

#[derive(Debug)]
pub struct BufferPool {
    layout: Layout,
    write: Option<AlignedBuffer>,
    read: Option<AlignedBuffer>,
    /// Blocks allocated to replace ones lost to abandoned operations
    replaced: u64,
}

impl BufferPool {
    /// Allocate both blocks, `size` bytes each (rounded up to whole sectors)
    pub fn new(size: usize) -> Result<Self> {
        let write = AlignedBuffer::new(size)?;
        let layout = write.layout();
        let read = AlignedBuffer::zeroed(layout);

        Ok(Self {
            layout,
            write: Some(write),
            read: Some(read),
            replaced: 0,
        })
    }

    /// Length shared by both blocks
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Number of blocks reallocated after abandoned operations
    pub fn replaced(&self) -> u64 {
        self.replaced
    }

    /// Zero both blocks, first replacing any block still held by an
    /// abandoned operation.
    pub fn clear(&mut self) {
        for slot in [&mut self.write, &mut self.read] {
            match slot {
                Some(block) => block.fill(0),
                None => {
                    *slot = Some(AlignedBuffer::zeroed(self.layout));
                    self.replaced += 1;
                }
            }
        }
    }

    /// Overwrite every byte of the write block with [`SENTINEL`]
    pub fn fill_write_pattern(&mut self) {
        self.write_block_mut().fill(SENTINEL);
    }

    /// Byte-exact comparison of the write block against the read block
    pub fn contents_equal(&self) -> bool {
        match (&self.write, &self.read) {
            (Some(write), Some(read)) => write.as_slice() == read.as_slice(),
            _ => false,
        }
    }

    /// Lend the write block to a probe
    pub fn take_write(&mut self) -> AlignedBuffer {
        let layout = self.layout;
        self.write
            .take()
            .unwrap_or_else(|| AlignedBuffer::zeroed(layout))
    }

    /// Lend the read block to a probe
    pub fn take_read(&mut self) -> AlignedBuffer {
        let layout = self.layout;
        self.read
            .take()
            .unwrap_or_else(|| AlignedBuffer::zeroed(layout))
    }

    /// Hand the write block back; `None` when the probe abandoned it
    pub fn restore_write(&mut self, block: Option<AlignedBuffer>) {
        self.write = block;
    }

    /// Hand the read block back; `None` when the probe abandoned it
    pub fn restore_read(&mut self, block: Option<AlignedBuffer>) {
        self.read = block;
    }

    pub fn write_block(&self) -> Option<&[u8]> {
        self.write.as_ref().map(AlignedBuffer::as_slice)
    }

    pub fn read_block(&self) -> Option<&[u8]> {
        self.read.as_ref().map(AlignedBuffer::as_slice)
    }

    fn write_block_mut(&mut self) -> &mut AlignedBuffer {
        let layout = self.layout;
        self.write.get_or_insert_with(|| AlignedBuffer::zeroed(layout))
    }
}
