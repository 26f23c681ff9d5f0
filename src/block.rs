//! Block-aligned staging buffer between the header encoder and the
//! sink.
//!
//! Tar is a stream of 512-byte records; every header is exactly one
//! block and every file body is padded up to a block boundary. The
//! only write primitive here is "reserve a padded block", so a partial
//! record can never be produced and a short read just hands the tail
//! back via [`Buffer::reclaim`].

use std::os::fd::RawFd;

use nix::errno::Errno;
use tracing::trace;

use crate::error::{Error, Result};
use crate::sys;

pub const BLOCK_SIZE: usize = 512;

/// Blocks per capacity factor: factor 1 is the classic 10 KiB record.
const RECORD_BLOCKS: usize = 20;

/// Round `len` up to the next multiple of [`BLOCK_SIZE`].
pub fn padded_size(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

pub struct Buffer {
    data: Vec<u8>,
    unused: usize,
    sink: Option<RawFd>,
    pipe: bool,
}

impl Buffer {
    /// A zero-filled buffer of `factor * 20 * 512` bytes with no sink.
    /// A factor of 0 is promoted to 1.
    pub fn new(factor: usize) -> Self {
        let size = factor.max(1) * RECORD_BLOCKS * BLOCK_SIZE;
        Self {
            data: vec![0; size],
            unused: size,
            sink: None,
            pipe: false,
        }
    }

    /// Associate the sink. The descriptor is borrowed; the buffer
    /// never closes it.
    pub fn set_sink(&mut self, fd: RawFd) {
        self.sink = Some(fd);
    }

    pub fn set_pipe(&mut self, pipe: bool) {
        self.pipe = pipe;
    }

    pub fn sink(&self) -> Option<RawFd> {
        self.sink
    }

    pub fn is_pipe(&self) -> bool {
        self.pipe
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn unused(&self) -> usize {
        self.unused
    }

    pub fn full(&self) -> bool {
        self.unused == 0
    }

    /// Reserve a pre-zeroed window of `padded_size(len)` bytes,
    /// flushing first if the buffer is full. The returned slice length
    /// is the number of bytes taken from the buffer.
    pub fn get_block(&mut self, len: usize) -> Result<&mut [u8]> {
        if len == 0 {
            return Err(Error::fatal(Errno::EINVAL, "zero-length block requested", None));
        }
        if self.sink.is_none() {
            return Err(Error::fatal(Errno::EBADF, "buffer has no sink", None));
        }

        if self.full() {
            self.flush()?;
        }

        let padded_len = padded_size(len);
        if padded_len > self.unused {
            return Err(Error::fatal(
                Errno::EFBIG,
                "block request exceeds buffer space",
                None,
            ));
        }

        let offset = self.data.len() - self.unused;
        self.unused -= padded_len;

        Ok(&mut self.data[offset..offset + padded_len])
    }

    /// Hand the unused tail of a reserved window back after a short
    /// read. `given` must be a nonzero multiple of the block size, as
    /// returned by [`Buffer::get_block`]; returns the reclaimed count.
    pub fn reclaim(&mut self, used: usize, given: usize) -> Result<usize> {
        if given == 0 || given % BLOCK_SIZE != 0 {
            return Err(Error::fatal(Errno::EINVAL, "reclaim of unaligned window", None));
        }
        let padded_len = padded_size(used);
        if padded_len > given {
            return Err(Error::fatal(Errno::EINVAL, "reclaim larger than window", None));
        }

        let delta = given - padded_len;
        self.unused += delta;

        Ok(delta)
    }

    /// Write the entire buffer (padding included) to the sink, then
    /// re-zero it. No-op when nothing has been staged.
    pub fn flush(&mut self) -> Result<usize> {
        let sink = self
            .sink
            .ok_or_else(|| Error::fatal(Errno::EBADF, "buffer has no sink", None))?;

        if self.unused == self.data.len() {
            return Ok(0);
        }

        sys::write_full(sink, &self.data)
            .map_err(|e| Error::fatal(e, "cannot write archive data", None))?;

        trace!(bytes = self.data.len(), "flushed record buffer");

        self.data.fill(0);
        self.unused = self.data.len();

        Ok(self.data.len())
    }

    /// Emit `len` zero bytes straight from the zero-filled tail
    /// region, bypassing reservation. Used to pad a splice residue up
    /// to a block boundary.
    pub(crate) fn write_zeros(&mut self, len: usize) -> Result<usize> {
        let sink = self
            .sink
            .ok_or_else(|| Error::fatal(Errno::EBADF, "buffer has no sink", None))?;

        debug_assert!(len <= self.unused);
        let offset = self.data.len() - self.unused;
        sys::write_full(sink, &self.data[offset..offset + len])
            .map_err(|e| Error::fatal(e, "cannot write archive padding", None))?;

        Ok(len)
    }

    /// Drop the sink association and return to the freshly-created
    /// state.
    pub fn reset(&mut self) {
        self.sink = None;
        self.pipe = false;
        self.unused = self.data.len();
        self.data.fill(0);
    }
}
