//! File-content streaming into the block buffer.
//!
//! Contents are copied in block-buffer-sized bites and padded up to
//! the next block boundary. On a pipe sink the copy switches to
//! `splice` once the buffer has been drained at least once in the
//! current call, so staged header bytes can never be overtaken by a
//! direct kernel-side move.

use std::fs::File;
use std::os::fd::AsRawFd;

use tracing::trace;

use crate::block::{padded_size, Buffer, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::sys;

/// Copy exactly `file_size` bytes from `file` into the stream, zero
/// padded to the next block boundary. A file that shrank under us is
/// treated as EOF and padded; one that grew is clipped. Returns the
/// padded byte count delivered.
pub fn write_contents(buf: &mut Buffer, file: &File, file_size: u64) -> Result<u64> {
    let mut remaining = file_size;
    let mut total: u64 = 0;
    let mut splice_total: u64 = 0;
    let mut emptied = false;

    while remaining > 0 {
        if buf.full() {
            buf.flush()?;
            emptied = true;
        }

        #[cfg(target_os = "linux")]
        if buf.is_pipe() && emptied {
            let sink = buf
                .sink()
                .ok_or_else(|| Error::fatal(nix::errno::Errno::EBADF, "buffer has no sink", None))?;
            let len = remaining.min(1 << 30) as usize;
            let n = match sys::splice(file.as_raw_fd(), sink, len) {
                Ok(n) => n as u64,
                Err(e) => {
                    // keep the stream block-aligned for the caller
                    pad_splice_tail(buf, splice_total);
                    return Err(Error::fatal(e, "cannot splice file to archive", None));
                }
            };
            if n == 0 {
                break;
            }
            splice_total += n;
            total += n;
            remaining -= n;
            continue;
        }

        let want = remaining.min(buf.unused() as u64) as usize;
        let block = buf.get_block(want)?;
        let given = block.len();

        let rlen = sys::read(file.as_raw_fd(), &mut block[..want])
            .map_err(|e| Error::warn(e, "cannot read file", None))?;

        if rlen < want {
            // end of file: keep the padded prefix, hand the rest of
            // the window back
            buf.reclaim(rlen, given)?;
            total += padded_size(rlen) as u64;
            break;
        }

        total += given as u64;
        remaining -= rlen as u64;
    }

    if splice_total > 0 {
        trace!(bytes = splice_total, "spliced file contents");
    }

    let residue = (splice_total % BLOCK_SIZE as u64) as usize;
    if residue != 0 {
        let pad = BLOCK_SIZE - residue;
        buf.write_zeros(pad)?;
        total += pad as u64;
    }

    Ok(total)
}

#[cfg(target_os = "linux")]
fn pad_splice_tail(buf: &mut Buffer, splice_total: u64) {
    let residue = (splice_total % BLOCK_SIZE as u64) as usize;
    if residue != 0 {
        let _ = buf.write_zeros(BLOCK_SIZE - residue);
    }
}

/// Write `data` as whole blocks, the last one zero-padded. Serves GNU
/// long-name payloads and PAX record streams.
pub fn write_path_blocks(buf: &mut Buffer, data: &[u8]) -> Result<u64> {
    let mut total = 0u64;
    for chunk in data.chunks(BLOCK_SIZE) {
        let block = buf.get_block(chunk.len())?;
        block[..chunk.len()].copy_from_slice(chunk);
        total += block.len() as u64;
    }
    Ok(total)
}
