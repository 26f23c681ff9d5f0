//! Archive assembly: one entry end-to-end.
//!
//! The builder owns the block buffer and the option bits, consults the
//! exclusion matcher and the user lookup service when configured, and
//! drives the header encoder and the content streamer for each entry.
//! Dialect choice is least-invasive: plain USTAR when everything fits,
//! PAX records when `PAX_EXTENSIONS` is set, GNU LongLink when only
//! `GNU_EXTENSIONS` is, and a `Warn` refusal otherwise.

use std::ffi::OsString;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use nix::errno::Errno;
use nix::sys::stat::FileStat;
use tracing::{trace, warn};

use crate::block::{Buffer, BLOCK_SIZE};
use crate::error::{io_errno, Error, Result};
use crate::file;
use crate::header::{encode_longlink_block, Header, TypeFlag, OCTAL12_MAX, OCTAL8_MAX};
use crate::path;
use crate::pax::PaxRecords;
use crate::walk::{walk, Visit, WalkFlags};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Options: u32 {
        /// Emit GNU `././@LongLink` records for long names and link
        /// targets.
        const GNU_EXTENSIONS = 1 << 0;
        /// Emit PAX extended headers for long names, link targets and
        /// out-of-range numeric fields.
        const PAX_EXTENSIONS = 1 << 1;
    }
}

/// Include/exclude decision, consumed as a capability; pattern syntax
/// is the collaborator's business.
pub trait Matcher {
    fn excluded(&self, entry_path: &Path) -> bool;
}

impl<F> Matcher for F
where
    F: Fn(&Path) -> bool,
{
    fn excluded(&self, entry_path: &Path) -> bool {
        self(entry_path)
    }
}

/// Resolve numeric ids to names for the header `uname`/`gname` fields.
pub trait UserLookup {
    fn lookup(&mut self, uid: u32, gid: u32) -> nix::Result<(Option<String>, Option<String>)>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    Archived,
    Excluded,
}

pub struct Builder {
    buf: Buffer,
    options: Options,
    total: u64,
    matcher: Option<Box<dyn Matcher>>,
    lookup: Option<Box<dyn UserLookup>>,
}

impl Builder {
    pub fn new(options: Options) -> Self {
        Self::with_factor(1, options)
    }

    /// `factor` scales the record buffer: capacity is
    /// `factor * 20 * 512` bytes.
    pub fn with_factor(factor: usize, options: Options) -> Self {
        Self {
            buf: Buffer::new(factor),
            options,
            total: 0,
            matcher: None,
            lookup: None,
        }
    }

    /// Associate the sink. The descriptor is borrowed for the lifetime
    /// of the archive and never closed here.
    pub fn set_sink<F: AsRawFd>(&mut self, sink: &F) {
        self.buf.set_sink(sink.as_raw_fd());
    }

    /// Mark the sink as a pipe, enabling the zero-copy content path.
    pub fn set_pipe(&mut self, pipe: bool) {
        self.buf.set_pipe(pipe);
    }

    pub fn set_matcher(&mut self, matcher: Box<dyn Matcher>) {
        self.matcher = Some(matcher);
    }

    pub fn set_lookup(&mut self, lookup: Box<dyn UserLookup>) {
        self.lookup = Some(lookup);
    }

    /// Bytes of archive emitted so far (headers, data and padding).
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Archive a single entry. `member_name` is the name recorded in
    /// the archive; it usually equals `file_path` but diverges when a
    /// tree is being renamed on the way in.
    pub fn write_file(
        &mut self,
        file_path: &Path,
        member_name: &Path,
        st: &FileStat,
    ) -> Result<EntryStatus> {
        if let Some(matcher) = &self.matcher {
            if matcher.excluded(file_path) {
                return Ok(EntryStatus::Excluded);
            }
        }

        // opened before any bytes are committed so an unreadable file
        // warns without corrupting the stream; closed by scope on
        // every path out
        let contents = if st.st_mode & libc::S_IFMT == libc::S_IFREG {
            Some(
                File::open(file_path)
                    .map_err(|e| Error::warn(io_errno(&e), "cannot open file", Some(file_path)))?,
            )
        } else {
            None
        };

        let mut header = Header::for_file(file_path, member_name, st)?;

        if let Some(lookup) = &mut self.lookup {
            let (user, group) = lookup
                .lookup(header.uid() as u32, header.gid() as u32)
                .map_err(|e| {
                    Error::warn(e, "cannot lookup user and group", Some(file_path))
                })?;
            header.set_usernames(user, group);
        }

        let needs_long = header.truncated() || header.link_truncated();
        let needs_numeric = header.size() > OCTAL12_MAX
            || header.uid() > OCTAL8_MAX
            || header.gid() > OCTAL8_MAX;
        let pax = self.options.contains(Options::PAX_EXTENSIONS);
        let gnu = self.options.contains(Options::GNU_EXTENSIONS);

        if needs_long && !pax && !gnu {
            return Err(Error::warn(
                Errno::ENAMETOOLONG,
                "file name too long",
                Some(file_path),
            ));
        }

        let mut gnu_magic = false;
        if pax && (needs_long || needs_numeric) {
            self.write_pax_blocks(&header)?;
        } else if gnu && needs_long {
            self.write_longlink_blocks(&header)?;
            gnu_magic = true;
        }

        let block = self.buf.get_block(BLOCK_SIZE)?;
        header.encode_block(block, gnu_magic);
        self.total += block.len() as u64;

        if let Some(contents) = &contents {
            let written = file::write_contents(&mut self.buf, contents, header.size())
                .map_err(|e| e.with_path(file_path))?;
            self.total += written;
        }

        trace!(path = %file_path.display(), total = self.total, "archived entry");

        Ok(EntryStatus::Archived)
    }

    /// PAX extended header: an `x` shell block followed by the record
    /// stream, padded to block boundaries.
    fn write_pax_blocks(&mut self, header: &Header) -> Result<()> {
        let mut records = PaxRecords::new();
        if header.truncated() {
            records.add("path", header.member());
        }
        if header.link_truncated() {
            records.add("linkpath", header.linkname());
        }
        if header.size() > OCTAL12_MAX {
            records.add_integer("size", header.size());
        }
        if header.uid() > OCTAL8_MAX {
            records.add_integer("uid", header.uid());
        }
        if header.gid() > OCTAL8_MAX {
            records.add_integer("gid", header.gid());
        }
        let (sec, nsec) = header.mtime();
        if nsec != 0 {
            records.add_time("mtime", sec, nsec);
        }

        let block = self.buf.get_block(BLOCK_SIZE)?;
        header.encode_pax_block(block, records.len());
        self.total += block.len() as u64;

        self.total += file::write_path_blocks(&mut self.buf, records.as_bytes())?;
        Ok(())
    }

    /// GNU `L`/`K` records carrying the full name or link target.
    fn write_longlink_blocks(&mut self, header: &Header) -> Result<()> {
        if header.truncated() {
            let block = self.buf.get_block(BLOCK_SIZE)?;
            encode_longlink_block(block, header.member().len(), TypeFlag::LongName);
            self.total += block.len() as u64;
            self.total += file::write_path_blocks(&mut self.buf, header.member())?;
        }
        if header.link_truncated() {
            let block = self.buf.get_block(BLOCK_SIZE)?;
            encode_longlink_block(block, header.linkname().len(), TypeFlag::LongLink);
            self.total += block.len() as u64;
            self.total += file::write_path_blocks(&mut self.buf, header.linkname())?;
        }
        Ok(())
    }

    /// Walk `root` and archive everything under it.
    pub fn append_tree(&mut self, root: &Path, flags: WalkFlags) -> Result<()> {
        self.append_tree_as(root, root, flags)
    }

    /// Walk `root`, recording each entry under `member_root` instead
    /// of the on-disk root. Warn-level failures are logged and the
    /// walk continues; fatal ones abort. Excluded directories are not
    /// descended into.
    pub fn append_tree_as(
        &mut self,
        root: &Path,
        member_root: &Path,
        flags: WalkFlags,
    ) -> Result<()> {
        let cleaned_root = path::clean(root);
        let member_root = path::clean(member_root);
        let rename = cleaned_root != member_root;
        let root_len = path::as_bytes(&cleaned_root).len();

        walk(&cleaned_root, flags, &mut |entry_path: &Path, st: &FileStat| {
            let member: PathBuf = if rename {
                let mut renamed = path::as_bytes(&member_root).to_vec();
                renamed.extend_from_slice(&path::as_bytes(entry_path)[root_len..]);
                PathBuf::from(OsString::from_vec(renamed))
            } else {
                entry_path.to_path_buf()
            };

            match self.write_file(entry_path, &member, st) {
                Ok(EntryStatus::Archived) => Ok(Visit::Recurse),
                Ok(EntryStatus::Excluded) => Ok(Visit::Skip),
                Err(e) if e.is_warn() => {
                    warn!(path = %entry_path.display(), error = %e, "skipping entry");
                    Ok(Visit::Recurse)
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Terminate the archive: two zero blocks, then flush the final
    /// record. Afterwards `total()` equals the bytes delivered to the
    /// sink, a multiple of the block size.
    pub fn finish(&mut self) -> Result<u64> {
        let given = self.buf.get_block(BLOCK_SIZE)?.len();
        self.total += given as u64;
        let given = self.buf.get_block(BLOCK_SIZE)?.len();
        self.total += given as u64;

        // the unreserved remainder of the record leaves as zeros
        self.total += self.buf.unused() as u64;
        self.buf.flush()?;

        Ok(self.total)
    }
}
