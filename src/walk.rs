//! Iterative depth-first filesystem traversal.
//!
//! Directories are iterated one at a time off an explicit stack of
//! open iterators; each entry is offered to the visitor, whose answer
//! decides whether a directory child is descended into. Sibling order
//! is whatever the underlying directory iterator yields; callers that
//! need a deterministic order must sort for themselves.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{lstat, stat, FileStat, Mode};
use tracing::trace;

use crate::error::{Error, Result};
use crate::path;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct WalkFlags: u32 {
        /// Stat through symlinks instead of reporting the links
        /// themselves.
        const FOLLOW_SYMLINKS = 1 << 0;
    }
}

/// Visitor verdict for one entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    /// Descend into this entry if it is a directory.
    Recurse,
    /// Do not descend; continue with the next entry.
    Skip,
}

pub trait Visitor {
    fn entry(&mut self, path: &Path, st: &FileStat) -> Result<Visit>;
}

impl<F> Visitor for F
where
    F: FnMut(&Path, &FileStat) -> Result<Visit>,
{
    fn entry(&mut self, path: &Path, st: &FileStat) -> Result<Visit> {
        self(path, st)
    }
}

fn stat_entry(entry_path: &Path, flags: WalkFlags) -> Result<FileStat> {
    let res = if flags.contains(WalkFlags::FOLLOW_SYMLINKS) {
        stat(entry_path)
    } else {
        lstat(entry_path)
    };
    res.map_err(|e| Error::fatal(e, "cannot stat file", Some(entry_path)))
}

fn open_dir(dir_path: &Path) -> nix::Result<Dir> {
    Dir::open(dir_path, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())
}

/// Walk the subtree under `root` depth-first, offering every entry to
/// the visitor. An `Err` from the visitor aborts the walk; `Skip`
/// prunes directories. Unreadable child directories (`EACCES`) are
/// skipped silently; any other failure aborts.
pub fn walk<V: Visitor + ?Sized>(root: &Path, flags: WalkFlags, visitor: &mut V) -> Result<()> {
    let root = path::clean(root);
    let st = stat_entry(&root, flags)?;

    match visitor.entry(&root, &st)? {
        Visit::Skip => return Ok(()),
        Visit::Recurse => {}
    }
    if st.st_mode & libc::S_IFMT != libc::S_IFDIR {
        return Ok(());
    }

    let dir = open_dir(&root)
        .map_err(|e| Error::fatal(e, "cannot open directory", Some(&root)))?;

    // every Dir on the stack is an open iterator; Drop closes them on
    // all exit paths
    let mut dirs: Vec<(Dir, PathBuf)> = vec![(dir, root)];

    while let Some((mut dir, dir_path)) = dirs.pop() {
        for entry in dir.iter() {
            let entry =
                entry.map_err(|e| Error::fatal(e, "cannot read directory", Some(&dir_path)))?;

            let name = entry.file_name().to_bytes();
            if name == b"." || name == b".." {
                continue;
            }

            let child = dir_path.join(OsStr::from_bytes(name));
            let st = stat_entry(&child, flags)?;

            match visitor.entry(&child, &st)? {
                Visit::Skip => continue,
                Visit::Recurse => {}
            }

            if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
                match open_dir(&child) {
                    Ok(d) => dirs.push((d, child)),
                    Err(Errno::EACCES) => {
                        trace!(path = %child.display(), "skipping unreadable directory");
                    }
                    Err(e) => {
                        return Err(Error::fatal(e, "cannot open directory", Some(&child)))
                    }
                }
            }
        }
    }

    Ok(())
}
