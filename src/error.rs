use std::path::{Path, PathBuf};

use nix::errno::Errno;

pub type Result<T> = std::result::Result<T, Error>;

/// How bad an error is for the archive as a whole.
///
/// `Warn` means the current entry could not be archived but the stream
/// is still well-formed; `Fatal` means the archive is corrupt from
/// this point and should be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Fatal,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}: {errno}")]
pub struct Error {
    severity: Severity,
    errno: Errno,
    message: &'static str,
    path: Option<PathBuf>,
}

impl Error {
    pub fn warn(errno: Errno, message: &'static str, path: Option<&Path>) -> Self {
        Self {
            severity: Severity::Warn,
            errno,
            message,
            path: path.map(Path::to_path_buf),
        }
    }

    pub fn fatal(errno: Errno, message: &'static str, path: Option<&Path>) -> Self {
        Self {
            severity: Severity::Fatal,
            errno,
            message,
            path: path.map(Path::to_path_buf),
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_warn(&self) -> bool {
        self.severity == Severity::Warn
    }

    pub fn errno(&self) -> Errno {
        self.errno
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Attach a path to an error raised somewhere that didn't know it.
    pub(crate) fn with_path(mut self, path: &Path) -> Self {
        if self.path.is_none() {
            self.path = Some(path.to_path_buf());
        }
        self
    }
}

pub(crate) fn io_errno(err: &std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}
