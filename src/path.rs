//! Byte-level path canonicalisation.
//!
//! Member names and walk roots are compared and embedded in headers in
//! a canonical form: runs of `/` collapsed, `.` segments dropped, `..`
//! resolved against prior segments (never above `/` for absolute
//! paths), and no trailing `/` except on the root itself. Paths are
//! treated as raw bytes; Linux paths are not required to be UTF-8.

use std::ffi::OsStr;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

pub fn clean(path: &Path) -> PathBuf {
    PathBuf::from(std::ffi::OsString::from_vec(clean_bytes(
        path.as_os_str().as_bytes(),
    )))
}

pub fn clean_bytes(path: &[u8]) -> Vec<u8> {
    let absolute = path.first() == Some(&b'/');
    let mut segments: Vec<&[u8]> = Vec::new();

    for segment in path.split(|&c| c == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => match segments.last() {
                Some(&last) if last != b".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(segment),
            },
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return if absolute { b"/".to_vec() } else { b".".to_vec() };
    }

    let mut out = Vec::with_capacity(path.len());
    if absolute {
        out.push(b'/');
    }
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(b'/');
        }
        out.extend_from_slice(segment);
    }
    out
}

pub(crate) fn as_bytes(path: &Path) -> &[u8] {
    path.as_os_str().as_bytes()
}

pub(crate) fn from_bytes(bytes: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(bytes))
}
