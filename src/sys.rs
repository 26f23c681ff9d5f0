use std::os::fd::RawFd;

use nix::errno::Errno;

/// Read up to `buf.len()` bytes, retrying on `EINTR`. This is the only
/// syscall in the crate that retries interrupts internally; everything
/// else surfaces them.
pub fn read(fd: RawFd, buf: &mut [u8]) -> nix::Result<usize> {
    loop {
        let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        match Errno::result(ret) {
            Err(Errno::EINTR) => continue,
            other => return other.map(|n| n as usize),
        }
    }
}

/// Write the whole slice, continuing across short writes.
pub fn write_full(fd: RawFd, mut buf: &[u8]) -> nix::Result<usize> {
    let mut total = 0;
    while !buf.is_empty() {
        let ret = unsafe { libc::write(fd, buf.as_ptr() as *const _, buf.len()) };
        let n = Errno::result(ret)? as usize;
        if n == 0 {
            return Err(Errno::EIO);
        }
        total += n;
        buf = &buf[n..];
    }
    Ok(total)
}

/// Move up to `len` bytes from `fd_in` to the pipe `fd_out` without
/// copying through userspace. Retries on `EINTR`; a short move is
/// reported as-is for the caller to loop on.
#[cfg(target_os = "linux")]
pub fn splice(fd_in: RawFd, fd_out: RawFd, len: usize) -> nix::Result<usize> {
    loop {
        let ret = unsafe {
            libc::splice(
                fd_in,
                std::ptr::null_mut(),
                fd_out,
                std::ptr::null_mut(),
                len,
                libc::SPLICE_F_MOVE,
            )
        };
        match Errno::result(ret) {
            Err(Errno::EINTR) => continue,
            other => return other.map(|n| n as usize),
        }
    }
}
