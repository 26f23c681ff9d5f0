//! Tar header construction and on-wire encoding.
//!
//! A [`Header`] is built once from a `(path, member name, stat)`
//! triple and is immutable afterwards apart from username attachment.
//! Encoding writes the USTAR field layout into a 512-byte block:
//! zero-padded NUL-terminated octal numerics, with the GNU base-256
//! escape (high bit in the first byte, big-endian value in the rest)
//! when a value exceeds its field's octal range.

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use nix::errno::Errno;
use nix::sys::stat::FileStat;
use numtoa::NumToA;

use crate::block::BLOCK_SIZE;
use crate::error::{Error, Result};
use crate::path;
use crate::pax;

const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;
const LINKNAME_LEN: usize = 100;

/// Largest value an 8-wide octal field (7 digits + NUL) can hold.
pub(crate) const OCTAL8_MAX: u64 = 0o7777777;
/// Largest value a 12-wide octal field (11 digits + NUL) can hold.
pub(crate) const OCTAL12_MAX: u64 = 0o77777777777;

const GNU_LONGLINK_NAME: &[u8] = b"././@LongLink";

#[repr(C)]
#[derive(Pod, Zeroable, Clone, Copy)]
struct UstarBlock {
    // https://pubs.opengroup.org/onlinepubs/007904975/utilities/pax.html#tag_04_100_13_06
    name: [u8; 100],
    mode: [u8; 8],
    uid: [u8; 8],
    gid: [u8; 8],
    size: [u8; 12],
    mtime: [u8; 12],
    chksum: [u8; 8],
    typeflag: [u8; 1],
    linkname: [u8; 100],
    magic: [u8; 6],
    version: [u8; 2],
    uname: [u8; 32],
    gname: [u8; 32],
    devmajor: [u8; 8],
    devminor: [u8; 8],
    prefix: [u8; 155],

    // up to 512 bytes
    _padding: [u8; 12],
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeFlag {
    Regular = b'0',
    Symlink = b'2',
    Char = b'3',
    Block = b'4',
    Directory = b'5',
    Fifo = b'6',
    /// GNU long member name record.
    LongName = b'L',
    /// GNU long link target record.
    LongLink = b'K',
    /// PAX extended header record.
    PaxExtended = b'x',
}

#[derive(Debug)]
pub struct Header {
    member: Vec<u8>,
    name: Vec<u8>,
    prefix: Vec<u8>,
    truncated: bool,
    typeflag: TypeFlag,
    mode: u32,
    uid: u64,
    gid: u64,
    size: u64,
    mtime: i64,
    mtime_nsec: i64,
    linkname: Vec<u8>,
    link_truncated: bool,
    uname: Vec<u8>,
    gname: Vec<u8>,
    devmajor: u32,
    devminor: u32,
}

impl Header {
    /// Build a header for one filesystem entry. `member_name` is
    /// cleaned and becomes the archived name; directories get a
    /// trailing `/`. Sets `truncated` when the name does not fit the
    /// USTAR `name`+`prefix` fields and `link_truncated` when a
    /// symlink target exceeds the `linkname` field.
    pub fn for_file(file_path: &Path, member_name: &Path, st: &FileStat) -> Result<Self> {
        let typeflag = match st.st_mode & libc::S_IFMT {
            libc::S_IFREG => TypeFlag::Regular,
            libc::S_IFLNK => TypeFlag::Symlink,
            libc::S_IFCHR => TypeFlag::Char,
            libc::S_IFBLK => TypeFlag::Block,
            libc::S_IFDIR => TypeFlag::Directory,
            libc::S_IFIFO => TypeFlag::Fifo,
            // tar has no representation for sockets
            _ => {
                return Err(Error::warn(
                    Errno::EOPNOTSUPP,
                    "unsupported file type",
                    Some(file_path),
                ))
            }
        };

        let mut member = path::clean_bytes(path::as_bytes(member_name));
        if typeflag == TypeFlag::Directory && member != b"/" {
            member.push(b'/');
        }
        let (prefix, name, truncated) = split_member(&member);

        let mut linkname = Vec::new();
        let mut link_truncated = false;
        if typeflag == TypeFlag::Symlink {
            let target = nix::fcntl::readlink(file_path)
                .map_err(|e| Error::fatal(e, "cannot read symbolic link", Some(file_path)))?;
            linkname = path::as_bytes(Path::new(&target)).to_vec();
            link_truncated = linkname.len() > LINKNAME_LEN;
        }

        let (devmajor, devminor) = match typeflag {
            TypeFlag::Char | TypeFlag::Block => {
                let rdev = st.st_rdev;
                (
                    nix::sys::stat::major(rdev) as u32,
                    nix::sys::stat::minor(rdev) as u32,
                )
            }
            _ => (0, 0),
        };

        Ok(Self {
            member,
            name,
            prefix,
            truncated,
            typeflag,
            mode: st.st_mode & 0o7777,
            uid: st.st_uid as u64,
            gid: st.st_gid as u64,
            size: match typeflag {
                TypeFlag::Regular => st.st_size as u64,
                _ => 0,
            },
            mtime: st.st_mtime,
            mtime_nsec: mtime_nsec(st),
            linkname,
            link_truncated,
            uname: Vec::new(),
            gname: Vec::new(),
            devmajor,
            devminor,
        })
    }

    pub fn set_usernames(&mut self, user: Option<String>, group: Option<String>) {
        if let Some(user) = user {
            self.uname = user.into_bytes();
        }
        if let Some(group) = group {
            self.gname = group.into_bytes();
        }
    }

    /// The full cleaned member name (directories end in `/`).
    pub fn member(&self) -> &[u8] {
        &self.member
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn link_truncated(&self) -> bool {
        self.link_truncated
    }

    pub fn linkname(&self) -> &[u8] {
        &self.linkname
    }

    pub fn typeflag(&self) -> TypeFlag {
        self.typeflag
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn gid(&self) -> u64 {
        self.gid
    }

    pub fn mtime(&self) -> (i64, i64) {
        (self.mtime, self.mtime_nsec)
    }

    /// Encode the entry into one 512-byte block. `gnu_magic` selects
    /// the GNU `ustar ` magic used while long-name blocks are in play.
    pub fn encode_block(&self, block: &mut [u8], gnu_magic: bool) {
        let mut raw = UstarBlock::zeroed();

        raw.name[..self.name.len()].copy_from_slice(&self.name);
        raw.prefix[..self.prefix.len()].copy_from_slice(&self.prefix);

        write_octal(&mut raw.mode, self.mode as u64);
        write_numeric(&mut raw.uid, self.uid);
        write_numeric(&mut raw.gid, self.gid);
        write_numeric(&mut raw.size, self.size);
        write_numeric(&mut raw.mtime, self.mtime.max(0) as u64);

        raw.typeflag = [self.typeflag as u8];

        let linklen = self.linkname.len().min(LINKNAME_LEN);
        raw.linkname[..linklen].copy_from_slice(&self.linkname[..linklen]);

        set_magic(&mut raw, gnu_magic);

        let ulen = self.uname.len().min(raw.uname.len() - 1);
        raw.uname[..ulen].copy_from_slice(&self.uname[..ulen]);
        let glen = self.gname.len().min(raw.gname.len() - 1);
        raw.gname[..glen].copy_from_slice(&self.gname[..glen]);

        if matches!(self.typeflag, TypeFlag::Char | TypeFlag::Block) {
            write_numeric(&mut raw.devmajor, self.devmajor as u64);
            write_numeric(&mut raw.devminor, self.devminor as u64);
        }

        seal(&mut raw, block);
    }

    /// Encode the `x` shell block preceding this entry's PAX record
    /// stream of `payload_len` bytes.
    pub fn encode_pax_block(&self, block: &mut [u8], payload_len: usize) {
        let mut raw = UstarBlock::zeroed();

        let name = pax::header_name(&self.member);
        raw.name[..name.len()].copy_from_slice(&name);

        write_octal(&mut raw.mode, 0o644);
        write_numeric(&mut raw.uid, self.uid);
        write_numeric(&mut raw.gid, self.gid);
        write_numeric(&mut raw.size, payload_len as u64);
        write_numeric(&mut raw.mtime, self.mtime.max(0) as u64);

        raw.typeflag = [TypeFlag::PaxExtended as u8];
        set_magic(&mut raw, false);

        seal(&mut raw, block);
    }
}

/// Encode a GNU `././@LongLink` header announcing `payload_len` bytes
/// of long member name (`TypeFlag::LongName`) or link target
/// (`TypeFlag::LongLink`).
pub fn encode_longlink_block(block: &mut [u8], payload_len: usize, kind: TypeFlag) {
    debug_assert!(matches!(kind, TypeFlag::LongName | TypeFlag::LongLink));

    let mut raw = UstarBlock::zeroed();

    raw.name[..GNU_LONGLINK_NAME.len()].copy_from_slice(GNU_LONGLINK_NAME);
    write_octal(&mut raw.mode, 0);
    write_octal(&mut raw.uid, 0);
    write_octal(&mut raw.gid, 0);
    write_numeric(&mut raw.size, payload_len as u64);
    write_octal(&mut raw.mtime, 0);
    raw.typeflag = [kind as u8];
    set_magic(&mut raw, true);

    seal(&mut raw, block);
}

fn set_magic(raw: &mut UstarBlock, gnu: bool) {
    if gnu {
        raw.magic = *b"ustar ";
        raw.version = *b" \0";
    } else {
        raw.magic = *b"ustar\0";
        raw.version = *b"00";
    }
}

/// Compute the checksum and copy the finished image into `block`.
fn seal(raw: &mut UstarBlock, block: &mut [u8]) {
    raw.chksum = [b' '; 8];
    let sum: u32 = bytemuck::bytes_of(raw).iter().map(|&b| b as u32).sum();
    // 6 octal digits, NUL, space
    write_left_padded(&mut raw.chksum[..6], sum as u64, 8, 6);
    raw.chksum[6] = 0;
    raw.chksum[7] = b' ';

    block[..BLOCK_SIZE].copy_from_slice(bytemuck::bytes_of(raw));
}

/// Recompute a stored block's checksum, reading the checksum field as
/// spaces.
pub fn checksum_of(block: &[u8]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { b' ' as u32 } else { b as u32 })
        .sum()
}

/// Split a member name into USTAR `prefix` and `name` parts. When no
/// legal split exists the name field keeps the largest suffix that
/// fits (so readers without long-name support still see something) and
/// `truncated` is returned.
fn split_member(member: &[u8]) -> (Vec<u8>, Vec<u8>, bool) {
    let len = member.len();
    if len <= NAME_LEN {
        return (Vec::new(), member.to_vec(), false);
    }

    // a legal split point p has member[p] == '/', a non-empty prefix
    // of at most 155 bytes and a non-empty name of at most 100
    let lo = len.saturating_sub(NAME_LEN + 1).max(1);
    let hi = PREFIX_LEN.min(len - 2);
    if lo <= hi {
        for p in (lo..=hi).rev() {
            if member[p] == b'/' {
                return (member[..p].to_vec(), member[p + 1..].to_vec(), false);
            }
        }
    }

    // no split fits: keep the longest '/'-aligned suffix, or the raw
    // tail when a single component exceeds the name field
    let start = len - NAME_LEN;
    let name = match member[start - 1..len - 1].iter().position(|&c| c == b'/') {
        Some(off) => member[start + off..].to_vec(),
        None => member[start..].to_vec(),
    };
    (Vec::new(), name, true)
}

/// Format `val` in `base` into `out_buf[..target_len]`, zero-padded on
/// the left. Returns false when the value does not fit.
pub(crate) fn write_left_padded(out_buf: &mut [u8], val: u64, base: u64, target_len: usize) -> bool {
    let mut unpadded_buf: [u8; 32] = [0; 32];
    let formatted = val.numtoa(base, &mut unpadded_buf);

    if formatted.len() > target_len {
        return false;
    }
    let target_buf = &mut out_buf[..target_len];
    let padding_len = target_len - formatted.len();
    target_buf[padding_len..].copy_from_slice(formatted);
    target_buf[..padding_len].fill(b'0');
    true
}

/// Zero-padded NUL-terminated octal; the caller guarantees fit.
fn write_octal(field: &mut [u8], val: u64) {
    let digits = field.len() - 1;
    let ok = write_left_padded(&mut field[..digits], val, 8, digits);
    debug_assert!(ok, "octal field overflow");
}

/// Octal when the value fits, base-256 escape otherwise.
fn write_numeric(field: &mut [u8], val: u64) {
    let digits = field.len() - 1;
    if !write_left_padded(&mut field[..digits], val, 8, digits) {
        let mut v = val;
        for i in (1..field.len()).rev() {
            field[i] = (v & 0xff) as u8;
            v >>= 8;
        }
        field[0] = 0x80;
    }
}

#[cfg(target_os = "linux")]
fn mtime_nsec(st: &FileStat) -> i64 {
    st.st_mtime_nsec
}

#[cfg(not(target_os = "linux"))]
fn mtime_nsec(_st: &FileStat) -> i64 {
    0
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    fn fake_stat(mode: u32, size: i64) -> FileStat {
        let mut st: FileStat = unsafe { std::mem::zeroed() };
        st.st_mode = mode;
        st.st_size = size;
        st
    }

    fn field(block: &[u8], off: usize, len: usize) -> &[u8] {
        &block[off..off + len]
    }

    #[test]
    fn octal_fields_are_nul_terminated() {
        let st = fake_stat(libc::S_IFREG | 0o644, 0);
        let header = Header::for_file(Path::new("a"), Path::new("a"), &st).unwrap();

        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);

        assert_eq!(field(&block, 100, 8), b"0000644\0");
        assert_eq!(field(&block, 124, 12), b"00000000000\0");
        assert_eq!(field(&block, 136, 12), b"00000000000\0");
        assert_eq!(field(&block, 257, 6), b"ustar\0");
        assert_eq!(field(&block, 263, 2), b"00");
        assert_eq!(block[156], b'0');
    }

    #[test]
    fn size_boundary_octal_then_base256() {
        let st = fake_stat(libc::S_IFREG | 0o644, OCTAL12_MAX as i64);
        let header = Header::for_file(Path::new("a"), Path::new("a"), &st).unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);
        assert_eq!(field(&block, 124, 12), b"77777777777\0");

        let st = fake_stat(libc::S_IFREG | 0o644, OCTAL12_MAX as i64 + 1);
        let header = Header::for_file(Path::new("a"), Path::new("a"), &st).unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);

        let size = field(&block, 124, 12);
        assert_eq!(size[0], 0x80);
        let mut decoded: u64 = 0;
        for &b in &size[1..] {
            decoded = (decoded << 8) | b as u64;
        }
        assert_eq!(decoded, OCTAL12_MAX + 1);
    }

    #[test]
    fn far_future_mtime_uses_base256() {
        let mut st = fake_stat(libc::S_IFREG | 0o644, 0);
        st.st_mtime = OCTAL12_MAX as i64 + 1;
        let header = Header::for_file(Path::new("a"), Path::new("a"), &st).unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);

        let mtime = field(&block, 136, 12);
        assert_eq!(mtime[0], 0x80);
        let mut decoded: u64 = 0;
        for &b in &mtime[1..] {
            decoded = (decoded << 8) | b as u64;
        }
        assert_eq!(decoded, OCTAL12_MAX + 1);
    }

    #[test]
    fn negative_mtime_clamps_to_zero() {
        let mut st = fake_stat(libc::S_IFREG | 0o644, 0);
        st.st_mtime = -1;
        let header = Header::for_file(Path::new("a"), Path::new("a"), &st).unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);
        assert_eq!(field(&block, 136, 12), b"00000000000\0");
    }

    #[test]
    fn oversized_device_numbers_use_base256() {
        let mut st = fake_stat(libc::S_IFCHR | 0o600, 0);
        st.st_rdev = nix::sys::stat::makedev(OCTAL8_MAX + 1, 7);
        let header = Header::for_file(Path::new("dev"), Path::new("dev"), &st).unwrap();

        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);

        let major = field(&block, 329, 8);
        assert_eq!(major[0], 0x80);
        let mut decoded: u64 = 0;
        for &b in &major[1..] {
            decoded = (decoded << 8) | b as u64;
        }
        assert_eq!(decoded, OCTAL8_MAX + 1);
        assert_eq!(field(&block, 337, 8), b"0000007\0");
    }

    #[test]
    fn checksum_matches_recomputation() {
        let st = fake_stat(libc::S_IFREG | 0o644, 1234);
        let mut header = Header::for_file(Path::new("some/file"), Path::new("some/file"), &st).unwrap();
        header.set_usernames(Some("root".into()), Some("wheel".into()));

        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);

        let stored = &block[148..154];
        let mut parsed: u32 = 0;
        for &b in stored {
            parsed = parsed * 8 + (b - b'0') as u32;
        }
        assert_eq!(parsed, checksum_of(&block));
        assert_eq!(block[154], 0);
        assert_eq!(block[155], b' ');
    }

    #[test]
    fn name_of_100_bytes_fits() {
        let member = "a".repeat(100);
        let st = fake_stat(libc::S_IFREG | 0o644, 0);
        let header = Header::for_file(Path::new(&member), Path::new(&member), &st).unwrap();
        assert!(!header.truncated());

        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);
        assert_eq!(field(&block, 0, 100), member.as_bytes());
    }

    #[test]
    fn name_of_101_bytes_truncates() {
        let member = "a".repeat(101);
        let st = fake_stat(libc::S_IFREG | 0o644, 0);
        let header = Header::for_file(Path::new(&member), Path::new(&member), &st).unwrap();
        assert!(header.truncated());

        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);
        // the raw 100-byte tail still lands in the name field
        assert_eq!(field(&block, 0, 100), "a".repeat(100).as_bytes());
    }

    #[test]
    fn long_name_splits_on_slash() {
        let member = format!("{}/{}", "d".repeat(20), "f".repeat(99));
        let st = fake_stat(libc::S_IFREG | 0o644, 0);
        let header = Header::for_file(Path::new(&member), Path::new(&member), &st).unwrap();
        assert!(!header.truncated());

        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);
        assert_eq!(&field(&block, 345, 155)[..20], "d".repeat(20).as_bytes());
        assert_eq!(field(&block, 345, 155)[20], 0);
        assert_eq!(&field(&block, 0, 100)[..99], "f".repeat(99).as_bytes());
    }

    #[test]
    fn split_prefers_longest_prefix() {
        // every component is slash-separated; the split must keep the
        // name part under 100 while the prefix stays under 155
        let member = format!("{}/{}/{}", "a".repeat(80), "b".repeat(70), "c".repeat(30));
        let (prefix, name, truncated) = split_member(member.as_bytes());
        assert!(!truncated);
        assert_eq!(prefix.len(), 151);
        assert_eq!(name, "c".repeat(30).as_bytes());
    }

    #[test]
    fn directory_gets_trailing_slash() {
        let st = fake_stat(libc::S_IFDIR | 0o755, 0);
        let header = Header::for_file(Path::new("d"), Path::new("d"), &st).unwrap();
        assert_eq!(header.member(), b"d/");
        assert_eq!(header.typeflag(), TypeFlag::Directory);
        assert_eq!(header.size(), 0);
    }

    #[test]
    fn symlink_records_target() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("l");
        symlink("target/elsewhere", &link).unwrap();
        let st = nix::sys::stat::lstat(&link).unwrap();

        let header = Header::for_file(&link, Path::new("l"), &st).unwrap();
        assert_eq!(header.typeflag(), TypeFlag::Symlink);
        assert_eq!(header.linkname(), b"target/elsewhere");
        assert!(!header.link_truncated());
        assert_eq!(header.size(), 0);
    }

    #[test]
    fn socket_is_refused() {
        let st = fake_stat(libc::S_IFSOCK | 0o644, 0);
        let err = Header::for_file(Path::new("s"), Path::new("s"), &st).unwrap_err();
        assert!(err.is_warn());
        assert_eq!(err.errno(), Errno::EOPNOTSUPP);
    }

    #[test]
    fn longlink_block_layout() {
        let mut block = [0u8; BLOCK_SIZE];
        encode_longlink_block(&mut block, 120, TypeFlag::LongName);

        assert_eq!(&block[..13], b"././@LongLink");
        assert_eq!(block[156], b'L');
        assert_eq!(field(&block, 124, 12), b"00000000170\0");
        assert_eq!(field(&block, 257, 6), b"ustar ");
        assert_eq!(field(&block, 263, 2), b" \0");

        let stored = &block[148..154];
        let mut parsed: u32 = 0;
        for &b in stored {
            parsed = parsed * 8 + (b - b'0') as u32;
        }
        assert_eq!(parsed, checksum_of(&block));
    }

    #[test]
    fn device_numbers_populated() {
        let mut st = fake_stat(libc::S_IFCHR | 0o600, 0);
        st.st_rdev = nix::sys::stat::makedev(5, 1);
        let header = Header::for_file(Path::new("tty"), Path::new("tty"), &st).unwrap();

        let mut block = [0u8; BLOCK_SIZE];
        header.encode_block(&mut block, false);
        assert_eq!(field(&block, 329, 8), b"0000005\0");
        assert_eq!(field(&block, 337, 8), b"0000001\0");
        assert_eq!(block[156], b'3');
    }
}
