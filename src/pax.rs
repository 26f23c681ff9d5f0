//! PAX extended header records.
//!
//! A record is the self-describing `"<length> <keyword>=<value>\n"`
//! form where `<length>` counts the whole record, its own decimal
//! digits included. The record stream becomes the payload of a
//! typeflag-`x` shell block and is padded out to block boundaries like
//! any other entry data.

use numtoa::NumToA;
use smallvec::SmallVec;

use crate::header::write_left_padded;

/// Name stored in the `x` shell block: `./PaxHeaders/<basename>`,
/// clipped to the USTAR name field.
pub(crate) fn header_name(member: &[u8]) -> Vec<u8> {
    let trimmed = match member.last() {
        Some(b'/') => &member[..member.len() - 1],
        _ => member,
    };
    let basename = match trimmed.iter().rposition(|&c| c == b'/') {
        Some(p) => &trimmed[p + 1..],
        None => trimmed,
    };

    let mut name = b"./PaxHeaders/".to_vec();
    name.extend_from_slice(basename);
    name.truncate(100);
    name
}

#[derive(Default)]
pub struct PaxRecords {
    data: Vec<u8>,
}

impl PaxRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, keyword: &str, value: &[u8]) {
        // space, equals, newline
        let payload_len = keyword.len() + value.len() + 3;

        // the length prefix counts its own digits; adding them may
        // carry into one more digit (e.g. payload 99 -> total 101)
        let payload_len_digits = (payload_len.ilog10() + 1) as usize;
        let mut total_len = payload_len + payload_len_digits;
        let total_len_digits = (total_len.ilog10() + 1) as usize;
        if total_len_digits > payload_len_digits {
            total_len += 1;
        }

        let mut itoa_buf = itoa::Buffer::new();
        let len_str = itoa_buf.format(total_len);

        // {len} {keyword}={value}\n
        self.data.extend_from_slice(len_str.as_bytes());
        self.data.push(b' ');
        self.data.extend_from_slice(keyword.as_bytes());
        self.data.push(b'=');
        self.data.extend_from_slice(value);
        self.data.push(b'\n');
    }

    pub fn add_integer<T: itoa::Integer>(&mut self, keyword: &str, val: T) {
        let mut buf = itoa::Buffer::new();
        self.add(keyword, buf.format(val).as_bytes());
    }

    /// `<seconds>.<nanoseconds>` with a fixed 9-digit fraction.
    pub fn add_time(&mut self, keyword: &str, seconds: i64, nanos: i64) {
        let mut time_buf = SmallVec::<[u8; 30]>::new();
        let mut dec_buf = itoa::Buffer::new();
        time_buf.extend_from_slice(dec_buf.format(seconds).as_bytes());
        time_buf.push(b'.');

        let nanos_start = time_buf.len();
        time_buf.resize(nanos_start + 9, 0);
        write_left_padded(
            &mut time_buf[nanos_start..],
            nanos.clamp(0, 999_999_999) as u64,
            10,
            9,
        );

        self.add(keyword, &time_buf);
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
