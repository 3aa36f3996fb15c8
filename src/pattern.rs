//! The repeating chargen pattern.
//!
//! The buffer holds one full period of the stream: one line per printable
//! character, each line a rotating window over the charset followed by CRLF.
//! Line `i` starts one character after line `i - 1`, so after the last line
//! the stream continues seamlessly with the first one again.

use bytes::Bytes;

/// Visible characters per line.
pub const LINE_LEN: usize = 72;
/// First character of the charset.
pub const CHARSET_BEGIN: u8 = b' ';
/// Last character of the charset.
pub const CHARSET_END: u8 = b'~';
/// First character of the first line.
pub const FIRST_CHAR: u8 = b'!';
/// Lines in one period of the pattern.
pub const LINE_COUNT: usize = (CHARSET_END - CHARSET_BEGIN) as usize + 1;
/// Bytes in one period of the pattern.
pub const PATTERN_LEN: usize = (LINE_LEN + 2) * LINE_COUNT;

/// Immutable pattern buffer shared by every connection.
#[derive(Debug, Clone)]
pub struct Pattern {
    bytes: Bytes,
}

impl Pattern {
    /// Build the standard chargen pattern.
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(PATTERN_LEN);
        let mut first = FIRST_CHAR;

        for _ in 0..LINE_COUNT {
            let mut c = first;
            for _ in 0..LINE_LEN {
                buf.push(c);
                c = next_char(c);
            }
            buf.extend_from_slice(b"\r\n");
            first = next_char(first);
        }

        Self { bytes: buf.into() }
    }

    /// Length of one period.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes to offer a stream that has already sent `tx` bytes.
    ///
    /// The position in the stream is derived from the transmit counter alone,
    /// so a short write resumes exactly where the peer stopped. The window
    /// never wraps; the next call continues from offset 0.
    pub fn window(&self, tx: u64) -> &[u8] {
        let offset = (tx % self.bytes.len() as u64) as usize;
        &self.bytes[offset..]
    }

    /// The first `len` bytes, capped at one period.
    pub fn prefix(&self, len: usize) -> &[u8] {
        &self.bytes[..len.min(self.bytes.len())]
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new()
    }
}

fn next_char(c: u8) -> u8 {
    if c >= CHARSET_END {
        CHARSET_BEGIN
    } else {
        c + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_shape() {
        let pattern = Pattern::new();
        assert_eq!(pattern.len(), PATTERN_LEN);
        assert_eq!(pattern.len(), 7030);

        let lines: Vec<&[u8]> = pattern.as_bytes().chunks(LINE_LEN + 2).collect();
        assert_eq!(lines.len(), LINE_COUNT);

        for (i, line) in lines.iter().enumerate() {
            assert_eq!(&line[LINE_LEN..], b"\r\n");

            let shift = ((FIRST_CHAR - CHARSET_BEGIN) as usize + i) % LINE_COUNT;
            let expected_first = CHARSET_BEGIN + shift as u8;
            assert_eq!(line[0], expected_first, "line {i}");

            for pair in line[..LINE_LEN].windows(2) {
                assert_eq!(pair[1], next_char(pair[0]));
                assert!((CHARSET_BEGIN..=CHARSET_END).contains(&pair[1]));
            }
        }
    }

    #[test]
    fn test_first_line() {
        let pattern = Pattern::new();
        let expected: Vec<u8> = (b'!'..b'!' + LINE_LEN as u8).collect();
        assert_eq!(&pattern.as_bytes()[..LINE_LEN], &expected[..]);
    }

    #[test]
    fn test_line_start_wraps_to_space() {
        let pattern = Pattern::new();
        // '!' + 93 == '~', the next line starts with ' '
        let line = |i: usize| pattern.as_bytes()[i * (LINE_LEN + 2)];
        assert_eq!(line(93), b'~');
        assert_eq!(line(94), b' ');
    }

    #[test]
    fn test_window_follows_tx() {
        let pattern = Pattern::new();
        let len = pattern.len() as u64;

        assert_eq!(pattern.window(0), pattern.as_bytes());
        assert_eq!(pattern.window(10), &pattern.as_bytes()[10..]);
        assert_eq!(pattern.window(len), pattern.as_bytes());
        assert_eq!(pattern.window(3 * len + 5), &pattern.as_bytes()[5..]);
        assert_eq!(pattern.window(len - 1).len(), 1);
    }

    #[test]
    fn test_short_writes_reproduce_stream() {
        let pattern = Pattern::new();
        let mut tx: u64 = 0;
        let mut delivered = Vec::new();

        // Irregular write sizes, some spanning the period boundary.
        let sizes = [1usize, 500, 7029, 3, 9000, 64, 7030, 12345, 2];
        for &want in sizes.iter().cycle().take(40) {
            let window = pattern.window(tx);
            let n = want.min(window.len());
            delivered.extend_from_slice(&window[..n]);
            tx += n as u64;
        }

        assert_eq!(delivered.len() as u64, tx);
        for (i, b) in delivered.iter().enumerate() {
            assert_eq!(*b, pattern.as_bytes()[i % pattern.len()], "offset {i}");
        }
    }

    #[test]
    fn test_prefix() {
        let pattern = Pattern::new();
        assert!(pattern.prefix(0).is_empty());
        assert_eq!(pattern.prefix(512), &pattern.as_bytes()[..512]);
        assert_eq!(pattern.prefix(usize::MAX).len(), pattern.len());
    }
}
