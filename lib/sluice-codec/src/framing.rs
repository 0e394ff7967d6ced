//! Newline framing over byte buffers.

use bytes::BytesMut;
use memchr::memchr;

/// Extracts complete newline-delimited lines from `buf`.
///
/// Only the newline character (0x0A) splits frames; a single trailing carriage return (0x0D) is trimmed from each
/// frame. Complete frames are consumed from the buffer. Trailing bytes without a delimiter are left buffered for the
/// next read unless `eof` is true, in which case they are released as a final frame: stream transports pass `eof` at
/// connection close, while packet transports pass `eof` for every datagram since nothing ever spans two of them.
///
/// Frames that are empty or whitespace-only are discarded here, so the decoder downstream only ever sees non-empty
/// lines.
pub fn extract_lines(buf: &mut BytesMut, eof: bool) -> Vec<String> {
    let mut lines = Vec::new();

    loop {
        match memchr(b'\n', &buf[..]) {
            Some(idx) => {
                let frame = buf.split_to(idx + 1);
                push_line(&frame[..idx], &mut lines);
            }
            None => {
                if eof && !buf.is_empty() {
                    let frame = buf.split_to(buf.len());
                    push_line(&frame[..], &mut lines);
                }
                break;
            }
        }
    }

    lines
}

fn push_line(frame: &[u8], lines: &mut Vec<String>) {
    let frame = match frame.last() {
        Some(b'\r') => &frame[..frame.len() - 1],
        _ => frame,
    };

    let line = String::from_utf8_lossy(frame);
    if !line.trim().is_empty() {
        lines.push(line.into_owned());
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::extract_lines;

    #[test]
    fn splits_on_newlines() {
        let mut buf = BytesMut::from(&b"foo:1|c\nbar:2|g\n"[..]);

        assert_eq!(extract_lines(&mut buf, false), vec!["foo:1|c", "bar:2|g"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_line_stays_buffered_until_completed() {
        let mut buf = BytesMut::from(&b"foo:1|c\nbar:"[..]);

        assert_eq!(extract_lines(&mut buf, false), vec!["foo:1|c"]);
        assert_eq!(&buf[..], b"bar:");

        buf.extend_from_slice(b"2|g\n");
        assert_eq!(extract_lines(&mut buf, false), vec!["bar:2|g"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn eof_releases_unterminated_frame() {
        let mut buf = BytesMut::from(&b"foo:1|c"[..]);

        assert_eq!(extract_lines(&mut buf, true), vec!["foo:1|c"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn datagram_with_multiple_lines() {
        let mut buf = BytesMut::from(&b"foo:1|c\nbar:2|g\nbaz:3|ms"[..]);

        assert_eq!(extract_lines(&mut buf, true), vec!["foo:1|c", "bar:2|g", "baz:3|ms"]);
    }

    #[test]
    fn carriage_returns_are_trimmed() {
        let mut buf = BytesMut::from(&b"foo:1|c\r\nbar:2|g\r\n"[..]);

        assert_eq!(extract_lines(&mut buf, false), vec!["foo:1|c", "bar:2|g"]);
    }

    #[test]
    fn blank_lines_are_discarded() {
        let mut buf = BytesMut::from(&b"\n  \n\r\nfoo:1|c\n\n"[..]);

        assert_eq!(extract_lines(&mut buf, false), vec!["foo:1|c"]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mut buf = BytesMut::from(&b"fo\xffo:1|c\n"[..]);

        let lines = extract_lines(&mut buf, false);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("fo"));
    }
}
