//! Order-preserving byte string encoding.
//!
//! The ascending form is `0x12`, the bytes with `0x00` escaped as `0x00 0xff`,
//! then the terminator `0x00 0x01`. The descending form swaps the marker for
//! `0x13` and one's-complements everything after it, so that sorting encoded
//! values ascending yields the inputs in descending order.

const BYTES_MARKER: u8 = 0x12;
const BYTES_DESC_MARKER: u8 = BYTES_MARKER + 1;
const ESCAPE: u8 = 0x00;
const ESCAPED_TERM: u8 = 0x01;
const ESCAPED_00: u8 = 0xff;

fn encode_bytes_ascending(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(BYTES_MARKER);
    for &b in data {
        buf.push(b);
        if b == ESCAPE {
            buf.push(ESCAPED_00);
        }
    }
    buf.push(ESCAPE);
    buf.push(ESCAPED_TERM);
}

/// Append the descending encoding of `data` to `buf`.
pub fn encode_bytes_descending(buf: &mut Vec<u8>, data: &[u8]) {
    let start = buf.len();
    encode_bytes_ascending(buf, data);
    buf[start] = BYTES_DESC_MARKER;
    for b in &mut buf[start + 1..] {
        *b = !*b;
    }
}

pub fn encode_string_descending(buf: &mut Vec<u8>, s: &str) {
    encode_bytes_descending(buf, s.as_bytes());
}

/// Decode one descending-encoded value from the front of `buf`.
///
/// Returns the decoded bytes and the unread remainder.
pub fn decode_bytes_descending(buf: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let (&marker, rest) = buf.split_first()?;
    if marker != BYTES_DESC_MARKER {
        return None;
    }
    let mut out = Vec::with_capacity(rest.len());
    let mut i = 0;
    while i < rest.len() {
        let b = !rest[i];
        if b != ESCAPE {
            out.push(b);
            i += 1;
            continue;
        }
        match rest.get(i + 1).map(|n| !*n) {
            Some(ESCAPED_TERM) => return Some((out, &rest[i + 2..])),
            Some(ESCAPED_00) => {
                out.push(ESCAPE);
                i += 2;
            }
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(s: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_bytes_descending(&mut buf, s);
        buf
    }

    #[test]
    fn test_descending_reverses_order() {
        let inputs: [&[u8]; 5] = [b"", b"a", b"ab", b"b", b"\x00z"];
        for a in inputs {
            for b in inputs {
                assert_eq!(a.cmp(b).reverse(), desc(a).cmp(&desc(b)), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn test_known_encoding() {
        assert_eq!(desc(b"a"), vec![0x13, !b'a', 0xff, 0xfe]);
        assert_eq!(desc(b"\x00"), vec![0x13, 0xff, 0x00, 0xff, 0xfe]);
    }

    #[test]
    fn test_decode() {
        let mut buf = desc(b"x\x00y");
        buf.extend_from_slice(b"tail");
        let (decoded, rest) = decode_bytes_descending(&buf).unwrap();
        assert_eq!(decoded, b"x\x00y");
        assert_eq!(rest, b"tail");

        assert!(decode_bytes_descending(&[0x12, 0x00, 0x01]).is_none());
        assert!(decode_bytes_descending(&[0x13, !b'a']).is_none());
    }
}
