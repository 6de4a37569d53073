use crate::error::MessageError;
use crate::network::messages::{number, parse_flag};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

pub const SEGMENT_TAG: &[u8] = b"FS";
pub const ACK_TAG: &str = "ACK";

/// Fixed-width text header that precedes every payload: `FS <cursor> <segment_len> <eof_flag>`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Bytes of the file covered once this segment is applied
    pub cursor: u64,
    pub len: usize,
    pub eof: bool,
}

impl SegmentHeader {
    /// Cursor value before this segment is applied
    pub fn start(&self) -> u64 {
        self.cursor.saturating_sub(self.len as u64)
    }
}

impl fmt::Display for SegmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FS {} {} {}", self.cursor, self.len, u8::from(self.eof))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Bytes,
}

impl Segment {
    pub fn new(cursor: u64, payload: Bytes, eof: bool) -> Self {
        Self {
            header: SegmentHeader {
                cursor,
                len: payload.len(),
                eof,
            },
            payload,
        }
    }

    /// Header padded with spaces to `header_len`, followed by the payload
    pub fn encode(&self, header_len: usize) -> Result<Bytes, MessageError> {
        let header = self.header.to_string();
        if header.len() > header_len {
            return Err(MessageError::HeaderOverflow {
                header,
                capacity: header_len,
            });
        }
        let mut buf = BytesMut::with_capacity(header_len + self.payload.len());
        buf.put_slice(header.as_bytes());
        buf.put_bytes(b' ', header_len - header.len());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    pub fn decode(datagram: &[u8], header_len: usize) -> Result<Self, MessageError> {
        if datagram.len() < header_len {
            return Err(MessageError::Truncated(header_len));
        }
        let (raw_header, payload) = datagram.split_at(header_len);
        let text = std::str::from_utf8(raw_header).map_err(|_| MessageError::NotText)?;
        let fields: Vec<&str> = text
            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .split_whitespace()
            .collect();

        if fields.first().map(|tag| tag.as_bytes()) != Some(SEGMENT_TAG) {
            return Err(MessageError::UnknownType(
                fields.first().unwrap_or(&"").to_string(),
            ));
        }
        if fields.len() != 4 {
            return Err(MessageError::FieldCount {
                kind: "segment header",
                expected: 3,
                got: fields.len() - 1,
            });
        }

        let header = SegmentHeader {
            cursor: number("cursor", fields[1])?,
            len: number("segment_len", fields[2])?,
            eof: parse_flag("eof_flag", fields[3])?,
        };
        if header.len != payload.len() {
            return Err(MessageError::LengthMismatch {
                declared: header.len,
                actual: payload.len(),
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    pub fn is_segment(datagram: &[u8]) -> bool {
        datagram.starts_with(SEGMENT_TAG)
    }
}

/// `ACK <cursor> <segment_len>`, sent back for every segment received
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    pub cursor: u64,
    pub len: usize,
}

impl Ack {
    pub fn for_segment(header: &SegmentHeader) -> Self {
        Self {
            cursor: header.cursor,
            len: header.len,
        }
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{} {} {}", ACK_TAG, self.cursor, self.len))
    }

    /// None for anything that is not a well-formed ACK
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(datagram).ok()?;
        let mut fields = text
            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .split_whitespace();
        if fields.next()? != ACK_TAG {
            return None;
        }
        let cursor = fields.next()?.parse().ok()?;
        let len = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self { cursor, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_space_filled_to_fixed_width() {
        let segment = Segment::new(1024, Bytes::from_static(b"abcd"), false);
        let encoded = segment.encode(20).unwrap();
        assert_eq!(&encoded[..20], b"FS 1024 4 0         ");
        assert_eq!(&encoded[20..], b"abcd");
        assert_eq!(Segment::decode(&encoded, 20).unwrap(), segment);
    }

    #[test]
    fn accepts_nul_padded_headers() {
        let mut datagram = b"FS 3 3 1".to_vec();
        datagram.resize(20, 0);
        datagram.extend_from_slice(b"xyz");
        let segment = Segment::decode(&datagram, 20).unwrap();
        assert!(segment.header.eof);
        assert_eq!(segment.header.start(), 0);
        assert_eq!(segment.payload, Bytes::from_static(b"xyz"));
    }

    #[test]
    fn header_overflow_is_an_error() {
        let segment = Segment::new(123_456_789_012, Bytes::from(vec![0u8; 4096]), true);
        assert!(matches!(
            segment.encode(20),
            Err(MessageError::HeaderOverflow { capacity: 20, .. })
        ));
    }

    #[test]
    fn rejects_bad_datagrams() {
        assert_eq!(Segment::decode(b"FS 1", 20), Err(MessageError::Truncated(20)));

        let mut wrong_len = b"FS 10 10 0".to_vec();
        wrong_len.resize(20, b' ');
        wrong_len.extend_from_slice(b"short");
        assert_eq!(
            Segment::decode(&wrong_len, 20),
            Err(MessageError::LengthMismatch {
                declared: 10,
                actual: 5
            })
        );

        let mut bad_flag = b"FS 1 1 7".to_vec();
        bad_flag.resize(20, b' ');
        bad_flag.push(b'a');
        assert!(matches!(
            Segment::decode(&bad_flag, 20),
            Err(MessageError::InvalidFlag { .. })
        ));
    }

    #[test]
    fn ack_round_trip_and_garbage() {
        let ack = Ack { cursor: 300, len: 100 };
        assert_eq!(&ack.encode()[..], b"ACK 300 100");
        assert_eq!(Ack::decode(b"ACK 300 100\0\0"), Some(ack));
        assert_eq!(Ack::decode(b"NAK 300 100"), None);
        assert_eq!(Ack::decode(b"ACK x 100"), None);
        assert_eq!(Ack::decode(b"ACK 1 2 3"), None);
        assert_eq!(Ack::decode(b"4"), None);
    }
}
