//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. msgpack-RPC has no length
//! prefix: a frame ends where its top-level msgpack value ends. Each push
//! walks msgpack headers from where the previous push stopped until the end
//! of the top-level value is known, so a frame split over many reads is
//! scanned once. Only a complete frame is handed to the value reader.
//!
//! A value that is valid msgpack but not a valid message is reported as a
//! [`DecodeError`] for that frame only; its bytes are consumed and parsing
//! continues with the next value.
//!
//! # Example
//!
//! ```
//! use nvim_rpc::protocol::{FrameBuffer, Message, Notification};
//!
//! let bytes = Message::from(Notification::new("event", vec![])).encode().unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! // First half: nothing complete yet
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//!
//! let frames = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(frames.len(), 1);
//! assert!(frames[0].is_ok());
//! ```

use bytes::BytesMut;

use super::{DecodeError, Message};
use crate::error::{Result, RpcError};

/// Default maximum size of a single frame (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Outcome of decoding one frame.
pub type Decoded = std::result::Result<Message, DecodeError>;

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Maximum bytes a single incomplete frame may occupy.
    max_frame_size: usize,
    /// Progress through the frame at the front of the buffer.
    scan: FrameScan,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 64MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with custom max frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame_size,
            scan: FrameScan::default(),
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns one entry per complete top-level value, in arrival order.
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Fails when the stream cannot be resynchronized: the bytes are not
    /// msgpack at all, or an incomplete frame grew past the maximum size.
    /// The connection must be torn down after such an error.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Decoded>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();

        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(decoded))` if a complete value was consumed
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the stream is unrecoverable
    fn try_extract_one(&mut self) -> Result<Option<Decoded>> {
        let end = match self.scan.advance(&self.buffer)? {
            Some(end) => end,
            None => {
                if self.buffer.len() > self.max_frame_size {
                    return Err(RpcError::Protocol(format!(
                        "Frame size exceeds maximum {} (buffered {})",
                        self.max_frame_size,
                        self.buffer.len()
                    )));
                }
                return Ok(None);
            }
        };

        let frame = self.buffer.split_to(end);
        self.scan = FrameScan::default();

        let mut rd: &[u8] = &frame[..];
        match rmpv::decode::read_value(&mut rd) {
            Ok(value) => Ok(Some(Message::from_value(value))),
            Err(e) => Err(RpcError::Protocol(format!(
                "Undecodable bytes in stream: {}",
                e
            ))),
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Resumable walk over msgpack headers.
///
/// `pos` is the offset of the next unread header and `open` holds, for each
/// enclosing container, the number of elements still to come. Scalars and
/// string/binary/ext bodies are skipped by length without being decoded.
#[derive(Debug, Default)]
struct FrameScan {
    pos: usize,
    open: Vec<u64>,
}

/// What a header introduces.
enum Item {
    /// Fixed or length-prefixed body of this many bytes after the header.
    Body(usize),
    /// Container with this many child values.
    Children(u64),
}

impl FrameScan {
    /// Advance over `buf`. Returns the end offset of the first top-level
    /// value once it is complete, `None` while bytes are missing.
    fn advance(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        while self.pos < buf.len() {
            let rest = &buf[self.pos..];
            let (header, item) = match read_header(rest)? {
                Some(h) => h,
                None => return Ok(None),
            };

            match item {
                Item::Body(len) => {
                    let total = header.saturating_add(len);
                    if rest.len() < total {
                        return Ok(None);
                    }
                    self.pos += total;
                    if self.close_value() {
                        return Ok(Some(self.pos));
                    }
                }
                Item::Children(0) => {
                    self.pos += header;
                    if self.close_value() {
                        return Ok(Some(self.pos));
                    }
                }
                Item::Children(n) => {
                    self.pos += header;
                    self.open.push(n);
                }
            }
        }
        Ok(None)
    }

    /// Account for one finished value. True when it was the top-level one.
    fn close_value(&mut self) -> bool {
        while let Some(left) = self.open.last_mut() {
            *left -= 1;
            if *left > 0 {
                return false;
            }
            self.open.pop();
        }
        true
    }
}

/// Decode the header at the start of `buf` into its length and what follows.
/// `None` when the header itself is not fully buffered.
fn read_header(buf: &[u8]) -> Result<Option<(usize, Item)>> {
    let marker = buf[0];
    let (header, item) = match marker {
        0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => (1, Item::Body(0)),
        0x80..=0x8f => (1, Item::Children(2 * u64::from(marker & 0x0f))),
        0x90..=0x9f => (1, Item::Children(u64::from(marker & 0x0f))),
        0xa0..=0xbf => (1, Item::Body(usize::from(marker & 0x1f))),
        0xcc | 0xd0 => (1, Item::Body(1)),
        0xcd | 0xd1 => (1, Item::Body(2)),
        0xca | 0xce | 0xd2 => (1, Item::Body(4)),
        0xcb | 0xcf | 0xd3 => (1, Item::Body(8)),
        // fixext: type byte plus 1, 2, 4, 8 or 16 data bytes
        0xd4..=0xd8 => (1, Item::Body(1 + (1usize << (marker - 0xd4)))),
        0xc4 | 0xd9 => match be_len(buf, 1) {
            Some(n) => (2, Item::Body(n as usize)),
            None => return Ok(None),
        },
        0xc5 | 0xda => match be_len(buf, 2) {
            Some(n) => (3, Item::Body(n as usize)),
            None => return Ok(None),
        },
        0xc6 | 0xdb => match be_len(buf, 4) {
            Some(n) => (5, Item::Body(n as usize)),
            None => return Ok(None),
        },
        0xc7 => match be_len(buf, 1) {
            Some(n) => (2, Item::Body(1 + n as usize)),
            None => return Ok(None),
        },
        0xc8 => match be_len(buf, 2) {
            Some(n) => (3, Item::Body(1 + n as usize)),
            None => return Ok(None),
        },
        0xc9 => match be_len(buf, 4) {
            Some(n) => (5, Item::Body(1 + n as usize)),
            None => return Ok(None),
        },
        0xdc => match be_len(buf, 2) {
            Some(n) => (3, Item::Children(n)),
            None => return Ok(None),
        },
        0xdd => match be_len(buf, 4) {
            Some(n) => (5, Item::Children(n)),
            None => return Ok(None),
        },
        0xde => match be_len(buf, 2) {
            Some(n) => (3, Item::Children(2 * n)),
            None => return Ok(None),
        },
        0xdf => match be_len(buf, 4) {
            Some(n) => (5, Item::Children(2 * n)),
            None => return Ok(None),
        },
        0xc1 => {
            return Err(RpcError::Protocol(
                "Undecodable bytes in stream: reserved marker 0xc1".to_string(),
            ))
        }
    };
    Ok(Some((header, item)))
}

/// Big-endian length of `width` bytes following the marker.
fn be_len(buf: &[u8], width: usize) -> Option<u64> {
    let bytes = buf.get(1..1 + width)?;
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;
    use crate::protocol::{Notification, Request, Response};
    use rmpv::Value;

    fn bytes_of(msg: impl Into<Message>) -> Vec<u8> {
        msg.into().encode().unwrap().to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frame = bytes_of(Response::success(42, Value::from("hello")));

        let frames = buffer.push(&frame).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0],
            Ok(Message::Response(Response::success(42, Value::from("hello"))))
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        combined.extend(bytes_of(Request::new(1, "first", vec![])));
        combined.extend(bytes_of(Notification::new("second", vec![])));
        combined.extend(bytes_of(Response::success(3, Value::Nil)));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], Ok(Message::Request(_))));
        assert!(matches!(frames[1], Ok(Message::Notification(_))));
        assert!(matches!(frames[2], Ok(Message::Response(_))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_frame() {
        let mut buffer = FrameBuffer::new();
        let frame = bytes_of(Notification::new(
            "this is a longer method name that will be fragmented",
            vec![Value::from(1), Value::from(2)],
        ));

        let frames = buffer.push(&frame[..10]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.len(), 10);

        let frames = buffer.push(&frame[10..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let frame = bytes_of(Request::new(9, "hi", vec!["x".into()]));

        let mut all_frames = Vec::new();
        for byte in &frame {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(
            all_frames[0],
            Ok(Message::Request(Request::new(9, "hi", vec!["x".into()])))
        );
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();

        let first = bytes_of(Response::success(1, Value::from(1)));
        let second = bytes_of(Response::success(2, Value::from(2)));

        let mut data = first.clone();
        data.extend_from_slice(&second[..2]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.len(), 2);

        let frames = buffer.push(&second[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], Ok(Message::Response(Response::success(2, Value::from(2)))));
    }

    #[test]
    fn test_unknown_type_dropped_stream_continues() {
        let mut buffer = FrameBuffer::new();

        let bad = Value::Array(vec![7.into(), "x".into(), Value::Array(vec![])]);
        let mut data = MsgPackCodec::encode_value(&bad).unwrap();
        data.extend(bytes_of(Notification::new("after", vec![])));

        let frames = buffer.push(&data).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Err(DecodeError::UnknownType(7)));
        assert_eq!(
            frames[1],
            Ok(Message::Notification(Notification::new("after", vec![])))
        );
    }

    #[test]
    fn test_non_array_value_dropped() {
        let mut buffer = FrameBuffer::new();

        // positive fixint 5, then a valid frame
        let mut data = vec![0x05];
        data.extend(bytes_of(Response::success(1, Value::Nil)));

        let frames = buffer.push(&data).unwrap();

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(DecodeError::NotAnArray(_))));
        assert!(frames[1].is_ok());
    }

    #[test]
    fn test_max_frame_size_validation() {
        let mut buffer = FrameBuffer::with_max_frame_size(16);

        // str32 header claiming 1000 bytes, followed by only a few
        let mut data = vec![0xdb, 0x00, 0x00, 0x03, 0xe8];
        data.extend_from_slice(&[b'a'; 20]);

        let result = buffer.push(&data);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_partial_frame_is_not_rescanned() {
        let mut buffer = FrameBuffer::new();
        let frame = bytes_of(Notification::new(
            "redraw",
            (0..64).map(|i| Value::from(format!("line {}", i))).collect(),
        ));
        let cut = frame.len() - 4;

        assert!(buffer.push(&frame[..cut]).unwrap().is_empty());
        // Every header before the cut was walked once; the rest resumes there
        assert!(buffer.scan.pos > cut - 16);
        assert!(!buffer.scan.open.is_empty());

        let frames = buffer.push(&frame[cut..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.scan.pos, 0);
        assert!(buffer.scan.open.is_empty());
    }

    #[test]
    fn test_large_frame_in_socket_sized_chunks() {
        let mut buffer = FrameBuffer::new();

        // A redraw batch of a few MB, as a full-screen grid update produces
        let cells: Vec<Value> = (0..45_000)
            .map(|i| {
                Value::Array(vec![
                    Value::from("grid_line"),
                    Value::from(1),
                    Value::from(i % 200),
                    Value::from(0),
                    Value::Array(vec![Value::Array(vec![
                        Value::from("x".repeat(80)),
                        Value::from(i),
                    ])]),
                ])
            })
            .collect();
        let expected = Notification::new("redraw", cells);
        let frame = bytes_of(expected.clone());
        assert!(frame.len() > 4 * 1024 * 1024);

        let mut frames = Vec::new();
        for chunk in frame.chunks(64 * 1024) {
            frames.extend(buffer.push(chunk).unwrap());
        }

        assert_eq!(frames, vec![Ok(Message::Notification(expected))]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_every_header_width_resumes() {
        let params = vec![
            Value::from(u64::MAX),
            Value::from(-70_000i64),
            Value::F64(1.5),
            Value::F32(0.5),
            Value::from("s".repeat(300)),
            Value::Binary(vec![7; 70_000]),
            Value::Ext(3, vec![1, 2, 3, 4]),
            Value::Ext(4, vec![9; 300]),
            Value::Map(vec![(Value::from("k"), Value::Array(vec![Value::Nil; 20]))]),
            Value::Array(vec![]),
            Value::Boolean(true),
        ];
        let frame = bytes_of(Request::new(11, "mixed", params.clone()));

        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        for chunk in frame.chunks(7) {
            frames.extend(buffer.push(chunk).unwrap());
        }

        assert_eq!(frames, vec![Ok(Message::Request(Request::new(11, "mixed", params)))]);
    }

    #[test]
    fn test_reserved_marker_is_fatal() {
        let mut buffer = FrameBuffer::new();

        let result = buffer.push(&[0xc1, 0x90]);

        assert!(result.unwrap_err().to_string().contains("Undecodable"));
    }
}
