//! Fixed-size frame codec.
//!
//! Every frame on the wire has the same size:
//!
//! ```text
//! +----------------+----------------+---------------------------+
//! | current_length | total_length   | data                      |
//! | u32 BE         | u32 BE         | FRAME_DATA_CAPACITY bytes |
//! +----------------+----------------+---------------------------+
//! ```
//!
//! Only the first `current_length` bytes of `data` are meaningful. The rest
//! of the buffer may hold bytes left over from an earlier frame and is never
//! handed out.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Size of the two length fields.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Payload bytes carried by one frame.
pub const FRAME_DATA_CAPACITY: usize = 4096;

/// Size of one frame on the wire.
pub const FRAME_SIZE: usize = FRAME_HEADER_SIZE + FRAME_DATA_CAPACITY;

/// Frame level protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Encoder was given more bytes than fit in one frame.
    #[error("chunk of {len} bytes exceeds frame capacity of {}", FRAME_DATA_CAPACITY)]
    ChunkTooLarge { len: usize },

    /// Peer declared more valid bytes than a frame can carry.
    #[error("frame declares {current_length} valid bytes, capacity is {}", FRAME_DATA_CAPACITY)]
    InvalidLength { current_length: u32 },

    /// `total_length` differs between frames of the same message.
    #[error("total length changed mid-message from {expected} to {found}")]
    TotalLengthChanged { expected: u32, found: u32 },

    /// More bytes arrived than the message declared.
    #[error("received {received} bytes for a message of {total} bytes")]
    Overrun { total: u32, received: usize },
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Valid bytes of `data` in this frame.
    pub current_length: u32,
    /// Size of the whole logical message.
    pub total_length: u32,
}

/// One reusable frame-sized wire buffer.
pub struct FrameBuf {
    buf: Box<[u8; FRAME_SIZE]>,
}

impl FrameBuf {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; FRAME_SIZE]),
        }
    }

    /// Encode one chunk of a message of `total_length` bytes.
    ///
    /// The unused tail of the data area is zeroed so nothing from the
    /// previous chunk goes out on the wire.
    pub fn encode(&mut self, total_length: u32, chunk: &[u8]) -> Result<FrameHeader, FrameError> {
        if chunk.len() > FRAME_DATA_CAPACITY {
            return Err(FrameError::ChunkTooLarge { len: chunk.len() });
        }
        let header = FrameHeader {
            current_length: chunk.len() as u32,
            total_length,
        };

        let mut head = &mut self.buf[..FRAME_HEADER_SIZE];
        head.put_u32(header.current_length);
        head.put_u32(header.total_length);

        let data = &mut self.buf[FRAME_HEADER_SIZE..];
        data[..chunk.len()].copy_from_slice(chunk);
        data[chunk.len()..].fill(0);

        Ok(header)
    }

    /// Decode and validate the header of the frame currently in the buffer.
    pub fn header(&self) -> Result<FrameHeader, FrameError> {
        let mut head = &self.buf[..FRAME_HEADER_SIZE];
        let current_length = head.get_u32();
        let total_length = head.get_u32();

        if current_length as usize > FRAME_DATA_CAPACITY {
            return Err(FrameError::InvalidLength { current_length });
        }

        Ok(FrameHeader {
            current_length,
            total_length,
        })
    }

    /// The valid payload bytes described by `header`.
    pub fn chunk(&self, header: &FrameHeader) -> &[u8] {
        let len = (header.current_length as usize).min(FRAME_DATA_CAPACITY);
        &self.buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len]
    }

    /// The whole frame, as written to the socket.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..]
    }

    /// The whole frame, for filling from the socket.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }
}

impl Default for FrameBuf {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let mut frame = FrameBuf::new();
        let header = frame.encode(10, b"hello").unwrap();

        assert_eq!(header.current_length, 5);
        assert_eq!(header.total_length, 10);

        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), FRAME_SIZE);
        assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 10]);
        assert_eq!(&bytes[8..13], b"hello");
        assert!(bytes[13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_chunk_ignores_stale_bytes() {
        let mut frame = FrameBuf::new();
        frame.encode(20, b"first chunk!").unwrap();

        // Simulate a read that only overwrote the header and a short chunk.
        let raw = frame.as_mut_bytes();
        raw[..4].copy_from_slice(&3u32.to_be_bytes());
        raw[8..11].copy_from_slice(b"abc");

        let header = frame.header().unwrap();
        assert_eq!(frame.chunk(&header), b"abc");
    }

    #[test]
    fn test_chunk_too_large() {
        let mut frame = FrameBuf::new();
        let chunk = vec![1u8; FRAME_DATA_CAPACITY + 1];
        assert_eq!(
            frame.encode(chunk.len() as u32, &chunk),
            Err(FrameError::ChunkTooLarge {
                len: FRAME_DATA_CAPACITY + 1
            })
        );
    }

    #[test]
    fn test_full_capacity_chunk() {
        let mut frame = FrameBuf::new();
        let chunk = vec![7u8; FRAME_DATA_CAPACITY];
        frame.encode(FRAME_DATA_CAPACITY as u32, &chunk).unwrap();

        let header = frame.header().unwrap();
        assert_eq!(header.current_length as usize, FRAME_DATA_CAPACITY);
        assert_eq!(frame.chunk(&header), &chunk[..]);
    }

    #[test]
    fn test_header_rejects_oversized_current_length() {
        let mut frame = FrameBuf::new();
        frame.as_mut_bytes()[..4].copy_from_slice(&(FRAME_DATA_CAPACITY as u32 + 1).to_be_bytes());

        match frame.header() {
            Err(FrameError::InvalidLength { current_length }) => {
                assert_eq!(current_length as usize, FRAME_DATA_CAPACITY + 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
