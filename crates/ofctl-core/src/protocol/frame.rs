// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OpenFlow stream framing.
//!
//! TCP (and TLS plaintext) delivers a byte stream without message
//! boundaries. Every OpenFlow message starts with the same 8-byte header
//! whose bytes 2..4 carry the total message length, header included:
//!
//! ```text
//! +---------+------+--------------+---------+--------------------+
//! | version | type | length (BE)  |   xid   | body ...           |
//! +---------+------+--------------+---------+--------------------+
//!  <------------------- length bytes ----------------------------->
//! ```
//!
//! The codec accumulates bytes fed from the socket and hands back complete
//! frames, keeping partial state between reads.

use std::io;

use super::codec::HEADER_LEN;

/// Default maximum frame size (the u16 length field caps it anyway).
pub const DEFAULT_MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Incremental OpenFlow frame splitter.
#[derive(Debug)]
pub struct FrameCodec {
    /// Bytes received but not yet returned as frames
    accumulator: Vec<u8>,

    /// Read position in accumulator
    accumulator_pos: usize,

    /// Maximum allowed frame size
    max_size: usize,

    /// Statistics: frames decoded
    frames_decoded: u64,

    /// Statistics: bytes decoded
    bytes_decoded: u64,

    /// Statistics: frames rejected
    frames_rejected: u64,
}

impl FrameCodec {
    /// Create a new frame codec with the specified max frame size.
    pub fn new(max_size: usize) -> Self {
        Self {
            accumulator: Vec::with_capacity(16384),
            accumulator_pos: 0,
            max_size: max_size.max(HEADER_LEN),
            frames_decoded: 0,
            bytes_decoded: 0,
            frames_rejected: 0,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Drop any partial frame (e.g. after a connection reset).
    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.accumulator_pos = 0;
    }

    /// Bytes buffered but not yet returned.
    pub fn buffered(&self) -> usize {
        self.accumulator.len() - self.accumulator_pos
    }

    /// Check if the codec holds the start of an incomplete frame.
    pub fn is_partial(&self) -> bool {
        self.buffered() > 0
    }

    /// Feed received bytes into the accumulator.
    pub fn feed(&mut self, data: &[u8]) {
        // Compact the accumulator if we've consumed a lot
        if self.accumulator_pos > 0 && self.accumulator_pos > self.accumulator.len() / 2 {
            self.accumulator.drain(..self.accumulator_pos);
            self.accumulator_pos = 0;
        }
        self.accumulator.extend_from_slice(data);
    }

    /// Try to extract one complete frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - a complete frame, header included
    /// - `Ok(None)` - need more data
    /// - `Err(e)` - the stream is unrecoverable (bad length field)
    ///
    /// Call repeatedly until it returns `Ok(None)`.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let available = &self.accumulator[self.accumulator_pos..];
        if available.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u16::from_be_bytes([available[2], available[3]]) as usize;
        if len < HEADER_LEN || len > self.max_size {
            self.frames_rejected += 1;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "bad frame length: {} bytes (min {}, max {})",
                    len, HEADER_LEN, self.max_size
                ),
            ));
        }
        if available.len() < len {
            return Ok(None);
        }

        let frame = available[..len].to_vec();
        self.accumulator_pos += len;
        self.frames_decoded += 1;
        self.bytes_decoded += len as u64;

        if self.accumulator_pos == self.accumulator.len() {
            self.accumulator.clear();
            self.accumulator_pos = 0;
        }
        Ok(Some(frame))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(xid: u8, body_len: usize) -> Vec<u8> {
        let len = (HEADER_LEN + body_len) as u16;
        let mut f = vec![0x04, 0x02];
        f.extend_from_slice(&len.to_be_bytes());
        f.extend_from_slice(&[0, 0, 0, xid]);
        f.extend(std::iter::repeat(0xab).take(body_len));
        f
    }

    #[test]
    fn test_single_frame() {
        let mut codec = FrameCodec::default();
        codec.feed(&frame(1, 4));
        let out = codec.next_frame().unwrap().unwrap();
        assert_eq!(out.len(), 12);
        assert!(codec.next_frame().unwrap().is_none());
        assert_eq!(codec.frames_decoded(), 1);
        assert_eq!(codec.bytes_decoded(), 12);
        assert!(!codec.is_partial());
    }

    #[test]
    fn test_split_across_feeds() {
        let mut codec = FrameCodec::default();
        let f = frame(9, 20);
        codec.feed(&f[..3]);
        assert!(codec.next_frame().unwrap().is_none());
        codec.feed(&f[3..15]);
        assert!(codec.next_frame().unwrap().is_none());
        assert!(codec.is_partial());
        codec.feed(&f[15..]);
        assert_eq!(codec.next_frame().unwrap().unwrap(), f);
    }

    #[test]
    fn test_multiple_frames_in_one_feed() {
        let mut codec = FrameCodec::default();
        let mut bytes = frame(1, 0);
        bytes.extend(frame(2, 8));
        bytes.extend(frame(3, 1));
        codec.feed(&bytes);

        let xids: Vec<u8> = std::iter::from_fn(|| codec.next_frame().unwrap())
            .map(|f| f[7])
            .collect();
        assert_eq!(xids, vec![1, 2, 3]);
    }

    #[test]
    fn test_length_below_header_rejected() {
        let mut codec = FrameCodec::default();
        codec.feed(&[0x04, 0x00, 0x00, 0x04, 0, 0, 0, 1]);
        let err = codec.next_frame().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(codec.frames_rejected(), 1);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new(64);
        codec.feed(&frame(1, 100)[..HEADER_LEN]);
        assert!(codec.next_frame().is_err());
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut codec = FrameCodec::default();
        codec.feed(&frame(1, 10)[..5]);
        codec.reset();
        assert_eq!(codec.buffered(), 0);
    }
}
