//! Packet framing and sequence arithmetic.

use crate::point::{decode, encode, LaserPoint};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Points carried by one full packet.
pub const POINTS_PER_PACKET: usize = 170;
/// Encoded size of one point.
pub const POINT_BYTES: usize = 6;
/// Sequence byte plus a full batch of points.
pub const PACKET_BYTES: usize = 1 + POINTS_PER_PACKET * POINT_BYTES;
/// Sequence numbers run 0..=254 and then wrap.
pub const SEQUENCE_MODULUS: u8 = 255;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,
    #[error("sequence byte {0} is outside 0..=254")]
    BadSequence(u8),
    #[error("payload of {len} bytes is not a whole number of points")]
    Misaligned { len: usize },
}

/// Wrapping packet counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sequence(pub u8);

impl Sequence {
    #[inline]
    pub fn next(self) -> Self {
        Self(((self.0 as u16 + 1) % SEQUENCE_MODULUS as u16) as u8)
    }

    /// True when `self` is the packet expected right after `prev`.
    #[inline]
    pub fn follows(self, prev: Sequence) -> bool {
        prev.next() == self
    }
}

/// Accumulates encoded points behind a sequence byte.
#[derive(Debug)]
pub struct PacketBuilder {
    sequence: Sequence,
    buf: BytesMut,
    capacity: usize,
}

impl PacketBuilder {
    pub fn new(sequence: Sequence) -> Self {
        Self::with_capacity(sequence, POINTS_PER_PACKET)
    }

    pub fn with_capacity(sequence: Sequence, points: usize) -> Self {
        let mut buf = BytesMut::with_capacity(1 + points * POINT_BYTES);
        buf.put_u8(sequence.0);
        Self {
            sequence,
            buf,
            capacity: points,
        }
    }

    #[inline]
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Appends one point. Points beyond capacity are still written; check
    /// [`is_full`](Self::is_full) before pushing.
    #[inline]
    pub fn push(&mut self, point: &LaserPoint) {
        self.buf.put_slice(&encode(point));
    }

    /// Number of points written so far.
    #[inline]
    pub fn len(&self) -> usize {
        (self.buf.len() - 1) / POINT_BYTES
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// A datagram split back into its sequence and points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub sequence: Sequence,
    pub points: Vec<LaserPoint>,
}

/// Parses one datagram. Short packets are accepted as long as the payload
/// is a whole number of points.
pub fn decode_packet(laser_id: u8, datagram: &[u8]) -> Result<DecodedPacket, PacketError> {
    let (&seq, payload) = datagram.split_first().ok_or(PacketError::Empty)?;
    if seq >= SEQUENCE_MODULUS {
        return Err(PacketError::BadSequence(seq));
    }

    if payload.len() % POINT_BYTES != 0 {
        return Err(PacketError::Misaligned { len: payload.len() });
    }

    let points = payload
        .chunks_exact(POINT_BYTES)
        .map(|chunk| {
            let mut raw = [0u8; POINT_BYTES];
            raw.copy_from_slice(chunk);
            decode(laser_id, &raw)
        })
        .collect();

    Ok(DecodedPacket {
        sequence: Sequence(seq),
        points,
    })
}
