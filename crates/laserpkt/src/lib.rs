//! LASERPKT: wire format for streaming galvo laser points over UDP.
//!
//! - One datagram per laser per batch, sent fire-and-forget.
//! - Each point is two 12-bit DAC coordinates plus an 8-bit RGB colour.
//! - A one-byte sequence number (mod 255) lets receivers detect gaps.
//!
//! Datagram layout:
//!   00        : u8      sequence (0..=254, wraps to 0 after 254)
//!   01..06    : point 0 [x_hi, x_lo|y_hi, y_lo, r, g, b]
//!   07..12    : point 1
//!   ..
//!   1+6k..6+6k: point k (k = 0..170)
//!
//! Point layout:
//!   byte 0 : x >> 4              (high 8 bits of x)
//!   byte 1 : (x & 0xF) << 4 | y >> 8
//!   byte 2 : y & 0xFF            (low 8 bits of y)
//!   byte 3 : r
//!   byte 4 : g
//!   byte 5 : b
//!
//! A full packet is 1 + 170 * 6 = 1021 bytes, which stays under a typical
//! Ethernet MTU.

pub mod packet;
pub mod point;
pub mod receiver;

pub use packet::{
    decode_packet, DecodedPacket, PacketBuilder, PacketError, Sequence, PACKET_BYTES,
    POINTS_PER_PACKET, POINT_BYTES, SEQUENCE_MODULUS,
};
pub use point::{decode, encode, LaserPoint, DAC_MAX};
pub use receiver::{Continuity, PolylineReceiver, ReceiverStats, SequenceTracker};
