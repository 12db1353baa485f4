//! Receiving side of the stream: gap detection and polyline reassembly.

use crate::packet::{decode_packet, PacketError, Sequence};
use crate::point::LaserPoint;
use std::collections::VecDeque;

/// How a received sequence number relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// Nothing seen before.
    First,
    Continuous,
    /// Packets were lost or reordered; the stream resumes from `got`.
    Gap { expected: Sequence, got: Sequence },
}

#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: Option<Sequence>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, seq: Sequence) -> Continuity {
        let result = match self.last {
            None => Continuity::First,
            Some(prev) if seq.follows(prev) => Continuity::Continuous,
            Some(prev) => Continuity::Gap {
                expected: prev.next(),
                got: seq,
            },
        };
        self.last = Some(seq);
        result
    }

    pub fn last(&self) -> Option<Sequence> {
        self.last
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverStats {
    pub packets: u64,
    pub points: u64,
    pub discontinuities: u64,
    pub decode_errors: u64,
}

/// Rebuilds one laser's continuous polyline from its datagrams.
///
/// On a sequence gap the buffered points are dropped and the polyline
/// restarts with the new packet; old and new data are never spliced.
#[derive(Debug)]
pub struct PolylineReceiver {
    laser_id: u8,
    capacity: usize,
    tracker: SequenceTracker,
    points: VecDeque<LaserPoint>,
    stats: ReceiverStats,
}

impl PolylineReceiver {
    pub fn new(laser_id: u8, capacity: usize) -> Self {
        Self {
            laser_id,
            capacity: capacity.max(1),
            tracker: SequenceTracker::new(),
            points: VecDeque::with_capacity(capacity.max(1)),
            stats: ReceiverStats::default(),
        }
    }

    pub fn ingest(&mut self, datagram: &[u8]) -> Result<Continuity, PacketError> {
        let packet = match decode_packet(self.laser_id, datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.decode_errors += 1;
                return Err(e);
            }
        };

        let continuity = self.tracker.observe(packet.sequence);
        if let Continuity::Gap { .. } = continuity {
            self.stats.discontinuities += 1;
            self.points.clear();
        }

        self.stats.packets += 1;
        self.stats.points += packet.points.len() as u64;

        for point in packet.points {
            if self.points.len() == self.capacity {
                self.points.pop_front();
            }
            self.points.push_back(point);
        }

        Ok(continuity)
    }

    pub fn laser_id(&self) -> u8 {
        self.laser_id
    }

    pub fn points(&self) -> impl Iterator<Item = &LaserPoint> + '_ {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketBuilder;

    fn packet(seq: u8, xs: &[u16]) -> Vec<u8> {
        let mut builder = PacketBuilder::new(Sequence(seq));
        for &x in xs {
            builder.push(&LaserPoint::new(0, x, x, 0, 255, 0));
        }
        builder.finish().to_vec()
    }

    #[test]
    fn test_wraparound_is_continuous() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(Sequence(253)), Continuity::First);
        assert_eq!(tracker.observe(Sequence(254)), Continuity::Continuous);
        assert_eq!(tracker.observe(Sequence(0)), Continuity::Continuous);
        assert_eq!(tracker.observe(Sequence(1)), Continuity::Continuous);
    }

    #[test]
    fn test_gap_is_reported() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(Sequence(10));
        assert_eq!(
            tracker.observe(Sequence(12)),
            Continuity::Gap {
                expected: Sequence(11),
                got: Sequence(12)
            }
        );
        // 254 -> 255 does not exist on the wire; 254 -> 1 skips 0.
        tracker.observe(Sequence(254));
        assert!(matches!(tracker.observe(Sequence(1)), Continuity::Gap { .. }));
    }

    #[test]
    fn test_gap_discards_buffered_points() {
        let mut rx = PolylineReceiver::new(0, 1000);
        rx.ingest(&packet(1, &[1, 2, 3])).unwrap();
        rx.ingest(&packet(2, &[4, 5])).unwrap();
        assert_eq!(rx.len(), 5);

        let c = rx.ingest(&packet(9, &[100, 101])).unwrap();
        assert!(matches!(c, Continuity::Gap { .. }));
        let xs: Vec<u16> = rx.points().map(|p| p.x).collect();
        assert_eq!(xs, vec![100, 101]);
        assert_eq!(rx.stats().discontinuities, 1);
        assert_eq!(rx.stats().packets, 3);
    }

    #[test]
    fn test_capacity_keeps_newest_points() {
        let mut rx = PolylineReceiver::new(0, 4);
        rx.ingest(&packet(0, &[1, 2, 3])).unwrap();
        rx.ingest(&packet(1, &[4, 5, 6])).unwrap();
        let xs: Vec<u16> = rx.points().map(|p| p.x).collect();
        assert_eq!(xs, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_decode_errors_are_counted() {
        let mut rx = PolylineReceiver::new(0, 10);
        assert!(rx.ingest(&[3, 1, 2]).is_err());
        assert_eq!(rx.stats().decode_errors, 1);
        assert!(rx.is_empty());
    }
}
