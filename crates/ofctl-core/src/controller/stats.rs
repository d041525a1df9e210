// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller traffic statistics.
//!
//! Counters are plain relaxed atomics: a reader may see a snapshot that is
//! off by a couple of counts under load, which is acceptable for monitoring.
//!
//! # Example
//!
//! ```
//! use ofctl_core::controller::ControllerStats;
//!
//! let stats = ControllerStats::new();
//! stats.count_drop(128);
//! let snap = stats.snapshot();
//! assert_eq!(snap.drop_count, 1);
//! assert_eq!(snap.drop_bytes, 128);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::protocol::{Message, MessageBody};

/// Accumulated controller counters.
#[derive(Debug)]
pub struct ControllerStats {
    packet_in_count: AtomicU64,
    packet_in_bytes: AtomicU64,
    packet_out_count: AtomicU64,
    packet_out_bytes: AtomicU64,
    drop_count: AtomicU64,
    drop_bytes: AtomicU64,
    msg_rx_count: AtomicU64,
    msg_tx_count: AtomicU64,

    /// When counters were last reset
    reset_at: Mutex<Instant>,
}

impl ControllerStats {
    pub fn new() -> Self {
        Self {
            packet_in_count: AtomicU64::new(0),
            packet_in_bytes: AtomicU64::new(0),
            packet_out_count: AtomicU64::new(0),
            packet_out_bytes: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
            drop_bytes: AtomicU64::new(0),
            msg_rx_count: AtomicU64::new(0),
            msg_tx_count: AtomicU64::new(0),
            reset_at: Mutex::new(Instant::now()),
        }
    }

    /// Counts an outbound message; packet-outs are tallied separately with
    /// their payload size.
    pub fn count_tx(&self, msg: &Message) {
        match msg.body() {
            MessageBody::PacketOut(data) => {
                self.packet_out_count.fetch_add(1, Ordering::Relaxed);
                self.packet_out_bytes
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            _ => {
                self.msg_tx_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Counts an inbound message; packet-ins are tallied separately with
    /// their `total_len`.
    pub fn count_rx(&self, msg: &Message) {
        match msg.body() {
            MessageBody::PacketIn(pi) => {
                self.packet_in_count.fetch_add(1, Ordering::Relaxed);
                self.packet_in_bytes
                    .fetch_add(u64::from(pi.total_len), Ordering::Relaxed);
            }
            _ => {
                self.msg_rx_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Counts one dropped packet of `bytes` bytes.
    pub fn count_drop(&self, bytes: usize) {
        self.drop_count.fetch_add(1, Ordering::Relaxed);
        self.drop_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Zeroes every counter and restarts the measurement window.
    pub fn reset(&self) {
        for counter in [
            &self.packet_in_count,
            &self.packet_in_bytes,
            &self.packet_out_count,
            &self.packet_out_bytes,
            &self.drop_count,
            &self.drop_bytes,
            &self.msg_rx_count,
            &self.msg_tx_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.reset_at.lock() = Instant::now();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            duration: self.reset_at.lock().elapsed(),
            packet_in_count: self.packet_in_count.load(Ordering::Relaxed),
            packet_in_bytes: self.packet_in_bytes.load(Ordering::Relaxed),
            packet_out_count: self.packet_out_count.load(Ordering::Relaxed),
            packet_out_bytes: self.packet_out_bytes.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            drop_bytes: self.drop_bytes.load(Ordering::Relaxed),
            msg_rx_count: self.msg_rx_count.load(Ordering::Relaxed),
            msg_tx_count: self.msg_tx_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for ControllerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable copy of [`ControllerStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Time covered by the counters (since the last reset)
    pub duration: Duration,
    pub packet_in_count: u64,
    pub packet_in_bytes: u64,
    pub packet_out_count: u64,
    pub packet_out_bytes: u64,
    pub drop_count: u64,
    pub drop_bytes: u64,
    /// Messages received, packet-ins excluded
    pub msg_rx_count: u64,
    /// Messages sent, packet-outs excluded
    pub msg_tx_count: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageBuilder, PacketIn, ProtocolVersion};

    fn msg(body: MessageBody) -> Message {
        MessageBuilder::new(ProtocolVersion::V_1_3, body).build()
    }

    #[test]
    fn test_packet_traffic_counted_separately() {
        let stats = ControllerStats::new();
        stats.count_rx(&msg(MessageBody::PacketIn(PacketIn {
            buffer_id: 0xffff_ffff,
            total_len: 60,
            payload: vec![0; 20],
        })));
        stats.count_rx(&msg(MessageBody::EchoReply(Vec::new())));
        stats.count_tx(&msg(MessageBody::PacketOut(vec![0; 42])));
        stats.count_tx(&msg(MessageBody::BarrierRequest));
        stats.count_tx(&msg(MessageBody::FeaturesRequest));

        let snap = stats.snapshot();
        assert_eq!(snap.packet_in_count, 1);
        assert_eq!(snap.packet_in_bytes, 60);
        assert_eq!(snap.msg_rx_count, 1);
        assert_eq!(snap.packet_out_count, 1);
        assert_eq!(snap.packet_out_bytes, 42);
        assert_eq!(snap.msg_tx_count, 2);
    }

    #[test]
    fn test_reset() {
        let stats = ControllerStats::new();
        stats.count_drop(10);
        stats.count_tx(&msg(MessageBody::BarrierRequest));
        std::thread::sleep(Duration::from_millis(5));
        let before = stats.snapshot();
        assert!(before.duration >= Duration::from_millis(5));

        stats.reset();
        let after = stats.snapshot();
        assert_eq!(after.drop_count, 0);
        assert_eq!(after.msg_tx_count, 0);
        assert!(after.duration < before.duration);
    }
}
