// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared handle to a handshaken connection.
//!
//! The worker loop owns the [`Connection`](super::Connection) itself; once
//! the basic handshake completes it publishes a [`ConnectionHandle`] that the
//! registry and application threads use to send and to take snapshots.
//! Sends are encoded on the calling thread and handed to the owning worker
//! as ready frames.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::OfResult;
use crate::protocol::{DataPathId, Message, MessageCodec, ProtocolVersion};
use crate::transport::worker::{WorkerCommand, WorkerLink};

use super::connection::{ConnId, MAIN_AUX_ID};

/// Milliseconds since the Unix epoch.
pub(crate) fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cross-thread view of one connection.
pub struct ConnectionHandle {
    id: ConnId,
    remote: SocketAddr,
    version: ProtocolVersion,
    dpid: DataPathId,
    aux_id: u8,

    /// Basic handshake completion, ms since epoch
    ready_at_ms: u64,

    /// Last inbound message, ms since epoch
    last_message_ms: AtomicU64,

    revoked: AtomicBool,

    link: WorkerLink,
    codec: Arc<dyn MessageCodec>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnId,
        remote: SocketAddr,
        version: ProtocolVersion,
        dpid: DataPathId,
        aux_id: u8,
        link: WorkerLink,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        let now = wall_clock_ms();
        Self {
            id,
            remote,
            version,
            dpid,
            aux_id,
            ready_at_ms: now,
            last_message_ms: AtomicU64::new(now),
            revoked: AtomicBool::new(false),
            link,
            codec,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn dpid(&self) -> DataPathId {
        self.dpid
    }

    pub fn aux_id(&self) -> u8 {
        self.aux_id
    }

    pub fn is_main(&self) -> bool {
        self.aux_id == MAIN_AUX_ID
    }

    pub fn ready_at_ms(&self) -> u64 {
        self.ready_at_ms
    }

    pub fn last_message_ms(&self) -> u64 {
        self.last_message_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self) {
        self.last_message_ms.store(wall_clock_ms(), Ordering::Relaxed);
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    pub(crate) fn mark_revoked(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    /// Encodes `msg` and queues the frame on the owning worker.
    pub fn send(&self, msg: &Message) -> OfResult<()> {
        let frame = self.codec.encode(msg)?;
        self.link.submit(WorkerCommand::Send {
            conn_id: self.id,
            frames: vec![frame],
        })
    }

    /// Encodes every message first; nothing is queued if any fails.
    pub fn send_all(&self, msgs: &[Message]) -> OfResult<()> {
        let frames = msgs
            .iter()
            .map(|m| self.codec.encode(m))
            .collect::<Result<Vec<_>, _>>()?;
        self.link.submit(WorkerCommand::Send {
            conn_id: self.id,
            frames,
        })
    }

    /// Asks the owning worker to close the socket.
    pub fn close(&self) -> OfResult<()> {
        self.link.submit(WorkerCommand::Close { conn_id: self.id })
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("version", &self.version)
            .field("dpid", &self.dpid)
            .field("aux_id", &self.aux_id)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
