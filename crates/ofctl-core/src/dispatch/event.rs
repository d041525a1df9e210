// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Events and listener traits.

use std::fmt;
use std::net::SocketAddr;

use crate::controller::DataPathInfo;
use crate::protocol::{DataPathId, Message, MessageType, ProtocolVersion};

/// Datapath lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataPathEvent {
    /// Main connection completed the full handshake
    Connected(DataPathInfo),
    /// Post-handshake classification finished
    Ready(DataPathInfo),
    /// Main connection closed; the datapath is gone
    Disconnected { dpid: DataPathId, remote: SocketAddr },
    /// Controller refused or dropped a connection (no dpid if it never
    /// completed the basic handshake)
    Revoked {
        dpid: Option<DataPathId>,
        remote: SocketAddr,
        reason: String,
    },
    /// Events were dropped while this listener was on probation
    DroppedEvents,
}

impl DataPathEvent {
    pub fn dpid(&self) -> Option<DataPathId> {
        match self {
            Self::Connected(info) | Self::Ready(info) => Some(info.dpid),
            Self::Disconnected { dpid, .. } => Some(*dpid),
            Self::Revoked { dpid, .. } => *dpid,
            Self::DroppedEvents => None,
        }
    }
}

impl fmt::Display for DataPathEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(info) => write!(f, "DATAPATH_CONNECTED {}", info.dpid),
            Self::Ready(info) => write!(f, "DATAPATH_READY {}", info.dpid),
            Self::Disconnected { dpid, .. } => write!(f, "DATAPATH_DISCONNECTED {}", dpid),
            Self::Revoked { remote, .. } => write!(f, "DATAPATH_REVOKED {}", remote),
            Self::DroppedEvents => f.write_str("DROPPED_EVENTS_CHECKPOINT"),
        }
    }
}

/// Message received from a datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageEvent {
    Received {
        dpid: DataPathId,
        aux_id: u8,
        version: ProtocolVersion,
        message: Message,
    },
    /// Events were dropped while this listener was on probation
    DroppedEvents,
}

impl MessageEvent {
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Received { message, .. } => Some(message),
            Self::DroppedEvents => None,
        }
    }
}

/// Out-of-band queue notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueEvent {
    /// Queue overflowed; events are being dropped
    Full,
    /// Queue drained; delivery resumed after a checkpoint event
    Reset,
}

/// Common behavior of queued events.
pub trait DispatchEvent: Clone + Send + 'static {
    /// In-band marker pushed when a listener leaves probation.
    fn checkpoint() -> Self;

    /// Type used against listener filters; `None` always passes.
    fn message_type(&self) -> Option<MessageType> {
        None
    }
}

impl DispatchEvent for DataPathEvent {
    fn checkpoint() -> Self {
        Self::DroppedEvents
    }
}

impl DispatchEvent for MessageEvent {
    fn checkpoint() -> Self {
        Self::DroppedEvents
    }

    fn message_type(&self) -> Option<MessageType> {
        self.message().map(Message::msg_type)
    }
}

/// Receives datapath lifecycle events on a dispatch reader thread.
pub trait DataPathListener: Send + Sync {
    fn event(&self, event: &DataPathEvent);

    fn queue_event(&self, _event: QueueEvent) {}
}

/// Receives messages on a dispatch reader thread.
pub trait MessageListener: Send + Sync {
    fn event(&self, event: &MessageEvent);

    fn queue_event(&self, _event: QueueEvent) {}
}

/// Delivery adapter shared by both listener kinds.
pub(crate) trait Subscriber<E>: Send + Sync {
    fn deliver(&self, event: &E);

    fn queue_event(&self, event: QueueEvent);

    /// Identity of the wrapped listener (its address).
    fn key(&self) -> usize;
}

impl Subscriber<DataPathEvent> for std::sync::Arc<dyn DataPathListener> {
    fn deliver(&self, event: &DataPathEvent) {
        self.event(event);
    }

    fn queue_event(&self, event: QueueEvent) {
        DataPathListener::queue_event(self.as_ref(), event);
    }

    fn key(&self) -> usize {
        std::sync::Arc::as_ptr(self) as *const () as usize
    }
}

impl Subscriber<MessageEvent> for std::sync::Arc<dyn MessageListener> {
    fn deliver(&self, event: &MessageEvent) {
        self.event(event);
    }

    fn queue_event(&self, event: QueueEvent) {
        MessageListener::queue_event(self.as_ref(), event);
    }

    fn key(&self) -> usize {
        std::sync::Arc::as_ptr(self) as *const () as usize
    }
}
