// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! External collaborators.
//!
//! The core takes every collaborator by reference at construction time;
//! each seam ships with a default that is good enough for tests and for a
//! controller without the corresponding subsystem.

use std::fmt;
use std::sync::Arc;

use crate::controller::DataPathInfo;
use crate::protocol::{DataPathId, Message, MessageCodec, WireCodec};

// ============================================================================
// Alerts
// ============================================================================

/// Severity of an operator alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Operator-facing alerts (queue overflow, ...).
pub trait AlertSink: Send + Sync {
    fn alert(&self, level: AlertLevel, text: &str);
}

/// Forwards alerts to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, level: AlertLevel, text: &str) {
        match level {
            AlertLevel::Info => log::info!("[alert] {}", text),
            AlertLevel::Warning => log::warn!("[alert] {}", text),
            AlertLevel::Critical => log::error!("[alert] {}", text),
        }
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Answers whether this controller may write to a datapath.
pub trait RoleAdvisor: Send + Sync {
    fn is_master(&self, dpid: DataPathId) -> bool;
}

/// Standalone controller: master of everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysMaster;

impl RoleAdvisor for AlwaysMaster {
    fn is_master(&self, _dpid: DataPathId) -> bool {
        true
    }
}

// ============================================================================
// Post-handshake classification
// ============================================================================

/// Completion token handed to a [`PostHandshakeSink`].
///
/// Dropping it without calling [`complete`](Self::complete) leaves the
/// datapath connected but never ready.
pub struct PostHandshakeCallback {
    done: Box<dyn FnOnce(Option<String>) + Send>,
}

impl PostHandshakeCallback {
    pub(crate) fn new(done: impl FnOnce(Option<String>) + Send + 'static) -> Self {
        Self {
            done: Box::new(done),
        }
    }

    /// Finishes post-handshake processing, optionally naming the device type.
    pub fn complete(self, device_type: Option<String>) {
        (self.done)(device_type);
    }
}

impl fmt::Debug for PostHandshakeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PostHandshakeCallback")
    }
}

/// Runs after the full handshake, before the datapath is announced ready.
///
/// Called on a worker thread; long work belongs on another thread, with the
/// callback moved there.
pub trait PostHandshakeSink: Send + Sync {
    fn post_handshake(&self, info: DataPathInfo, callback: PostHandshakeCallback);
}

/// Completes immediately, without a device type.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateReady;

impl PostHandshakeSink for ImmediateReady {
    fn post_handshake(&self, _info: DataPathInfo, callback: PostHandshakeCallback) {
        callback.complete(None);
    }
}

// ============================================================================
// Packet-in sequencing and initial flows
// ============================================================================

/// Dedicated path for PACKET_IN traffic, bypassing the listener queues.
pub trait PacketSequencer: Send + Sync {
    fn packet_in(&self, dpid: DataPathId, aux_id: u8, msg: Message);
}

/// Contributes flows to push once a datapath is ready.
pub trait FlowAdvisor: Send + Sync {
    fn initial_flows(&self, info: &DataPathInfo) -> Vec<Message>;
}

// ============================================================================
// Bundle
// ============================================================================

/// Collaborators handed to the controller at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub alerts: Arc<dyn AlertSink>,
    pub roles: Arc<dyn RoleAdvisor>,
    pub post_handshake: Arc<dyn PostHandshakeSink>,
    /// Without a sequencer, packet-ins are counted as drops
    pub sequencer: Option<Arc<dyn PacketSequencer>>,
    pub flows: Option<Arc<dyn FlowAdvisor>>,
    /// Frame encoder/decoder used by every connection
    pub codec: Arc<dyn MessageCodec>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            alerts: Arc::new(LogAlertSink),
            roles: Arc::new(AlwaysMaster),
            post_handshake: Arc::new(ImmediateReady),
            sequencer: None,
            flows: None,
            codec: Arc::new(WireCodec::new()),
        }
    }
}

impl Collaborators {
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_roles(mut self, roles: Arc<dyn RoleAdvisor>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_post_handshake(mut self, sink: Arc<dyn PostHandshakeSink>) -> Self {
        self.post_handshake = sink;
        self
    }

    pub fn with_sequencer(mut self, sequencer: Arc<dyn PacketSequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    pub fn with_flows(mut self, flows: Arc<dyn FlowAdvisor>) -> Self {
        self.flows = Some(flows);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("sequencer", &self.sequencer.is_some())
            .field("flows", &self.flows.is_some())
            .finish_non_exhaustive()
    }
}
