// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection handshake state machine.
//!
//! A [`Connection`] does no I/O. The owning worker loop feeds it decoded
//! messages and timer ticks; the machine answers with a [`Step`] and leaves
//! anything it wants sent in its outbox.
//!
//! ```text
//! ACCEPTED -> HELLO_EXCHANGED -> VERSION_NEGOTIATED -> FEATURES_PENDING
//!     -> BASIC_DONE -> EXTENDED_PENDING -> READY
//!
//! any state -> REVOKED
//! ```
//!
//! Auxiliary connections stop at BASIC_DONE and are considered ready from
//! there on; only main connections run the extended (multipart) handshake.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::LivenessConfig;
use crate::error::{OfError, OfResult};
use crate::protocol::{
    multipart_request, negotiate, DataPathId, DeviceDescription, ErrorBody, Features, Hello,
    Message, MessageBody, MessageBuilder, MessageType, MultipartReplyBody, MultipartType,
    PortDesc, ProtocolVersion, TableFeatures, VersionSet,
};

/// Connection identifier, unique for the life of the controller.
pub type ConnId = u64;

/// Auxiliary id of the main connection.
pub const MAIN_AUX_ID: u8 = 0;

/// Extended handshake requests issued to pre-1.3 datapaths (DESC only).
const EXT_REQUESTS_10: usize = 1;

/// Extended handshake requests issued to 1.3+ datapaths.
const EXT_REQUESTS_13: usize = 3;

// ============================================================================
// State
// ============================================================================

/// Handshake progress of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeState {
    Accepted,
    HelloExchanged,
    VersionNegotiated,
    FeaturesPending,
    BasicDone,
    ExtendedPending,
    Ready,
    Revoked,
}

impl HandshakeState {
    /// FEATURES_REPLY has been processed.
    pub fn basic_done(self) -> bool {
        matches!(
            self,
            HandshakeState::BasicDone | HandshakeState::ExtendedPending | HandshakeState::Ready
        )
    }

    pub fn is_ready(self) -> bool {
        self == HandshakeState::Ready
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Accepted => "ACCEPTED",
            HandshakeState::HelloExchanged => "HELLO_EXCHANGED",
            HandshakeState::VersionNegotiated => "VERSION_NEGOTIATED",
            HandshakeState::FeaturesPending => "FEATURES_PENDING",
            HandshakeState::BasicDone => "BASIC_DONE",
            HandshakeState::ExtendedPending => "EXTENDED_PENDING",
            HandshakeState::Ready => "READY",
            HandshakeState::Revoked => "REVOKED",
        };
        f.write_str(name)
    }
}

/// Outcome of feeding one message to a connection.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// Absorbed by the handshake; flush the outbox and carry on
    Consumed,
    /// Post-handshake traffic for the upper layers
    Deliver(Message),
    /// FEATURES_REPLY processed: the datapath id and aux id are now known
    BasicDone,
    /// Every extended handshake request has been answered
    ExtendedDone,
    /// Flush the outbox, then close the socket
    Revoke(String),
}

// ============================================================================
// Connection
// ============================================================================

/// Protocol state of one accepted socket.
pub struct Connection {
    id: ConnId,
    remote: SocketAddr,
    state: HandshakeState,
    supported: VersionSet,

    hello_in: Option<Message>,
    hello_out: Option<Message>,
    hello_deadline: Option<Instant>,
    negotiated: Option<ProtocolVersion>,

    features: Option<Features>,
    dpid: Option<DataPathId>,
    aux_id: u8,
    ready_at: Option<Instant>,

    // extended handshake
    ext_requests: HashMap<u32, MultipartType>,
    pending_ext: usize,
    description: Option<DeviceDescription>,
    ports: Vec<PortDesc>,
    table_features: Vec<TableFeatures>,
    no_table_features: bool,

    // liveness
    liveness: LivenessConfig,
    last_message_at: Instant,
    echo_attempts: u32,
    next_echo_request: Option<Instant>,

    outbox: Vec<Message>,
}

impl Connection {
    /// New connection accepted at `now`; the peer has `hello_grace` to speak
    /// first before we send our own HELLO.
    pub fn new(
        id: ConnId,
        remote: SocketAddr,
        supported: VersionSet,
        hello_grace: Duration,
        liveness: LivenessConfig,
        now: Instant,
    ) -> Self {
        Self {
            id,
            remote,
            state: HandshakeState::Accepted,
            supported,
            hello_in: None,
            hello_out: None,
            hello_deadline: Some(now + hello_grace),
            negotiated: None,
            features: None,
            dpid: None,
            aux_id: MAIN_AUX_ID,
            ready_at: None,
            ext_requests: HashMap::new(),
            pending_ext: 0,
            description: None,
            ports: Vec::new(),
            table_features: Vec::new(),
            no_table_features: false,
            liveness,
            // stamped so the idle check does not fire straight away
            last_message_at: now,
            echo_attempts: 0,
            next_echo_request: None,
            outbox: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn negotiated(&self) -> Option<ProtocolVersion> {
        self.negotiated
    }

    pub fn dpid(&self) -> Option<DataPathId> {
        self.dpid
    }

    pub fn aux_id(&self) -> u8 {
        self.aux_id
    }

    pub fn is_main(&self) -> bool {
        self.aux_id == MAIN_AUX_ID
    }

    pub fn features(&self) -> Option<&Features> {
        self.features.as_ref()
    }

    pub fn description(&self) -> Option<&DeviceDescription> {
        self.description.as_ref()
    }

    /// Ports learnt during the handshake (FEATURES_REPLY for 1.0, PORT_DESC
    /// otherwise).
    pub fn ports(&self) -> &[PortDesc] {
        &self.ports
    }

    pub fn table_features(&self) -> &[TableFeatures] {
        &self.table_features
    }

    pub fn no_table_features(&self) -> bool {
        self.no_table_features
    }

    pub fn ready_at(&self) -> Option<Instant> {
        self.ready_at
    }

    pub fn last_message_at(&self) -> Instant {
        self.last_message_at
    }

    pub fn hello_sent(&self) -> bool {
        self.hello_out.is_some()
    }

    pub fn hello_received(&self) -> bool {
        self.hello_in.is_some()
    }

    pub fn is_revoked(&self) -> bool {
        self.state == HandshakeState::Revoked
    }

    /// Handshake complete: READY for main, BASIC_DONE suffices for aux.
    pub fn full_handshake_done(&self) -> bool {
        self.state.is_ready()
    }

    /// Messages waiting to be encoded, in send order.
    pub fn take_outbox(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Marks the connection unusable; later messages are ignored.
    pub fn revoke(&mut self) {
        self.state = HandshakeState::Revoked;
        self.hello_deadline = None;
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Sends our HELLO once the grace period lapses without a peer HELLO.
    ///
    /// Returns true when the HELLO was queued by this call.
    pub fn poll_hello_timer(&mut self, now: Instant) -> bool {
        match self.hello_deadline {
            Some(deadline) if now >= deadline => {
                self.hello_deadline = None;
                if self.hello_out.is_some() || self.is_revoked() {
                    return false;
                }
                let Some(max) = self.max_supported() else {
                    return false;
                };
                let hello = MessageBuilder::new(max, self.bitmap_hello())
                    .clear_xid()
                    .build();
                log::debug!(
                    "[session] {} silent for the grace period, sending HELLO v{}",
                    self.remote, max
                );
                self.hello_out = Some(hello.clone());
                self.outbox.push(hello);
                true
            }
            _ => false,
        }
    }

    /// Steps through the liveness protocol.
    ///
    /// Returns false when the peer has exhausted its echo attempts and the
    /// connection should be closed.
    pub fn check_liveness(&mut self, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.last_message_at);
        let waiting = self.next_echo_request.is_some_and(|at| now < at);
        if idle < self.liveness.max_idle || waiting {
            return true;
        }

        if self.echo_attempts < self.liveness.max_echo_attempts {
            self.echo_attempts += 1;
            // no version yet means no way to phrase an echo
            if let Some(version) = self.negotiated {
                let echo = MessageBuilder::new(version, MessageBody::EchoRequest(Vec::new())).build();
                self.outbox.push(echo);
            }
            self.next_echo_request = Some(now + self.liveness.max_echo_wait);
            true
        } else {
            false
        }
    }

    fn stamp(&mut self, now: Instant) {
        self.last_message_at = now;
        self.next_echo_request = None;
        self.echo_attempts = 0;
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Routes one decoded message through the state machine.
    ///
    /// An `Err` is a protocol violation; the caller drops the connection.
    pub fn process_message(&mut self, msg: Message, now: Instant) -> OfResult<Step> {
        if self.is_revoked() {
            return Ok(Step::Consumed);
        }
        self.stamp(now);

        match msg.msg_type() {
            MessageType::Hello => self.inbound_hello(msg),
            MessageType::EchoRequest => {
                self.reply_echo(&msg);
                Ok(Step::Consumed)
            }
            _ if self.negotiated.is_none() => {
                log::debug!(
                    "[session] {} sent {} before version negotiation, dropped",
                    self.remote, msg
                );
                Ok(Step::Consumed)
            }
            MessageType::FeaturesReply => self.inbound_features(msg, now),
            _ if self.full_handshake_done() => Ok(Step::Deliver(msg)),
            MessageType::EchoReply => Ok(Step::Consumed),
            MessageType::Error => Ok(self.handshake_error(msg)),
            MessageType::MultipartReply if self.state.basic_done() => {
                Ok(self.extended_reply(msg))
            }
            _ => {
                log::debug!(
                    "[session] {} sent {} during handshake ({}), dropped",
                    self.remote, msg, self.state
                );
                Ok(Step::Consumed)
            }
        }
    }

    fn inbound_hello(&mut self, msg: Message) -> OfResult<Step> {
        if self.hello_in.is_some() {
            return Err(OfError::Protocol(format!(
                "duplicate HELLO from {}: {}",
                self.remote, msg
            )));
        }
        self.hello_deadline = None;

        if self.hello_out.is_none() {
            let reply = self.hello_reply(&msg);
            self.hello_out = Some(reply.clone());
            self.outbox.push(reply);
        }
        self.state = HandshakeState::HelloExchanged;

        let ours = match &self.hello_out {
            Some(h) => h,
            None => return Err(OfError::Protocol("outbound HELLO missing".into())),
        };
        let negotiated = negotiate(&msg, ours).filter(|v| self.supported.contains(v));
        let peer_version = msg.version();
        self.hello_in = Some(msg);

        match negotiated {
            Some(version) => {
                self.negotiated = Some(version);
                self.state = HandshakeState::VersionNegotiated;
                log::debug!("[session] {} negotiated v{}", self.remote, version);

                let request = MessageBuilder::new(version, MessageBody::FeaturesRequest).build();
                self.outbox.push(request);
                self.state = HandshakeState::FeaturesPending;
                Ok(Step::Consumed)
            }
            None => {
                log::warn!(
                    "[session] no common protocol version with {} (peer claims v{})",
                    self.remote, peer_version
                );
                let error = MessageBuilder::new(
                    peer_version,
                    MessageBody::Error(ErrorBody::new(
                        ErrorBody::HELLO_FAILED,
                        ErrorBody::HELLO_FAILED_INCOMPATIBLE,
                        b"no common version".to_vec(),
                    )),
                )
                .xid(self.hello_in.as_ref().map_or(0, Message::xid))
                .build();
                self.outbox.push(error);
                self.revoke();
                Ok(Step::Revoke(format!(
                    "version negotiation failed (peer v{})",
                    peer_version
                )))
            }
        }
    }

    /// Our answer to the peer's HELLO: a 1.0 peer gets its own HELLO back,
    /// anyone else our bitmap HELLO, both under the peer's xid.
    fn hello_reply(&self, peer: &Message) -> Message {
        if peer.version() == ProtocolVersion::V_1_0
            && self.supported.contains(&ProtocolVersion::V_1_0)
        {
            return MessageBuilder::reply_to(peer, MessageBody::Hello(Hello::default())).build();
        }
        let max = self.max_supported().unwrap_or(ProtocolVersion::V_1_0);
        MessageBuilder::new(max, self.bitmap_hello())
            .xid(peer.xid())
            .build()
    }

    fn bitmap_hello(&self) -> MessageBody {
        MessageBody::Hello(Hello {
            bitmap: self.supported.iter().copied().collect(),
        })
    }

    fn max_supported(&self) -> Option<ProtocolVersion> {
        self.supported.iter().next_back().copied()
    }

    fn reply_echo(&mut self, request: &Message) {
        let data = match request.body() {
            MessageBody::EchoRequest(data) => data.clone(),
            _ => Vec::new(),
        };
        let reply = MessageBuilder::reply_to(request, MessageBody::EchoReply(data)).build();
        self.outbox.push(reply);
    }

    fn inbound_features(&mut self, msg: Message, now: Instant) -> OfResult<Step> {
        if self.features.is_some() {
            return Err(OfError::Protocol(format!(
                "duplicate FEATURES_REPLY from {}: {}",
                self.remote, msg
            )));
        }
        let version = msg.version();
        let features = match msg.into_body() {
            MessageBody::FeaturesReply(f) => f,
            _ => return Err(OfError::Protocol("FEATURES_REPLY without body".into())),
        };

        self.dpid = Some(features.dpid);
        self.aux_id = features.aux_id;
        if !version.ge(ProtocolVersion::V_1_3) {
            self.ports = features.ports.clone();
        }
        self.features = Some(features);
        self.ready_at = Some(now);
        self.pending_ext = if self.negotiated.is_some_and(|v| v.ge(ProtocolVersion::V_1_3)) {
            EXT_REQUESTS_13
        } else {
            EXT_REQUESTS_10
        };

        self.state = if self.is_main() {
            HandshakeState::BasicDone
        } else {
            HandshakeState::Ready
        };
        Ok(Step::BasicDone)
    }

    /// Issues the extended handshake requests (main connections only).
    pub fn start_extended(&mut self) {
        if self.state != HandshakeState::BasicDone {
            return;
        }
        let Some(version) = self.negotiated else {
            return;
        };

        let mut wanted = vec![MultipartType::Desc];
        if version.ge(ProtocolVersion::V_1_3) {
            wanted.push(MultipartType::PortDesc);
            wanted.push(MultipartType::TableFeatures);
        }
        for mp_type in wanted {
            let request = multipart_request(version, mp_type);
            self.ext_requests.insert(request.xid(), mp_type);
            self.outbox.push(request);
        }
        self.pending_ext = self.ext_requests.len();
        self.state = HandshakeState::ExtendedPending;
    }

    fn handshake_error(&mut self, msg: Message) -> Step {
        if !self.state.basic_done() {
            self.revoke();
            return Step::Revoke(format!("ERROR during basic handshake: {}", error_text(&msg)));
        }

        match self.ext_requests.remove(&msg.xid()) {
            None => {
                log::warn!(
                    "[session] {} sent ERROR with unknown xid {} during handshake: {}",
                    self.remote,
                    msg.xid(),
                    error_text(&msg)
                );
                Step::Consumed
            }
            Some(MultipartType::TableFeatures) => {
                log::warn!(
                    "[session] datapath {} rejected TABLE_FEATURES ({}), continuing without",
                    self.dpid.unwrap_or_default(),
                    error_text(&msg)
                );
                self.no_table_features = true;
                self.finish_one()
            }
            Some(mp_type) => {
                self.revoke();
                Step::Revoke(format!(
                    "datapath refused {} request: {}",
                    mp_type,
                    error_text(&msg)
                ))
            }
        }
    }

    fn extended_reply(&mut self, msg: Message) -> Step {
        let xid = msg.xid();
        let more = msg.has_more();
        let reply = match msg.into_body() {
            MessageBody::MultipartReply(r) => r,
            _ => return Step::Consumed,
        };

        // only replies to our own requests count toward READY
        match self.ext_requests.get(&xid) {
            Some(&requested) if requested == reply.mp_type => {}
            Some(&requested) => {
                log::warn!(
                    "[session] {} answered {} request xid {} with {}, ignored",
                    self.remote, requested, xid, reply.mp_type
                );
                return Step::Consumed;
            }
            None => {
                log::debug!(
                    "[session] {} sent unsolicited {} (xid {}) during handshake",
                    self.remote, reply.mp_type, xid
                );
                return Step::Consumed;
            }
        }

        match reply.body {
            MultipartReplyBody::Desc(desc) => {
                // single part expected; a later fragment simply replaces it
                self.description = Some(desc);
            }
            MultipartReplyBody::PortDesc(ports) => self.ports.extend(ports),
            MultipartReplyBody::TableFeatures(tables) => {
                self.table_features.extend(tables);
                if !more && self.table_features.is_empty() {
                    log::warn!(
                        "[session] no table feature payload in reply from {}",
                        self.dpid.unwrap_or_default()
                    );
                    self.no_table_features = true;
                }
            }
            _ => {
                log::debug!(
                    "[session] {} sent an unreadable {} body during handshake",
                    self.remote, reply.mp_type
                );
                return Step::Consumed;
            }
        }

        if more {
            return Step::Consumed;
        }
        self.ext_requests.remove(&xid);
        self.finish_one()
    }

    fn finish_one(&mut self) -> Step {
        self.pending_ext = self.pending_ext.saturating_sub(1);
        if self.pending_ext == 0 && self.state == HandshakeState::ExtendedPending {
            self.state = HandshakeState::Ready;
            Step::ExtendedDone
        } else {
            Step::Consumed
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("negotiated", &self.negotiated)
            .field("dpid", &self.dpid)
            .field("aux_id", &self.aux_id)
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{OfConn:{}", self.remote)?;
        if let Some(dpid) = self.dpid {
            write!(f, ",{},aux={}", dpid, self.aux_id)?;
        }
        write!(f, "}}")
    }
}

fn error_text(msg: &Message) -> String {
    match msg.body() {
        MessageBody::Error(e) => e.to_string(),
        _ => msg.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
