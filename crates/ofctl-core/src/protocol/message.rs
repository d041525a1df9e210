// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OpenFlow message model.
//!
//! A [`Message`] is immutable once built: callers assemble one through
//! [`MessageBuilder`] and only the built form can be handed to the
//! controller for sending.
//!
//! Only the bodies the session core interprets are modelled; everything
//! else (flow/group/meter programming, experimenter payloads) travels as
//! [`MessageBody::Opaque`].

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use super::version::ProtocolVersion;

// ============================================================================
// Identifiers
// ============================================================================

/// 64-bit datapath identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataPathId(u64);

impl DataPathId {
    pub const fn new(raw: u64) -> Self {
        DataPathId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for DataPathId {
    fn from(raw: u64) -> Self {
        DataPathId(raw)
    }
}

impl fmt::Display for DataPathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Switch port number (32-bit from 1.1 onward).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortNumber(pub u32);

impl PortNumber {
    /// Highest number usable for a physical port
    pub const MAX: PortNumber = PortNumber(0xffff_ff00);
    /// Wildcard used in statistics requests
    pub const ANY: PortNumber = PortNumber(0xffff_ffff);

    pub fn is_physical(self) -> bool {
        self.0 != 0 && self.0 <= Self::MAX.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ANY {
            write!(f, "ANY")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

static NEXT_XID: AtomicU32 = AtomicU32::new(1);

/// Allocates a fresh, non-zero transaction id.
pub fn next_xid() -> u32 {
    loop {
        let xid = NEXT_XID.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff;
        if xid != 0 {
            return xid;
        }
    }
}

// ============================================================================
// Type vocabulary
// ============================================================================

/// Message types understood by the session core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    Hello,
    Error,
    EchoRequest,
    EchoReply,
    Experimenter,
    FeaturesRequest,
    FeaturesReply,
    GetConfigRequest,
    GetConfigReply,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    GroupMod,
    PortMod,
    TableMod,
    MultipartRequest,
    MultipartReply,
    BarrierRequest,
    BarrierReply,
    MeterMod,
}

impl MessageType {
    /// Wire type code for the given protocol version.
    ///
    /// Returns `None` for types the version does not define.
    pub fn code(self, version: ProtocolVersion) -> Option<u8> {
        use MessageType::*;
        let v10 = !version.ge(ProtocolVersion::V_1_1);
        let code = match self {
            Hello => 0,
            Error => 1,
            EchoRequest => 2,
            EchoReply => 3,
            Experimenter => 4,
            FeaturesRequest => 5,
            FeaturesReply => 6,
            GetConfigRequest => 7,
            GetConfigReply => 8,
            SetConfig => 9,
            PacketIn => 10,
            FlowRemoved => 11,
            PortStatus => 12,
            PacketOut => 13,
            FlowMod => 14,
            GroupMod if !v10 => 15,
            PortMod if v10 => 15,
            PortMod => 16,
            TableMod if !v10 => 17,
            MultipartRequest if v10 => 16,
            MultipartRequest => 18,
            MultipartReply if v10 => 17,
            MultipartReply => 19,
            BarrierRequest if v10 => 18,
            BarrierRequest => 20,
            BarrierReply if v10 => 19,
            BarrierReply => 21,
            MeterMod if version.ge(ProtocolVersion::V_1_3) => 29,
            GroupMod | TableMod | MeterMod => return None,
        };
        Some(code)
    }

    /// Inverse of [`MessageType::code`].
    pub fn from_code(code: u8, version: ProtocolVersion) -> Option<Self> {
        use MessageType::*;
        const ALL: [MessageType; 23] = [
            Hello,
            Error,
            EchoRequest,
            EchoReply,
            Experimenter,
            FeaturesRequest,
            FeaturesReply,
            GetConfigRequest,
            GetConfigReply,
            SetConfig,
            PacketIn,
            FlowRemoved,
            PortStatus,
            PacketOut,
            FlowMod,
            GroupMod,
            PortMod,
            TableMod,
            MultipartRequest,
            MultipartReply,
            BarrierRequest,
            BarrierReply,
            MeterMod,
        ];
        ALL.into_iter().find(|t| t.code(version) == Some(code))
    }

    /// True when a controller may legitimately send this type.
    pub fn is_controller_originated(self) -> bool {
        use MessageType::*;
        !matches!(
            self,
            FeaturesReply | GetConfigReply | PacketIn | FlowRemoved | PortStatus | MultipartReply
                | BarrierReply
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MessageType::*;
        let name = match self {
            Hello => "HELLO",
            Error => "ERROR",
            EchoRequest => "ECHO_REQUEST",
            EchoReply => "ECHO_REPLY",
            Experimenter => "EXPERIMENTER",
            FeaturesRequest => "FEATURES_REQUEST",
            FeaturesReply => "FEATURES_REPLY",
            GetConfigRequest => "GET_CONFIG_REQUEST",
            GetConfigReply => "GET_CONFIG_REPLY",
            SetConfig => "SET_CONFIG",
            PacketIn => "PACKET_IN",
            FlowRemoved => "FLOW_REMOVED",
            PortStatus => "PORT_STATUS",
            PacketOut => "PACKET_OUT",
            FlowMod => "FLOW_MOD",
            GroupMod => "GROUP_MOD",
            PortMod => "PORT_MOD",
            TableMod => "TABLE_MOD",
            MultipartRequest => "MULTIPART_REQUEST",
            MultipartReply => "MULTIPART_REPLY",
            BarrierRequest => "BARRIER_REQUEST",
            BarrierReply => "BARRIER_REPLY",
            MeterMod => "METER_MOD",
        };
        f.write_str(name)
    }
}

/// Multipart (statistics) sub-types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MultipartType {
    Desc,
    Flow,
    Aggregate,
    Table,
    PortStats,
    Queue,
    Group,
    GroupDesc,
    GroupFeatures,
    Meter,
    MeterConfig,
    MeterFeatures,
    TableFeatures,
    PortDesc,
    Experimenter,
}

impl MultipartType {
    pub fn code(self) -> u16 {
        use MultipartType::*;
        match self {
            Desc => 0,
            Flow => 1,
            Aggregate => 2,
            Table => 3,
            PortStats => 4,
            Queue => 5,
            Group => 6,
            GroupDesc => 7,
            GroupFeatures => 8,
            Meter => 9,
            MeterConfig => 10,
            MeterFeatures => 11,
            TableFeatures => 12,
            PortDesc => 13,
            Experimenter => 0xffff,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        use MultipartType::*;
        Some(match code {
            0 => Desc,
            1 => Flow,
            2 => Aggregate,
            3 => Table,
            4 => PortStats,
            5 => Queue,
            6 => Group,
            7 => GroupDesc,
            8 => GroupFeatures,
            9 => Meter,
            10 => MeterConfig,
            11 => MeterFeatures,
            12 => TableFeatures,
            13 => PortDesc,
            0xffff => Experimenter,
            _ => return None,
        })
    }
}

impl fmt::Display for MultipartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// Bodies
// ============================================================================

/// HELLO payload. An empty bitmap means no version-bitmap element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hello {
    pub bitmap: Vec<ProtocolVersion>,
}

/// ERROR payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub err_type: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl ErrorBody {
    pub const HELLO_FAILED: u16 = 0;
    pub const HELLO_FAILED_INCOMPATIBLE: u16 = 0;
    pub const BAD_REQUEST: u16 = 1;
    pub const BAD_REQUEST_BAD_STAT: u16 = 2;
    pub const PORT_MOD_FAILED: u16 = 7;

    pub fn new(err_type: u16, code: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            err_type,
            code,
            data: data.into(),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type={} code={}", self.err_type, self.code)?;
        if !self.data.is_empty() {
            write!(f, " ({} data bytes)", self.data.len())?;
        }
        Ok(())
    }
}

/// Port description (1.3 layout; 1.0 ports are widened on decode).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
    pub curr_speed: u32,
    pub max_speed: u32,
}

impl PortDesc {
    /// Administratively down
    pub const CONFIG_PORT_DOWN: u32 = 1 << 0;
    /// No physical link present
    pub const STATE_LINK_DOWN: u32 = 1 << 0;

    pub fn number(&self) -> PortNumber {
        PortNumber(self.port_no)
    }

    pub fn is_enabled(&self) -> bool {
        self.config & Self::CONFIG_PORT_DOWN == 0
    }
}

/// FEATURES_REPLY payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Features {
    pub dpid: DataPathId,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub aux_id: u8,
    pub capabilities: u32,
    /// Only populated by 1.0 devices; later versions use PORT_DESC.
    pub ports: Vec<PortDesc>,
}

/// Device description strings (DESC multipart reply).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    pub mfr_desc: String,
    pub hw_desc: String,
    pub sw_desc: String,
    pub serial_num: String,
    pub dp_desc: String,
}

/// Per-table entry of a TABLE_FEATURES reply; properties are not interpreted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableFeatures {
    pub table_id: u8,
    pub name: String,
    pub metadata_match: u64,
    pub metadata_write: u64,
    pub config: u32,
    pub max_entries: u32,
    pub properties: Vec<u8>,
}

/// Per-port counters (PORT_STATS multipart reply).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortStats {
    pub port_no: u32,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_frame_err: u64,
    pub rx_over_err: u64,
    pub rx_crc_err: u64,
    pub collisions: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
}

/// Multipart request body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MultipartRequestBody {
    Empty,
    PortStats { port: PortNumber },
    Raw(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartRequest {
    pub mp_type: MultipartType,
    pub body: MultipartRequestBody,
}

/// Multipart reply body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MultipartReplyBody {
    Desc(DeviceDescription),
    PortDesc(Vec<PortDesc>),
    TableFeatures(Vec<TableFeatures>),
    PortStats(Vec<PortStats>),
    Raw(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartReply {
    pub mp_type: MultipartType,
    /// More fragments follow under the same xid
    pub more: bool,
    pub body: MultipartReplyBody,
}

/// PORT_STATUS reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortReason {
    Add,
    Delete,
    Modify,
}

impl PortReason {
    pub fn code(self) -> u8 {
        match self {
            PortReason::Add => 0,
            PortReason::Delete => 1,
            PortReason::Modify => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PortReason::Add),
            1 => Some(PortReason::Delete),
            2 => Some(PortReason::Modify),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMod {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    pub config: u32,
    pub mask: u32,
    pub advertise: u32,
}

/// PACKET_IN: only the fields the core accounts for are broken out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    /// Remainder of the body after `total_len`
    pub payload: Vec<u8>,
}

/// Message payload, one variant per interpreted message type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    Hello(Hello),
    Error(ErrorBody),
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(Features),
    MultipartRequest(MultipartRequest),
    MultipartReply(MultipartReply),
    PortStatus(PortStatus),
    PortMod(PortMod),
    BarrierRequest,
    BarrierReply,
    PacketIn(PacketIn),
    PacketOut(Vec<u8>),
    Opaque {
        msg_type: MessageType,
        payload: Vec<u8>,
    },
}

impl MessageBody {
    pub fn msg_type(&self) -> MessageType {
        match self {
            MessageBody::Hello(_) => MessageType::Hello,
            MessageBody::Error(_) => MessageType::Error,
            MessageBody::EchoRequest(_) => MessageType::EchoRequest,
            MessageBody::EchoReply(_) => MessageType::EchoReply,
            MessageBody::FeaturesRequest => MessageType::FeaturesRequest,
            MessageBody::FeaturesReply(_) => MessageType::FeaturesReply,
            MessageBody::MultipartRequest(_) => MessageType::MultipartRequest,
            MessageBody::MultipartReply(_) => MessageType::MultipartReply,
            MessageBody::PortStatus(_) => MessageType::PortStatus,
            MessageBody::PortMod(_) => MessageType::PortMod,
            MessageBody::BarrierRequest => MessageType::BarrierRequest,
            MessageBody::BarrierReply => MessageType::BarrierReply,
            MessageBody::PacketIn(_) => MessageType::PacketIn,
            MessageBody::PacketOut(_) => MessageType::PacketOut,
            MessageBody::Opaque { msg_type, .. } => *msg_type,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Immutable OpenFlow message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    version: ProtocolVersion,
    xid: u32,
    body: MessageBody,
}

impl Message {
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn msg_type(&self) -> MessageType {
        self.body.msg_type()
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn into_body(self) -> MessageBody {
        self.body
    }

    /// Multipart sub-type, for multipart requests and replies.
    pub fn multipart_type(&self) -> Option<MultipartType> {
        match &self.body {
            MessageBody::MultipartRequest(r) => Some(r.mp_type),
            MessageBody::MultipartReply(r) => Some(r.mp_type),
            _ => None,
        }
    }

    /// True when more fragments of this multipart reply follow.
    pub fn has_more(&self) -> bool {
        matches!(&self.body, MessageBody::MultipartReply(r) if r.more)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ofm:[V_{},{},xid={}]", self.version, self.msg_type(), self.xid)?;
        if let Some(mp) = self.multipart_type() {
            write!(f, ",{}", mp)?;
        }
        write!(f, "}}")
    }
}

/// Mutable form of a message; call [`MessageBuilder::build`] to freeze it.
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    version: ProtocolVersion,
    xid: u32,
    body: MessageBody,
}

impl MessageBuilder {
    /// New message with a freshly allocated xid.
    pub fn new(version: ProtocolVersion, body: MessageBody) -> Self {
        Self {
            version,
            xid: next_xid(),
            body,
        }
    }

    /// New message answering `request`: same version, same xid.
    pub fn reply_to(request: &Message, body: MessageBody) -> Self {
        Self {
            version: request.version,
            xid: request.xid,
            body,
        }
    }

    pub fn xid(mut self, xid: u32) -> Self {
        self.xid = xid;
        self
    }

    pub fn clear_xid(self) -> Self {
        self.xid(0)
    }

    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn body_mut(&mut self) -> &mut MessageBody {
        &mut self.body
    }

    pub fn build(self) -> Message {
        Message {
            version: self.version,
            xid: self.xid,
            body: self.body,
        }
    }
}

/// Shorthand: multipart request of `mp_type` with an empty body.
pub fn multipart_request(version: ProtocolVersion, mp_type: MultipartType) -> Message {
    MessageBuilder::new(
        version,
        MessageBody::MultipartRequest(MultipartRequest {
            mp_type,
            body: MultipartRequestBody::Empty,
        }),
    )
    .build()
}

// ============================================================================
// Tests
// ============================================================================
