// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OpenFlow vocabulary consumed by the session core.
//!
//! - [`message`]: immutable message model and type codes
//! - [`version`]: protocol versions and HELLO negotiation
//! - [`codec`]: the encode/decode collaborator seam
//! - [`frame`]: stream framing

pub mod codec;
pub mod frame;
pub mod message;
pub mod version;

pub use codec::{CodecError, MessageCodec, WireCodec, HEADER_LEN};
pub use frame::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};
pub use message::{
    multipart_request, next_xid, DataPathId, DeviceDescription, ErrorBody, Features, Hello,
    Message, MessageBody, MessageBuilder, MessageType, MultipartReply, MultipartReplyBody,
    MultipartRequest, MultipartRequestBody, MultipartType, PacketIn, PortDesc, PortMod,
    PortNumber, PortReason, PortStats, PortStatus, TableFeatures,
};
pub use version::{advertised, negotiate, ProtocolVersion, VersionSet};
