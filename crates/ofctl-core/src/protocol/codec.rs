// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message codec collaborator.
//!
//! The session core only needs a symmetric `encode`/`decode` pair; the
//! [`MessageCodec`] trait is that seam. [`WireCodec`] implements it for the
//! header and the bodies the core interprets, and carries everything else
//! as opaque bytes.
//!
//! # Wire Format
//!
//! ```text
//! +---------+--------+--------------+-----------------+
//! | version | type   | length (BE)  | xid (BE)        |  8-byte header
//! |   u8    |  u8    |     u16      |      u32        |
//! +---------+--------+--------------+-----------------+
//! | body (length - 8 bytes)                            |
//! +----------------------------------------------------+
//! ```

use std::fmt;

use super::message::*;
use super::version::ProtocolVersion;

/// OpenFlow header size.
pub const HEADER_LEN: usize = 8;

const HELLO_ELEM_VERSION_BITMAP: u16 = 1;
const MP_FLAG_MORE: u16 = 1;
const DESC_STR_LEN: usize = 256;
const SERIAL_NUM_LEN: usize = 32;
const PORT_NAME_LEN: usize = 16;
const TABLE_NAME_LEN: usize = 32;
const PORT_LEN_10: usize = 48;
const PORT_LEN_11: usize = 64;
const TABLE_FEATURES_HEADER_LEN: usize = 64;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than the structure requires
    Truncated { needed: usize, available: usize },
    /// Header length disagrees with the frame
    BadLength { header: usize, actual: usize },
    /// Version cannot carry this message
    UnsupportedVersion(ProtocolVersion),
    /// Type code not defined for the version
    UnknownType { version: ProtocolVersion, code: u8 },
    /// Structurally invalid body
    Malformed(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "truncated: need {} bytes, have {}", needed, available)
            }
            Self::BadLength { header, actual } => {
                write!(f, "header length {} but frame is {} bytes", header, actual)
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {}", v),
            Self::UnknownType { version, code } => {
                write!(f, "unknown type code {} for version {}", code, version)
            }
            Self::Malformed(what) => write!(f, "malformed body: {}", what),
        }
    }
}

impl std::error::Error for CodecError {}

/// Symmetric message codec.
pub trait MessageCodec: Send + Sync {
    /// Encode a message into one complete frame (header included).
    fn encode(&self, msg: &Message) -> Result<Vec<u8>, CodecError>;

    /// Decode one complete frame.
    fn decode(&self, frame: &[u8]) -> Result<Message, CodecError>;
}

/// Codec for the message subset the session core interprets.
#[derive(Debug, Default, Clone, Copy)]
pub struct WireCodec;

impl WireCodec {
    pub fn new() -> Self {
        WireCodec
    }
}

impl MessageCodec for WireCodec {
    fn encode(&self, msg: &Message) -> Result<Vec<u8>, CodecError> {
        let version = msg.version();
        let msg_type = msg.msg_type();
        let code = match msg_type {
            // version-independent layouts
            MessageType::Hello => 0,
            MessageType::Error => 1,
            _ => {
                if !version.is_known() {
                    return Err(CodecError::UnsupportedVersion(version));
                }
                msg_type
                    .code(version)
                    .ok_or(CodecError::UnsupportedVersion(version))?
            }
        };

        let mut buf = Vec::with_capacity(64);
        buf.push(version.wire());
        buf.push(code);
        put_u16(&mut buf, 0); // patched below
        put_u32(&mut buf, msg.xid());
        encode_body(&mut buf, version, msg.body());

        let len = u16::try_from(buf.len()).map_err(|_| CodecError::Malformed("message exceeds 65535 bytes"))?;
        buf[2..4].copy_from_slice(&len.to_be_bytes());
        Ok(buf)
    }

    fn decode(&self, frame: &[u8]) -> Result<Message, CodecError> {
        if frame.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: HEADER_LEN,
                available: frame.len(),
            });
        }
        let version = ProtocolVersion::from_wire(frame[0]);
        let code = frame[1];
        let length = u16::from_be_bytes([frame[2], frame[3]]) as usize;
        if length != frame.len() {
            return Err(CodecError::BadLength {
                header: length,
                actual: frame.len(),
            });
        }
        let xid = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let mut rd = Reader::new(&frame[HEADER_LEN..]);

        let body = match code {
            0 => MessageBody::Hello(decode_hello(&mut rd)?),
            1 => MessageBody::Error(ErrorBody {
                err_type: rd.u16()?,
                code: rd.u16()?,
                data: rd.rest().to_vec(),
            }),
            _ => {
                if !version.is_known() {
                    return Err(CodecError::UnsupportedVersion(version));
                }
                let msg_type = MessageType::from_code(code, version)
                    .ok_or(CodecError::UnknownType { version, code })?;
                decode_body(&mut rd, version, msg_type)?
            }
        };

        Ok(MessageBuilder::new(version, body).xid(xid).build())
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn encode_body(buf: &mut Vec<u8>, v: ProtocolVersion, body: &MessageBody) {
    match body {
        MessageBody::Hello(h) => encode_hello(buf, h),
        MessageBody::Error(e) => {
            put_u16(buf, e.err_type);
            put_u16(buf, e.code);
            buf.extend_from_slice(&e.data);
        }
        MessageBody::EchoRequest(data) | MessageBody::EchoReply(data) => {
            buf.extend_from_slice(data)
        }
        MessageBody::FeaturesRequest | MessageBody::BarrierRequest | MessageBody::BarrierReply => {}
        MessageBody::FeaturesReply(f) => {
            put_u64(buf, f.dpid.raw());
            put_u32(buf, f.num_buffers);
            buf.push(f.num_tables);
            if v.ge(ProtocolVersion::V_1_3) {
                buf.push(f.aux_id);
                pad(buf, 2);
            } else {
                pad(buf, 3);
            }
            put_u32(buf, f.capabilities);
            put_u32(buf, 0);
            if !v.ge(ProtocolVersion::V_1_3) {
                for p in &f.ports {
                    encode_port(buf, v, p);
                }
            }
        }
        MessageBody::MultipartRequest(r) => {
            encode_mp_header(buf, v, r.mp_type, false);
            match &r.body {
                MultipartRequestBody::Empty => {}
                MultipartRequestBody::PortStats { port } => {
                    put_port_no(buf, v, port.0);
                    pad(buf, if v.ge(ProtocolVersion::V_1_1) { 4 } else { 6 });
                }
                MultipartRequestBody::Raw(raw) => buf.extend_from_slice(raw),
            }
        }
        MessageBody::MultipartReply(r) => {
            encode_mp_header(buf, v, r.mp_type, r.more);
            match &r.body {
                MultipartReplyBody::Desc(d) => {
                    put_str(buf, &d.mfr_desc, DESC_STR_LEN);
                    put_str(buf, &d.hw_desc, DESC_STR_LEN);
                    put_str(buf, &d.sw_desc, DESC_STR_LEN);
                    put_str(buf, &d.serial_num, SERIAL_NUM_LEN);
                    put_str(buf, &d.dp_desc, DESC_STR_LEN);
                }
                MultipartReplyBody::PortDesc(ports) => {
                    for p in ports {
                        encode_port(buf, v, p);
                    }
                }
                MultipartReplyBody::TableFeatures(tables) => {
                    for t in tables {
                        let len = TABLE_FEATURES_HEADER_LEN + t.properties.len();
                        put_u16(buf, len as u16);
                        buf.push(t.table_id);
                        pad(buf, 5);
                        put_str(buf, &t.name, TABLE_NAME_LEN);
                        put_u64(buf, t.metadata_match);
                        put_u64(buf, t.metadata_write);
                        put_u32(buf, t.config);
                        put_u32(buf, t.max_entries);
                        buf.extend_from_slice(&t.properties);
                    }
                }
                MultipartReplyBody::PortStats(stats) => {
                    for s in stats {
                        encode_port_stats(buf, v, s);
                    }
                }
                MultipartReplyBody::Raw(raw) => buf.extend_from_slice(raw),
            }
        }
        MessageBody::PortStatus(ps) => {
            buf.push(ps.reason.code());
            pad(buf, 7);
            encode_port(buf, v, &ps.desc);
        }
        MessageBody::PortMod(pm) => {
            put_port_no(buf, v, pm.port_no);
            if v.ge(ProtocolVersion::V_1_1) {
                pad(buf, 4);
                buf.extend_from_slice(&pm.hw_addr);
                pad(buf, 2);
            } else {
                buf.extend_from_slice(&pm.hw_addr);
            }
            put_u32(buf, pm.config);
            put_u32(buf, pm.mask);
            put_u32(buf, pm.advertise);
            pad(buf, 4);
        }
        MessageBody::PacketIn(pi) => {
            put_u32(buf, pi.buffer_id);
            put_u16(buf, pi.total_len);
            buf.extend_from_slice(&pi.payload);
        }
        MessageBody::PacketOut(raw) => buf.extend_from_slice(raw),
        MessageBody::Opaque { payload, .. } => buf.extend_from_slice(payload),
    }
}

fn encode_hello(buf: &mut Vec<u8>, hello: &Hello) {
    let Some(max) = hello.bitmap.iter().map(|v| v.wire()).max() else {
        return;
    };
    let words = max as usize / 32 + 1;
    let mut bitmaps = vec![0u32; words];
    for v in &hello.bitmap {
        let code = v.wire() as usize;
        bitmaps[code / 32] |= 1 << (code % 32);
    }
    let elem_len = 4 + 4 * words;
    put_u16(buf, HELLO_ELEM_VERSION_BITMAP);
    put_u16(buf, elem_len as u16);
    for word in bitmaps {
        put_u32(buf, word);
    }
    pad(buf, padding8(elem_len));
}

fn encode_mp_header(buf: &mut Vec<u8>, v: ProtocolVersion, mp: MultipartType, more: bool) {
    put_u16(buf, mp.code());
    put_u16(buf, if more { MP_FLAG_MORE } else { 0 });
    if v.ge(ProtocolVersion::V_1_1) {
        pad(buf, 4);
    }
}

fn encode_port(buf: &mut Vec<u8>, v: ProtocolVersion, p: &PortDesc) {
    put_port_no(buf, v, p.port_no);
    if v.ge(ProtocolVersion::V_1_1) {
        pad(buf, 4);
        buf.extend_from_slice(&p.hw_addr);
        pad(buf, 2);
    } else {
        buf.extend_from_slice(&p.hw_addr);
    }
    put_str(buf, &p.name, PORT_NAME_LEN);
    for field in [p.config, p.state, p.curr, p.advertised, p.supported, p.peer] {
        put_u32(buf, field);
    }
    if v.ge(ProtocolVersion::V_1_1) {
        put_u32(buf, p.curr_speed);
        put_u32(buf, p.max_speed);
    }
}

fn encode_port_stats(buf: &mut Vec<u8>, v: ProtocolVersion, s: &PortStats) {
    put_port_no(buf, v, s.port_no);
    pad(buf, if v.ge(ProtocolVersion::V_1_1) { 4 } else { 6 });
    for counter in [
        s.rx_packets,
        s.tx_packets,
        s.rx_bytes,
        s.tx_bytes,
        s.rx_dropped,
        s.tx_dropped,
        s.rx_errors,
        s.tx_errors,
        s.rx_frame_err,
        s.rx_over_err,
        s.rx_crc_err,
        s.collisions,
    ] {
        put_u64(buf, counter);
    }
    if v.ge(ProtocolVersion::V_1_3) {
        put_u32(buf, s.duration_sec);
        put_u32(buf, s.duration_nsec);
    }
}

fn put_port_no(buf: &mut Vec<u8>, v: ProtocolVersion, port: u32) {
    if v.ge(ProtocolVersion::V_1_1) {
        put_u32(buf, port);
    } else {
        put_u16(buf, port as u16);
    }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn pad(buf: &mut Vec<u8>, n: usize) {
    buf.resize(buf.len() + n, 0);
}

/// Fixed-width NUL padded string; always leaves room for the terminator.
fn put_str(buf: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width - 1);
    buf.extend_from_slice(&bytes[..n]);
    pad(buf, width - n);
}

fn padding8(len: usize) -> usize {
    (8 - len % 8) % 8
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_hello(rd: &mut Reader<'_>) -> Result<Hello, CodecError> {
    let mut hello = Hello::default();
    while rd.remaining() >= 4 {
        let etype = rd.u16()?;
        let elen = rd.u16()? as usize;
        if elen < 4 {
            return Err(CodecError::Malformed("hello element shorter than its header"));
        }
        let content = rd.bytes(elen - 4)?;
        if etype == HELLO_ELEM_VERSION_BITMAP {
            for (word_idx, word) in content.chunks_exact(4).enumerate() {
                let word = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
                for bit in 0..32 {
                    if word & (1 << bit) != 0 {
                        let code = word_idx * 32 + bit;
                        if let Ok(code) = u8::try_from(code) {
                            hello.bitmap.push(ProtocolVersion::from_wire(code));
                        }
                    }
                }
            }
        }
        rd.skip(padding8(elen).min(rd.remaining()))?;
    }
    Ok(hello)
}

fn decode_body(
    rd: &mut Reader<'_>,
    v: ProtocolVersion,
    msg_type: MessageType,
) -> Result<MessageBody, CodecError> {
    let body = match msg_type {
        MessageType::EchoRequest => MessageBody::EchoRequest(rd.rest().to_vec()),
        MessageType::EchoReply => MessageBody::EchoReply(rd.rest().to_vec()),
        MessageType::FeaturesRequest => MessageBody::FeaturesRequest,
        MessageType::BarrierRequest => MessageBody::BarrierRequest,
        MessageType::BarrierReply => MessageBody::BarrierReply,
        MessageType::FeaturesReply => MessageBody::FeaturesReply(decode_features(rd, v)?),
        MessageType::MultipartRequest => {
            let (mp_type, _) = decode_mp_header(rd, v)?;
            let body = if rd.remaining() == 0 {
                MultipartRequestBody::Empty
            } else if mp_type == MultipartType::PortStats {
                let port = get_port_no(rd, v)?;
                MultipartRequestBody::PortStats {
                    port: PortNumber(port),
                }
            } else {
                MultipartRequestBody::Raw(rd.rest().to_vec())
            };
            MessageBody::MultipartRequest(MultipartRequest { mp_type, body })
        }
        MessageType::MultipartReply => {
            let (mp_type, more) = decode_mp_header(rd, v)?;
            let body = decode_mp_reply(rd, v, mp_type)?;
            MessageBody::MultipartReply(MultipartReply {
                mp_type,
                more,
                body,
            })
        }
        MessageType::PortStatus => {
            let reason = PortReason::from_code(rd.u8()?)
                .ok_or(CodecError::Malformed("unknown port status reason"))?;
            rd.skip(7)?;
            MessageBody::PortStatus(PortStatus {
                reason,
                desc: decode_port(rd, v)?,
            })
        }
        MessageType::PortMod => {
            let port_no = get_port_no(rd, v)?;
            if v.ge(ProtocolVersion::V_1_1) {
                rd.skip(4)?;
            }
            let hw_addr = rd.mac()?;
            if v.ge(ProtocolVersion::V_1_1) {
                rd.skip(2)?;
            }
            MessageBody::PortMod(PortMod {
                port_no,
                hw_addr,
                config: rd.u32()?,
                mask: rd.u32()?,
                advertise: rd.u32()?,
            })
        }
        MessageType::PacketIn => MessageBody::PacketIn(PacketIn {
            buffer_id: rd.u32()?,
            total_len: rd.u16()?,
            payload: rd.rest().to_vec(),
        }),
        MessageType::PacketOut => MessageBody::PacketOut(rd.rest().to_vec()),
        other => MessageBody::Opaque {
            msg_type: other,
            payload: rd.rest().to_vec(),
        },
    };
    Ok(body)
}

fn decode_features(rd: &mut Reader<'_>, v: ProtocolVersion) -> Result<Features, CodecError> {
    let dpid = DataPathId::from(rd.u64()?);
    let num_buffers = rd.u32()?;
    let num_tables = rd.u8()?;
    let aux_id = if v.ge(ProtocolVersion::V_1_3) {
        let aux = rd.u8()?;
        rd.skip(2)?;
        aux
    } else {
        rd.skip(3)?;
        0
    };
    let capabilities = rd.u32()?;
    rd.skip(4)?; // actions (1.0) or reserved

    let mut ports = Vec::new();
    if !v.ge(ProtocolVersion::V_1_3) {
        while rd.remaining() > 0 {
            ports.push(decode_port(rd, v)?);
        }
    }
    Ok(Features {
        dpid,
        num_buffers,
        num_tables,
        aux_id,
        capabilities,
        ports,
    })
}

fn decode_mp_header(
    rd: &mut Reader<'_>,
    v: ProtocolVersion,
) -> Result<(MultipartType, bool), CodecError> {
    let code = rd.u16()?;
    let flags = rd.u16()?;
    if v.ge(ProtocolVersion::V_1_1) {
        rd.skip(4)?;
    }
    let mp_type =
        MultipartType::from_code(code).ok_or(CodecError::Malformed("unknown multipart type"))?;
    Ok((mp_type, flags & MP_FLAG_MORE != 0))
}

fn decode_mp_reply(
    rd: &mut Reader<'_>,
    v: ProtocolVersion,
    mp_type: MultipartType,
) -> Result<MultipartReplyBody, CodecError> {
    let body = match mp_type {
        MultipartType::Desc => MultipartReplyBody::Desc(DeviceDescription {
            mfr_desc: rd.string(DESC_STR_LEN)?,
            hw_desc: rd.string(DESC_STR_LEN)?,
            sw_desc: rd.string(DESC_STR_LEN)?,
            serial_num: rd.string(SERIAL_NUM_LEN)?,
            dp_desc: rd.string(DESC_STR_LEN)?,
        }),
        MultipartType::PortDesc => {
            let mut ports = Vec::new();
            while rd.remaining() > 0 {
                ports.push(decode_port(rd, v)?);
            }
            MultipartReplyBody::PortDesc(ports)
        }
        MultipartType::TableFeatures => {
            let mut tables = Vec::new();
            while rd.remaining() > 0 {
                let len = rd.u16()? as usize;
                if len < TABLE_FEATURES_HEADER_LEN {
                    return Err(CodecError::Malformed("table features entry too short"));
                }
                let table_id = rd.u8()?;
                rd.skip(5)?;
                tables.push(TableFeatures {
                    table_id,
                    name: rd.string(TABLE_NAME_LEN)?,
                    metadata_match: rd.u64()?,
                    metadata_write: rd.u64()?,
                    config: rd.u32()?,
                    max_entries: rd.u32()?,
                    properties: rd.bytes(len - TABLE_FEATURES_HEADER_LEN)?.to_vec(),
                });
            }
            MultipartReplyBody::TableFeatures(tables)
        }
        MultipartType::PortStats => {
            let mut stats = Vec::new();
            while rd.remaining() > 0 {
                stats.push(decode_port_stats(rd, v)?);
            }
            MultipartReplyBody::PortStats(stats)
        }
        _ => MultipartReplyBody::Raw(rd.rest().to_vec()),
    };
    Ok(body)
}

fn decode_port(rd: &mut Reader<'_>, v: ProtocolVersion) -> Result<PortDesc, CodecError> {
    let needed = if v.ge(ProtocolVersion::V_1_1) {
        PORT_LEN_11
    } else {
        PORT_LEN_10
    };
    rd.require(needed)?;

    let port_no = get_port_no(rd, v)?;
    let hw_addr = if v.ge(ProtocolVersion::V_1_1) {
        rd.skip(4)?;
        let mac = rd.mac()?;
        rd.skip(2)?;
        mac
    } else {
        rd.mac()?
    };
    let mut p = PortDesc {
        port_no,
        hw_addr,
        name: rd.string(PORT_NAME_LEN)?,
        config: rd.u32()?,
        state: rd.u32()?,
        curr: rd.u32()?,
        advertised: rd.u32()?,
        supported: rd.u32()?,
        peer: rd.u32()?,
        ..PortDesc::default()
    };
    if v.ge(ProtocolVersion::V_1_1) {
        p.curr_speed = rd.u32()?;
        p.max_speed = rd.u32()?;
    }
    Ok(p)
}

fn decode_port_stats(rd: &mut Reader<'_>, v: ProtocolVersion) -> Result<PortStats, CodecError> {
    let port_no = get_port_no(rd, v)?;
    rd.skip(if v.ge(ProtocolVersion::V_1_1) { 4 } else { 6 })?;
    let mut s = PortStats {
        port_no,
        rx_packets: rd.u64()?,
        tx_packets: rd.u64()?,
        rx_bytes: rd.u64()?,
        tx_bytes: rd.u64()?,
        rx_dropped: rd.u64()?,
        tx_dropped: rd.u64()?,
        rx_errors: rd.u64()?,
        tx_errors: rd.u64()?,
        rx_frame_err: rd.u64()?,
        rx_over_err: rd.u64()?,
        rx_crc_err: rd.u64()?,
        collisions: rd.u64()?,
        ..PortStats::default()
    };
    if v.ge(ProtocolVersion::V_1_3) {
        s.duration_sec = rd.u32()?;
        s.duration_nsec = rd.u32()?;
    }
    Ok(s)
}

/// 1.0 port numbers are 16 bits; reserved values map onto the 32-bit range.
fn get_port_no(rd: &mut Reader<'_>, v: ProtocolVersion) -> Result<u32, CodecError> {
    if v.ge(ProtocolVersion::V_1_1) {
        rd.u32()
    } else {
        let p = rd.u16()? as u32;
        Ok(if p >= 0xff00 { p | 0xffff_0000 } else { p })
    }
}

/// Bounds-checked big-endian cursor.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn require(&self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            Err(CodecError::Truncated {
                needed: n,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.require(n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.bytes(n).map(|_| ())
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn mac(&mut self) -> Result<[u8; 6], CodecError> {
        let b = self.bytes(6)?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(b);
        Ok(mac)
    }

    fn string(&mut self, width: usize) -> Result<String, CodecError> {
        let raw = self.bytes(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn build(version: ProtocolVersion, xid: u32, body: MessageBody) -> Message {
        MessageBuilder::new(version, body).xid(xid).build()
    }

    #[test]
    fn test_hello_bitmap_wire_layout() {
        let msg = build(
            ProtocolVersion::V_1_3,
            7,
            MessageBody::Hello(Hello {
                bitmap: vec![ProtocolVersion::V_1_0, ProtocolVersion::V_1_3],
            }),
        );
        let frame = WireCodec.encode(&msg).unwrap();
        assert_eq!(
            frame,
            vec![
                0x04, 0x00, 0x00, 0x10, 0, 0, 0, 7, // header
                0x00, 0x01, 0x00, 0x08, // element type/len
                0x00, 0x00, 0x00, 0x12, // bits 1 and 4
            ]
        );
        let back = WireCodec.decode(&frame).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_plain_hello_has_no_body() {
        let msg = build(ProtocolVersion::V_1_0, 1, MessageBody::Hello(Hello::default()));
        let frame = WireCodec.encode(&msg).unwrap();
        assert_eq!(frame.len(), HEADER_LEN);
    }

    #[test]
    fn test_hello_from_draft_version_decodes() {
        let frame = [0x98, 0x00, 0x00, 0x08, 0, 0, 0, 3];
        let msg = WireCodec.decode(&frame).unwrap();
        assert_eq!(msg.version(), ProtocolVersion::from_wire(0x98));
        assert_eq!(msg.msg_type(), MessageType::Hello);
    }

    #[test]
    fn test_error_in_draft_version_encodes() {
        let msg = build(
            ProtocolVersion::from_wire(0x98),
            3,
            MessageBody::Error(ErrorBody::new(
                ErrorBody::HELLO_FAILED,
                ErrorBody::HELLO_FAILED_INCOMPATIBLE,
                b"incompatible".to_vec(),
            )),
        );
        let frame = WireCodec.encode(&msg).unwrap();
        assert_eq!(frame[0], 0x98);
        assert_eq!(frame[1], 1);
    }

    #[test]
    fn test_non_hello_draft_version_rejected() {
        let frame = [0x98, 0x05, 0x00, 0x08, 0, 0, 0, 3];
        assert!(matches!(
            WireCodec.decode(&frame),
            Err(CodecError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_bad_length_rejected() {
        let frame = [0x04, 0x02, 0x00, 0x10, 0, 0, 0, 3];
        assert_eq!(
            WireCodec.decode(&frame),
            Err(CodecError::BadLength {
                header: 16,
                actual: 8
            })
        );
    }

    #[test]
    fn test_features_reply_1_0_with_ports() {
        let port = PortDesc {
            port_no: 0xfffe, // LOCAL in 1.0 numbering
            hw_addr: [1, 2, 3, 4, 5, 6],
            name: "br0".into(),
            ..PortDesc::default()
        };
        let msg = build(
            ProtocolVersion::V_1_0,
            9,
            MessageBody::FeaturesReply(Features {
                dpid: DataPathId::from(0xabcd),
                num_buffers: 256,
                num_tables: 2,
                aux_id: 0,
                capabilities: 0xc7,
                ports: vec![port],
            }),
        );
        let frame = WireCodec.encode(&msg).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + 24 + PORT_LEN_10);

        let back = WireCodec.decode(&frame).unwrap();
        match back.body() {
            MessageBody::FeaturesReply(f) => {
                assert_eq!(f.dpid, DataPathId::from(0xabcd));
                assert_eq!(f.ports.len(), 1);
                assert_eq!(f.ports[0].port_no, 0xffff_fffe);
                assert_eq!(f.ports[0].name, "br0");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_features_reply_1_3_aux_id() {
        let msg = build(
            ProtocolVersion::V_1_3,
            9,
            MessageBody::FeaturesReply(Features {
                dpid: DataPathId::from(42),
                aux_id: 2,
                ..Features::default()
            }),
        );
        let back = WireCodec.decode(&WireCodec.encode(&msg).unwrap()).unwrap();
        match back.body() {
            MessageBody::FeaturesReply(f) => assert_eq!(f.aux_id, 2),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_multipart_more_flag_and_desc_strings() {
        let msg = build(
            ProtocolVersion::V_1_3,
            11,
            MessageBody::MultipartReply(MultipartReply {
                mp_type: MultipartType::Desc,
                more: true,
                body: MultipartReplyBody::Desc(DeviceDescription {
                    mfr_desc: "Acme".into(),
                    hw_desc: "Switch 9000".into(),
                    sw_desc: "1.2.3".into(),
                    serial_num: "SN1".into(),
                    dp_desc: "lab".into(),
                }),
            }),
        );
        let frame = WireCodec.encode(&msg).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + 8 + 1056);
        let back = WireCodec.decode(&frame).unwrap();
        assert!(back.has_more());
        assert_eq!(back, msg);
    }

    #[test]
    fn test_port_stats_request_1_0_layout() {
        let msg = build(
            ProtocolVersion::V_1_0,
            5,
            MessageBody::MultipartRequest(MultipartRequest {
                mp_type: MultipartType::PortStats,
                body: MultipartRequestBody::PortStats { port: PortNumber(3) },
            }),
        );
        let frame = WireCodec.encode(&msg).unwrap();
        assert_eq!(frame[1], 16); // STATS_REQUEST in 1.0
        assert_eq!(frame.len(), HEADER_LEN + 4 + 8);
    }

    #[test]
    fn test_table_features_entries() {
        let tables = vec![
            TableFeatures {
                table_id: 0,
                name: "acl".into(),
                max_entries: 1000,
                properties: vec![0, 1, 0, 4],
                ..TableFeatures::default()
            },
            TableFeatures {
                table_id: 1,
                name: "l2".into(),
                ..TableFeatures::default()
            },
        ];
        let msg = build(
            ProtocolVersion::V_1_3,
            13,
            MessageBody::MultipartReply(MultipartReply {
                mp_type: MultipartType::TableFeatures,
                more: false,
                body: MultipartReplyBody::TableFeatures(tables.clone()),
            }),
        );
        let back = WireCodec.decode(&WireCodec.encode(&msg).unwrap()).unwrap();
        match back.body() {
            MessageBody::MultipartReply(r) => {
                assert_eq!(r.body, MultipartReplyBody::TableFeatures(tables))
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_opaque_flow_mod_passthrough() {
        let msg = build(
            ProtocolVersion::V_1_3,
            21,
            MessageBody::Opaque {
                msg_type: MessageType::FlowMod,
                payload: vec![0xaa; 40],
            },
        );
        let frame = WireCodec.encode(&msg).unwrap();
        assert_eq!(frame[1], 14);
        assert_eq!(WireCodec.decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_truncated_port_status() {
        let frame = [0x04, 12, 0x00, 0x0c, 0, 0, 0, 1, 0, 0, 0, 0];
        assert!(matches!(
            WireCodec.decode(&frame),
            Err(CodecError::Truncated { .. })
        ));
    }
}
