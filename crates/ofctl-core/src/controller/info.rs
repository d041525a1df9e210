// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-only datapath snapshots.
//!
//! Snapshots are copies taken at read time; they never change after they
//! are handed out, even if the datapath disconnects a moment later.

use std::fmt;
use std::net::SocketAddr;

use crate::protocol::{DataPathId, DeviceDescription, PortDesc, ProtocolVersion};

/// One connection of a datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDetails {
    pub aux_id: u8,
    pub remote_addr: SocketAddr,
    pub version: ProtocolVersion,
    /// Basic handshake completion, ms since epoch
    pub ready_at_ms: u64,
    /// Last inbound message, ms since epoch
    pub last_message_ms: u64,
}

/// Snapshot of a connected datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPathInfo {
    pub dpid: DataPathId,
    /// Address of the main connection
    pub remote_addr: SocketAddr,
    pub version: ProtocolVersion,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub capabilities: u32,
    /// Empty strings when the device sent no description
    pub description: DeviceDescription,
    pub ready_at_ms: u64,
    /// Most recent message across all of the datapath's connections
    pub last_message_ms: u64,
    /// Assigned by post-handshake classification, if any
    pub device_type: Option<String>,
    pub ports: Vec<PortDesc>,
    /// Device answered TABLE_FEATURES with an error or an empty reply
    pub no_table_features: bool,
    /// Main connection first, then auxiliaries by id
    pub connections: Vec<ConnectionDetails>,
}

impl DataPathInfo {
    pub fn port(&self, port_no: u32) -> Option<&PortDesc> {
        self.ports.iter().find(|p| p.port_no == port_no)
    }

    pub fn aux_ids(&self) -> Vec<u8> {
        self.connections.iter().map(|c| c.aux_id).collect()
    }
}

impl fmt::Display for DataPathInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{DpInfo:{},{},V_{},#ports={}",
            self.dpid,
            self.remote_addr,
            self.version,
            self.ports.len()
        )?;
        if let Some(t) = &self.device_type {
            write!(f, ",type={}", t)?;
        }
        write!(f, "}}")
    }
}
