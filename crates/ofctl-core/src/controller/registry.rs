// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datapath registry.
//!
//! A [`Datapath`] exists from the moment its main connection completes the
//! basic handshake until that connection closes. Auxiliary connections
//! attach to an existing entry; they can never create one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{OfError, OfResult};
use crate::protocol::{DataPathId, DeviceDescription, Features, PortDesc, PortReason, ProtocolVersion};
use crate::session::{ConnId, ConnectionHandle, MAIN_AUX_ID};

use super::info::{ConnectionDetails, DataPathInfo};

/// Mutable state cached for a datapath.
#[derive(Debug, Default)]
struct DatapathState {
    features: Features,
    description: Option<DeviceDescription>,
    ports: BTreeMap<u32, PortDesc>,
    no_table_features: bool,
    device_type: Option<String>,
}

/// A logical OpenFlow device: one main connection plus auxiliaries.
pub struct Datapath {
    dpid: DataPathId,
    main: Arc<ConnectionHandle>,
    aux: RwLock<BTreeMap<u8, Arc<ConnectionHandle>>>,
    state: RwLock<DatapathState>,
    valid: AtomicBool,
}

impl Datapath {
    fn new(main: Arc<ConnectionHandle>, features: Features) -> Self {
        let mut ports = BTreeMap::new();
        // 1.0 devices list their ports in FEATURES_REPLY
        for p in &features.ports {
            ports.insert(p.port_no, p.clone());
        }
        Self {
            dpid: main.dpid(),
            main,
            aux: RwLock::new(BTreeMap::new()),
            state: RwLock::new(DatapathState {
                features,
                ports,
                ..Default::default()
            }),
            valid: AtomicBool::new(true),
        }
    }

    pub fn dpid(&self) -> DataPathId {
        self.dpid
    }

    pub fn version(&self) -> ProtocolVersion {
        self.main.version()
    }

    pub fn main(&self) -> &Arc<ConnectionHandle> {
        &self.main
    }

    /// False once the main connection has closed.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Invalidates and drains the auxiliaries under one write lock, so an
    /// attach racing with removal either lands in the drained set or fails.
    fn retire(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut aux = self.aux.write();
        self.valid.store(false, Ordering::Release);
        std::mem::take(&mut *aux).into_values().collect()
    }

    /// Checked under the aux write lock; a retired datapath refuses.
    fn attach(&self, handle: Arc<ConnectionHandle>) -> OfResult<()> {
        let dpid = self.dpid();
        let aux_id = handle.aux_id();
        let mut aux = self.aux.write();
        if !self.is_valid() {
            return Err(OfError::NoMainConnection { dpid, aux_id });
        }
        if aux.contains_key(&aux_id) {
            return Err(OfError::Protocol(format!(
                "auxiliary channel {} already attached to {}",
                aux_id, dpid
            )));
        }
        aux.insert(aux_id, handle);
        Ok(())
    }

    /// Connection for `aux_id`; unknown auxiliaries fall back to main.
    pub fn select(&self, aux_id: u8) -> Arc<ConnectionHandle> {
        if aux_id == MAIN_AUX_ID {
            return Arc::clone(&self.main);
        }
        self.aux
            .read()
            .get(&aux_id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.main))
    }

    /// Connection for `aux_id`, failing when no such channel exists.
    pub fn connection(&self, aux_id: u8) -> OfResult<Arc<ConnectionHandle>> {
        if aux_id == MAIN_AUX_ID {
            return Ok(Arc::clone(&self.main));
        }
        self.aux
            .read()
            .get(&aux_id)
            .cloned()
            .ok_or(OfError::NoSuchAuxiliary {
                dpid: self.dpid,
                aux_id,
            })
    }

    /// Auxiliary connections, ordered by aux id.
    pub fn auxiliaries(&self) -> Vec<Arc<ConnectionHandle>> {
        self.aux.read().values().cloned().collect()
    }

    pub(crate) fn set_extended(
        &self,
        description: Option<DeviceDescription>,
        ports: &[PortDesc],
        no_table_features: bool,
    ) {
        let mut state = self.state.write();
        state.description = description;
        if !ports.is_empty() {
            state.ports = ports.iter().map(|p| (p.port_no, p.clone())).collect();
        }
        state.no_table_features = no_table_features;
    }

    pub fn device_type(&self) -> Option<String> {
        self.state.read().device_type.clone()
    }

    pub(crate) fn set_device_type(&self, name: Option<String>) {
        self.state.write().device_type = name;
    }

    pub fn port(&self, port_no: u32) -> Option<PortDesc> {
        self.state.read().ports.get(&port_no).cloned()
    }

    pub fn ports(&self) -> Vec<PortDesc> {
        self.state.read().ports.values().cloned().collect()
    }

    /// Applies a PORT_STATUS change to the port cache.
    pub(crate) fn update_port(&self, reason: PortReason, desc: &PortDesc) {
        let mut state = self.state.write();
        match reason {
            PortReason::Add | PortReason::Modify => {
                state.ports.insert(desc.port_no, desc.clone());
            }
            PortReason::Delete => {
                state.ports.remove(&desc.port_no);
            }
        }
    }

    fn details(handle: &ConnectionHandle) -> ConnectionDetails {
        ConnectionDetails {
            aux_id: handle.aux_id(),
            remote_addr: handle.remote_addr(),
            version: handle.version(),
            ready_at_ms: handle.ready_at_ms(),
            last_message_ms: handle.last_message_ms(),
        }
    }

    /// Immutable snapshot of the datapath.
    pub fn info(&self) -> DataPathInfo {
        let mut connections = vec![Self::details(&self.main)];
        connections.extend(self.aux.read().values().map(|h| Self::details(h)));
        let last_message_ms = connections
            .iter()
            .map(|c| c.last_message_ms)
            .max()
            .unwrap_or(0);

        let state = self.state.read();
        DataPathInfo {
            dpid: self.dpid,
            remote_addr: self.main.remote_addr(),
            version: self.main.version(),
            num_buffers: state.features.num_buffers,
            num_tables: state.features.num_tables,
            capabilities: state.features.capabilities,
            description: state.description.clone().unwrap_or_default(),
            ready_at_ms: self.main.ready_at_ms(),
            last_message_ms,
            device_type: state.device_type.clone(),
            ports: state.ports.values().cloned().collect(),
            no_table_features: state.no_table_features,
            connections,
        }
    }
}

impl fmt::Debug for Datapath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datapath")
            .field("dpid", &self.dpid)
            .field("main", &self.main.id())
            .field("aux", &self.aux.read().keys().collect::<Vec<_>>())
            .field("valid", &self.is_valid())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Concurrent map of connected datapaths.
#[derive(Debug, Default)]
pub struct DatapathRegistry {
    datapaths: DashMap<DataPathId, Arc<Datapath>>,
}

impl DatapathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the datapath for a main connection. An existing entry for
    /// the same id is left untouched and the newcomer is refused.
    pub fn register_main(
        &self,
        handle: Arc<ConnectionHandle>,
        features: Features,
    ) -> OfResult<Arc<Datapath>> {
        let dpid = handle.dpid();
        match self.datapaths.entry(dpid) {
            Entry::Occupied(_) => Err(OfError::DuplicateDatapath(dpid)),
            Entry::Vacant(slot) => {
                let dp = Arc::new(Datapath::new(handle, features));
                slot.insert(Arc::clone(&dp));
                Ok(dp)
            }
        }
    }

    /// Attaches an auxiliary connection to its datapath.
    pub fn attach_aux(&self, handle: Arc<ConnectionHandle>) -> OfResult<Arc<Datapath>> {
        let dpid = handle.dpid();
        let aux_id = handle.aux_id();
        let dp = self
            .get(dpid)
            .ok_or(OfError::NoMainConnection { dpid, aux_id })?;
        dp.attach(handle)?;
        Ok(dp)
    }

    /// Detaches an auxiliary connection if it is still the registered one.
    pub fn detach_aux(&self, dpid: DataPathId, aux_id: u8, conn_id: ConnId) -> bool {
        let Some(dp) = self.get(dpid) else {
            return false;
        };
        let mut aux = dp.aux.write();
        match aux.get(&aux_id) {
            Some(h) if h.id() == conn_id => {
                aux.remove(&aux_id);
                true
            }
            _ => false,
        }
    }

    /// Datapath by id; `None` when not connected.
    pub fn get(&self, dpid: DataPathId) -> Option<Arc<Datapath>> {
        self.datapaths.get(&dpid).map(|e| Arc::clone(e.value()))
    }

    /// Removes the datapath if `conn_id` is its main connection, and
    /// invalidates it. Returns the auxiliaries it still held.
    pub fn remove(
        &self,
        dpid: DataPathId,
        conn_id: ConnId,
    ) -> Option<(Arc<Datapath>, Vec<Arc<ConnectionHandle>>)> {
        let (_, dp) = self
            .datapaths
            .remove_if(&dpid, |_, dp| dp.main.id() == conn_id)?;
        let aux = dp.retire();
        Some((dp, aux))
    }

    pub fn all(&self) -> Vec<Arc<Datapath>> {
        self.datapaths.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.datapaths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapaths.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
