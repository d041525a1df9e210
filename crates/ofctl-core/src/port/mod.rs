// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Port state tracking and the synchronous port API.
//!
//! [`PortStateTracker`] keeps the per-datapath port cache in step with
//! PORT_STATUS messages and offers blocking calls on top of message
//! futures: port statistics and administrative enable/disable.

use std::sync::Arc;

use crate::collab::RoleAdvisor;
use crate::controller::{ControllerCore, FutureResult, MessageFuture};
use crate::dispatch::{ListenerManager, ListenerSet, MessageEvent, MessageListener, QueueEvent};
use crate::error::{OfError, OfResult};
use crate::protocol::{
    next_xid, DataPathId, MessageBody, MessageBuilder, MessageType, MultipartReplyBody,
    MultipartRequest, MultipartRequestBody, MultipartType, PortDesc, PortMod, PortNumber,
    PortStats,
};

/// Applies PORT_STATUS changes to the registry's port cache.
struct PortStatusListener {
    core: Arc<ControllerCore>,
}

impl MessageListener for PortStatusListener {
    fn event(&self, event: &MessageEvent) {
        let MessageEvent::Received { dpid, message, .. } = event else {
            return;
        };
        let MessageBody::PortStatus(status) = message.body() else {
            return;
        };
        match self.core.registry().get(*dpid) {
            Some(dp) => {
                log::debug!(
                    "[port] {} port {} {:?}",
                    dpid,
                    status.desc.port_no,
                    status.reason
                );
                dp.update_port(status.reason, &status.desc);
            }
            None => log::debug!("[port] PORT_STATUS for departed datapath {}", dpid),
        }
    }

    fn queue_event(&self, event: QueueEvent) {
        if event == QueueEvent::Full {
            log::warn!("[port] PORT_STATUS events dropped, port cache may be stale");
        }
    }
}

/// Port cache maintenance plus blocking port operations.
pub struct PortStateTracker {
    core: Arc<ControllerCore>,
    roles: Arc<dyn RoleAdvisor>,
    listeners: ListenerSet,
}

impl PortStateTracker {
    /// Creates the tracker and subscribes it to PORT_STATUS.
    pub fn new(
        core: Arc<ControllerCore>,
        roles: Arc<dyn RoleAdvisor>,
        manager: Arc<ListenerManager>,
    ) -> OfResult<Self> {
        let listeners = ListenerSet::new(manager);
        listeners.add_message_listener(
            Arc::new(PortStatusListener {
                core: Arc::clone(&core),
            }),
            &[MessageType::PortStatus],
        )?;
        Ok(Self {
            core,
            roles,
            listeners,
        })
    }

    /// Port statistics for one port, or all ports when `port` is `None`.
    ///
    /// Blocks for at most the configured `blocking_wait`.
    pub fn get_port_stats(
        &self,
        dpid: DataPathId,
        port: Option<PortNumber>,
    ) -> OfResult<Vec<PortStats>> {
        let version = self.core.version_of(dpid)?;
        let request = MessageBuilder::new(
            version,
            MessageBody::MultipartRequest(MultipartRequest {
                mp_type: MultipartType::PortStats,
                body: MultipartRequestBody::PortStats {
                    port: port.unwrap_or(PortNumber::ANY),
                },
            }),
        )
        .build();

        let future = MessageFuture::new(dpid, request.clone());
        self.core.send_future(&future, &[request])?;

        let wait = self.core.config().blocking_wait;
        if future.await_for(wait) == FutureResult::Unsatisfied {
            let cause = format!("no PORT_STATS reply from {} within {:?}", dpid, wait);
            self.core.futures().time_out(&future, cause.clone());
            return Err(OfError::Timeout(cause));
        }

        let mut stats = Vec::new();
        for reply in future.into_result()? {
            if let MessageBody::MultipartReply(mp) = reply.into_body() {
                if let MultipartReplyBody::PortStats(s) = mp.body {
                    stats.extend(s);
                }
            }
        }
        if let Some(p) = port {
            if stats.is_empty() {
                return Err(OfError::NotFound(format!("port {} on {}", p, dpid)));
            }
        }
        Ok(stats)
    }

    /// Administratively enables or disables a port.
    ///
    /// Sends PORT_MOD followed by a BARRIER_REQUEST with the same xid; the
    /// returned future resolves on the barrier reply, or with the ERROR
    /// the datapath raised for the PORT_MOD.
    pub fn enable_port(
        &self,
        dpid: DataPathId,
        port: PortNumber,
        enable: bool,
    ) -> OfResult<MessageFuture> {
        let dp = self
            .core
            .registry()
            .get(dpid)
            .ok_or(OfError::NoSuchDatapath(dpid))?;
        let desc = dp
            .port(port.0)
            .ok_or_else(|| OfError::NotFound(format!("port {} on {}", port, dpid)))?;
        if !self.roles.is_master(dpid) {
            return Err(OfError::NotMaster(dpid));
        }

        let version = dp.version();
        let xid = next_xid();
        let port_mod = MessageBuilder::new(
            version,
            MessageBody::PortMod(PortMod {
                port_no: desc.port_no,
                hw_addr: desc.hw_addr,
                config: if enable { 0 } else { PortDesc::CONFIG_PORT_DOWN },
                mask: PortDesc::CONFIG_PORT_DOWN,
                advertise: 0,
            }),
        )
        .xid(xid)
        .build();
        let barrier = MessageBuilder::new(version, MessageBody::BarrierRequest)
            .xid(xid)
            .build();

        let future = MessageFuture::new(dpid, barrier.clone());
        self.core.send_future(&future, &[port_mod, barrier])?;
        log::debug!(
            "[port] {} port {} {}",
            dpid,
            port,
            if enable { "enable" } else { "disable" }
        );
        Ok(future)
    }

    /// Drops the PORT_STATUS subscription.
    pub fn shutdown(&self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
#[path = "port_tests.rs"]
mod tests;
