// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared controller state: datapath registry, pending futures, counters.
//!
//! Every outbound message goes through [`ControllerCore::send`] (or one of
//! its variants), which validates it against the negotiated session before
//! handing the encoded frame to the owning worker.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ControllerConfig;
use crate::error::{OfError, OfResult, ValidationErrors};
use crate::protocol::{DataPathId, Message, ProtocolVersion};
use crate::session::ConnId;

use super::futures::{FutureRegistry, MessageFuture};
use super::info::DataPathInfo;
use super::registry::{Datapath, DatapathRegistry};
use super::stats::ControllerStats;

/// Registry, futures and statistics shared by the worker sink and the
/// application-facing service.
#[derive(Debug)]
pub struct ControllerCore {
    config: ControllerConfig,
    registry: DatapathRegistry,
    futures: FutureRegistry,
    stats: Arc<ControllerStats>,
}

impl ControllerCore {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            registry: DatapathRegistry::new(),
            futures: FutureRegistry::new(),
            stats: Arc::new(ControllerStats::new()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &DatapathRegistry {
        &self.registry
    }

    pub fn futures(&self) -> &FutureRegistry {
        &self.futures
    }

    pub fn stats(&self) -> &Arc<ControllerStats> {
        &self.stats
    }

    fn datapath(&self, dpid: DataPathId) -> OfResult<Arc<Datapath>> {
        self.registry.get(dpid).ok_or(OfError::NoSuchDatapath(dpid))
    }

    /// Rejects messages the datapath must never see from us.
    fn check(dp: &Datapath, msg: &Message) -> OfResult<()> {
        let expected = dp.version();
        if msg.version() != expected {
            return Err(OfError::VersionMismatch {
                expected,
                actual: msg.version(),
            });
        }
        if !msg.msg_type().is_controller_originated() {
            return Err(OfError::InvalidMessage(format!(
                "{} is not sent by controllers",
                msg.msg_type()
            )));
        }
        if msg.xid() == 0 {
            return Err(OfError::InvalidMessage(format!("{} has no xid", msg)));
        }
        Ok(())
    }

    /// Sends one message on the given channel; an unknown auxiliary id
    /// falls back to the main connection.
    pub fn send(&self, msg: &Message, dpid: DataPathId, aux_id: u8) -> OfResult<()> {
        let dp = self.datapath(dpid)?;
        Self::check(&dp, msg)?;
        dp.select(aux_id).send(msg)?;
        self.stats.count_tx(msg);
        Ok(())
    }

    /// Sends messages in order on the main connection. The first invalid
    /// message aborts the batch before anything is queued.
    pub fn send_all(&self, msgs: &[Message], dpid: DataPathId) -> OfResult<()> {
        let dp = self.datapath(dpid)?;
        for m in msgs {
            Self::check(&dp, m)?;
        }
        self.queue_all(&dp, msgs)
    }

    /// Like [`send_all`](Self::send_all) but reports every invalid message
    /// at once, as [`OfError::Validation`].
    pub fn send_validated(&self, msgs: &[Message], dpid: DataPathId) -> OfResult<()> {
        let dp = self.datapath(dpid)?;
        let mut errors = ValidationErrors::new();
        for m in msgs {
            if let Err(e) = Self::check(&dp, m) {
                errors.push(e);
            }
        }
        errors.into_result()?;
        self.queue_all(&dp, msgs)
    }

    fn queue_all(&self, dp: &Datapath, msgs: &[Message]) -> OfResult<()> {
        if msgs.is_empty() {
            return Ok(());
        }
        dp.main().send_all(msgs)?;
        for m in msgs {
            self.stats.count_tx(m);
        }
        Ok(())
    }

    /// Registers `future` under its datapath and xid, then sends `msgs` in
    /// order. The future's request must be the last message.
    ///
    /// A future already pending under the same key makes this fail without
    /// sending anything; a send failure removes and fails the future.
    pub fn send_future(&self, future: &MessageFuture, msgs: &[Message]) -> OfResult<()> {
        let Some(last) = msgs.last() else {
            return Err(OfError::InvalidArgument("no messages to send".into()));
        };
        if last.xid() != future.xid() {
            return Err(OfError::InvalidArgument(format!(
                "future xid {} does not match last message {}",
                future.xid(),
                last
            )));
        }
        let dp = self.datapath(future.dpid())?;
        for m in msgs {
            Self::check(&dp, m)?;
        }

        self.futures.insert(future)?;
        if let Err(e) = self.queue_all(&dp, msgs) {
            self.futures.fail(future, e.to_string());
            return Err(e);
        }
        Ok(())
    }

    pub fn find_future(&self, dpid: DataPathId, xid: u32) -> Option<MessageFuture> {
        self.futures.find(dpid, xid)
    }

    pub fn success_future(&self, future: &MessageFuture, reply: Message) -> bool {
        self.futures.success(future, reply)
    }

    /// Fails with the datapath's ERROR reply.
    pub fn fail_future_with_error(&self, future: &MessageFuture, error: Message) -> bool {
        self.futures.fail_with_error(future, error)
    }

    pub fn fail_future(&self, future: &MessageFuture, cause: impl Into<String>) -> bool {
        self.futures.fail(future, cause)
    }

    pub fn cancel_future(&self, future: &MessageFuture) -> bool {
        self.futures.cancel(future)
    }

    /// Snapshots of every connected datapath, ordered by id.
    pub fn get_all_data_path_info(&self) -> Vec<DataPathInfo> {
        let mut all: Vec<_> = self.registry.all().iter().map(|dp| dp.info()).collect();
        all.sort_by_key(|i| i.dpid);
        all
    }

    pub fn get_data_path_info(&self, dpid: DataPathId) -> OfResult<DataPathInfo> {
        Ok(self.datapath(dpid)?.info())
    }

    /// Negotiated protocol version of a connected datapath.
    pub fn version_of(&self, dpid: DataPathId) -> OfResult<ProtocolVersion> {
        Ok(self.datapath(dpid)?.version())
    }

    /// Fails every future past the configured age; returns how many.
    pub fn sweep_futures(&self) -> usize {
        let n = self.futures.sweep(self.config.future_age_out, Instant::now());
        if n > 0 {
            log::warn!("[controller] {} message futures aged out", n);
        }
        n
    }

    /// Tears a datapath down after its main connection `conn_id` closed:
    /// auxiliaries are closed and pending futures failed.
    pub(crate) fn drop_datapath(&self, dpid: DataPathId, conn_id: ConnId) -> Option<Arc<Datapath>> {
        let (dp, auxiliaries) = self.registry.remove(dpid, conn_id)?;
        for aux in auxiliaries {
            if let Err(e) = aux.close() {
                log::debug!("[controller] closing aux {} of {}: {}", aux.aux_id(), dpid, e);
            }
        }
        let failed = self.futures.fail_datapath(dpid, "datapath disconnected");
        log::info!(
            "[controller] datapath {} removed ({} pending futures failed)",
            dpid,
            failed
        );
        Some(dp)
    }
}

// ============================================================================
// Tests
// ============================================================================
