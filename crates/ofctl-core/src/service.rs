// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller service: the application-facing facade.
//!
//! [`ControllerService`] wires the transport, the shared controller state,
//! listener dispatch and port tracking together. Worker loops report into
//! it through [`WorkerSink`]; applications call the methods below.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ofctl_core::{Collaborators, ControllerConfig, ControllerService};
//! use ofctl_core::dispatch::{DataPathEvent, DataPathListener};
//!
//! struct Printer;
//!
//! impl DataPathListener for Printer {
//!     fn event(&self, event: &DataPathEvent) {
//!         println!("{}", event);
//!     }
//! }
//!
//! let service = ControllerService::new(ControllerConfig::default(), Collaborators::default())?;
//! service.add_data_path_listener(Arc::new(Printer))?;
//! service.start()?;
//! # Ok::<(), ofctl_core::OfError>(())
//! ```

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::collab::{Collaborators, PostHandshakeCallback};
use crate::config::ControllerConfig;
use crate::controller::{ControllerCore, DataPathInfo, MessageFuture, StatsSnapshot};
use crate::dispatch::{
    DataPathEvent, DataPathListener, ListenerManager, MessageEvent, MessageListener,
};
use crate::error::{OfError, OfResult};
use crate::port::PortStateTracker;
use crate::protocol::{
    DataPathId, Message, MessageBody, MessageType, PortNumber, PortStats, ProtocolVersion,
};
use crate::session::{ConnId, Connection, ConnectionHandle, MAIN_AUX_ID};
use crate::transport::worker::{ClosedConnection, WorkerSink};
use crate::transport::Transport;

// ============================================================================
// Worker sink
// ============================================================================

struct ServiceInner {
    core: Arc<ControllerCore>,
    listeners: Arc<ListenerManager>,
    collab: Collaborators,
}

impl ServiceInner {
    /// Completion of post-handshake processing: tag the device, announce it
    /// ready, then push the initial flows.
    fn ready_callback(&self, dpid: DataPathId, conn_id: ConnId) -> PostHandshakeCallback {
        let core = Arc::clone(&self.core);
        let listeners = Arc::clone(&self.listeners);
        let flows = self.collab.flows.clone();
        PostHandshakeCallback::new(move |device_type| {
            let Some(dp) = core.registry().get(dpid) else {
                log::debug!("[controller] {} left before it was ready", dpid);
                return;
            };
            if dp.main().id() != conn_id || !dp.is_valid() {
                return;
            }
            dp.set_device_type(device_type);
            let info = dp.info();
            listeners.post_datapath_event(DataPathEvent::Ready(info.clone()));

            let Some(flows) = flows else {
                return;
            };
            let msgs = flows.initial_flows(&info);
            if msgs.is_empty() {
                return;
            }
            match core.send_validated(&msgs, dpid) {
                Ok(()) => log::debug!("[controller] {} initial flows sent to {}", msgs.len(), dpid),
                Err(e) => log::warn!("[controller] initial flows for {} rejected: {}", dpid, e),
            }
        })
    }
}

impl WorkerSink for ServiceInner {
    fn basic_handshake(&self, handle: &Arc<ConnectionHandle>, conn: &Connection) -> OfResult<()> {
        let registry = self.core.registry();
        if handle.is_main() {
            let features = conn.features().cloned().unwrap_or_default();
            registry.register_main(Arc::clone(handle), features)?;
            log::info!(
                "[controller] datapath {} connected from {} ({})",
                handle.dpid(),
                handle.remote_addr(),
                handle.version()
            );
        } else {
            registry.attach_aux(Arc::clone(handle))?;
            log::info!(
                "[controller] auxiliary channel {} of {} attached from {}",
                handle.aux_id(),
                handle.dpid(),
                handle.remote_addr()
            );
        }
        Ok(())
    }

    fn extended_handshake(&self, handle: &Arc<ConnectionHandle>, conn: &Connection) {
        let dpid = handle.dpid();
        let Some(dp) = self.core.registry().get(dpid) else {
            return;
        };
        if dp.main().id() != handle.id() {
            return;
        }
        dp.set_extended(
            conn.description().cloned(),
            conn.ports(),
            conn.no_table_features(),
        );
        let info = dp.info();
        self.listeners
            .post_datapath_event(DataPathEvent::Connected(info.clone()));

        let callback = self.ready_callback(dpid, handle.id());
        let sink = &self.collab.post_handshake;
        if catch_unwind(AssertUnwindSafe(|| sink.post_handshake(info, callback))).is_err() {
            log::error!("[controller] post-handshake processing of {} panicked", dpid);
        }
    }

    fn message(&self, handle: &Arc<ConnectionHandle>, msg: Message) {
        let dpid = handle.dpid();
        if let MessageBody::PacketIn(pi) = msg.body() {
            let bytes = pi.payload.len();
            match &self.collab.sequencer {
                Some(seq) => seq.packet_in(dpid, handle.aux_id(), msg),
                None => self.core.stats().count_drop(bytes),
            }
            return;
        }

        let matched = self.core.futures().complete(dpid, &msg);
        if !matched && msg.msg_type() == MessageType::Error {
            log::warn!("[controller] {} from {} matches no pending request", msg, dpid);
        }
        self.listeners.post_message(MessageEvent::Received {
            dpid,
            aux_id: handle.aux_id(),
            version: handle.version(),
            message: msg,
        });
    }

    fn closed(&self, closed: ClosedConnection) {
        if closed.revoked {
            self.listeners.post_datapath_event(DataPathEvent::Revoked {
                dpid: closed.dpid,
                remote: closed.remote,
                reason: closed.reason.clone(),
            });
        }
        if !closed.registered {
            return;
        }
        let Some(dpid) = closed.dpid else {
            return;
        };
        if closed.aux_id == MAIN_AUX_ID {
            if self.core.drop_datapath(dpid, closed.id).is_some() {
                self.listeners.post_datapath_event(DataPathEvent::Disconnected {
                    dpid,
                    remote: closed.remote,
                });
            }
        } else if self.core.registry().detach_aux(dpid, closed.aux_id, closed.id) {
            log::info!(
                "[controller] auxiliary channel {} of {} closed: {}",
                closed.aux_id,
                dpid,
                closed.reason
            );
        }
    }
}

// ============================================================================
// Future sweeper
// ============================================================================

struct Sweeper {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Sweeper {
    fn spawn(core: Arc<ControllerCore>, interval: Duration) -> OfResult<Self> {
        let (stop, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("ofctl-future-sweep".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        core.sweep_futures();
                    }
                    _ => return,
                }
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                log::error!("[controller] future sweeper panicked");
            }
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// The running controller.
pub struct ControllerService {
    inner: Arc<ServiceInner>,
    ports: PortStateTracker,
    transport: Mutex<Option<Transport>>,
    sweeper: Mutex<Option<Sweeper>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ControllerService {
    /// Validates the configuration and builds the service; nothing listens
    /// until [`start`](Self::start).
    pub fn new(config: ControllerConfig, collab: Collaborators) -> OfResult<Self> {
        config.validate().map_err(OfError::Config)?;
        let listeners = Arc::new(ListenerManager::new(&config, Arc::clone(&collab.alerts))?);
        let core = Arc::new(ControllerCore::new(config));
        let ports = PortStateTracker::new(
            Arc::clone(&core),
            Arc::clone(&collab.roles),
            Arc::clone(&listeners),
        )?;
        Ok(Self {
            inner: Arc::new(ServiceInner {
                core,
                listeners,
                collab,
            }),
            ports,
            transport: Mutex::new(None),
            sweeper: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Binds the listeners, starts the worker loops and the future sweep.
    pub fn start(&self) -> OfResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(OfError::Shutdown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(OfError::InvalidArgument("controller already started".into()));
        }
        let core = &self.inner.core;
        let sink: Arc<dyn WorkerSink> = self.inner.clone();
        let transport = Transport::start(
            core.config(),
            sink,
            Arc::clone(&self.inner.collab.codec),
            Arc::clone(core.stats()),
        )
        .map_err(|e| {
            self.started.store(false, Ordering::Release);
            e
        })?;
        *self.transport.lock() = Some(transport);
        *self.sweeper.lock() = Some(Sweeper::spawn(
            Arc::clone(core),
            core.config().future_sweep_interval,
        )?);
        log::info!("[controller] started, listening on {:?}", self.local_addr());
        Ok(())
    }

    /// Plain listener address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.lock().as_ref().and_then(Transport::local_addr)
    }

    /// Secure listener address, once started with TLS.
    pub fn tls_local_addr(&self) -> Option<SocketAddr> {
        self.transport
            .lock()
            .as_ref()
            .and_then(Transport::tls_local_addr)
    }

    /// Stops accepting, closes every connection (datapaths disconnect
    /// normally), then unregisters listeners in reverse order.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[controller] shutting down");
        let grace = self.inner.core.config().shutdown_grace;
        if let Some(mut transport) = self.transport.lock().take() {
            transport.shutdown(grace);
        }
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        self.ports.shutdown();
        self.inner.listeners.shutdown();
        log::info!("[controller] stopped");
    }

    pub fn core(&self) -> &Arc<ControllerCore> {
        &self.inner.core
    }

    pub fn listener_manager(&self) -> &Arc<ListenerManager> {
        &self.inner.listeners
    }

    // === Listeners ===

    pub fn add_data_path_listener(&self, listener: Arc<dyn DataPathListener>) -> OfResult<()> {
        self.inner.listeners.add_data_path_listener(listener)
    }

    pub fn remove_data_path_listener(&self, listener: &Arc<dyn DataPathListener>) {
        self.inner.listeners.remove_data_path_listener(listener);
    }

    /// Subscribes to the given message types (empty means all). PACKET_IN
    /// is refused.
    pub fn add_message_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        types: &[MessageType],
    ) -> OfResult<()> {
        self.inner.listeners.add_message_listener(listener, types)
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) {
        self.inner.listeners.remove_message_listener(listener);
    }

    // === Sending ===

    /// Sends on the main connection.
    pub fn send(&self, msg: &Message, dpid: DataPathId) -> OfResult<()> {
        self.inner.core.send(msg, dpid, MAIN_AUX_ID)
    }

    /// Sends on an auxiliary channel (main if the channel is unknown).
    pub fn send_to(&self, msg: &Message, dpid: DataPathId, aux_id: u8) -> OfResult<()> {
        self.inner.core.send(msg, dpid, aux_id)
    }

    pub fn send_all(&self, msgs: &[Message], dpid: DataPathId) -> OfResult<()> {
        self.inner.core.send_all(msgs, dpid)
    }

    pub fn send_future(&self, future: &MessageFuture, msgs: &[Message]) -> OfResult<()> {
        self.inner.core.send_future(future, msgs)
    }

    pub fn find_future(&self, dpid: DataPathId, xid: u32) -> Option<MessageFuture> {
        self.inner.core.find_future(dpid, xid)
    }

    pub fn success_future(&self, future: &MessageFuture, reply: Message) -> bool {
        self.inner.core.success_future(future, reply)
    }

    pub fn fail_future(&self, future: &MessageFuture, cause: impl Into<String>) -> bool {
        self.inner.core.fail_future(future, cause)
    }

    pub fn fail_future_with_error(&self, future: &MessageFuture, error: Message) -> bool {
        self.inner.core.fail_future_with_error(future, error)
    }

    pub fn cancel_future(&self, future: &MessageFuture) -> bool {
        self.inner.core.cancel_future(future)
    }

    // === Snapshots ===

    pub fn get_all_data_path_info(&self) -> Vec<DataPathInfo> {
        self.inner.core.get_all_data_path_info()
    }

    pub fn get_data_path_info(&self, dpid: DataPathId) -> OfResult<DataPathInfo> {
        self.inner.core.get_data_path_info(dpid)
    }

    pub fn version_of(&self, dpid: DataPathId) -> OfResult<ProtocolVersion> {
        self.inner.core.version_of(dpid)
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.inner.core.stats().snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.core.stats().reset();
    }

    // === Ports ===

    pub fn get_port_stats(
        &self,
        dpid: DataPathId,
        port: Option<PortNumber>,
    ) -> OfResult<Vec<PortStats>> {
        self.ports.get_port_stats(dpid, port)
    }

    pub fn enable_port(
        &self,
        dpid: DataPathId,
        port: PortNumber,
        enable: bool,
    ) -> OfResult<MessageFuture> {
        self.ports.enable_port(dpid, port, enable)
    }
}

impl Drop for ControllerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{FlowAdvisor, PacketSequencer, PostHandshakeSink};
    use crate::controller::testkit::LinkFixture;
    use crate::controller::FutureResult;
    use crate::protocol::{Features, MessageBuilder, PacketIn};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const V13: ProtocolVersion = ProtocolVersion::V_1_3;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<DataPathEvent>>,
    }

    impl DataPathListener for Recorder {
        fn event(&self, event: &DataPathEvent) {
            self.events.lock().push(event.clone());
        }
    }

    /// Holds callbacks until the test releases them.
    #[derive(Default)]
    struct Deferred {
        pending: Mutex<Vec<PostHandshakeCallback>>,
    }

    impl PostHandshakeSink for Deferred {
        fn post_handshake(&self, _info: DataPathInfo, callback: PostHandshakeCallback) {
            self.pending.lock().push(callback);
        }
    }

    #[derive(Default)]
    struct CountingSequencer(AtomicUsize);

    impl PacketSequencer for CountingSequencer {
        fn packet_in(&self, _dpid: DataPathId, _aux_id: u8, _msg: Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct OneBarrier;

    impl FlowAdvisor for OneBarrier {
        fn initial_flows(&self, info: &DataPathInfo) -> Vec<Message> {
            vec![MessageBuilder::new(info.version, MessageBody::BarrierRequest).build()]
        }
    }

    fn inner(collab: Collaborators) -> ServiceInner {
        let config = ControllerConfig::ephemeral();
        ServiceInner {
            listeners: Arc::new(ListenerManager::new(&config, Arc::clone(&collab.alerts)).unwrap()),
            core: Arc::new(ControllerCore::new(config)),
            collab,
        }
    }

    fn register(sink: &ServiceInner, fx: &LinkFixture, id: u64, dpid: u64) -> Arc<ConnectionHandle> {
        let h = fx.handle(id, dpid, 0, V13);
        sink.core
            .registry()
            .register_main(
                Arc::clone(&h),
                Features {
                    dpid: DataPathId::from(dpid),
                    ..Default::default()
                },
            )
            .unwrap();
        h
    }

    fn wait_events(rec: &Recorder, n: usize) -> Vec<DataPathEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while rec.events.lock().len() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        rec.events.lock().clone()
    }

    fn closed(h: &ConnectionHandle, revoked: bool, registered: bool) -> ClosedConnection {
        ClosedConnection {
            id: h.id(),
            remote: h.remote_addr(),
            dpid: Some(h.dpid()),
            aux_id: h.aux_id(),
            revoked,
            registered,
            reason: "test".into(),
        }
    }

    #[test]
    fn test_ready_follows_callback_then_flows() {
        let deferred = Arc::new(Deferred::default());
        let sink = inner(
            Collaborators::default()
                .with_post_handshake(deferred.clone())
                .with_flows(Arc::new(OneBarrier)),
        );
        let rec = Arc::new(Recorder::default());
        sink.listeners.add_data_path_listener(rec.clone()).unwrap();

        let fx = LinkFixture::new();
        let h = register(&sink, &fx, 1, 5);
        let dp = sink.core.registry().get(h.dpid()).unwrap();
        sink.listeners
            .post_datapath_event(DataPathEvent::Connected(dp.info()));
        let cb = sink.ready_callback(h.dpid(), h.id());
        deferred.pending.lock().push(cb);

        assert_eq!(wait_events(&rec, 1).len(), 1);
        assert!(fx.sent(1).is_empty());

        let cb = deferred.pending.lock().pop().unwrap();
        cb.complete(Some("edge-switch".into()));
        let events = wait_events(&rec, 2);
        assert!(matches!(events[0], DataPathEvent::Connected(_)));
        match &events[1] {
            DataPathEvent::Ready(info) => {
                assert_eq!(info.device_type.as_deref(), Some("edge-switch"))
            }
            other => panic!("unexpected {:?}", other),
        }
        let sent = fx.sent(1);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), MessageType::BarrierRequest);
    }

    #[test]
    fn test_packet_in_bypasses_listeners() {
        let seq = Arc::new(CountingSequencer::default());
        let sink = inner(Collaborators::default().with_sequencer(seq.clone()));
        let fx = LinkFixture::new();
        let h = register(&sink, &fx, 1, 6);

        let pi = MessageBuilder::new(
            V13,
            MessageBody::PacketIn(PacketIn {
                buffer_id: 0xffff_ffff,
                total_len: 64,
                payload: vec![0; 64],
            }),
        )
        .build();
        sink.message(&h, pi.clone());
        assert_eq!(seq.0.load(Ordering::SeqCst), 1);

        // without a sequencer the packet is counted as dropped
        let bare = inner(Collaborators::default());
        let h2 = register(&bare, &fx, 2, 7);
        bare.message(&h2, pi);
        let snap = bare.core.stats().snapshot();
        assert_eq!(snap.drop_count, 1);
        assert_eq!(snap.drop_bytes, 64);
    }

    #[test]
    fn test_reply_completes_future() {
        let sink = inner(Collaborators::default());
        let fx = LinkFixture::new();
        let h = register(&sink, &fx, 1, 8);

        let req = MessageBuilder::new(V13, MessageBody::BarrierRequest).build();
        let f = MessageFuture::new(h.dpid(), req.clone());
        sink.core.send_future(&f, &[req.clone()]).unwrap();
        sink.message(&h, MessageBuilder::reply_to(&req, MessageBody::BarrierReply).build());
        assert_eq!(f.result(), FutureResult::Success);
    }

    #[test]
    fn test_close_paths() {
        let sink = inner(Collaborators::default());
        let rec = Arc::new(Recorder::default());
        sink.listeners.add_data_path_listener(rec.clone()).unwrap();
        let fx = LinkFixture::new();
        let main = register(&sink, &fx, 1, 9);

        // refused duplicate: revoked, never registered, original untouched
        let dup = fx.handle(2, 9, 0, V13);
        sink.closed(closed(&dup, true, false));
        assert!(sink.core.registry().get(main.dpid()).is_some());

        let aux = fx.handle(3, 9, 1, V13);
        sink.core.registry().attach_aux(Arc::clone(&aux)).unwrap();
        sink.closed(closed(&aux, false, true));
        assert!(sink.core.registry().get(main.dpid()).unwrap().auxiliaries().is_empty());

        sink.closed(closed(&main, false, true));
        assert!(sink.core.registry().is_empty());

        let events = wait_events(&rec, 2);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DataPathEvent::Revoked { .. }));
        assert!(matches!(events[1], DataPathEvent::Disconnected { .. }));
    }

    #[test]
    fn test_service_lifecycle() {
        let service =
            ControllerService::new(ControllerConfig::ephemeral(), Collaborators::default()).unwrap();
        assert!(service.local_addr().is_none());
        service.start().unwrap();
        assert!(service.local_addr().is_some());
        assert!(matches!(service.start(), Err(OfError::InvalidArgument(_))));
        assert!(service.get_all_data_path_info().is_empty());
        service.shutdown();
        assert!(service.local_addr().is_none());
        assert!(matches!(service.start(), Err(OfError::Shutdown)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ControllerConfig::ephemeral().with_worker_count(0);
        assert!(matches!(
            ControllerService::new(config, Collaborators::default()),
            Err(OfError::Config(_))
        ));
    }
}
