// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener registration and event fan-out.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::collab::AlertSink;
use crate::config::ControllerConfig;
use crate::error::{OfError, OfResult};
use crate::protocol::MessageType;

use super::event::{DataPathEvent, DataPathListener, MessageEvent, MessageListener, Subscriber};
use super::handler::{EventHandler, ReaderPool};

/// Handler tagged with its registration sequence number, shared by both
/// listener kinds so shutdown can walk one global order.
type Slot<E> = (usize, Arc<EventHandler<E>>);

enum AnyHandler {
    DataPath(Arc<EventHandler<DataPathEvent>>),
    Message(Arc<EventHandler<MessageEvent>>),
}

/// Owns every listener queue and the two reader pools draining them.
pub struct ListenerManager {
    dp_handlers: RwLock<Vec<Slot<DataPathEvent>>>,
    msg_handlers: RwLock<Vec<Slot<MessageEvent>>>,
    dp_pool: ReaderPool<DataPathEvent>,
    msg_pool: ReaderPool<MessageEvent>,

    dp_capacity: usize,
    rx_capacity: usize,
    reset_ratio: f64,
    alerts: Arc<dyn AlertSink>,

    next_id: AtomicUsize,
    stopped: AtomicBool,
}

impl ListenerManager {
    pub fn new(config: &ControllerConfig, alerts: Arc<dyn AlertSink>) -> OfResult<Self> {
        Ok(Self {
            dp_handlers: RwLock::new(Vec::new()),
            msg_handlers: RwLock::new(Vec::new()),
            dp_pool: ReaderPool::new("dp", config.dp_reader_threads)?,
            msg_pool: ReaderPool::new("msg", config.msg_reader_threads)?,
            dp_capacity: config.dp_queue_capacity,
            rx_capacity: config.rx_queue_capacity,
            reset_ratio: config.queue_reset_ratio,
            alerts,
            next_id: AtomicUsize::new(1),
            stopped: AtomicBool::new(false),
        })
    }

    fn name(&self, kind: &str) -> (usize, String) {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        (seq, format!("{}-{}", kind, seq))
    }

    /// Registers a lifecycle listener. Adding the same listener twice is a
    /// no-op.
    pub fn add_data_path_listener(&self, listener: Arc<dyn DataPathListener>) -> OfResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(OfError::Shutdown);
        }
        let mut handlers = self.dp_handlers.write();
        let key = Subscriber::<DataPathEvent>::key(&listener);
        if handlers.iter().any(|(_, h)| h.key() == key) {
            return Ok(());
        }
        let (seq, name) = self.name("dp-listener");
        let handler = Arc::new(EventHandler::new(
            name,
            Box::new(listener),
            BTreeSet::new(),
            self.dp_capacity,
            self.reset_ratio,
            Arc::clone(&self.alerts),
        ));
        self.dp_pool.attach(Arc::clone(&handler));
        handlers.push((seq, handler));
        log::debug!("[dispatch] datapath listener added ({} total)", handlers.len());
        Ok(())
    }

    /// Unregisters a lifecycle listener; unknown listeners are ignored.
    pub fn remove_data_path_listener(&self, listener: &Arc<dyn DataPathListener>) {
        let key = Subscriber::<DataPathEvent>::key(listener);
        let removed = {
            let mut handlers = self.dp_handlers.write();
            let pos = handlers.iter().position(|(_, h)| h.key() == key);
            pos.map(|i| handlers.remove(i))
        };
        if let Some((_, h)) = removed {
            self.dp_pool.detach(&h);
        }
    }

    /// Registers a message listener for `types` (empty means every type).
    ///
    /// PACKET_IN cannot be subscribed to here; packet-ins travel through the
    /// packet sequencer. Re-adding a listener replaces its filter.
    pub fn add_message_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        types: &[MessageType],
    ) -> OfResult<()> {
        if types.contains(&MessageType::PacketIn) {
            return Err(OfError::InvalidArgument(
                "PACKET_IN listeners must use the packet sequencer".into(),
            ));
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(OfError::Shutdown);
        }
        self.remove_message_listener(&listener);

        let (seq, name) = self.name("msg-listener");
        let handler = Arc::new(EventHandler::new(
            name,
            Box::new(listener),
            types.iter().copied().collect(),
            self.rx_capacity,
            self.reset_ratio,
            Arc::clone(&self.alerts),
        ));
        self.msg_pool.attach(Arc::clone(&handler));
        let mut handlers = self.msg_handlers.write();
        handlers.push((seq, handler));
        log::debug!("[dispatch] message listener added ({} total)", handlers.len());
        Ok(())
    }

    /// Unregisters a message listener; unknown listeners are ignored.
    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) {
        let key = Subscriber::<MessageEvent>::key(listener);
        let removed = {
            let mut handlers = self.msg_handlers.write();
            let pos = handlers.iter().position(|(_, h)| h.key() == key);
            pos.map(|i| handlers.remove(i))
        };
        if let Some((_, h)) = removed {
            self.msg_pool.detach(&h);
        }
    }

    pub fn data_path_listener_count(&self) -> usize {
        self.dp_handlers.read().len()
    }

    pub fn message_listener_count(&self) -> usize {
        self.msg_handlers.read().len()
    }

    /// Queues a lifecycle event for every datapath listener.
    pub(crate) fn post_datapath_event(&self, event: DataPathEvent) {
        log::debug!("[dispatch] {}", event);
        for (_, h) in self.dp_handlers.read().iter() {
            h.post(event.clone());
        }
    }

    /// Queues a message for every listener whose filter accepts it.
    pub(crate) fn post_message(&self, event: MessageEvent) {
        for (_, h) in self.msg_handlers.read().iter() {
            if h.accepts(&event) {
                h.post(event.clone());
            }
        }
    }

    /// Detaches every listener of either kind in reverse registration order.
    /// Returns the handler names in the order they were detached.
    fn unregister_all(&self) -> Vec<String> {
        let dp = std::mem::take(&mut *self.dp_handlers.write());
        let msg = std::mem::take(&mut *self.msg_handlers.write());
        let mut all: Vec<_> = dp
            .into_iter()
            .map(|(seq, h)| (seq, AnyHandler::DataPath(h)))
            .chain(msg.into_iter().map(|(seq, h)| (seq, AnyHandler::Message(h))))
            .collect();
        all.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        all.into_iter()
            .map(|(_, handler)| match handler {
                AnyHandler::DataPath(h) => {
                    self.dp_pool.detach(&h);
                    h.name().to_string()
                }
                AnyHandler::Message(h) => {
                    self.msg_pool.detach(&h);
                    h.name().to_string()
                }
            })
            .collect()
    }

    /// Unregisters every listener, newest first, and stops the readers.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let detached = self.unregister_all();
        log::debug!("[dispatch] unregistered {}", detached.join(", "));
        self.msg_pool.shutdown();
        self.dp_pool.shutdown();
        log::info!("[dispatch] listeners unregistered, readers stopped");
    }
}

impl Drop for ListenerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// ListenerSet
// ============================================================================

enum Registration {
    DataPath(Arc<dyn DataPathListener>),
    Message(Arc<dyn MessageListener>),
}

/// Listener bookkeeping for a component: everything added through the set
/// is unregistered, newest first, by [`clear`](Self::clear) or on drop.
pub struct ListenerSet {
    manager: Arc<ListenerManager>,
    registered: Mutex<Vec<Registration>>,
}

impl ListenerSet {
    pub fn new(manager: Arc<ListenerManager>) -> Self {
        Self {
            manager,
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn add_data_path_listener(&self, listener: Arc<dyn DataPathListener>) -> OfResult<()> {
        self.manager
            .add_data_path_listener(Arc::clone(&listener))?;
        self.registered.lock().push(Registration::DataPath(listener));
        Ok(())
    }

    pub fn add_message_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        types: &[MessageType],
    ) -> OfResult<()> {
        self.manager
            .add_message_listener(Arc::clone(&listener), types)?;
        self.registered.lock().push(Registration::Message(listener));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.registered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.lock().is_empty()
    }

    /// Unregisters in reverse order of registration.
    pub fn clear(&self) {
        let registered: Vec<_> = self.registered.lock().drain(..).collect();
        for r in registered.into_iter().rev() {
            match r {
                Registration::DataPath(l) => self.manager.remove_data_path_listener(&l),
                Registration::Message(l) => self.manager.remove_message_listener(&l),
            }
        }
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        self.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
