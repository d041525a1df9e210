// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-listener queues and the reader pools that drain them.
//!
//! ```text
//!  worker threads ──post──► [bounded queue] ──► reader thread ──► listener
//!                              │
//!                   full: probation, drop, QueueEvent::Full (once)
//!                   drained below reset level: checkpoint + QueueEvent::Reset
//! ```

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, unbounded, Receiver, Select, Sender, TrySendError};
use parking_lot::Mutex;

use crate::collab::{AlertLevel, AlertSink};
use crate::protocol::MessageType;

use super::event::{DispatchEvent, QueueEvent, Subscriber};

// ============================================================================
// Event handler
// ============================================================================

/// Bounded queue in front of one listener.
pub(crate) struct EventHandler<E> {
    name: String,
    subscriber: Box<dyn Subscriber<E>>,
    /// Message types of interest; empty means all
    filter: BTreeSet<MessageType>,

    tx: Sender<E>,
    rx: Receiver<E>,
    reset_level: usize,

    probation: AtomicBool,
    closed: AtomicBool,
    dropped: AtomicU64,
    alerts: Arc<dyn AlertSink>,
}

impl<E: DispatchEvent> EventHandler<E> {
    pub(crate) fn new(
        name: String,
        subscriber: Box<dyn Subscriber<E>>,
        filter: BTreeSet<MessageType>,
        capacity: usize,
        reset_ratio: f64,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            name,
            subscriber,
            filter,
            tx,
            rx,
            reset_level: (((capacity as f64) * reset_ratio) as usize).max(1),
            probation: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            alerts,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key(&self) -> usize {
        self.subscriber.key()
    }

    pub(crate) fn accepts(&self, event: &E) -> bool {
        self.filter.is_empty() || event.message_type().map_or(true, |t| self.filter.contains(&t))
    }

    pub(crate) fn on_probation(&self) -> bool {
        self.probation.load(Ordering::Acquire)
    }

    /// Events dropped since creation.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Non-blocking enqueue. Returns false if the event was dropped.
    pub(crate) fn post(&self, event: E) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if self.on_probation() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if self
                    .probation
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let text = format!("event queue full for listener {}, dropping events", self.name);
                    log::warn!("[dispatch] {}", text);
                    self.alerts.alert(AlertLevel::Warning, &text);
                    self.notify(QueueEvent::Full);
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Ends probation once the queue has drained below the reset level: the
    /// checkpoint goes in ahead of any new traffic.
    fn after_take(&self) {
        if !self.on_probation() || self.rx.len() >= self.reset_level {
            return;
        }
        if self.tx.try_send(E::checkpoint()).is_err() {
            return;
        }
        self.probation.store(false, Ordering::Release);
        log::info!(
            "[dispatch] queue for listener {} drained, resuming ({} events dropped so far)",
            self.name,
            self.dropped()
        );
        self.notify(QueueEvent::Reset);
    }

    fn notify(&self, event: QueueEvent) {
        let result = catch_unwind(AssertUnwindSafe(|| self.subscriber.queue_event(event)));
        if result.is_err() {
            log::error!("[dispatch] listener {} panicked on {:?}", self.name, event);
        }
    }

    /// Delivers one event with panic isolation.
    fn dispatch(&self, event: E) {
        if !self.closed.load(Ordering::Acquire) {
            let result = catch_unwind(AssertUnwindSafe(|| self.subscriber.deliver(&event)));
            if result.is_err() {
                log::error!("[dispatch] listener {} panicked during delivery", self.name);
            }
        }
        self.after_take();
    }

    /// Takes and delivers one queued event on the calling thread.
    #[cfg(test)]
    pub(crate) fn try_take(&self) -> bool {
        match self.rx.try_recv() {
            Ok(event) => {
                self.dispatch(event);
                true
            }
            Err(_) => false,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // queued events are discarded
        while self.rx.try_recv().is_ok() {}
    }
}

// ============================================================================
// Reader pool
// ============================================================================

enum Control<E> {
    Add(Arc<EventHandler<E>>),
    Remove(usize),
    Stop,
}

struct Reader<E> {
    ctl: Sender<Control<E>>,
    /// Keys of the handlers this reader drains
    keys: Vec<usize>,
}

/// Fixed set of reader threads; each drains the queues assigned to it.
pub(crate) struct ReaderPool<E> {
    name: &'static str,
    readers: Mutex<Vec<Reader<E>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: DispatchEvent> ReaderPool<E> {
    pub(crate) fn new(name: &'static str, size: usize) -> std::io::Result<Self> {
        let mut readers = Vec::with_capacity(size);
        let mut threads = Vec::with_capacity(size);
        for i in 0..size.max(1) {
            let (ctl, ctl_rx) = unbounded();
            let thread = thread::Builder::new()
                .name(format!("ofctl-{}-reader-{}", name, i))
                .spawn(move || reader_loop(ctl_rx))?;
            readers.push(Reader {
                ctl,
                keys: Vec::new(),
            });
            threads.push(thread);
        }
        Ok(Self {
            name,
            readers: Mutex::new(readers),
            threads: Mutex::new(threads),
        })
    }

    /// Assigns a handler to the least loaded reader.
    pub(crate) fn attach(&self, handler: Arc<EventHandler<E>>) {
        let mut readers = self.readers.lock();
        let Some(reader) = readers.iter_mut().min_by_key(|r| r.keys.len()) else {
            return;
        };
        let key = handler.key();
        if reader.ctl.send(Control::Add(handler)).is_ok() {
            reader.keys.push(key);
        }
    }

    /// Stops delivery to a handler; events still queued are discarded.
    pub(crate) fn detach(&self, handler: &EventHandler<E>) {
        handler.close();
        let key = handler.key();
        let mut readers = self.readers.lock();
        if let Some(reader) = readers.iter_mut().find(|r| r.keys.contains(&key)) {
            reader.keys.retain(|k| *k != key);
            let _ = reader.ctl.send(Control::Remove(key));
        }
    }

    pub(crate) fn shutdown(&self) {
        for reader in self.readers.lock().drain(..) {
            let _ = reader.ctl.send(Control::Stop);
        }
        for t in self.threads.lock().drain(..) {
            if t.join().is_err() {
                log::error!("[dispatch] {} reader thread panicked", self.name);
            }
        }
    }
}

fn reader_loop<E: DispatchEvent>(ctl: Receiver<Control<E>>) {
    let mut handlers: Vec<Arc<EventHandler<E>>> = Vec::new();
    loop {
        let next = {
            let mut sel = Select::new();
            sel.recv(&ctl);
            for h in &handlers {
                sel.recv(&h.rx);
            }
            let oper = sel.select();
            match oper.index() {
                0 => Ready::Control(oper.recv(&ctl).ok()),
                i => Ready::Event(i - 1, oper.recv(&handlers[i - 1].rx).ok()),
            }
        };

        match next {
            Ready::Control(Some(Control::Add(h))) => handlers.push(h),
            Ready::Control(Some(Control::Remove(key))) => handlers.retain(|h| h.key() != key),
            Ready::Control(Some(Control::Stop) | None) => return,
            Ready::Event(i, Some(event)) => handlers[i].dispatch(event),
            Ready::Event(_, None) => {}
        }
    }
}

enum Ready<E> {
    Control(Option<Control<E>>),
    Event(usize, Option<E>),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::event::{DataPathEvent, DataPathListener};
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct Recorder {
        events: PlMutex<Vec<DataPathEvent>>,
        queue: PlMutex<Vec<QueueEvent>>,
    }

    impl DataPathListener for Recorder {
        fn event(&self, event: &DataPathEvent) {
            self.events.lock().push(event.clone());
        }

        fn queue_event(&self, event: QueueEvent) {
            self.queue.lock().push(event);
        }
    }

    #[derive(Default)]
    struct CountingAlerts {
        count: AtomicU64,
    }

    impl AlertSink for CountingAlerts {
        fn alert(&self, _level: AlertLevel, _text: &str) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn revoked(n: u16) -> DataPathEvent {
        DataPathEvent::Revoked {
            dpid: None,
            remote: format!("192.0.2.1:{}", n).parse().unwrap(),
            reason: "test".into(),
        }
    }

    fn handler(
        rec: &Arc<Recorder>,
        capacity: usize,
        alerts: Arc<CountingAlerts>,
    ) -> EventHandler<DataPathEvent> {
        let listener: Arc<dyn DataPathListener> = rec.clone();
        EventHandler::new(
            "recorder".into(),
            Box::new(listener),
            BTreeSet::new(),
            capacity,
            0.5,
            alerts,
        )
    }

    #[test]
    fn test_probation_round_trip() {
        let rec = Arc::new(Recorder::default());
        let alerts = Arc::new(CountingAlerts::default());
        let h = handler(&rec, 4, Arc::clone(&alerts));

        for i in 0..4 {
            assert!(h.post(revoked(i)));
        }
        // overflow: exactly one notification, nothing more queued
        for i in 4..10 {
            assert!(!h.post(revoked(i)));
        }
        assert!(h.on_probation());
        assert_eq!(h.len(), 4);
        assert_eq!(*rec.queue.lock(), vec![QueueEvent::Full]);
        assert_eq!(alerts.count.load(Ordering::SeqCst), 1);
        assert_eq!(h.dropped(), 6);

        // 4 -> 3: still at or above the reset level of 2
        assert!(h.try_take());
        assert!(h.on_probation());
        assert!(h.try_take());
        assert!(h.on_probation());
        // 2 -> 1: below the reset level, checkpoint pushed
        assert!(h.try_take());
        assert!(!h.on_probation());
        assert_eq!(*rec.queue.lock(), vec![QueueEvent::Full, QueueEvent::Reset]);

        assert!(h.post(revoked(99)));
        while h.try_take() {}

        let events = rec.events.lock();
        assert_eq!(events.len(), 6);
        assert_eq!(events[4], DataPathEvent::DroppedEvents);
        assert_eq!(events[5], revoked(99));
        let checkpoints = events.iter().filter(|e| **e == DataPathEvent::DroppedEvents).count();
        assert_eq!(checkpoints, 1);
    }

    #[test]
    fn test_panicking_listener_isolated() {
        struct Boom;
        impl DataPathListener for Boom {
            fn event(&self, _event: &DataPathEvent) {
                panic!("listener bug");
            }
        }
        let listener: Arc<dyn DataPathListener> = Arc::new(Boom);
        let h = EventHandler::new(
            "boom".into(),
            Box::new(listener),
            BTreeSet::new(),
            2,
            0.5,
            Arc::new(CountingAlerts::default()),
        );
        assert!(h.post(revoked(1)));
        assert!(h.post(revoked(2)));
        assert!(h.try_take());
        assert!(h.try_take());
    }

    #[test]
    fn test_pool_delivers_and_detaches() {
        let rec = Arc::new(Recorder::default());
        let h = Arc::new(handler(&rec, 16, Arc::new(CountingAlerts::default())));
        let pool = ReaderPool::new("test", 2).unwrap();
        pool.attach(Arc::clone(&h));

        for i in 0..5 {
            assert!(h.post(revoked(i)));
        }
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while rec.events.lock().len() < 5 && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(rec.events.lock().len(), 5);
        // receive order preserved
        assert_eq!(rec.events.lock()[0], revoked(0));
        assert_eq!(rec.events.lock()[4], revoked(4));

        pool.detach(&h);
        assert!(!h.post(revoked(9)));
        pool.shutdown();
        assert_eq!(rec.events.lock().len(), 5);
    }
}
