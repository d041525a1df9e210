// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! I/O worker loop.
//!
//! Each worker owns a `mio::Poll` and a private set of connections handed
//! over by the acceptor. No other thread ever touches those connections:
//! application threads talk to a worker only through [`WorkerCommand`]s
//! followed by a wake-up.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                        Worker N                              |
//! |  +-------------------------------------------------------+  |
//! |  |                    mio::Poll                           |  |
//! |  |  - Waker (Register / Send / Close / Shutdown)          |  |
//! |  |  - TCP streams (read frames, flush send queues)        |  |
//! |  +-------------------------------------------------------+  |
//! |             |                               |                |
//! |             v                               v                |
//! |  +---------------------+        +-------------------------+ |
//! |  | decode -> Connection|        | hello timer, liveness   | |
//! |  | state machine       |        | sweep (every tick)      | |
//! |  +---------------------+        +-------------------------+ |
//! |             |                                                |
//! |             v                                                |
//! |  +-------------------------------------------------------+  |
//! |  |        WorkerSink (registry, dispatch, futures)        |  |
//! |  +-------------------------------------------------------+  |
//! +-------------------------------------------------------------+
//! ```

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::config::{ControllerConfig, LivenessConfig};
use crate::controller::ControllerStats;
use crate::error::{OfError, OfResult};
use crate::protocol::{DataPathId, FrameCodec, Message, MessageCodec, VersionSet};
use crate::session::{ConnId, Connection, ConnectionHandle, Step};

#[cfg(feature = "tcp-tls")]
use super::tls::{TlsConfig, TlsSession};

// ============================================================================
// Constants
// ============================================================================

/// Token for the command waker; connection tokens are their conn ids (>= 1)
pub(crate) const WAKER_TOKEN: Token = Token(0);

/// Poll timeout, also the timer resolution of the loop
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Maximum events to process per poll
const MAX_EVENTS: usize = 256;

/// Read chunk size
const READ_CHUNK: usize = 16 * 1024;

// ============================================================================
// Commands
// ============================================================================

/// Commands sent to a worker loop.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Take ownership of an accepted socket
    Register {
        stream: TcpStream,
        conn_id: ConnId,
        remote: SocketAddr,
        tls: bool,
    },

    /// Queue pre-encoded frames, in order
    Send { conn_id: ConnId, frames: Vec<Vec<u8>> },

    /// Close a connection
    Close { conn_id: ConnId },

    /// Close everything and leave the loop
    Shutdown,
}

/// Sending half of a worker's command channel.
#[derive(Clone, Debug)]
pub(crate) struct WorkerLink {
    tx: Sender<WorkerCommand>,
    waker: Arc<Waker>,
}

impl WorkerLink {
    /// Creates the command channel and its waker on `poll`.
    pub(crate) fn new(poll: &Poll) -> io::Result<(Self, Receiver<WorkerCommand>)> {
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (tx, rx) = unbounded();
        Ok((Self { tx, waker }, rx))
    }

    pub(crate) fn submit(&self, cmd: WorkerCommand) -> OfResult<()> {
        self.tx.send(cmd).map_err(|_| OfError::Shutdown)?;
        self.waker.wake()?;
        Ok(())
    }
}

// ============================================================================
// Sink
// ============================================================================

/// What a worker reports when a connection goes away.
#[derive(Debug)]
pub(crate) struct ClosedConnection {
    pub id: ConnId,
    pub remote: SocketAddr,
    pub dpid: Option<DataPathId>,
    pub aux_id: u8,
    /// Closed by the controller after a handshake failure or violation
    pub revoked: bool,
    /// Accepted by the registry
    pub registered: bool,
    pub reason: String,
}

/// Upper layer fed by worker loops. Called on the worker thread; must not
/// block.
pub(crate) trait WorkerSink: Send + Sync {
    /// Basic handshake done. An error refuses the connection.
    fn basic_handshake(&self, handle: &Arc<ConnectionHandle>, conn: &Connection) -> OfResult<()>;

    /// Extended handshake done (main connections only).
    fn extended_handshake(&self, handle: &Arc<ConnectionHandle>, conn: &Connection);

    /// Post-handshake message, in receive order.
    fn message(&self, handle: &Arc<ConnectionHandle>, msg: Message);

    fn closed(&self, closed: ClosedConnection);
}

// ============================================================================
// Worker settings
// ============================================================================

/// Per-connection settings copied out of the controller configuration.
#[derive(Clone, Debug)]
pub(crate) struct WorkerSettings {
    pub supported: VersionSet,
    pub hello_grace: Duration,
    pub liveness: LivenessConfig,
    pub max_frame_size: usize,
    #[cfg(feature = "tcp-tls")]
    pub tls: Option<TlsConfig>,
}

impl WorkerSettings {
    pub(crate) fn from_config(config: &ControllerConfig) -> Self {
        Self {
            supported: config.supported_versions.clone(),
            hello_grace: config.hello_grace,
            liveness: config.liveness,
            max_frame_size: config.max_frame_size,
            #[cfg(feature = "tcp-tls")]
            tls: config.tls_config.clone(),
        }
    }
}

// ============================================================================
// Per-connection I/O state
// ============================================================================

struct IoConnection {
    stream: TcpStream,
    conn: Connection,

    /// Published once the basic handshake completes
    handle: Option<Arc<ConnectionHandle>>,

    /// Accepted by the registry
    registered: bool,

    frames: FrameCodec,
    send_queue: Vec<u8>,
    send_offset: usize,

    #[cfg(feature = "tcp-tls")]
    tls: Option<TlsSession>,
}

impl IoConnection {
    /// Drains the socket into `out`. Returns `Ok(false)` once the peer has
    /// closed its side.
    fn read_available(&mut self, out: &mut Vec<u8>) -> io::Result<bool> {
        #[cfg(feature = "tcp-tls")]
        if let Some(tls) = self.tls.as_mut() {
            let open = tls.read_into(&mut self.stream, out)?;
            // handshake records and alerts; a closed peer may refuse them
            // but what it sent before closing still gets framed
            match tls.flush_to(&mut self.stream) {
                Err(e) if open => return Err(e),
                _ => return Ok(open),
            }
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes as much of the send queue as the socket accepts.
    fn write_pending(&mut self) -> io::Result<()> {
        #[cfg(feature = "tcp-tls")]
        if let Some(tls) = self.tls.as_mut() {
            while self.send_offset < self.send_queue.len() {
                let n = tls.write_plaintext(&self.send_queue[self.send_offset..])?;
                if n == 0 {
                    break;
                }
                self.send_offset += n;
            }
            tls.flush_to(&mut self.stream)?;
            self.compact();
            return Ok(());
        }

        while self.send_offset < self.send_queue.len() {
            match self.stream.write(&self.send_queue[self.send_offset..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.send_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.compact();
        Ok(())
    }

    fn compact(&mut self) {
        if self.send_offset >= self.send_queue.len() {
            self.send_queue.clear();
            self.send_offset = 0;
        }
    }
}

// ============================================================================
// Worker handle
// ============================================================================

/// Owner-side handle of a running worker loop.
pub(crate) struct WorkerHandle {
    index: usize,
    link: WorkerLink,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn link(&self) -> &WorkerLink {
        &self.link
    }

    /// Asks the loop to stop; does not wait.
    pub(crate) fn request_shutdown(&self) {
        if let Err(e) = self.link.submit(WorkerCommand::Shutdown) {
            log::debug!("[ofctl-worker-{}] already stopped: {}", self.index, e);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Joins the thread if it has already exited.
    pub(crate) fn reap(&mut self) {
        if self.is_finished() {
            if let Some(t) = self.thread.take() {
                if t.join().is_err() {
                    log::error!("[ofctl-worker-{}] loop panicked", self.index);
                }
            }
        }
    }
}

// ============================================================================
// Worker loop
// ============================================================================

pub(crate) struct Worker {
    index: usize,
    poll: Poll,
    commands: Receiver<WorkerCommand>,
    link: WorkerLink,
    connections: HashMap<Token, IoConnection>,

    settings: WorkerSettings,
    sink: Arc<dyn WorkerSink>,
    codec: Arc<dyn MessageCodec>,
    stats: Arc<ControllerStats>,

    running: bool,
    last_idle_check: Instant,
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        settings: WorkerSettings,
        sink: Arc<dyn WorkerSink>,
        codec: Arc<dyn MessageCodec>,
        stats: Arc<ControllerStats>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let (link, commands) = WorkerLink::new(&poll)?;
        Ok(Self {
            index,
            poll,
            commands,
            link,
            connections: HashMap::new(),
            settings,
            sink,
            codec,
            stats,
            running: true,
            last_idle_check: Instant::now(),
        })
    }

    /// Spawns the loop on its own thread.
    pub(crate) fn spawn(self) -> io::Result<WorkerHandle> {
        let index = self.index;
        let link = self.link.clone();
        let thread = thread::Builder::new()
            .name(format!("ofctl-worker-{}", index))
            .spawn(move || self.run())?;
        Ok(WorkerHandle {
            index,
            link,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        log::debug!("[ofctl-worker-{}] started", self.index);
        let mut events = Events::with_capacity(MAX_EVENTS);

        while self.running {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::error!("[ofctl-worker-{}] poll failed: {}", self.index, e);
                }
                continue;
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => self.handle_commands(),
                    token => {
                        if event.is_readable() || event.is_read_closed() {
                            self.handle_readable(token);
                        }
                        if event.is_writable() {
                            self.try_flush(token);
                        }
                    }
                }
            }

            self.tick(Instant::now());
        }

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close_connection(token, "worker shutdown");
        }
        log::info!("[ofctl-worker-{}] stopped", self.index);
    }

    fn handle_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::Register {
                    stream,
                    conn_id,
                    remote,
                    tls,
                }) => self.register(stream, conn_id, remote, tls),
                Ok(WorkerCommand::Send { conn_id, frames }) => {
                    self.queue_frames(Token(conn_id as usize), frames);
                }
                Ok(WorkerCommand::Close { conn_id }) => {
                    self.close_connection(Token(conn_id as usize), "closed by request");
                }
                Ok(WorkerCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.running = false;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
    }

    fn register(&mut self, mut stream: TcpStream, conn_id: ConnId, remote: SocketAddr, tls: bool) {
        let token = Token(conn_id as usize);
        if let Err(e) = self.poll.registry().register(
            &mut stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            log::error!(
                "[ofctl-worker-{}] cannot register {}: {}",
                self.index, remote, e
            );
            return;
        }

        #[cfg(feature = "tcp-tls")]
        let tls = if tls {
            let session = self
                .settings
                .tls
                .as_ref()
                .ok_or_else(|| OfError::Tls("no TLS configuration".into()))
                .and_then(TlsSession::new);
            match session {
                Ok(s) => Some(s),
                Err(e) => {
                    log::warn!("[ofctl-worker-{}] {}: {}", self.index, remote, e);
                    let _ = self.poll.registry().deregister(&mut stream);
                    return;
                }
            }
        } else {
            None
        };
        #[cfg(not(feature = "tcp-tls"))]
        if tls {
            log::warn!(
                "[ofctl-worker-{}] {}: TLS support not compiled in",
                self.index, remote
            );
            let _ = self.poll.registry().deregister(&mut stream);
            return;
        }

        let conn = Connection::new(
            conn_id,
            remote,
            self.settings.supported.clone(),
            self.settings.hello_grace,
            self.settings.liveness,
            Instant::now(),
        );
        log::debug!("[ofctl-worker-{}] owns {}", self.index, conn);

        self.connections.insert(
            token,
            IoConnection {
                stream,
                conn,
                handle: None,
                registered: false,
                frames: FrameCodec::new(self.settings.max_frame_size),
                send_queue: Vec::new(),
                send_offset: 0,
                #[cfg(feature = "tcp-tls")]
                tls,
            },
        );
    }

    fn queue_frames(&mut self, token: Token, frames: Vec<Vec<u8>>) {
        let Some(io) = self.connections.get_mut(&token) else {
            log::debug!(
                "[ofctl-worker-{}] send to unknown connection {}",
                self.index, token.0
            );
            return;
        };
        for frame in &frames {
            io.send_queue.extend_from_slice(frame);
        }
        self.try_flush(token);
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn handle_readable(&mut self, token: Token) {
        let Some(io) = self.connections.get_mut(&token) else {
            return;
        };

        let mut data = Vec::new();
        let open = match io.read_available(&mut data) {
            Ok(open) => open,
            Err(e) => {
                self.close_connection(token, &format!("read error: {}", e));
                return;
            }
        };

        io.frames.feed(&data);
        let mut frames = Vec::new();
        loop {
            match io.frames.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) => {
                    log::warn!(
                        "[ofctl-worker-{}] {} framing error: {}",
                        self.index, io.conn, e
                    );
                    self.close_connection(token, "framing error");
                    return;
                }
            }
        }

        for frame in frames {
            // a panicking codec or sink upcall takes down this connection only
            let outcome = catch_unwind(AssertUnwindSafe(|| self.process_frame(token, &frame)));
            match outcome {
                Ok(true) => {}
                Ok(false) => return,
                Err(_) => {
                    log::error!(
                        "[ofctl-worker-{}] panic while processing connection {}, dropping it",
                        self.index, token.0
                    );
                    self.revoke(token, "panic while processing message");
                    return;
                }
            }
        }

        if !open {
            self.close_connection(token, "connection closed by peer");
        }
    }

    /// Returns false once the connection is gone.
    fn process_frame(&mut self, token: Token, frame: &[u8]) -> bool {
        let msg = match self.codec.decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!(
                    "[ofctl-worker-{}] dropping undecodable frame ({} bytes): {}",
                    self.index,
                    frame.len(),
                    e
                );
                return true;
            }
        };
        self.stats.count_rx(&msg);

        let Some(io) = self.connections.get_mut(&token) else {
            return false;
        };
        if let Some(handle) = &io.handle {
            handle.touch();
        }
        let step = io.conn.process_message(msg, Instant::now());
        self.apply_step(token, step)
    }

    fn apply_step(&mut self, token: Token, step: OfResult<Step>) -> bool {
        match step {
            Err(e) => {
                self.revoke(token, &e.to_string());
                false
            }
            Ok(Step::Consumed) => {
                self.flush_outbox(token);
                true
            }
            Ok(Step::Deliver(msg)) => {
                self.flush_outbox(token);
                match self.connections.get(&token).and_then(|io| io.handle.clone()) {
                    Some(handle) => self.sink.message(&handle, msg),
                    None => log::debug!(
                        "[ofctl-worker-{}] no handle for {}, dropped",
                        self.index, msg
                    ),
                }
                true
            }
            Ok(Step::BasicDone) => self.on_basic_done(token),
            Ok(Step::ExtendedDone) => {
                self.flush_outbox(token);
                if let Some(io) = self.connections.get(&token) {
                    if let Some(handle) = &io.handle {
                        self.sink.extended_handshake(handle, &io.conn);
                    }
                }
                true
            }
            Ok(Step::Revoke(reason)) => {
                self.revoke(token, &reason);
                false
            }
        }
    }

    fn on_basic_done(&mut self, token: Token) -> bool {
        let Some(io) = self.connections.get_mut(&token) else {
            return false;
        };
        let (Some(dpid), Some(version)) = (io.conn.dpid(), io.conn.negotiated()) else {
            self.revoke(token, "basic handshake incomplete");
            return false;
        };

        let handle = Arc::new(ConnectionHandle::new(
            io.conn.id(),
            io.conn.remote_addr(),
            version,
            dpid,
            io.conn.aux_id(),
            self.link.clone(),
            Arc::clone(&self.codec),
        ));
        io.handle = Some(Arc::clone(&handle));

        if let Err(e) = self.sink.basic_handshake(&handle, &io.conn) {
            self.revoke(token, &e.to_string());
            return false;
        }
        io.registered = true;
        if io.conn.is_main() {
            io.conn.start_extended();
        }
        self.flush_outbox(token);
        true
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Encodes the connection's outbox onto its send queue and flushes.
    fn flush_outbox(&mut self, token: Token) {
        let Some(io) = self.connections.get_mut(&token) else {
            return;
        };
        for msg in io.conn.take_outbox() {
            self.stats.count_tx(&msg);
            match self.codec.encode(&msg) {
                Ok(frame) => io.send_queue.extend_from_slice(&frame),
                Err(e) => log::warn!(
                    "[ofctl-worker-{}] cannot encode {} for {}: {}",
                    self.index, msg, io.conn, e
                ),
            }
        }
        self.try_flush(token);
    }

    fn try_flush(&mut self, token: Token) {
        let Some(io) = self.connections.get_mut(&token) else {
            return;
        };
        if let Err(e) = io.write_pending() {
            self.close_connection(token, &format!("write error: {}", e));
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn tick(&mut self, now: Instant) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();

        for &token in &tokens {
            let fired = self
                .connections
                .get_mut(&token)
                .is_some_and(|io| io.conn.poll_hello_timer(now));
            if fired {
                self.flush_outbox(token);
            }
        }

        if now.saturating_duration_since(self.last_idle_check) < self.settings.liveness.idle_check {
            return;
        }
        self.last_idle_check = now;

        for token in tokens {
            let Some(io) = self.connections.get_mut(&token) else {
                continue;
            };
            if io.conn.check_liveness(now) {
                if io.conn.has_outbound() {
                    self.flush_outbox(token);
                }
            } else {
                log::info!(
                    "[ofctl-worker-{}] idle disconnect: {} stopped answering echo requests",
                    self.index, io.conn
                );
                self.close_connection(token, "idle");
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Revokes the connection, flushes what it queued (ERROR replies) and
    /// closes it.
    fn revoke(&mut self, token: Token, reason: &str) {
        if let Some(io) = self.connections.get_mut(&token) {
            log::warn!("[ofctl-worker-{}] dropping {}: {}", self.index, io.conn, reason);
            io.conn.revoke();
        }
        self.flush_outbox(token);
        self.close_connection(token, reason);
    }

    fn close_connection(&mut self, token: Token, reason: &str) {
        let Some(mut io) = self.connections.remove(&token) else {
            return;
        };
        let _ = self.poll.registry().deregister(&mut io.stream);
        log::debug!("[ofctl-worker-{}] closed {}: {}", self.index, io.conn, reason);

        let revoked = io.conn.is_revoked();
        if revoked {
            if let Some(handle) = &io.handle {
                handle.mark_revoked();
            }
        }
        let closed = ClosedConnection {
            id: io.conn.id(),
            remote: io.conn.remote_addr(),
            dpid: io.conn.dpid(),
            aux_id: io.conn.aux_id(),
            revoked,
            registered: io.registered,
            reason: reason.to_string(),
        };
        if catch_unwind(AssertUnwindSafe(|| self.sink.closed(closed))).is_err() {
            log::error!(
                "[ofctl-worker-{}] close handling for {} panicked",
                self.index, io.conn
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
