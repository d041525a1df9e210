// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection acceptor.
//!
//! A single thread polls the plain and secure listeners, tunes every
//! accepted socket and hands it to a worker loop, round-robin.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::session::ConnId;

use super::worker::{WorkerCommand, WorkerLink};

const LISTENER_TOKEN: Token = Token(0);
const TLS_LISTENER_TOKEN: Token = Token(1);
const WAKER_TOKEN: Token = Token(2);

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Listen backlog
const BACKLOG: i32 = 128;

/// Connection ids are unique for the life of the process; 0 is never used.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Binds a non-blocking listener with SO_REUSEADDR and the configured
/// receive buffer (inherited by accepted sockets).
pub(crate) fn bind_listener(addr: SocketAddr, recv_buffer: usize) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if recv_buffer > 0 {
        socket.set_recv_buffer_size(recv_buffer)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    let listener: std::net::TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(TcpListener::from_std(listener))
}

/// Owner-side handle of the acceptor thread.
pub(crate) struct AcceptorHandle {
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    tls_local_addr: Option<SocketAddr>,
}

impl AcceptorHandle {
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub(crate) fn tls_local_addr(&self) -> Option<SocketAddr> {
        self.tls_local_addr
    }

    /// Stops accepting and joins the thread; listeners close with it.
    pub(crate) fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.waker.wake();
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                log::error!("[ofctl-acceptor] thread panicked");
            }
        }
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) struct Acceptor {
    poll: Poll,
    listener: Option<TcpListener>,
    tls_listener: Option<TcpListener>,
    workers: Vec<WorkerLink>,
    next_worker: usize,
    recv_buffer: usize,
    running: Arc<AtomicBool>,
}

impl Acceptor {
    /// Registers the listeners; either may be absent.
    pub(crate) fn new(
        listener: Option<TcpListener>,
        tls_listener: Option<TcpListener>,
        workers: Vec<WorkerLink>,
        recv_buffer: usize,
    ) -> io::Result<Self> {
        if workers.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no worker loops"));
        }
        let poll = Poll::new()?;
        let mut listener = listener;
        let mut tls_listener = tls_listener;
        if let Some(l) = listener.as_mut() {
            poll.registry().register(l, LISTENER_TOKEN, Interest::READABLE)?;
        }
        if let Some(l) = tls_listener.as_mut() {
            poll.registry()
                .register(l, TLS_LISTENER_TOKEN, Interest::READABLE)?;
        }
        Ok(Self {
            poll,
            listener,
            tls_listener,
            workers,
            next_worker: 0,
            recv_buffer,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub(crate) fn spawn(self) -> io::Result<AcceptorHandle> {
        let waker = Arc::new(Waker::new(self.poll.registry(), WAKER_TOKEN)?);
        let running = Arc::clone(&self.running);
        let local_addr = self.listener.as_ref().and_then(|l| l.local_addr().ok());
        let tls_local_addr = self.tls_listener.as_ref().and_then(|l| l.local_addr().ok());

        let thread = thread::Builder::new()
            .name("ofctl-acceptor".to_string())
            .spawn(move || self.run())?;

        Ok(AcceptorHandle {
            waker,
            running,
            thread: Some(thread),
            local_addr,
            tls_local_addr,
        })
    }

    fn run(mut self) {
        log::info!(
            "[ofctl-acceptor] listening plain={:?} tls={:?}",
            self.listener.as_ref().and_then(|l| l.local_addr().ok()),
            self.tls_listener.as_ref().and_then(|l| l.local_addr().ok())
        );
        let mut events = Events::with_capacity(64);

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::error!("[ofctl-acceptor] poll failed: {}", e);
                }
                continue;
            }
            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_all(false),
                    TLS_LISTENER_TOKEN => self.accept_all(true),
                    _ => {}
                }
            }
        }
        log::info!("[ofctl-acceptor] stopped");
    }

    fn accept_all(&mut self, tls: bool) {
        loop {
            let listener = if tls {
                self.tls_listener.as_ref()
            } else {
                self.listener.as_ref()
            };
            let Some(listener) = listener else {
                return;
            };

            match listener.accept() {
                Ok((stream, remote)) => self.hand_over(stream, remote, tls),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("[ofctl-acceptor] accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn hand_over(&mut self, stream: TcpStream, remote: SocketAddr, tls: bool) {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[ofctl-acceptor] {}: nodelay: {}", remote, e);
        }
        if self.recv_buffer > 0 {
            if let Err(e) = SockRef::from(&stream).set_recv_buffer_size(self.recv_buffer) {
                log::debug!("[ofctl-acceptor] {}: recv buffer: {}", remote, e);
            }
        }

        let conn_id: ConnId = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        let index = self.next_worker % self.workers.len();
        self.next_worker = self.next_worker.wrapping_add(1);
        log::debug!(
            "[ofctl-acceptor] accepted {}{} as conn {} -> worker {}",
            remote,
            if tls { " (tls)" } else { "" },
            conn_id,
            index
        );

        let cmd = WorkerCommand::Register {
            stream,
            conn_id,
            remote,
            tls,
        };
        if let Err(e) = self.workers[index].submit(cmd) {
            log::warn!("[ofctl-acceptor] worker {} unavailable for {}: {}", index, remote, e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
