// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket side of the controller.
//!
//! - [`acceptor`]: listeners and round-robin hand-over
//! - [`worker`]: per-thread event loops owning the connections
//! - [`tls`]: rustls server sessions (feature `tcp-tls`)
//!
//! ```text
//!   acceptor ──Register──► worker 0 ─┐
//!            ──Register──► worker 1 ─┼──► WorkerSink
//!            ──Register──► worker N ─┘
//! ```

pub(crate) mod acceptor;
pub mod tls;
pub(crate) mod worker;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ControllerConfig;
use crate::controller::ControllerStats;
use crate::error::OfResult;
use crate::protocol::MessageCodec;

use acceptor::{bind_listener, Acceptor, AcceptorHandle};
use worker::{Worker, WorkerHandle, WorkerSettings, WorkerSink};

pub use tls::{TlsConfig, TlsConfigBuilder};

/// Running acceptor plus worker loops.
pub(crate) struct Transport {
    acceptor: Option<AcceptorHandle>,
    workers: Vec<WorkerHandle>,
}

impl Transport {
    /// Spawns the worker loops, binds the listeners and starts accepting.
    pub(crate) fn start(
        config: &ControllerConfig,
        sink: Arc<dyn WorkerSink>,
        codec: Arc<dyn MessageCodec>,
        stats: Arc<ControllerStats>,
    ) -> OfResult<Self> {
        let settings = WorkerSettings::from_config(config);
        let mut workers = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let worker = Worker::new(
                index,
                settings.clone(),
                Arc::clone(&sink),
                Arc::clone(&codec),
                Arc::clone(&stats),
            )?;
            workers.push(worker.spawn()?);
        }
        let mut transport = Self {
            acceptor: None,
            workers,
        };

        // on error the partially started transport is shut down by Drop
        let plain = if config.port != 0 || !config.tls_enabled() {
            Some(bind_listener(
                listen_addr(config.listen_address, config.port),
                config.recv_buffer_size,
            )?)
        } else {
            None
        };
        let secure = if config.tls_enabled() {
            Some(bind_listener(
                listen_addr(config.listen_address, config.tls_port),
                config.recv_buffer_size,
            )?)
        } else {
            None
        };

        let links = transport.workers.iter().map(|w| w.link().clone()).collect();
        let acceptor = Acceptor::new(plain, secure, links, config.recv_buffer_size)?;
        transport.acceptor = Some(acceptor.spawn()?);
        log::info!(
            "[transport] started {} worker loops",
            transport.workers.len()
        );
        Ok(transport)
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.as_ref().and_then(AcceptorHandle::local_addr)
    }

    pub(crate) fn tls_local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.as_ref().and_then(AcceptorHandle::tls_local_addr)
    }

    /// Stops accepting, then asks every worker to close its connections and
    /// waits up to `grace` for the loops to exit.
    pub(crate) fn shutdown(&mut self, grace: Duration) {
        if let Some(mut acceptor) = self.acceptor.take() {
            acceptor.shutdown();
        }
        if self.workers.is_empty() {
            return;
        }

        for w in &self.workers {
            w.request_shutdown();
        }
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && !self.workers.iter().all(WorkerHandle::is_finished) {
            thread::sleep(Duration::from_millis(5));
        }
        for w in &mut self.workers {
            if w.is_finished() {
                w.reap();
            } else {
                log::warn!(
                    "[transport] worker {} still running after {:?}, abandoning it",
                    w.index(),
                    grace
                );
            }
        }
        self.workers.clear();
        log::info!("[transport] stopped");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(100));
    }
}

fn listen_addr(ip: IpAddr, port: u16) -> SocketAddr {
    SocketAddr::new(ip, port)
}
