// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection handles without sockets, for unit tests above the worker.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::protocol::{DataPathId, Message, MessageCodec, ProtocolVersion, WireCodec};
use crate::session::{ConnId, ConnectionHandle};
use crate::transport::worker::{WorkerCommand, WorkerLink};

/// Hands out handles whose worker side is a channel the test can read.
pub(crate) struct LinkFixture {
    // mio allows one Waker per Poll, so each handle gets its own.
    polls: RefCell<Vec<mio::Poll>>,
    commands: RefCell<HashMap<ConnId, Receiver<WorkerCommand>>>,
}

impl LinkFixture {
    pub(crate) fn new() -> Self {
        Self {
            polls: RefCell::new(Vec::new()),
            commands: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn handle(
        &self,
        id: ConnId,
        dpid: u64,
        aux_id: u8,
        version: ProtocolVersion,
    ) -> Arc<ConnectionHandle> {
        let poll = mio::Poll::new().unwrap();
        let (link, rx) = WorkerLink::new(&poll).unwrap();
        self.polls.borrow_mut().push(poll);
        self.commands.borrow_mut().insert(id, rx);
        Arc::new(ConnectionHandle::new(
            id,
            "192.0.2.10:40000".parse().unwrap(),
            version,
            DataPathId::from(dpid),
            aux_id,
            link,
            Arc::new(WireCodec::new()),
        ))
    }

    /// Messages queued on connection `id` so far, decoded.
    pub(crate) fn sent(&self, id: ConnId) -> Vec<Message> {
        let commands = self.commands.borrow();
        let Some(rx) = commands.get(&id) else {
            return Vec::new();
        };
        let codec = WireCodec::new();
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            if let WorkerCommand::Send { frames, .. } = cmd {
                out.extend(frames.iter().map(|f| codec.decode(f).unwrap()));
            }
        }
        out
    }

    /// True if a close was requested for connection `id`.
    pub(crate) fn closed(&self, id: ConnId) -> bool {
        let commands = self.commands.borrow();
        commands.get(&id).map_or(false, |rx| {
            rx.try_iter()
                .any(|cmd| matches!(cmd, WorkerCommand::Close { .. }))
        })
    }
}
