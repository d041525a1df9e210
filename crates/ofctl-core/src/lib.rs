// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ofctl-core - OpenFlow controller session core
//!
//! Accepts connections from OpenFlow switches ("datapaths"), drives each one
//! through the HELLO / FEATURES / multipart handshake, aggregates main and
//! auxiliary channels into one logical datapath, and fans traffic out to
//! listeners through bounded per-listener queues.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ofctl_core::{Collaborators, ControllerConfig, ControllerService, OfResult};
//!
//! fn main() -> OfResult<()> {
//!     let config = ControllerConfig::default().with_worker_count(4);
//!     let controller = ControllerService::new(config, Collaborators::default())?;
//!     controller.start()?;
//!
//!     for info in controller.get_all_data_path_info() {
//!         println!("{}", info);
//!     }
//!     controller.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                       ControllerService                             |
//! |   listeners | send / futures | snapshots | port stats / port mod    |
//! +---------------------------------------------------------------------+
//! |   ListenerManager (dispatch)   |   ControllerCore                   |
//! |   per-listener bounded queues  |   DatapathRegistry, FutureRegistry,|
//! |   reader pools, probation      |   ControllerStats                  |
//! +---------------------------------------------------------------------+
//! |                         Transport                                   |
//! |   Acceptor (plain / TLS) -> N worker loops -> Connection sessions   |
//! +---------------------------------------------------------------------+
//! |                         Protocol                                    |
//! |   Message model | MessageCodec (WireCodec) | FrameCodec             |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`service`] - application facade (start here)
//! - [`session`] - per-connection handshake state machine
//! - [`controller`] - registry, message futures, statistics
//! - [`dispatch`] - listener queues and reader pools
//! - [`transport`] - acceptor, worker loops, TLS
//! - [`protocol`] - OpenFlow vocabulary and codec seam

/// External collaborators (alerts, roles, post-handshake, packet-in, flows).
pub mod collab;
/// Controller configuration.
pub mod config;
/// Shared controller state: datapath registry, futures, statistics.
pub mod controller;
/// Listener queues, reader pools and events.
pub mod dispatch;
/// Error types.
pub mod error;
/// Port cache maintenance and the blocking port API.
pub mod port;
/// OpenFlow message model, codec seam and framing.
pub mod protocol;
/// Application facade.
pub mod service;
/// Per-connection protocol sessions.
pub mod session;
/// Listeners and worker loops.
pub mod transport;

pub use collab::{
    AlertLevel, AlertSink, Collaborators, FlowAdvisor, PacketSequencer, PostHandshakeCallback,
    PostHandshakeSink, RoleAdvisor,
};
pub use config::{ControllerConfig, LivenessConfig};
pub use controller::{DataPathInfo, FutureResult, MessageFuture, StatsSnapshot};
pub use error::{OfError, OfResult, ValidationErrors};
pub use protocol::{DataPathId, Message, MessageBuilder, MessageType, ProtocolVersion};
pub use service::ControllerService;
pub use transport::{TlsConfig, TlsConfigBuilder};
