// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection protocol sessions.

pub mod connection;
pub mod handle;

pub use connection::{ConnId, Connection, HandshakeState, Step, MAIN_AUX_ID};
pub use handle::ConnectionHandle;
