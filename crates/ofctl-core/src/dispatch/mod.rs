// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event dispatch.
//!
//! Every listener gets its own bounded queue; reader threads from two fixed
//! pools (datapath events, message events) drain them, so a slow listener
//! never stalls a worker loop.

pub mod event;
pub(crate) mod handler;
pub mod manager;

pub use event::{
    DataPathEvent, DataPathListener, DispatchEvent, MessageEvent, MessageListener, QueueEvent,
};
pub use manager::{ListenerManager, ListenerSet};
