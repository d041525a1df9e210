// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller state shared across worker loops and application threads.

mod state;
pub mod futures;
pub mod info;
pub mod registry;
pub mod stats;

#[cfg(test)]
pub(crate) mod testkit;

pub use state::ControllerCore;
pub use futures::{FutureRegistry, FutureResult, MessageFuture};
pub use info::{ConnectionDetails, DataPathInfo};
pub use registry::{Datapath, DatapathRegistry};
pub use stats::{ControllerStats, StatsSnapshot};
