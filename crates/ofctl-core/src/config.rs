// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller configuration.
//!
//! Provides configuration types for the controller core:
//! - [`ControllerConfig`] - Listener, worker, handshake and dispatch settings
//! - [`LivenessConfig`] - Idle detection and echo probing
//!
//! # Example
//!
//! ```
//! use ofctl_core::config::ControllerConfig;
//!
//! let config = ControllerConfig::default()
//!     .with_port(6653)
//!     .with_worker_count(4);
//! assert!(config.validate().is_ok());
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::protocol::{ProtocolVersion, VersionSet, DEFAULT_MAX_FRAME_SIZE};
use crate::transport::tls::TlsConfig;

// ============================================================================
// Constants
// ============================================================================

/// Default plain OpenFlow listen port.
pub const DEF_PORT: u16 = 6633;

/// Default secure OpenFlow listen port.
pub const DEF_TLS_PORT: u16 = 6634;

/// Default number of I/O worker loops.
pub const DEF_WORKER_COUNT: usize = 16;

/// Upper bound on worker loops.
pub const MAX_WORKER_COUNT: usize = 256;

/// Default socket receive buffer size (1 MiB).
pub const DEF_RCV_BUF_SIZE: usize = 1024 * 1024;

/// Queue capacity for message listeners.
pub const RX_Q_CAPACITY: usize = 2000;

/// Queue capacity for datapath listeners.
pub const DP_Q_CAPACITY: usize = 500;

/// Probation ends once a queue drains below this fraction of capacity.
pub const Q_FULL_RESET_THRESHOLD: f64 = 0.5;

// ============================================================================
// Liveness
// ============================================================================

/// Connection liveness settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often worker loops sweep their connections
    pub idle_check: Duration,

    /// Silence after which an ECHO_REQUEST is sent
    pub max_idle: Duration,

    /// Wait between successive echo requests
    pub max_echo_wait: Duration,

    /// Unanswered echo requests tolerated before disconnecting
    pub max_echo_attempts: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            idle_check: Duration::from_millis(500),
            max_idle: Duration::from_millis(5000),
            max_echo_wait: Duration::from_millis(5000),
            max_echo_attempts: 5,
        }
    }
}

// ============================================================================
// Controller configuration
// ============================================================================

/// Controller core configuration.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    // === Listeners ===
    /// Address to bind listeners on
    pub listen_address: IpAddr,

    /// Plain TCP port. 0 binds an ephemeral port, unless the secure
    /// listener is active, in which case no plain listener is started
    pub port: u16,

    /// TLS port (0 = do not listen; also requires `tls_config`)
    pub tls_port: u16,

    /// Server TLS material
    pub tls_config: Option<TlsConfig>,

    /// Socket receive buffer size applied to accepted connections
    pub recv_buffer_size: usize,

    // === Workers ===
    /// Number of I/O worker loops
    pub worker_count: usize,

    /// Maximum accepted frame size
    pub max_frame_size: usize,

    // === Handshake ===
    /// Versions the controller is willing to speak
    pub supported_versions: VersionSet,

    /// Wait for the peer's HELLO before sending our own
    pub hello_grace: Duration,

    /// Idle detection
    pub liveness: LivenessConfig,

    // === Futures ===
    /// Interval of the stale-future sweep
    pub future_sweep_interval: Duration,

    /// Age after which a pending future is failed
    pub future_age_out: Duration,

    /// Bound on synchronous facade waits
    pub blocking_wait: Duration,

    // === Dispatch ===
    /// Queue capacity per message listener
    pub rx_queue_capacity: usize,

    /// Queue capacity per datapath listener
    pub dp_queue_capacity: usize,

    /// Fraction of capacity below which probation ends
    pub queue_reset_ratio: f64,

    /// Reader threads serving datapath listeners
    pub dp_reader_threads: usize,

    /// Reader threads serving message listeners
    pub msg_reader_threads: usize,

    // === Shutdown ===
    /// Wait for loops to terminate before giving up on them
    pub shutdown_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEF_PORT,
            tls_port: DEF_TLS_PORT,
            tls_config: None,
            recv_buffer_size: DEF_RCV_BUF_SIZE,
            worker_count: DEF_WORKER_COUNT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            supported_versions: [ProtocolVersion::V_1_0, ProtocolVersion::V_1_3]
                .into_iter()
                .collect(),
            hello_grace: Duration::from_millis(200),
            liveness: LivenessConfig::default(),
            future_sweep_interval: Duration::from_secs(120),
            future_age_out: Duration::from_millis(6000),
            blocking_wait: Duration::from_millis(3000),
            rx_queue_capacity: RX_Q_CAPACITY,
            dp_queue_capacity: DP_Q_CAPACITY,
            queue_reset_ratio: Q_FULL_RESET_THRESHOLD,
            dp_reader_threads: 2,
            msg_reader_threads: 4,
            shutdown_grace: Duration::from_millis(1000),
        }
    }
}

impl ControllerConfig {
    /// Configuration suited to tests: ephemeral plain port, no TLS, few workers.
    pub fn ephemeral() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            tls_port: 0,
            worker_count: 2,
            ..Default::default()
        }
    }

    pub fn with_listen_address(mut self, addr: IpAddr) -> Self {
        self.listen_address = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tls(mut self, port: u16, tls: TlsConfig) -> Self {
        self.tls_port = port;
        self.tls_config = Some(tls);
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_supported_versions(mut self, versions: &[ProtocolVersion]) -> Self {
        self.supported_versions = versions.iter().copied().collect();
        self
    }

    pub fn with_hello_grace(mut self, grace: Duration) -> Self {
        self.hello_grace = grace;
        self
    }

    pub fn with_liveness(mut self, liveness: LivenessConfig) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_future_age_out(mut self, age: Duration, sweep: Duration) -> Self {
        self.future_age_out = age;
        self.future_sweep_interval = sweep;
        self
    }

    pub fn with_queue_capacities(mut self, rx: usize, dp: usize) -> Self {
        self.rx_queue_capacity = rx;
        self.dp_queue_capacity = dp;
        self
    }

    pub fn with_blocking_wait(mut self, wait: Duration) -> Self {
        self.blocking_wait = wait;
        self
    }

    /// Highest version we advertise.
    pub fn max_version(&self) -> Option<ProtocolVersion> {
        self.supported_versions.iter().next_back().copied()
    }

    /// True when the secure listener will be started.
    pub fn tls_enabled(&self) -> bool {
        self.tls_port != 0 && self.tls_config.is_some()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.worker_count == 0 {
            return Err("worker_count must be > 0");
        }
        if self.worker_count > MAX_WORKER_COUNT {
            return Err("worker_count exceeds MAX_WORKER_COUNT");
        }
        if self.supported_versions.is_empty() {
            return Err("supported_versions must not be empty");
        }
        if self.supported_versions.iter().any(|v| !v.is_known()) {
            return Err("supported_versions contains an unknown version");
        }
        if self.port != 0 && self.port == self.tls_port && self.tls_config.is_some() {
            return Err("port and tls_port must differ");
        }
        if self.max_frame_size < crate::protocol::HEADER_LEN {
            return Err("max_frame_size smaller than the OpenFlow header");
        }
        if self.rx_queue_capacity == 0 || self.dp_queue_capacity == 0 {
            return Err("queue capacities must be > 0");
        }
        if !(self.queue_reset_ratio > 0.0 && self.queue_reset_ratio < 1.0) {
            return Err("queue_reset_ratio must be within (0, 1)");
        }
        if self.dp_reader_threads == 0 || self.msg_reader_threads == 0 {
            return Err("reader thread counts must be > 0");
        }
        if self.liveness.idle_check.is_zero() {
            return Err("liveness.idle_check must be > 0");
        }
        if self.future_sweep_interval.is_zero() {
            return Err("future_sweep_interval must be > 0");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
