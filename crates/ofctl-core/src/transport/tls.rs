// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS support for the secure OpenFlow listener.
//!
//! Datapaths connecting on the TLS port get a rustls server session; the
//! worker loop pumps ciphertext through it and frames the plaintext exactly
//! like a plain connection.
//!
//! # Example
//!
//! ```ignore
//! use ofctl_core::transport::tls::TlsConfigBuilder;
//!
//! let tls = TlsConfigBuilder::server()
//!     .with_cert_file("controller.crt")?
//!     .with_key_file("controller.key")?
//!     .build()?;
//! let config = ControllerConfig::default().with_tls(6634, tls);
//! ```

use std::fmt;
use std::io;
#[cfg(feature = "tcp-tls")]
use std::io::{Read, Write};
use std::path::Path;
#[cfg(feature = "tcp-tls")]
use std::sync::Arc;

use crate::error::{OfError, OfResult};

// ============================================================================
// TLS Configuration
// ============================================================================

/// Server-side TLS material for the secure listener.
#[derive(Clone)]
pub struct TlsConfig {
    #[cfg(feature = "tcp-tls")]
    pub(crate) server_config: Arc<rustls::ServerConfig>,

    /// Number of certificates in the served chain
    pub(crate) chain_len: usize,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("chain_len", &self.chain_len)
            .finish()
    }
}

impl TlsConfig {
    pub fn chain_len(&self) -> usize {
        self.chain_len
    }
}

/// Builder for [`TlsConfig`].
#[derive(Default)]
pub struct TlsConfigBuilder {
    cert_chain: Option<Vec<u8>>,
    private_key: Option<Vec<u8>>,
}

impl TlsConfigBuilder {
    /// Create a builder for the server side.
    pub fn server() -> Self {
        Self::default()
    }

    /// Set the certificate chain (PEM format).
    pub fn with_cert_pem(mut self, pem_data: Vec<u8>) -> Self {
        self.cert_chain = Some(pem_data);
        self
    }

    /// Load certificate chain from a file.
    pub fn with_cert_file(self, path: impl AsRef<Path>) -> io::Result<Self> {
        let pem_data = std::fs::read(path)?;
        Ok(self.with_cert_pem(pem_data))
    }

    /// Set the private key (PEM format).
    pub fn with_key_pem(mut self, pem_data: Vec<u8>) -> Self {
        self.private_key = Some(pem_data);
        self
    }

    /// Load private key from a file.
    pub fn with_key_file(self, path: impl AsRef<Path>) -> io::Result<Self> {
        let pem_data = std::fs::read(path)?;
        Ok(self.with_key_pem(pem_data))
    }

    /// Build the TLS configuration.
    #[cfg(feature = "tcp-tls")]
    pub fn build(self) -> OfResult<TlsConfig> {
        use rustls::pki_types::CertificateDer;

        let cert_pem = self
            .cert_chain
            .ok_or_else(|| OfError::Tls("server requires a certificate".into()))?;
        let key_pem = self
            .private_key
            .ok_or_else(|| OfError::Tls("server requires a private key".into()))?;

        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OfError::Tls(format!("bad certificate PEM: {}", e)))?;
        if certs.is_empty() {
            return Err(OfError::Tls("no certificates found in PEM data".into()));
        }

        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|e| OfError::Tls(format!("bad key PEM: {}", e)))?
            .ok_or_else(|| OfError::Tls("no private key found in PEM data".into()))?;

        let chain_len = certs.len();
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| OfError::Tls(e.to_string()))?;

        Ok(TlsConfig {
            server_config: Arc::new(config),
            chain_len,
        })
    }

    /// Build the TLS configuration.
    #[cfg(not(feature = "tcp-tls"))]
    pub fn build(self) -> OfResult<TlsConfig> {
        Err(OfError::Tls("built without the tcp-tls feature".into()))
    }
}

// ============================================================================
// Server session
// ============================================================================

/// rustls server session bound to one accepted socket.
#[cfg(feature = "tcp-tls")]
pub(crate) struct TlsSession {
    conn: rustls::ServerConnection,
}

#[cfg(feature = "tcp-tls")]
impl TlsSession {
    pub(crate) fn new(config: &TlsConfig) -> OfResult<Self> {
        let conn = rustls::ServerConnection::new(Arc::clone(&config.server_config))
            .map_err(|e| OfError::Tls(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Pull ciphertext from the socket and decrypt it, appending plaintext
    /// to `out`. Returns `Ok(false)` on EOF, after everything the peer sent
    /// before closing has been appended.
    pub(crate) fn read_into(&mut self, sock: &mut impl Read, out: &mut Vec<u8>) -> io::Result<bool> {
        loop {
            match self.conn.read_tls(sock) {
                Ok(0) => {
                    self.decrypt()?;
                    self.drain_plaintext(out)?;
                    return Ok(false);
                }
                Ok(_) => {
                    self.decrypt()?;
                    // keep the plaintext buffer from filling up on a burst
                    if !self.drain_plaintext(out)? {
                        return Ok(false);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn decrypt(&mut self) -> io::Result<()> {
        self.conn
            .process_new_packets()
            .map(|_| ())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Returns `Ok(false)` once the peer has closed the session.
    fn drain_plaintext(&mut self, out: &mut Vec<u8>) -> io::Result<bool> {
        let mut plaintext = [0u8; 16384];
        loop {
            match self.conn.reader().read(&mut plaintext) {
                Ok(0) => return Ok(false),
                Ok(n) => out.extend_from_slice(&plaintext[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                // transport EOF without close_notify
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    /// Queue plaintext for encryption.
    pub(crate) fn write_plaintext(&mut self, data: &[u8]) -> io::Result<usize> {
        self.conn.writer().write(data)
    }

    /// Push pending ciphertext to the socket. Returns `Ok(true)` when the
    /// session has nothing left to write.
    pub(crate) fn flush_to(&mut self, sock: &mut impl Write) -> io::Result<bool> {
        while self.conn.wants_write() {
            match self.conn.write_tls(sock) {
                Ok(0) => return Ok(false),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================
