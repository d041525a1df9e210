// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the controller core.

use std::fmt;
use std::io;

use crate::protocol::{CodecError, DataPathId, ErrorBody, MessageType, ProtocolVersion};

/// Result type for controller operations.
pub type OfResult<T> = Result<T, OfError>;

/// Errors surfaced by the controller core.
#[derive(Debug)]
pub enum OfError {
    /// Socket level failure
    Io(io::Error),

    /// Frame could not be encoded or decoded
    Codec(CodecError),

    /// Peer violated the handshake protocol (duplicate HELLO, duplicate
    /// FEATURES_REPLY, ...)
    Protocol(String),

    /// Message version differs from the version negotiated with the datapath
    VersionMismatch {
        expected: ProtocolVersion,
        actual: ProtocolVersion,
    },

    /// Message rejected before sending (type or xid not acceptable)
    InvalidMessage(String),

    /// No datapath registered under this id
    NoSuchDatapath(DataPathId),

    /// Datapath has no connection with this auxiliary id
    NoSuchAuxiliary { dpid: DataPathId, aux_id: u8 },

    /// A main connection is already registered for this id
    DuplicateDatapath(DataPathId),

    /// Auxiliary connection arrived before its main connection
    NoMainConnection { dpid: DataPathId, aux_id: u8 },

    /// A pending future already exists for this (datapath, xid) pair
    DuplicateXid { dpid: DataPathId, xid: u32 },

    /// Controller does not hold the master role for the datapath
    NotMaster(DataPathId),

    /// Blocking wait on a message future exceeded its bound
    Timeout(String),

    /// Datapath answered a request with an OpenFlow ERROR
    ErrorReply {
        request: MessageType,
        error: ErrorBody,
    },

    /// Requested entity does not exist on the datapath
    NotFound(String),

    /// Caller passed an unusable argument
    InvalidArgument(String),

    /// Configuration rejected by validation
    Config(&'static str),

    /// TLS setup failure
    Tls(String),

    /// Controller is shutting down or has shut down
    Shutdown,

    /// Several independent validation failures
    Validation(ValidationErrors),
}

impl fmt::Display for OfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            Self::VersionMismatch { expected, actual } => write!(
                f,
                "message version {} does not match negotiated version {}",
                actual, expected
            ),
            Self::InvalidMessage(msg) => write!(f, "invalid message: {}", msg),
            Self::NoSuchDatapath(dpid) => write!(f, "no such datapath: {}", dpid),
            Self::NoSuchAuxiliary { dpid, aux_id } => {
                write!(f, "datapath {} has no auxiliary channel {}", dpid, aux_id)
            }
            Self::DuplicateDatapath(dpid) => {
                write!(f, "main connection already registered for {}", dpid)
            }
            Self::NoMainConnection { dpid, aux_id } => write!(
                f,
                "auxiliary channel {} arrived before main connection of {}",
                aux_id, dpid
            ),
            Self::DuplicateXid { dpid, xid } => {
                write!(f, "future already pending for {} xid {}", dpid, xid)
            }
            Self::NotMaster(dpid) => write!(f, "not master for datapath {}", dpid),
            Self::Timeout(msg) => write!(f, "timed out: {}", msg),
            Self::ErrorReply { request, error } => {
                write!(f, "{} answered with error {}", request, error)
            }
            Self::NotFound(msg) => write!(f, "not found: {}", msg),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Self::Tls(msg) => write!(f, "TLS error: {}", msg),
            Self::Shutdown => write!(f, "controller shut down"),
            Self::Validation(errs) => write!(f, "{}", errs),
        }
    }
}

impl std::error::Error for OfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OfError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for OfError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ============================================================================
// Aggregate validation
// ============================================================================

/// Collection of independent failures reported together.
#[derive(Debug, Default)]
pub struct ValidationErrors {
    errors: Vec<OfError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: OfError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[OfError] {
        &self.errors
    }

    /// `Ok(())` when nothing was collected, the aggregate otherwise.
    pub fn into_result(self) -> OfResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(OfError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            write!(f, "\n  [{}] {}", i, e)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_empty_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_validation_errors_collects_all() {
        let mut errs = ValidationErrors::new();
        errs.push(OfError::InvalidMessage("xid 0".into()));
        errs.push(OfError::NotMaster(DataPathId::from(7)));
        assert_eq!(errs.len(), 2);

        match errs.into_result() {
            Err(OfError::Validation(v)) => {
                let text = v.to_string();
                assert!(text.starts_with("2 validation error(s)"));
                assert!(text.contains("xid 0"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_io_error_source() {
        let err = OfError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("gone"));
    }
}
