// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol versions and HELLO version negotiation.
//!
//! Negotiation is a pure function of the two HELLO messages:
//!
//! ```text
//! peer HELLO has bitmap?  --yes-->  highest version in (peer bitmap & ours)
//!          |
//!          no
//!          v
//!   min(peer header version, our highest)  -- must be one of ours
//! ```

use std::collections::BTreeSet;
use std::fmt;

use super::message::{Message, MessageBody};

/// OpenFlow protocol version, stored as its wire code.
///
/// Unknown codes are representable so that a peer claiming an unsupported
/// version can still be answered in that version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(u8);

impl ProtocolVersion {
    pub const V_1_0: ProtocolVersion = ProtocolVersion(0x01);
    pub const V_1_1: ProtocolVersion = ProtocolVersion(0x02);
    pub const V_1_2: ProtocolVersion = ProtocolVersion(0x03);
    pub const V_1_3: ProtocolVersion = ProtocolVersion(0x04);
    pub const V_1_4: ProtocolVersion = ProtocolVersion(0x05);
    pub const V_1_5: ProtocolVersion = ProtocolVersion(0x06);

    /// Every version this crate can encode bodies for.
    pub const KNOWN: [ProtocolVersion; 6] = [
        Self::V_1_0,
        Self::V_1_1,
        Self::V_1_2,
        Self::V_1_3,
        Self::V_1_4,
        Self::V_1_5,
    ];

    pub const fn from_wire(code: u8) -> Self {
        ProtocolVersion(code)
    }

    pub const fn wire(self) -> u8 {
        self.0
    }

    pub fn is_known(self) -> bool {
        (Self::V_1_0.0..=Self::V_1_5.0).contains(&self.0)
    }

    /// Draft releases (0.8.x, 0.9) used codes from 0x97 upward.
    pub fn is_pre_release(self) -> bool {
        self.0 >= 0x80
    }

    /// True for this version or any later one.
    pub fn ge(self, other: ProtocolVersion) -> bool {
        self.0 >= other.0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x01 => write!(f, "1.0"),
            0x02 => write!(f, "1.1"),
            0x03 => write!(f, "1.2"),
            0x04 => write!(f, "1.3"),
            0x05 => write!(f, "1.4"),
            0x06 => write!(f, "1.5"),
            other => write!(f, "0x{:02x}", other),
        }
    }
}

/// Ordered set of protocol versions.
pub type VersionSet = BTreeSet<ProtocolVersion>;

/// Versions advertised by a HELLO: the bitmap when present, otherwise the
/// header version alone.
pub fn advertised(hello: &Message) -> VersionSet {
    match hello.body() {
        MessageBody::Hello(h) if !h.bitmap.is_empty() => h.bitmap.iter().copied().collect(),
        _ => std::iter::once(hello.version()).collect(),
    }
}

/// Determines the version to speak given the peer's and our own HELLO.
///
/// Returns `None` when the two sides share no version.
pub fn negotiate(peer: &Message, ours: &Message) -> Option<ProtocolVersion> {
    let our_versions: VersionSet = advertised(ours)
        .into_iter()
        .filter(|v| v.is_known())
        .collect();
    let our_max = *our_versions.iter().next_back()?;

    let peer_bitmap = match peer.body() {
        MessageBody::Hello(h) => &h.bitmap,
        _ => return None,
    };

    if !peer_bitmap.is_empty() {
        return peer_bitmap
            .iter()
            .filter(|v| our_versions.contains(v))
            .max()
            .copied();
    }

    if peer.version().is_pre_release() {
        return None;
    }
    let candidate = peer.version().min(our_max);
    our_versions.contains(&candidate).then_some(candidate)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{Hello, MessageBuilder};

    fn hello(version: ProtocolVersion, bitmap: &[ProtocolVersion]) -> Message {
        MessageBuilder::new(
            version,
            MessageBody::Hello(Hello {
                bitmap: bitmap.to_vec(),
            }),
        )
        .build()
    }

    fn controller_hello() -> Message {
        hello(
            ProtocolVersion::V_1_3,
            &[ProtocolVersion::V_1_0, ProtocolVersion::V_1_3],
        )
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProtocolVersion::V_1_0.to_string(), "1.0");
        assert_eq!(ProtocolVersion::V_1_3.to_string(), "1.3");
        assert_eq!(ProtocolVersion::from_wire(0x98).to_string(), "0x98");
    }

    #[test]
    fn test_version_ordering() {
        assert!(ProtocolVersion::V_1_3 > ProtocolVersion::V_1_0);
        assert!(ProtocolVersion::V_1_3.ge(ProtocolVersion::V_1_3));
        assert!(!ProtocolVersion::V_1_0.ge(ProtocolVersion::V_1_3));
        assert!(!ProtocolVersion::from_wire(0x98).is_known());
    }

    #[test]
    fn test_negotiate_plain_1_0_peer() {
        let peer = hello(ProtocolVersion::V_1_0, &[]);
        assert_eq!(
            negotiate(&peer, &controller_hello()),
            Some(ProtocolVersion::V_1_0)
        );
    }

    #[test]
    fn test_negotiate_1_0_reply_hello() {
        // 1.0 peers get a plain 1.0 HELLO back
        let peer = hello(ProtocolVersion::V_1_0, &[]);
        let ours = hello(ProtocolVersion::V_1_0, &[]);
        assert_eq!(negotiate(&peer, &ours), Some(ProtocolVersion::V_1_0));
    }

    #[test]
    fn test_negotiate_bitmap_1_3() {
        let peer = hello(ProtocolVersion::V_1_3, &[ProtocolVersion::V_1_3]);
        assert_eq!(
            negotiate(&peer, &controller_hello()),
            Some(ProtocolVersion::V_1_3)
        );
    }

    #[test]
    fn test_negotiate_bitmap_picks_highest_common() {
        let peer = hello(
            ProtocolVersion::V_1_5,
            &[
                ProtocolVersion::V_1_0,
                ProtocolVersion::V_1_3,
                ProtocolVersion::V_1_4,
                ProtocolVersion::V_1_5,
            ],
        );
        assert_eq!(
            negotiate(&peer, &controller_hello()),
            Some(ProtocolVersion::V_1_3)
        );
    }

    #[test]
    fn test_negotiate_newer_peer_without_bitmap() {
        let peer = hello(ProtocolVersion::V_1_4, &[]);
        assert_eq!(
            negotiate(&peer, &controller_hello()),
            Some(ProtocolVersion::V_1_3)
        );
    }

    #[test]
    fn test_negotiate_unsupported_intermediate() {
        // min(1.1, 1.3) = 1.1 which we do not speak
        let peer = hello(ProtocolVersion::V_1_1, &[]);
        assert_eq!(negotiate(&peer, &controller_hello()), None);
    }

    #[test]
    fn test_negotiate_0_9_fails() {
        let peer = hello(ProtocolVersion::from_wire(0x98), &[]);
        assert_eq!(negotiate(&peer, &controller_hello()), None);
    }

    #[test]
    fn test_negotiate_disjoint_bitmap() {
        let peer = hello(
            ProtocolVersion::V_1_4,
            &[ProtocolVersion::V_1_2, ProtocolVersion::V_1_4],
        );
        assert_eq!(negotiate(&peer, &controller_hello()), None);
    }

    #[test]
    fn test_advertised_without_bitmap() {
        let set = advertised(&hello(ProtocolVersion::V_1_0, &[]));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&ProtocolVersion::V_1_0));
    }
}
