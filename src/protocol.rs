// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt::Display;

/// Default protocol prefix, as in `/ipfs/bitswap/1.2.0`
pub const DEFAULT_PROTOCOL_PREFIX: &str = "ipfs";

/// Negotiated `bitswap` protocol version.
///
/// - `1.0.0`: want-block entries and raw blocks only
/// - `1.1.0`: adds CID prefixed payloads, want types, `DONT_HAVE` requests
///   and block presences
/// - `1.2.0`: adds the `pendingBytes` hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V100,
    V110,
    V120,
}

impl ProtocolVersion {
    /// All versions, most preferred first.
    pub const ALL: [ProtocolVersion; 3] = [Self::V120, Self::V110, Self::V100];

    pub fn version_str(&self) -> &'static str {
        match self {
            Self::V100 => "1.0.0",
            Self::V110 => "1.1.0",
            Self::V120 => "1.2.0",
        }
    }

    /// Full protocol name, e.g. `/ipfs/bitswap/1.2.0`
    pub fn protocol_name(&self, prefix: &str) -> String {
        format!("/{prefix}/bitswap/{}", self.version_str())
    }

    /// Parses a protocol name produced by [`ProtocolVersion::protocol_name`]
    /// with the same prefix.
    pub fn from_protocol_name(name: &str, prefix: &str) -> Option<Self> {
        let version = name
            .strip_prefix('/')?
            .strip_prefix(prefix)?
            .strip_prefix("/bitswap/")?;
        Self::ALL
            .into_iter()
            .find(|v| v.version_str() == version)
    }

    /// Highest version supported by both sides.
    pub fn negotiate(local: &[Self], remote: &[Self]) -> Option<Self> {
        local
            .iter()
            .filter(|v| remote.contains(v))
            .max()
            .copied()
    }

    pub fn supports_presences(&self) -> bool {
        *self >= Self::V110
    }

    pub fn supports_prefixes(&self) -> bool {
        *self >= Self::V110
    }

    pub fn supports_want_types(&self) -> bool {
        *self >= Self::V110
    }

    pub fn supports_pending_bytes(&self) -> bool {
        *self >= Self::V120
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.protocol_name(DEFAULT_PROTOCOL_PREFIX))
    }
}
