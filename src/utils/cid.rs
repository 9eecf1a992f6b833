// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::{Cid, multihash::Multihash};
use multihash_codetable::{Code, MultihashDigest as _};

/// Canonical map key of a [`Cid`].
///
/// `CIDv0` and `CIDv1` (or `CIDv1` with different codecs) can address the
/// same content. All registries in this crate are keyed by the multihash so
/// that every encoding of the same content resolves to the same entry.
pub type CidKey = Multihash<64>;

/// Extension methods for keying and building [`Cid`]s
pub trait CidKeyExt {
    /// Returns the canonical key of this `Cid`
    fn key(&self) -> CidKey;

    /// `CIDv0` of a raw payload, as used by `/ipfs/bitswap/1.0.0` blocks
    fn from_raw_block_v0(data: &[u8]) -> Result<Cid, cid::Error> {
        Cid::new_v0(Code::Sha2_256.digest(data))
    }
}

impl CidKeyExt for Cid {
    fn key(&self) -> CidKey {
        *self.hash()
    }
}
