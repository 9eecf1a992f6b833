// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::{Cid, Version};
use multihash_codetable::{Code, MultihashDigest as _};
use unsigned_varint::{decode, encode};

use crate::BitswapError;

/// Prefix represents all metadata of a CID, without the actual content.
///
/// Sent along with every `payload` block since `/ipfs/bitswap/1.1.0`, so the
/// receiver rebuilds the [`Cid`] by hashing the data itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub version: Version,
    pub codec: u64,
    pub mh_type: u64,
    pub mh_len: usize,
}

impl Prefix {
    /// Parses a varint encoded prefix.
    pub fn new(data: &[u8]) -> Result<Self, BitswapError> {
        let (raw_version, remain) = decode::u64(data).map_err(BitswapError::malformed)?;
        let version = Version::try_from(raw_version).map_err(BitswapError::malformed)?;
        let (codec, remain) = decode::u64(remain).map_err(BitswapError::malformed)?;
        let (mh_type, remain) = decode::u64(remain).map_err(BitswapError::malformed)?;
        let (mh_len, _remain) = decode::usize(remain).map_err(BitswapError::malformed)?;
        Ok(Prefix {
            version,
            codec,
            mh_type,
            mh_len,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = Vec::with_capacity(16);
        let mut buf = encode::u64_buffer();
        res.extend_from_slice(encode::u64(self.version.into(), &mut buf));
        res.extend_from_slice(encode::u64(self.codec, &mut buf));
        res.extend_from_slice(encode::u64(self.mh_type, &mut buf));
        let mut buf = encode::usize_buffer();
        res.extend_from_slice(encode::usize(self.mh_len, &mut buf));
        res
    }

    /// Hashes `data` and builds the [`Cid`] this prefix describes.
    pub fn to_cid(&self, data: &[u8]) -> Result<Cid, BitswapError> {
        let code = Code::try_from(self.mh_type).map_err(|e| {
            BitswapError::MalformedMessage(format!("unsupported multihash: {e:?}"))
        })?;
        let hash = code.digest(data);
        let hash = match usize::from(hash.size()) {
            size if size == self.mh_len => hash,
            size if size > self.mh_len => {
                let len = u8::try_from(self.mh_len).map_err(BitswapError::malformed)?;
                hash.truncate(len)
            }
            size => {
                return Err(BitswapError::MalformedMessage(format!(
                    "prefix digest length {} exceeds {size}",
                    self.mh_len
                )));
            }
        };
        match self.version {
            Version::V0 => Cid::new_v0(hash).map_err(BitswapError::malformed),
            Version::V1 => Ok(Cid::new_v1(self.codec, hash)),
        }
    }
}

impl From<&Cid> for Prefix {
    fn from(cid: &Cid) -> Self {
        Self {
            version: cid.version(),
            codec: cid.codec(),
            mh_type: cid.hash().code(),
            mh_len: usize::from(cid.hash().size()),
        }
    }
}
