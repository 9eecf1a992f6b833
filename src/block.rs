// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::Bytes;
use cid::Cid;

use crate::utils::cid::{CidKey, CidKeyExt as _};

/// A content addressed block: a [`Cid`] and the payload it addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    pub fn new(cid: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            cid,
            data: data.into(),
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Canonical key of the block, see [`CidKeyExt`](crate::utils::cid::CidKeyExt).
    pub fn key(&self) -> CidKey {
        self.cid.key()
    }
}
