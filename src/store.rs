// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use ahash::HashMap;
use bytes::Bytes;
use cid::Cid;
use parking_lot::RwLock;

use crate::{
    Block,
    utils::cid::{CidKey, CidKeyExt as _},
};

/// Trait implemented by a block store.
///
/// Lookups resolve by content, so a block stored under a `CIDv0` must be
/// found when asked for with a `CIDv1` of the same multihash. Concurrent
/// writes of the same block must be harmless.
pub trait BitswapStore: Send + Sync + 'static {
    /// A have query needs to know if the block store contains the block.
    fn contains(&self, cid: &Cid) -> anyhow::Result<bool>;

    /// A block query needs to retrieve the block from the store.
    fn get(&self, cid: &Cid) -> anyhow::Result<Option<Bytes>>;

    /// A block response needs to insert the block into the store.
    fn put(&self, block: &Block) -> anyhow::Result<()>;

    fn put_many(&self, blocks: &[Block]) -> anyhow::Result<()> {
        for block in blocks {
            self.put(block)?;
        }
        Ok(())
    }
}

/// In-memory [`BitswapStore`].
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<CidKey, Bytes>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BitswapStore for MemoryBlockstore {
    fn contains(&self, cid: &Cid) -> anyhow::Result<bool> {
        Ok(self.blocks.read().contains_key(&cid.key()))
    }

    fn get(&self, cid: &Cid) -> anyhow::Result<Option<Bytes>> {
        Ok(self.blocks.read().get(&cid.key()).cloned())
    }

    fn put(&self, block: &Block) -> anyhow::Result<()> {
        self.blocks
            .write()
            .entry(block.key())
            .or_insert_with(|| block.data().clone());
        Ok(())
    }

    fn put_many(&self, blocks: &[Block]) -> anyhow::Result<()> {
        let mut guard = self.blocks.write();
        for block in blocks {
            guard
                .entry(block.key())
                .or_insert_with(|| block.data().clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multihash_codetable::{Code, MultihashDigest as _};

    #[test]
    fn lookups_resolve_by_content() {
        let store = MemoryBlockstore::new();
        let v0 = Cid::from_raw_block_v0(b"data").unwrap();
        let v1 = Cid::new_v1(0x55, Code::Sha2_256.digest(b"data"));
        store.put(&Block::new(v0, b"data".to_vec())).unwrap();
        assert!(store.contains(&v1).unwrap());
        assert_eq!(store.get(&v1).unwrap().unwrap(), Bytes::from_static(b"data"));
    }

    #[test]
    fn writes_are_idempotent() {
        let store = MemoryBlockstore::new();
        let block = Block::new(Cid::from_raw_block_v0(b"x").unwrap(), b"x".to_vec());
        store
            .put_many(&[block.clone(), block.clone()])
            .unwrap();
        store.put(&block).unwrap();
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&Cid::from_raw_block_v0(b"y").unwrap()).unwrap());
    }
}
