// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use cid::Cid;
use libp2p::PeerId;
use multihash_codetable::{Code, MultihashDigest as _};
use parking_lot::Mutex;

use crate::{BitswapMessage, Block, network::Network};

const RAW: u64 = 0x55;

/// Raw `CIDv1` block of `data`
pub fn block(data: &[u8]) -> Block {
    Block::new(Cid::new_v1(RAW, Code::Sha2_256.digest(data)), data.to_vec())
}

/// `n` distinct blocks of `size` bytes each
pub fn blocks(n: usize, size: usize) -> Vec<Block> {
    (0..n)
        .map(|i| {
            let mut data = vec![0; size];
            let id = (i as u64).to_be_bytes();
            let n = size.min(id.len());
            data[..n].copy_from_slice(&id[id.len() - n..]);
            block(&data)
        })
        .collect()
}

pub fn peer() -> PeerId {
    PeerId::random()
}

/// Polls `cond` until it holds, panicking after a few seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// [`Network`] that records everything sent through it.
#[derive(Default)]
pub struct RecordingNetwork {
    pub sent: Mutex<Vec<(PeerId, BitswapMessage)>>,
    pub connects: AtomicUsize,
    pub provided: Mutex<Vec<Cid>>,
    pub find_requests: Mutex<Vec<Cid>>,
    pub fail_connect: AtomicBool,
    pub fail_send: AtomicBool,
}

impl RecordingNetwork {
    pub fn sent_to(&self, peer: &PeerId) -> Vec<BitswapMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait::async_trait]
impl Network for RecordingNetwork {
    async fn connect_to(&self, _peer: &PeerId) -> anyhow::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }

    async fn send_message(&self, peer: &PeerId, message: BitswapMessage) -> anyhow::Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            anyhow::bail!("stream reset");
        }
        self.sent.lock().push((*peer, message));
        Ok(())
    }

    async fn find_and_connect(&self, cid: &Cid) -> anyhow::Result<()> {
        self.find_requests.lock().push(*cid);
        Ok(())
    }

    async fn provide(&self, cid: &Cid) -> anyhow::Result<()> {
        self.provided.lock().push(*cid);
        Ok(())
    }
}
