// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::atomic::{AtomicU64, Ordering};

use cid::Cid;
use libp2p::PeerId;

use crate::metrics::{self, values};

/// Snapshot returned by [`Bitswap::stat`](crate::Bitswap::stat).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stat {
    pub wantlist: Vec<Cid>,
    pub peers: Vec<PeerId>,
    pub blocks_received: u64,
    pub data_received: u64,
    pub dup_blks_received: u64,
    pub dup_data_received: u64,
    pub blocks_sent: u64,
    pub data_sent: u64,
}

/// Running totals, mirrored into the prometheus metrics.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    blocks_received: AtomicU64,
    data_received: AtomicU64,
    dup_blks_received: AtomicU64,
    dup_data_received: AtomicU64,
    blocks_sent: AtomicU64,
    data_sent: AtomicU64,
}

impl StatCounters {
    pub fn block_received(&self, size: usize, duplicate: bool) {
        let size = size as u64;
        self.blocks_received.fetch_add(1, Ordering::Relaxed);
        self.data_received.fetch_add(size, Ordering::Relaxed);
        metrics::BLOCK_TOTAL.get_or_create(&values::RECEIVED).inc();
        metrics::BYTES_TOTAL
            .get_or_create(&values::RECEIVED)
            .inc_by(size);
        if duplicate {
            self.dup_blks_received.fetch_add(1, Ordering::Relaxed);
            self.dup_data_received.fetch_add(size, Ordering::Relaxed);
            metrics::BLOCK_TOTAL.get_or_create(&values::DUPLICATE).inc();
            metrics::BYTES_TOTAL
                .get_or_create(&values::DUPLICATE)
                .inc_by(size);
        }
    }

    pub fn block_sent(&self, size: usize) {
        let size = size as u64;
        self.blocks_sent.fetch_add(1, Ordering::Relaxed);
        self.data_sent.fetch_add(size, Ordering::Relaxed);
        metrics::BLOCK_TOTAL.get_or_create(&values::SENT).inc();
        metrics::BYTES_TOTAL.get_or_create(&values::SENT).inc_by(size);
    }

    pub fn snapshot(&self, wantlist: Vec<Cid>, peers: Vec<PeerId>) -> Stat {
        Stat {
            wantlist,
            peers,
            blocks_received: self.blocks_received.load(Ordering::Relaxed),
            data_received: self.data_received.load(Ordering::Relaxed),
            dup_blks_received: self.dup_blks_received.load(Ordering::Relaxed),
            dup_data_received: self.dup_data_received.load(Ordering::Relaxed),
            blocks_sent: self.blocks_sent.load(Ordering::Relaxed),
            data_sent: self.data_sent.load(Ordering::Relaxed),
        }
    }
}
