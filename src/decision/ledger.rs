// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::time::Instant;

use cid::Cid;
use libp2p::PeerId;

use crate::{message::WantType, wantlist::Wantlist};

/// Byte accounting and wantlist of one remote peer.
#[derive(Debug)]
pub struct Ledger {
    peer: PeerId,
    pub(crate) wantlist: Wantlist,
    bytes_sent: u64,
    bytes_recv: u64,
    exchange_count: u64,
    last_exchange: Option<Instant>,
}

/// Point in time copy of a [`Ledger`]'s counters.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub peer: PeerId,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub exchanged: u64,
    pub debt_ratio: f64,
    pub last_exchange: Option<Instant>,
}

impl Ledger {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            wantlist: Wantlist::new(),
            bytes_sent: 0,
            bytes_recv: 0,
            exchange_count: 0,
            last_exchange: None,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn sent_bytes(&mut self, n: usize) {
        self.exchange_count += 1;
        self.last_exchange = Some(Instant::now());
        self.bytes_sent += n as u64;
    }

    pub fn received_bytes(&mut self, n: usize) {
        self.exchange_count += 1;
        self.last_exchange = Some(Instant::now());
        self.bytes_recv += n as u64;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv
    }

    pub fn wants(&mut self, cid: Cid, priority: i32, want_type: WantType) {
        self.wantlist.add(cid, priority, want_type);
    }

    pub fn cancel_want(&mut self, cid: &Cid) -> bool {
        self.wantlist.remove_force(cid).is_some()
    }

    pub fn wantlist_contains(&self, cid: &Cid) -> bool {
        self.wantlist.contains(cid)
    }

    /// How much more we sent than we received.
    pub fn debt_ratio(&self) -> f64 {
        self.bytes_sent as f64 / (self.bytes_recv as f64 + 1.0)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            peer: self.peer,
            bytes_sent: self.bytes_sent,
            bytes_recv: self.bytes_recv,
            exchanged: self.exchange_count,
            debt_ratio: self.debt_ratio(),
            last_exchange: self.last_exchange,
        }
    }
}
