// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use ahash::HashSet;
use cid::Cid;
use libp2p::PeerId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    BitswapConfig, BitswapEntry, BitswapMessage,
    message::WantType,
    message_queue::PeerQueues,
    metrics,
    wantlist::{Wantlist, WantlistEntry},
};

#[derive(Default)]
struct WantState {
    wantlist: Wantlist,
    peers: HashSet<PeerId>,
}

/// Keeps the local wantlist and mirrors its changes to every connected peer.
pub struct WantManager {
    queues: Arc<PeerQueues>,
    state: Mutex<WantState>,
    rebroadcast_interval: Duration,
    rebroadcast_task: Mutex<Option<JoinHandle<()>>>,
}

impl WantManager {
    pub fn new(queues: Arc<PeerQueues>, config: &BitswapConfig) -> Self {
        Self {
            queues,
            state: Mutex::new(WantState::default()),
            rebroadcast_interval: config.rebroadcast_interval,
            rebroadcast_task: Mutex::new(None),
        }
    }

    /// Adds `cids` to the wantlist, the first one being the most urgent.
    /// Only content that was not wanted yet is announced to peers.
    pub fn want_blocks(&self, cids: &[Cid]) {
        let (entries, peers) = {
            let mut state = self.state.lock();
            let entries: Vec<_> = cids
                .iter()
                .enumerate()
                .filter_map(|(i, cid)| {
                    let priority = i32::MAX.saturating_sub(i32::try_from(i).unwrap_or(i32::MAX));
                    state
                        .wantlist
                        .add(*cid, priority, WantType::Block)
                        .then(|| BitswapEntry::new_block(*cid, priority).send_dont_have(true))
                })
                .collect();
            metrics::WANTLIST_SIZE.set(state.wantlist.len() as i64);
            (entries, state.peers.iter().copied().collect::<Vec<_>>())
        };
        self.broadcast(entries, &peers);
    }

    /// Drops one reference per cid, cancelling what is no longer wanted.
    pub fn unwant_blocks(&self, cids: &[Cid]) {
        self.remove_wants(cids, |wantlist, cid| wantlist.remove(cid));
    }

    /// Removes `cids` whatever their reference counts.
    pub fn cancel_wants(&self, cids: &[Cid]) {
        self.remove_wants(cids, |wantlist, cid| wantlist.remove_force(cid).is_some());
    }

    fn remove_wants(&self, cids: &[Cid], remove: impl Fn(&mut Wantlist, &Cid) -> bool) {
        let (entries, peers) = {
            let mut state = self.state.lock();
            let entries: Vec<_> = cids
                .iter()
                .filter(|cid| remove(&mut state.wantlist, cid))
                .map(|cid| BitswapEntry::new_cancel(*cid))
                .collect();
            metrics::WANTLIST_SIZE.set(state.wantlist.len() as i64);
            (entries, state.peers.iter().copied().collect::<Vec<_>>())
        };
        self.broadcast(entries, &peers);
    }

    fn broadcast(&self, entries: Vec<BitswapEntry>, peers: &[PeerId]) {
        if entries.is_empty() {
            return;
        }
        for peer in peers {
            if let Some(queue) = self.queues.get(peer)
                && let Err(e) = queue.add_entries(entries.clone())
            {
                warn!("{e}");
            }
        }
    }

    /// Starts mirroring to `peer`, beginning with the full wantlist.
    pub fn connected(&self, peer: PeerId) {
        // the full wantlist is queued before any broadcast can see the peer
        let mut state = self.state.lock();
        if !state.peers.insert(peer) {
            return;
        }
        let (queue, _) = self.queues.acquire(peer);
        if let Err(e) = queue.add_message(Self::full_wantlist(&state.wantlist)) {
            warn!("{e}");
        }
    }

    pub fn disconnected(&self, peer: &PeerId) {
        if self.state.lock().peers.remove(peer) {
            self.queues.release(peer);
        }
    }

    pub fn wantlist(&self) -> Vec<WantlistEntry> {
        self.state.lock().wantlist.sorted_entries().cloned().collect()
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.state.lock().wantlist.contains(cid)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.state.lock().peers.iter().copied().collect()
    }

    fn full_wantlist(wantlist: &Wantlist) -> BitswapMessage {
        let mut message = BitswapMessage::new(true);
        for entry in wantlist.sorted_entries() {
            message.add_entry(BitswapEntry {
                cid: entry.cid,
                priority: entry.priority,
                want_type: entry.want_type,
                cancel: false,
                send_dont_have: true,
            });
        }
        message
    }

    /// Sends the full wantlist to every connected peer.
    pub fn rebroadcast(&self) {
        let (full, peers) = {
            let state = self.state.lock();
            if state.wantlist.is_empty() {
                return;
            }
            (
                Self::full_wantlist(&state.wantlist),
                state.peers.iter().copied().collect::<Vec<_>>(),
            )
        };
        debug!(
            "rebroadcasting {} wants to {} peers",
            full.wantlist().len(),
            peers.len()
        );
        for peer in peers {
            if let Some(queue) = self.queues.get(&peer)
                && let Err(e) = queue.add_message(full.clone())
            {
                warn!("{e}");
            }
        }
    }

    /// Starts the periodic full wantlist rebroadcast.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.rebroadcast_task.lock();
        if task.is_some() {
            return;
        }
        let this: Weak<Self> = Arc::downgrade(self);
        let period = self.rebroadcast_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(this) = this.upgrade() else {
                    break;
                };
                this.rebroadcast();
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.rebroadcast_task.lock().take() {
            task.abort();
        }
    }
}
