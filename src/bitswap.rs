// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use ahash::HashSet;
use cid::Cid;
use futures::future::try_join_all;
use libp2p::PeerId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    BitswapConfig, BitswapError, BitswapMessage, Block, ProtocolVersion,
    decision::{DecisionEngine, DefaultTaskMerger, LedgerSnapshot, TaskMerger},
    message_queue::PeerQueues,
    metrics::{self, values},
    network::Network,
    notifications::Notifications,
    stats::{Stat, StatCounters},
    store::BitswapStore,
    utils::flume::FlumeSenderExt as _,
    want_manager::WantManager,
    wantlist::WantlistEntry,
};

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Withdraws a local want unless disarmed, so that an aborted or dropped
/// `want` does not leave its entry behind.
struct WantGuard {
    want_manager: Arc<WantManager>,
    cid: Cid,
    armed: bool,
}

impl WantGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WantGuard {
    fn drop(&mut self) {
        if self.armed {
            self.want_manager.unwant_blocks(&[self.cid]);
        }
    }
}

/// A `bitswap` node: fetches blocks it wants from connected peers and
/// serves the wants of those peers from its block store.
pub struct Bitswap {
    local_peer: PeerId,
    network: Arc<dyn Network>,
    store: Arc<dyn BitswapStore>,
    notifications: Notifications,
    want_manager: Arc<WantManager>,
    engine: Arc<DecisionEngine>,
    stats: Arc<StatCounters>,
    errors_tx: flume::Sender<BitswapError>,
    errors_rx: flume::Receiver<BitswapError>,
    protocol_prefix: String,
    started: AtomicBool,
}

impl Bitswap {
    pub fn new(
        local_peer: PeerId,
        network: Arc<dyn Network>,
        store: Arc<dyn BitswapStore>,
        config: BitswapConfig,
    ) -> Result<Self, BitswapError> {
        Self::with_task_merger(
            local_peer,
            network,
            store,
            config,
            Arc::new(DefaultTaskMerger),
        )
    }

    /// Like [`Bitswap::new`], with a custom policy for merging a peer's
    /// repeated wants.
    pub fn with_task_merger(
        local_peer: PeerId,
        network: Arc<dyn Network>,
        store: Arc<dyn BitswapStore>,
        config: BitswapConfig,
        merger: Arc<dyn TaskMerger>,
    ) -> Result<Self, BitswapError> {
        config.validate()?;
        let protocol_prefix = config.protocol_prefix.clone();
        let queues = Arc::new(PeerQueues::new(Arc::clone(&network), config.clone()));
        let stats = Arc::new(StatCounters::default());
        let want_manager = Arc::new(WantManager::new(Arc::clone(&queues), &config));
        let engine = Arc::new(DecisionEngine::with_stats(
            Arc::clone(&store),
            queues,
            config,
            merger,
            Arc::clone(&stats),
        ));
        let (errors_tx, errors_rx) = flume::bounded(ERROR_CHANNEL_CAPACITY);
        Ok(Self {
            local_peer,
            network,
            store,
            notifications: Notifications::new(),
            want_manager,
            engine,
            stats,
            errors_tx,
            errors_rx,
            protocol_prefix,
            started: AtomicBool::new(false),
        })
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Protocol names to advertise, most preferred first, e.g.
    /// `/ipfs/bitswap/1.2.0`.
    pub fn protocol_names(&self) -> Vec<String> {
        ProtocolVersion::ALL
            .iter()
            .map(|v| v.protocol_name(&self.protocol_prefix))
            .collect()
    }

    /// Version of a negotiated protocol name, `None` for foreign protocols.
    pub fn protocol_version(&self, name: &str) -> Option<ProtocolVersion> {
        ProtocolVersion::from_protocol_name(name, &self.protocol_prefix)
    }

    /// Fetches one block, from the local store if present, otherwise from
    /// the network. Firing `abort` withdraws the want.
    pub async fn want(
        &self,
        cid: Cid,
        abort: Option<CancellationToken>,
    ) -> Result<Block, BitswapError> {
        let mut blocks = self.want_many(&[cid], abort).await?;
        blocks.pop().ok_or(BitswapError::Aborted(cid))
    }

    /// Fetches `cids`, the first one being the most urgent. Fails with the
    /// first want that fails and withdraws the others.
    pub async fn want_many(
        &self,
        cids: &[Cid],
        abort: Option<CancellationToken>,
    ) -> Result<Vec<Block>, BitswapError> {
        // register before looking at the store so no arrival is missed
        let waiters: Vec<_> = cids
            .iter()
            .map(|cid| self.notifications.want_block(*cid, abort.clone()))
            .collect();

        let mut missing = vec![];
        for cid in cids {
            match self.store.get(cid)? {
                Some(data) => self.notifications.has_block(&Block::new(*cid, data)),
                None => missing.push(*cid),
            }
        }
        let missing_keys: HashSet<_> = missing.iter().map(|cid| *cid.hash()).collect();
        if !missing.is_empty() {
            for cid in missing.iter().copied() {
                let network = Arc::clone(&self.network);
                tokio::spawn(async move {
                    if let Err(e) = network.find_and_connect(&cid).await {
                        warn!("failed to find providers of {cid}: {e}");
                    }
                });
            }
            self.want_manager.want_blocks(&missing);
        }

        let wants = cids.iter().zip(waiters).map(|(cid, waiter)| {
            let guard = missing_keys.contains(cid.hash()).then(|| WantGuard {
                want_manager: Arc::clone(&self.want_manager),
                cid: *cid,
                armed: true,
            });
            async move {
                let result = waiter.await;
                if let Some(guard) = guard
                    && !matches!(result, Err(BitswapError::Aborted(_)))
                {
                    guard.disarm();
                }
                result
            }
        });
        try_join_all(wants).await
    }

    /// Rejects every pending want for `cids` with [`BitswapError::Unwanted`]
    /// and removes them from the wantlist.
    pub fn unwant(&self, cids: &[Cid]) {
        self.want_manager.cancel_wants(cids);
        for cid in cids {
            self.notifications.unwant_block(cid);
        }
    }

    /// Removes `cids` from the wantlist whatever their reference counts.
    pub fn cancel_wants(&self, cids: &[Cid]) {
        self.want_manager.cancel_wants(cids);
    }

    /// Stores a block and announces it. Already stored blocks are ignored.
    pub fn put(&self, block: Block) -> Result<(), BitswapError> {
        if self.store.contains(block.cid())? {
            return Ok(());
        }
        self.store.put(&block)?;
        self.notify(&block);
        Ok(())
    }

    pub fn put_many(&self, blocks: Vec<Block>) -> Result<(), BitswapError> {
        let mut new_blocks = Vec::with_capacity(blocks.len());
        for block in blocks {
            if !self.store.contains(block.cid())? {
                new_blocks.push(block);
            }
        }
        self.store.put_many(&new_blocks)?;
        for block in &new_blocks {
            self.notify(block);
        }
        Ok(())
    }

    /// Announces a block that is now in the store: settles local wants,
    /// serves waiting peers and provides it to the network.
    pub fn notify(&self, block: &Block) {
        self.notifications.has_block(block);
        if self.want_manager.contains(block.cid()) {
            self.want_manager.cancel_wants(&[*block.cid()]);
        }
        self.engine.received_blocks(std::slice::from_ref(block));
        let network = Arc::clone(&self.network);
        let cid = *block.cid();
        tokio::spawn(async move {
            if let Err(e) = network.provide(&cid).await {
                warn!("failed to provide {cid}: {e}");
            }
        });
    }

    /// Handles a decoded message from `peer`.
    pub fn receive_message(&self, peer: PeerId, message: BitswapMessage) {
        metrics::MESSAGE_TOTAL.get_or_create(&values::INBOUND).inc();
        self.engine.message_received(peer, &message);
        if message.blocks().next().is_none() {
            return;
        }

        let blocks: Vec<_> = message.into_blocks().collect();
        let wanted: Vec<_> = blocks
            .iter()
            .filter(|b| self.want_manager.contains(b.cid()))
            .map(|b| *b.cid())
            .collect();
        self.want_manager.cancel_wants(&wanted);

        for block in blocks {
            let duplicate = match self.store.contains(block.cid()) {
                Ok(duplicate) => duplicate,
                Err(e) => {
                    self.report(e.into());
                    continue;
                }
            };
            self.stats.block_received(block.len(), duplicate);
            if duplicate {
                continue;
            }
            if !wanted.iter().any(|cid| cid.hash() == block.cid().hash()) {
                debug!("discarding unwanted block {} from {peer}", block.cid());
                continue;
            }
            if let Err(e) = self.store.put(&block) {
                self.report(e.into());
                continue;
            }
            self.notify(&block);
        }
    }

    /// Decodes a protobuf body from `peer` and handles it. Undecodable
    /// bytes are reported on [`Bitswap::errors`] and dropped.
    pub fn receive_bytes(&self, peer: PeerId, bytes: &[u8]) {
        match BitswapMessage::from_bytes(bytes) {
            Ok(message) => self.receive_message(peer, message),
            Err(e) => {
                metrics::MESSAGE_TOTAL.get_or_create(&values::MALFORMED).inc();
                warn!("dropping message from {peer}: {e}");
                self.errors_tx.try_send_or_warn(e);
            }
        }
    }

    fn report(&self, e: BitswapError) {
        warn!("{e}");
        self.errors_tx.try_send_or_warn(e);
    }

    /// Failures that are not returned to any caller.
    pub fn errors(&self) -> flume::Receiver<BitswapError> {
        self.errors_rx.clone()
    }

    pub fn peer_connected(&self, peer: PeerId) {
        self.want_manager.connected(peer);
    }

    pub fn peer_disconnected(&self, peer: &PeerId) {
        self.want_manager.disconnected(peer);
        self.engine.peer_disconnected(peer);
    }

    /// Local wantlist, by descending priority.
    pub fn get_wantlist(&self) -> Vec<WantlistEntry> {
        self.want_manager.wantlist()
    }

    pub fn wantlist_for_peer(&self, peer: &PeerId) -> Vec<WantlistEntry> {
        self.engine.wantlist_for_peer(peer)
    }

    pub fn ledger_for_peer(&self, peer: &PeerId) -> Option<LedgerSnapshot> {
        self.engine.ledger_for_peer(peer)
    }

    /// Peers we are connected to or exchanged messages with.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers = self.want_manager.peers();
        peers.extend(self.engine.peers());
        peers.sort();
        peers.dedup();
        peers
    }

    pub fn stat(&self) -> Stat {
        let wantlist = self.get_wantlist().into_iter().map(|e| e.cid).collect();
        self.stats.snapshot(wantlist, self.peers())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> Result<(), BitswapError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.network.start().await.map_err(BitswapError::Network)?;
        self.want_manager.start();
        self.engine.start();
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), BitswapError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.stop();
        self.want_manager.stop();
        self.network.stop().await.map_err(BitswapError::Network)
    }
}
