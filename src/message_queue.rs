// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{sync::Arc, time::Duration};

use ahash::HashMap;
use libp2p::PeerId;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    BitswapConfig, BitswapEntry, BitswapError, BitswapMessage,
    metrics::{self, values},
    network::Network,
};

enum QueuedItem {
    Entries(Vec<BitswapEntry>),
    Message(BitswapMessage),
}

/// Outbound buffer for one remote peer.
///
/// Everything queued while a batch waits for its tick goes out as one
/// message. Dropping the queue flushes what is left and ends its task.
pub struct MessageQueue {
    peer: PeerId,
    tx: flume::Sender<QueuedItem>,
}

impl MessageQueue {
    pub fn new(peer: PeerId, network: Arc<dyn Network>, config: &BitswapConfig) -> Self {
        let (tx, rx) = flume::unbounded();
        tokio::spawn(run_queue(
            peer,
            network,
            rx,
            config.message_queue_delay,
            config.max_message_size,
        ));
        Self { peer, tx }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn add_entries(&self, entries: Vec<BitswapEntry>) -> Result<(), BitswapError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.push(QueuedItem::Entries(entries))
    }

    pub fn add_message(&self, message: BitswapMessage) -> Result<(), BitswapError> {
        self.push(QueuedItem::Message(message))
    }

    fn push(&self, item: QueuedItem) -> Result<(), BitswapError> {
        self.tx
            .send(item)
            .map_err(|e| BitswapError::send_failure(self.peer, e))
    }
}

async fn run_queue(
    peer: PeerId,
    network: Arc<dyn Network>,
    rx: flume::Receiver<QueuedItem>,
    delay: Duration,
    max_message_size: usize,
) {
    let mut connected = false;
    while let Ok(first) = rx.recv_async().await {
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        let mut message = BitswapMessage::new(false);
        for item in std::iter::once(first).chain(rx.drain()) {
            match item {
                QueuedItem::Entries(entries) => {
                    for entry in entries {
                        message.add_entry(entry);
                    }
                }
                QueuedItem::Message(other) => message.merge(other),
            }
        }
        if message.is_empty() {
            continue;
        }

        if !connected {
            if let Err(e) = network.connect_to(&peer).await {
                warn!("failed to connect to {peer}, dropping batch: {e}");
                metrics::FAILURE_TOTAL.get_or_create(&values::CONNECT).inc();
                continue;
            }
            connected = true;
        }

        for part in message.split(max_message_size) {
            trace!(
                "sending {} entries, {} blocks, {} presences to {peer}",
                part.wantlist().len(),
                part.blocks().len(),
                part.block_presences().len()
            );
            match network.send_message(&peer, part).await {
                Ok(()) => {
                    metrics::MESSAGE_TOTAL.get_or_create(&values::OUTBOUND).inc();
                }
                Err(e) => {
                    warn!("failed to send bitswap message to {peer}: {e}");
                    metrics::FAILURE_TOTAL.get_or_create(&values::SEND).inc();
                    // reconnect before the next batch
                    connected = false;
                    break;
                }
            }
        }
    }
    debug!("message queue for {peer} closed");
}

/// Reference counted registry of [`MessageQueue`]s shared by the want
/// manager and the decision engine.
pub struct PeerQueues {
    network: Arc<dyn Network>,
    config: BitswapConfig,
    queues: Mutex<HashMap<PeerId, (Arc<MessageQueue>, usize)>>,
}

impl PeerQueues {
    pub fn new(network: Arc<dyn Network>, config: BitswapConfig) -> Self {
        Self {
            network,
            config,
            queues: Mutex::new(HashMap::default()),
        }
    }

    /// Takes a reference to the queue of `peer`, creating it if needed.
    /// The flag tells whether the queue was created by this call.
    pub fn acquire(&self, peer: PeerId) -> (Arc<MessageQueue>, bool) {
        let mut queues = self.queues.lock();
        if let Some((queue, refs)) = queues.get_mut(&peer) {
            *refs += 1;
            return (Arc::clone(queue), false);
        }
        let queue = Arc::new(MessageQueue::new(
            peer,
            Arc::clone(&self.network),
            &self.config,
        ));
        queues.insert(peer, (Arc::clone(&queue), 1));
        metrics::PEER_QUEUES.set(queues.len() as i64);
        (queue, true)
    }

    /// Drops a reference. Returns `true` when that tore the queue down.
    pub fn release(&self, peer: &PeerId) -> bool {
        let mut queues = self.queues.lock();
        let Some((_, refs)) = queues.get_mut(peer) else {
            return false;
        };
        *refs -= 1;
        if *refs > 0 {
            return false;
        }
        queues.remove(peer);
        metrics::PEER_QUEUES.set(queues.len() as i64);
        true
    }

    pub fn get(&self, peer: &PeerId) -> Option<Arc<MessageQueue>> {
        self.queues.lock().get(peer).map(|(q, _)| Arc::clone(q))
    }

    pub fn ref_count(&self, peer: &PeerId) -> usize {
        self.queues.lock().get(peer).map_or(0, |(_, refs)| *refs)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.queues.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingNetwork, block, peer, wait_until};
    use std::sync::atomic::Ordering;

    fn setup() -> (Arc<RecordingNetwork>, PeerQueues) {
        let network = Arc::new(RecordingNetwork::default());
        let queues = PeerQueues::new(network.clone(), BitswapConfig::default());
        (network, queues)
    }

    #[tokio::test]
    async fn coalesces_one_tick_into_one_message() {
        let (network, queues) = setup();
        let peer = peer();
        let (queue, created) = queues.acquire(peer);
        assert!(created);

        let (a, b) = (block(b"a"), block(b"b"));
        queue
            .add_entries(vec![BitswapEntry::new_block(*a.cid(), 2)])
            .unwrap();
        queue.add_entries(vec![BitswapEntry::new_have(*b.cid(), 1)]).unwrap();
        let mut reply = BitswapMessage::new(false);
        reply.add_block(block(b"c"));
        queue.add_message(reply).unwrap();

        wait_until(|| network.sent_count() == 1).await;
        let sent = network.sent_to(&peer);
        assert_eq!(
            sent[0].wantlist().map(|e| e.cid).collect::<Vec<_>>(),
            vec![*a.cid(), *b.cid()]
        );
        assert_eq!(sent[0].blocks().len(), 1);
        assert_eq!(network.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connects_lazily_and_retries_after_failure() {
        let (network, queues) = setup();
        let peer = peer();
        let (queue, _) = queues.acquire(peer);
        assert_eq!(network.connects.load(Ordering::SeqCst), 0);

        network.fail_connect.store(true, Ordering::SeqCst);
        queue
            .add_entries(vec![BitswapEntry::new_block(*block(b"x").cid(), 1)])
            .unwrap();
        wait_until(|| network.connects.load(Ordering::SeqCst) == 1).await;

        network.fail_connect.store(false, Ordering::SeqCst);
        queue
            .add_entries(vec![BitswapEntry::new_block(*block(b"y").cid(), 1)])
            .unwrap();
        wait_until(|| network.sent_count() == 1).await;
        assert_eq!(network.connects.load(Ordering::SeqCst), 2);
        // the failed batch is not resent
        assert_eq!(network.sent_to(&peer)[0].wantlist().len(), 1);
    }

    #[tokio::test]
    async fn ref_counted_teardown() {
        let (_network, queues) = setup();
        let peer = peer();
        let (first, _) = queues.acquire(peer);
        let (second, created) = queues.acquire(peer);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(queues.ref_count(&peer), 2);

        assert!(!queues.release(&peer));
        assert!(queues.get(&peer).is_some());
        assert!(queues.release(&peer));
        assert!(queues.get(&peer).is_none());
        assert!(!queues.release(&peer));
        assert!(queues.peers().is_empty());
    }
}
