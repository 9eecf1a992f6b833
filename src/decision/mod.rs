// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Decides what to send to whom: keeps a [`Ledger`] per remote peer, turns
//! their wants into [`Task`]s and serves the tasks through the peers'
//! message queues.

mod ledger;
mod request_queue;
mod task_merger;

pub use ledger::{Ledger, LedgerSnapshot};
pub use request_queue::{PoppedTasks, RequestQueue};
pub use task_merger::{DefaultTaskMerger, Task, TaskData, TaskMerger};

use std::sync::{Arc, Weak};

use ahash::HashMap;
use bytes::Bytes;
use cid::Cid;
use libp2p::PeerId;
use parking_lot::Mutex;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, trace, warn};

use crate::{
    BitswapConfig, BitswapEntry, BitswapError, BitswapMessage, Block,
    message::{WantType, block_presence_size},
    message_queue::PeerQueues,
    metrics::{self, values},
    stats::StatCounters,
    store::BitswapStore,
    wantlist::WantlistEntry,
};

struct EngineState {
    ledgers: HashMap<PeerId, Ledger>,
    request_queue: RequestQueue,
}

pub struct DecisionEngine {
    store: Arc<dyn BitswapStore>,
    queues: Arc<PeerQueues>,
    config: BitswapConfig,
    stats: Arc<StatCounters>,
    state: Mutex<EngineState>,
    tick: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn BitswapStore>,
        queues: Arc<PeerQueues>,
        config: BitswapConfig,
        merger: Arc<dyn TaskMerger>,
    ) -> Self {
        Self::with_stats(store, queues, config, merger, Default::default())
    }

    pub(crate) fn with_stats(
        store: Arc<dyn BitswapStore>,
        queues: Arc<PeerQueues>,
        config: BitswapConfig,
        merger: Arc<dyn TaskMerger>,
        stats: Arc<StatCounters>,
    ) -> Self {
        let request_queue = RequestQueue::new(merger, config.max_active_tasks_per_peer);
        Self {
            store,
            queues,
            config,
            stats,
            state: Mutex::new(EngineState {
                ledgers: HashMap::default(),
                request_queue,
            }),
            tick: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    /// Ledger of `peer`, tracking the peer and taking a reference to its
    /// queue on first sight.
    fn ledger<'a>(&self, ledgers: &'a mut HashMap<PeerId, Ledger>, peer: PeerId) -> &'a mut Ledger {
        ledgers.entry(peer).or_insert_with(|| {
            debug!("tracking peer {peer}");
            self.queues.acquire(peer);
            Ledger::new(peer)
        })
    }

    fn block_size(&self, cid: &Cid) -> Option<usize> {
        match self.store.get(cid) {
            Ok(data) => data.map(|d| d.len()),
            Err(e) => {
                warn!("failed to read block {cid}: {e}");
                metrics::FAILURE_TOTAL.get_or_create(&values::STORE).inc();
                None
            }
        }
    }

    /// Task answering `entry`, `None` when the want is to be ignored.
    fn task_for_want(&self, entry: &BitswapEntry, block_size: Option<usize>) -> Option<Task> {
        let cid = entry.cid;
        let Some(size) = block_size else {
            if !entry.send_dont_have {
                return None;
            }
            return Some(Task::new(
                cid,
                entry.priority,
                block_presence_size(&cid),
                TaskData {
                    block_size: 0,
                    have_block: false,
                    is_want_block: entry.want_type == WantType::Block,
                    send_dont_have: true,
                },
            ));
        };
        let send_as_block = entry.want_type == WantType::Block
            || size <= self.config.max_size_replace_has_with_block;
        Some(Task::new(
            cid,
            entry.priority,
            if send_as_block {
                size
            } else {
                block_presence_size(&cid)
            },
            TaskData {
                block_size: size,
                have_block: true,
                is_want_block: send_as_block,
                send_dont_have: entry.send_dont_have,
            },
        ))
    }

    /// Applies an inbound message from `peer` to its ledger and schedules
    /// responses to its wants.
    pub fn message_received(&self, peer: PeerId, message: &BitswapMessage) {
        let (cancels, wants): (Vec<_>, Vec<_>) = message.wantlist().partition(|e| e.cancel);
        // store reads stay outside the lock
        let sizes: Vec<_> = wants.iter().map(|e| self.block_size(&e.cid)).collect();
        let tasks: Vec<_> = wants
            .iter()
            .zip(&sizes)
            .filter_map(|(entry, size)| self.task_for_want(entry, *size))
            .collect();
        let cancels: Vec<_> = cancels.iter().map(|e| e.cid).collect();
        trace!(
            "{peer} wants {} and cancels {} blocks",
            wants.len(),
            cancels.len()
        );
        {
            let mut state = self.state.lock();
            let ledger = self.ledger(&mut state.ledgers, peer);
            if message.is_full() {
                ledger.wantlist.clear();
            }
            for block in message.blocks() {
                ledger.received_bytes(block.len());
            }
            for cid in &cancels {
                ledger.cancel_want(cid);
            }
            for entry in &wants {
                ledger.wants(entry.cid, entry.priority, entry.want_type);
            }
            state.request_queue.remove_tasks(&peer, &cancels);
            state.request_queue.push_tasks(peer, tasks);
        }

        // blocks stored between the lookups above and the ledger update
        // were not seen by `received_blocks`
        let late: Vec<_> = wants
            .iter()
            .zip(&sizes)
            .filter(|(_, size)| size.is_none())
            .filter_map(|(entry, _)| Some((*entry, self.block_size(&entry.cid)?)))
            .collect();
        if !late.is_empty() {
            let mut state = self.state.lock();
            let tasks: Vec<_> = late
                .into_iter()
                .filter(|(entry, _)| {
                    state
                        .ledgers
                        .get(&peer)
                        .is_some_and(|l| l.wantlist_contains(&entry.cid))
                })
                .filter_map(|(entry, size)| self.task_for_want(entry, Some(size)))
                .collect();
            state.request_queue.push_tasks(peer, tasks);
        }
        self.schedule();
    }

    /// Schedules blocks that just became available for every peer that
    /// wants them.
    pub fn received_blocks(&self, blocks: &[Block]) {
        if blocks.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock();
            let mut scheduled: Vec<(PeerId, Vec<Task>)> = vec![];
            for (peer, ledger) in &state.ledgers {
                let tasks: Vec<_> = blocks
                    .iter()
                    .filter_map(|block| {
                        let want = ledger.wantlist.get(block.cid())?;
                        let entry = BitswapEntry {
                            cid: want.cid,
                            priority: want.priority,
                            want_type: want.want_type,
                            cancel: false,
                            send_dont_have: false,
                        };
                        self.task_for_want(&entry, Some(block.len()))
                    })
                    .collect();
                if !tasks.is_empty() {
                    scheduled.push((*peer, tasks));
                }
            }
            for (peer, tasks) in scheduled {
                state.request_queue.push_tasks(peer, tasks);
            }
        }
        self.schedule();
    }

    /// Serves one batch of tasks for the next peer in line. Returns `false`
    /// when no peer has ready tasks.
    pub fn process_tasks(&self) -> bool {
        let popped = self
            .state
            .lock()
            .request_queue
            .pop_tasks(self.config.target_message_size);
        let Some(PoppedTasks {
            peer,
            tasks,
            pending_size,
        }) = popped
        else {
            return false;
        };

        let mut message = BitswapMessage::new(false);
        for task in &tasks {
            if !task.data.have_block {
                message.add_dont_have(task.cid);
            } else if !task.data.is_want_block {
                message.add_have(task.cid);
            } else {
                match self.load_block(&task.cid) {
                    Some(data) => message.add_block(Block::new(task.cid, data)),
                    // gone since the task was scheduled
                    None if task.data.send_dont_have => message.add_dont_have(task.cid),
                    None => {}
                }
            }
        }
        message.set_pending_bytes(i32::try_from(pending_size).unwrap_or(i32::MAX));

        if !message.is_empty() {
            let sent: Vec<_> = message.blocks().map(|b| (*b.cid(), b.len())).collect();
            match self.dispatch(peer, message) {
                Ok(()) => {
                    let mut state = self.state.lock();
                    if let Some(ledger) = state.ledgers.get_mut(&peer) {
                        for (cid, size) in &sent {
                            ledger.sent_bytes(*size);
                            ledger.cancel_want(cid);
                        }
                    }
                    for (_, size) in sent {
                        self.stats.block_sent(size);
                    }
                }
                Err(e) => {
                    warn!("{e}");
                    metrics::FAILURE_TOTAL.get_or_create(&values::DISPATCH).inc();
                }
            }
        }
        self.state.lock().request_queue.tasks_done(&peer, &tasks);
        true
    }

    fn load_block(&self, cid: &Cid) -> Option<Bytes> {
        self.store.get(cid).unwrap_or_else(|e| {
            warn!("failed to read block {cid}: {e}");
            None
        })
    }

    fn dispatch(&self, peer: PeerId, message: BitswapMessage) -> Result<(), BitswapError> {
        let queue = self
            .queues
            .get(&peer)
            .ok_or_else(|| BitswapError::send_failure(peer, "message queue closed"))?;
        queue.add_message(message)
    }

    /// Forgets `peer`: its ledger, its tasks and the engine's reference to
    /// its queue.
    pub fn peer_disconnected(&self, peer: &PeerId) {
        let tracked = {
            let mut state = self.state.lock();
            state.request_queue.remove_peer(peer);
            state.ledgers.remove(peer).is_some()
        };
        if tracked {
            self.queues.release(peer);
        }
    }

    fn schedule(&self) {
        self.tick.notify_one();
    }

    /// Starts serving tasks in the background, one drain per tick.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let this: Weak<Self> = Arc::downgrade(self);
        let tick = Arc::clone(&self.tick);
        let delay = self.config.process_tasks_delay;
        *task = Some(tokio::spawn(async move {
            loop {
                tick.notified().await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let Some(engine) = this.upgrade() else {
                    break;
                };
                while engine.process_tasks() {
                    tokio::task::yield_now().await;
                }
            }
        }));
        // serve what was queued before the start
        self.schedule();
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn ledger_for_peer(&self, peer: &PeerId) -> Option<LedgerSnapshot> {
        self.state.lock().ledgers.get(peer).map(Ledger::snapshot)
    }

    pub fn wantlist_for_peer(&self, peer: &PeerId) -> Vec<WantlistEntry> {
        self.state
            .lock()
            .ledgers
            .get(peer)
            .map(|l| l.wantlist.sorted_entries().cloned().collect())
            .unwrap_or_default()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.state.lock().ledgers.keys().copied().collect()
    }

    pub fn num_bytes_sent_to(&self, peer: &PeerId) -> u64 {
        self.state
            .lock()
            .ledgers
            .get(peer)
            .map_or(0, Ledger::bytes_sent)
    }

    pub fn num_bytes_received_from(&self, peer: &PeerId) -> u64 {
        self.state
            .lock()
            .ledgers
            .get(peer)
            .map_or(0, Ledger::bytes_recv)
    }

    pub fn pending_task_count(&self, peer: &PeerId) -> usize {
        self.state.lock().request_queue.pending_task_count(peer)
    }

    pub fn active_task_count(&self, peer: &PeerId) -> usize {
        self.state.lock().request_queue.active_task_count(peer)
    }
}
