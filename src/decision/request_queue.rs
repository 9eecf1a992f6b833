// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{cmp::Ordering, sync::Arc};

use cid::Cid;
use libp2p::PeerId;

use super::task_merger::{Task, TaskMerger};
use crate::utils::{
    cid::{CidKey, CidKeyExt as _},
    sorted_map::SortedMap,
};

#[derive(Debug)]
struct PendingTask {
    seq: u64,
    task: Task,
}

// highest priority first, FIFO among equals
fn pending_order((_, a): (&CidKey, &PendingTask), (_, b): (&CidKey, &PendingTask)) -> Ordering {
    b.task
        .priority
        .cmp(&a.task.priority)
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Pending and in-flight tasks of one peer.
#[derive(Debug)]
struct PeerTasks {
    pending: SortedMap<CidKey, PendingTask>,
    active: Vec<Task>,
    active_size: usize,
    delivered_bytes: u64,
    max_active: usize,
    next_seq: u64,
}

impl PeerTasks {
    fn new(max_active: usize) -> Self {
        Self {
            pending: SortedMap::new(pending_order),
            active: vec![],
            active_size: 0,
            delivered_bytes: 0,
            max_active,
            next_seq: 0,
        }
    }

    fn is_ready(&self) -> bool {
        !self.pending.is_empty() && self.active.len() < self.max_active
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    fn pending_size(&self) -> usize {
        self.pending.values().map(|p| p.task.size).sum()
    }

    fn push_task(&mut self, task: Task, merger: &dyn TaskMerger) {
        let active: Vec<&Task> = self.active.iter().filter(|t| t.key == task.key).collect();
        if !active.is_empty() && !merger.has_new_info(&task, &active) {
            return;
        }
        let merged = self
            .pending
            .modify(&task.key, |pending| merger.merge(&task, &mut pending.task));
        if merged.is_some() {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(task.key, PendingTask { seq, task });
    }

    fn pop_tasks(&mut self, target_size: usize) -> Vec<Task> {
        let mut size = 0;
        let mut tasks = vec![];
        while size < target_size && self.active.len() < self.max_active {
            let Some((_, pending)) = self.pending.pop_first() else {
                break;
            };
            size += pending.task.size;
            self.active_size += pending.task.size;
            self.active.push(pending.task.clone());
            tasks.push(pending.task);
        }
        tasks
    }

    fn task_done(&mut self, task: &Task) {
        let position = self
            .active
            .iter()
            .position(|t| t == task)
            .or_else(|| self.active.iter().position(|t| t.key == task.key));
        if let Some(i) = position {
            let done = self.active.swap_remove(i);
            self.active_size -= done.size;
            self.delivered_bytes += done.size as u64;
        }
    }
}

// ready peers first, then the least served
fn peer_order((ka, a): (&PeerId, &PeerTasks), (kb, b): (&PeerId, &PeerTasks)) -> Ordering {
    b.is_ready()
        .cmp(&a.is_ready())
        .then_with(|| a.delivered_bytes.cmp(&b.delivered_bytes))
        .then_with(|| a.active_size.cmp(&b.active_size))
        .then_with(|| b.pending.len().cmp(&a.pending.len()))
        .then_with(|| ka.cmp(kb))
}

/// Tasks popped for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoppedTasks {
    pub peer: PeerId,
    pub tasks: Vec<Task>,
    /// Sum of the sizes of the peer's tasks still pending
    pub pending_size: usize,
}

/// Schedules tasks across peers: by priority within a peer, and towards the
/// least served ready peer across peers.
pub struct RequestQueue {
    peers: SortedMap<PeerId, PeerTasks>,
    merger: Arc<dyn TaskMerger>,
    max_active_per_peer: usize,
}

impl RequestQueue {
    pub fn new(merger: Arc<dyn TaskMerger>, max_active_per_peer: usize) -> Self {
        Self {
            peers: SortedMap::new(peer_order),
            merger,
            max_active_per_peer,
        }
    }

    pub fn push_tasks(&mut self, peer: PeerId, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        if !self.peers.contains_key(&peer) {
            self.peers
                .insert(peer, PeerTasks::new(self.max_active_per_peer));
        }
        let merger = Arc::clone(&self.merger);
        self.peers.modify(&peer, |peer_tasks| {
            for task in tasks {
                peer_tasks.push_task(task, merger.as_ref());
            }
        });
    }

    /// Pops tasks of the next ready peer until their sizes add up to
    /// `target_size` or the peer's active limit is hit.
    pub fn pop_tasks(&mut self, target_size: usize) -> Option<PoppedTasks> {
        let peer = match self.peers.first() {
            Some((peer, tasks)) if tasks.is_ready() => *peer,
            _ => return None,
        };
        let (tasks, pending_size) = self.peers.modify(&peer, |peer_tasks| {
            let tasks = peer_tasks.pop_tasks(target_size);
            (tasks, peer_tasks.pending_size())
        })?;
        Some(PoppedTasks {
            peer,
            tasks,
            pending_size,
        })
    }

    /// Marks popped tasks as delivered, whatever the outcome of the send.
    pub fn tasks_done(&mut self, peer: &PeerId, tasks: &[Task]) {
        let idle = self.peers.modify(peer, |peer_tasks| {
            for task in tasks {
                peer_tasks.task_done(task);
            }
            peer_tasks.is_idle()
        });
        if idle == Some(true) {
            self.peers.remove(peer);
        }
    }

    /// Drops pending tasks of `peer` for `cids`.
    pub fn remove_tasks(&mut self, peer: &PeerId, cids: &[Cid]) {
        let idle = self.peers.modify(peer, |peer_tasks| {
            for cid in cids {
                peer_tasks.pending.remove(&cid.key());
            }
            peer_tasks.is_idle()
        });
        if idle == Some(true) {
            self.peers.remove(peer);
        }
    }

    pub fn remove_peer(&mut self, peer: &PeerId) {
        self.peers.remove(peer);
    }

    pub fn pending_task_count(&self, peer: &PeerId) -> usize {
        self.peers.get(peer).map_or(0, |t| t.pending.len())
    }

    pub fn active_task_count(&self, peer: &PeerId) -> usize {
        self.peers.get(peer).map_or(0, |t| t.active.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decision::task_merger::{DefaultTaskMerger, TaskData},
        test_utils::{block, blocks, peer},
    };

    fn queue(max_active: usize) -> RequestQueue {
        RequestQueue::new(Arc::new(DefaultTaskMerger), max_active)
    }

    fn want_block(cid: Cid, priority: i32, size: usize) -> Task {
        Task::new(
            cid,
            priority,
            size,
            TaskData {
                block_size: size,
                have_block: true,
                is_want_block: true,
                send_dont_have: false,
            },
        )
    }

    fn want_have(cid: Cid, priority: i32) -> Task {
        Task::new(
            cid,
            priority,
            10,
            TaskData {
                block_size: 100,
                have_block: true,
                is_want_block: false,
                send_dont_have: false,
            },
        )
    }

    #[test]
    fn pops_by_priority_then_fifo() {
        let mut queue = queue(16);
        let peer = peer();
        let cids: Vec<_> = blocks(4, 8).iter().map(|b| *b.cid()).collect();
        queue.push_tasks(
            peer,
            vec![
                want_block(cids[0], 1, 1),
                want_block(cids[1], 5, 1),
                want_block(cids[2], 1, 1),
                want_block(cids[3], 9, 1),
            ],
        );
        let popped = queue.pop_tasks(usize::MAX).unwrap();
        assert_eq!(popped.peer, peer);
        assert_eq!(
            popped.tasks.iter().map(|t| t.cid).collect::<Vec<_>>(),
            vec![cids[3], cids[1], cids[0], cids[2]]
        );
        assert_eq!(popped.pending_size, 0);
    }

    #[test]
    fn merges_with_pending_tasks() {
        let mut queue = queue(16);
        let peer = peer();
        let (a, b) = (*block(b"a").cid(), *block(b"b").cid());

        // want-have then want-block: the block wins
        queue.push_tasks(peer, vec![want_have(a, 1), want_block(a, 1, 100)]);
        // want-block then want-have: the have is ignored
        queue.push_tasks(peer, vec![want_block(b, 1, 100), want_have(b, 1)]);
        // duplicate want-block collapses, priority raised
        queue.push_tasks(peer, vec![want_block(b, 7, 100)]);
        assert_eq!(queue.pending_task_count(&peer), 2);

        let popped = queue.pop_tasks(usize::MAX).unwrap();
        assert_eq!(popped.tasks.len(), 2);
        assert_eq!(popped.tasks[0].cid, b);
        assert_eq!(popped.tasks[0].priority, 7);
        assert!(popped.tasks.iter().all(|t| t.data.is_want_block && t.size == 100));
    }

    #[test]
    fn drops_tasks_without_new_info_over_active() {
        let mut queue = queue(16);
        let peer = peer();
        let a = *block(b"a").cid();
        queue.push_tasks(peer, vec![want_block(a, 1, 100)]);
        let popped = queue.pop_tasks(usize::MAX).unwrap();
        assert_eq!(queue.active_task_count(&peer), 1);

        queue.push_tasks(peer, vec![want_block(a, 1, 100), want_have(a, 1)]);
        assert_eq!(queue.pending_task_count(&peer), 0);

        queue.tasks_done(&peer, &popped.tasks);
        assert_eq!(queue.active_task_count(&peer), 0);
        assert!(queue.pop_tasks(usize::MAX).is_none());
    }

    #[test]
    fn respects_target_size_and_active_limit() {
        let mut queue = queue(3);
        let peer = peer();
        let tasks = blocks(10, 8)
            .iter()
            .map(|b| want_block(*b.cid(), 1, 10))
            .collect();
        queue.push_tasks(peer, tasks);

        let popped = queue.pop_tasks(15).unwrap();
        assert_eq!(popped.tasks.len(), 2);
        assert_eq!(popped.pending_size, 80);

        let popped = queue.pop_tasks(100).unwrap();
        assert_eq!(popped.tasks.len(), 1);
        // active limit reached
        assert!(queue.pop_tasks(100).is_none());

        queue.tasks_done(&peer, &popped.tasks);
        assert_eq!(queue.pop_tasks(100).unwrap().tasks.len(), 1);
    }

    #[test]
    fn cancels_and_peer_removal() {
        let mut queue = queue(16);
        let peer = peer();
        let (a, b) = (*block(b"a").cid(), *block(b"b").cid());
        queue.push_tasks(peer, vec![want_block(a, 1, 1), want_block(b, 1, 1)]);
        queue.remove_tasks(&peer, &[a, *block(b"absent").cid()]);
        assert_eq!(queue.pending_task_count(&peer), 1);
        queue.remove_tasks(&peer, &[b]);
        assert_eq!(queue.pending_task_count(&peer), 0);
        assert!(queue.pop_tasks(1).is_none());

        queue.push_tasks(peer, vec![want_block(a, 1, 1)]);
        queue.remove_peer(&peer);
        assert!(queue.pop_tasks(1).is_none());
    }

    #[test]
    fn serves_least_delivered_peer_first() {
        let mut queue = queue(16);
        let peers = [peer(), peer(), peer()];
        let cids: Vec<_> = blocks(20, 8).iter().map(|b| *b.cid()).collect();
        for peer in peers {
            queue.push_tasks(peer, cids.iter().map(|c| want_block(*c, 1, 100)).collect());
        }
        let mut delivered = ahash::HashMap::<PeerId, usize>::default();
        while let Some(popped) = queue.pop_tasks(100) {
            *delivered.entry(popped.peer).or_default() += popped.tasks.len();
            queue.tasks_done(&popped.peer, &popped.tasks);
            let counts: Vec<_> = peers
                .iter()
                .map(|p| delivered.get(p).copied().unwrap_or_default())
                .collect();
            let spread = counts.iter().max().unwrap() - counts.iter().min().unwrap();
            assert!(spread <= 1, "unfair delivery {counts:?}");
        }
        assert!(peers.iter().all(|p| delivered[p] == 20));
    }
}
