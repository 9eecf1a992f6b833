// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;

use crate::utils::cid::{CidKey, CidKeyExt as _};

/// What the engine knows about a want when it schedules a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskData {
    /// Size of the block, `0` when not stored locally
    pub block_size: usize,
    pub have_block: bool,
    pub is_want_block: bool,
    pub send_dont_have: bool,
}

/// A scheduled response to one peer's want.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Canonical hash; a peer has at most one pending task per key
    pub key: CidKey,
    pub cid: Cid,
    pub priority: i32,
    /// Bytes the response adds to an outbound message
    pub size: usize,
    pub data: TaskData,
}

impl Task {
    pub fn new(cid: Cid, priority: i32, size: usize, data: TaskData) -> Self {
        Self {
            key: cid.key(),
            cid,
            priority,
            size,
            data,
        }
    }
}

/// Decides how a new task interacts with tasks already scheduled for the
/// same peer and content.
pub trait TaskMerger: Send + Sync {
    /// Whether `task` tells the peer anything the `active` tasks with the
    /// same key are not already sending.
    fn has_new_info(&self, task: &Task, active: &[&Task]) -> bool;

    /// Folds `new` into the pending `existing` task.
    fn merge(&self, new: &Task, existing: &mut Task);
}

/// A want-block supersedes a want-have, block availability supersedes a
/// `DONT_HAVE`, and anything else is a duplicate. A merged task keeps the
/// higher of the two priorities.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTaskMerger;

impl TaskMerger for DefaultTaskMerger {
    fn has_new_info(&self, task: &Task, active: &[&Task]) -> bool {
        let have_size = active.iter().any(|t| t.data.have_block);
        let is_want_block = active.iter().any(|t| t.data.is_want_block);
        (!is_want_block && task.data.is_want_block) || (!have_size && task.data.have_block)
    }

    fn merge(&self, new: &Task, existing: &mut Task) {
        existing.priority = existing.priority.max(new.priority);
        if !existing.data.have_block && new.data.have_block {
            existing.data.have_block = true;
            existing.data.block_size = new.data.block_size;
        }
        if !existing.data.is_want_block && new.data.is_want_block {
            existing.data.is_want_block = true;
            existing.data.send_dont_have = new.data.send_dont_have;
        }
        // a want-block for a block we have is answered with the block itself
        if existing.data.is_want_block && existing.data.have_block {
            existing.size = existing.data.block_size;
        }
    }
}
