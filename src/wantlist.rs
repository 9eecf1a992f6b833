// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp::Ordering;

use cid::Cid;

use crate::{
    message::WantType,
    utils::{
        cid::{CidKey, CidKeyExt as _},
        sorted_map::SortedMap,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantlistEntry {
    pub cid: Cid,
    pub priority: i32,
    pub want_type: WantType,
    /// Number of outstanding `add` calls
    refs: usize,
}

impl WantlistEntry {
    pub fn refs(&self) -> usize {
        self.refs
    }
}

fn by_priority((ka, a): (&CidKey, &WantlistEntry), (kb, b): (&CidKey, &WantlistEntry)) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| ka.code().cmp(&kb.code()))
        .then_with(|| ka.digest().cmp(kb.digest()))
}

/// Reference counted set of wanted content, iterated by descending priority.
#[derive(Debug, Clone)]
pub struct Wantlist {
    entries: SortedMap<CidKey, WantlistEntry>,
}

impl Default for Wantlist {
    fn default() -> Self {
        Self {
            entries: SortedMap::new(by_priority),
        }
    }
}

impl Wantlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reference to `cid`. An existing entry takes the new priority
    /// and is upgraded from `Have` to `Block`, never downgraded.
    ///
    /// Returns `true` when the entry is new.
    pub fn add(&mut self, cid: Cid, priority: i32, want_type: WantType) -> bool {
        let key = cid.key();
        let updated = self.entries.modify(&key, |entry| {
            entry.refs += 1;
            entry.priority = priority;
            if want_type == WantType::Block {
                entry.want_type = WantType::Block;
            }
        });
        if updated.is_some() {
            return false;
        }
        self.entries.insert(
            key,
            WantlistEntry {
                cid,
                priority,
                want_type,
                refs: 1,
            },
        );
        true
    }

    /// Drops one reference to `cid`. Returns `true` when that removed the
    /// entry.
    pub fn remove(&mut self, cid: &Cid) -> bool {
        let key = cid.key();
        let Some(entry) = self.entries.get(&key) else {
            return false;
        };
        if entry.refs > 1 {
            // refs do not affect the order
            self.entries.modify(&key, |entry| entry.refs -= 1);
            false
        } else {
            self.entries.remove(&key).is_some()
        }
    }

    /// Removes `cid` whatever its reference count.
    pub fn remove_force(&mut self, cid: &Cid) -> Option<WantlistEntry> {
        self.entries.remove(&cid.key())
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.entries.contains_key(&cid.key())
    }

    pub fn get(&self, cid: &Cid) -> Option<&WantlistEntry> {
        self.entries.get(&cid.key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }

    /// Entries by descending priority.
    pub fn sorted_entries(&self) -> impl Iterator<Item = &WantlistEntry> {
        self.entries.values()
    }
}
