// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ahash::HashMap;
use cid::Cid;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    BitswapError, Block,
    utils::cid::{CidKey, CidKeyExt as _},
};

type Waiters = Arc<Mutex<HashMap<CidKey, Vec<Waiter>>>>;

struct Waiter {
    id: u64,
    /// The `Cid` the caller asked for, handed back with the block
    cid: Cid,
    tx: oneshot::Sender<Result<Block, BitswapError>>,
}

/// Unregisters a waiter however its future ends.
struct WaiterGuard {
    waiters: Waiters,
    key: CidKey,
    id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(&self.key) {
            list.retain(|w| w.id != self.id);
            if list.is_empty() {
                waiters.remove(&self.key);
            }
        }
    }
}

/// Registry of local wants waiting for their block.
#[derive(Default)]
pub struct Notifications {
    waiters: Waiters,
    next_id: AtomicU64,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `cid` right away and returns the future it
    /// settles through.
    ///
    /// The future resolves with the block once [`Notifications::has_block`]
    /// sees the same content, fails with [`BitswapError::Unwanted`] on
    /// [`Notifications::unwant_block`] and with [`BitswapError::Aborted`] when
    /// `abort` fires. Dropping the future unregisters the waiter.
    pub fn want_block(
        &self,
        cid: Cid,
        abort: Option<CancellationToken>,
    ) -> BoxFuture<'static, Result<Block, BitswapError>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = cid.key();
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .entry(key)
            .or_default()
            .push(Waiter { id, cid, tx });
        let guard = WaiterGuard {
            waiters: Arc::clone(&self.waiters),
            key,
            id,
        };
        Box::pin(async move {
            let _guard = guard;
            let received = match abort {
                Some(token) => tokio::select! {
                    biased;
                    received = rx => received,
                    _ = token.cancelled() => return Err(BitswapError::Aborted(cid)),
                },
                None => rx.await,
            };
            received.unwrap_or(Err(BitswapError::Aborted(cid)))
        })
    }

    /// Settles every waiter for the block's content.
    pub fn has_block(&self, block: &Block) {
        let Some(waiters) = self.waiters.lock().remove(&block.key()) else {
            return;
        };
        tracing::trace!("block {} settles {} waiter(s)", block.cid(), waiters.len());
        for waiter in waiters {
            // a closed receiver means the caller is gone
            let _ = waiter
                .tx
                .send(Ok(Block::new(waiter.cid, block.data().clone())));
        }
    }

    /// Fails every waiter for `cid` with [`BitswapError::Unwanted`].
    pub fn unwant_block(&self, cid: &Cid) {
        let Some(waiters) = self.waiters.lock().remove(&cid.key()) else {
            return;
        };
        for waiter in waiters {
            let _ = waiter.tx.send(Err(BitswapError::Unwanted(waiter.cid)));
        }
    }

    pub fn listener_count(&self, cid: &Cid) -> usize {
        self.waiters.lock().get(&cid.key()).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multihash_codetable::{Code, MultihashDigest as _};

    fn v0_and_v1(data: &[u8]) -> (Cid, Cid) {
        let v0 = Cid::new_v0(Code::Sha2_256.digest(data)).unwrap();
        (v0, Cid::new_v1(0x55, *v0.hash()))
    }

    #[tokio::test]
    async fn resolves_across_cid_versions() {
        let notifications = Notifications::new();
        let (v0, v1) = v0_and_v1(b"hello");
        let want = notifications.want_block(v1, None);
        assert_eq!(notifications.listener_count(&v1), 1);

        notifications.has_block(&Block::new(v0, b"hello".to_vec()));
        assert_eq!(notifications.listener_count(&v1), 0);

        let block = want.await.unwrap();
        assert_eq!(block.cid(), &v1);
        assert_eq!(block.data().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn unwant_rejects_all_waiters() {
        let notifications = Notifications::new();
        let (cid, _) = v0_and_v1(b"a");
        let first = notifications.want_block(cid, None);
        let second = notifications.want_block(cid, None);
        assert_eq!(notifications.listener_count(&cid), 2);

        notifications.unwant_block(&cid);
        assert!(matches!(first.await, Err(BitswapError::Unwanted(c)) if c == cid));
        assert!(matches!(second.await, Err(BitswapError::Unwanted(_))));
        assert_eq!(notifications.listener_count(&cid), 0);
    }

    #[tokio::test]
    async fn abort_rejects_only_its_waiter() {
        let notifications = Notifications::new();
        let (cid, _) = v0_and_v1(b"b");
        let token = CancellationToken::new();
        let aborted = notifications.want_block(cid, Some(token.clone()));
        let other = notifications.want_block(cid, None);

        token.cancel();
        assert!(matches!(aborted.await, Err(BitswapError::Aborted(_))));
        assert_eq!(notifications.listener_count(&cid), 1);

        notifications.has_block(&Block::new(cid, b"b".to_vec()));
        assert!(other.await.is_ok());
    }

    #[tokio::test]
    async fn dropped_future_unregisters() {
        let notifications = Notifications::new();
        let (cid, _) = v0_and_v1(b"c");
        drop(notifications.want_block(cid, None));
        assert_eq!(notifications.listener_count(&cid), 0);
        // settling with nobody waiting is a no-op
        notifications.has_block(&Block::new(cid, b"c".to_vec()));
        notifications.unwant_block(&cid);
    }
}
