// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use libp2p::PeerId;

use crate::BitswapMessage;

/// Transport and discovery services `bitswap` runs on top of.
///
/// Implementations own connection establishment, protocol negotiation and
/// framing. Every method reports failures for the single peer or content it
/// was called for; none of them are retried by the caller.
#[async_trait::async_trait]
pub trait Network: Send + Sync + 'static {
    /// Dials `peer` unless already connected.
    async fn connect_to(&self, peer: &PeerId) -> anyhow::Result<()>;

    /// Delivers one message, encoded for the version negotiated with `peer`.
    async fn send_message(&self, peer: &PeerId, message: BitswapMessage) -> anyhow::Result<()>;

    /// Looks up providers of `cid` and connects to them.
    async fn find_and_connect(&self, cid: &Cid) -> anyhow::Result<()>;

    /// Announces that the local node can serve `cid`.
    async fn provide(&self, cid: &Cid) -> anyhow::Result<()>;

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
