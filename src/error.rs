// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use libp2p::PeerId;

/// Bitswap error.
#[derive(Debug, thiserror::Error)]
pub enum BitswapError {
    /// Inbound bytes could not be decoded into a bitswap message.
    #[error("malformed bitswap message: {0}")]
    MalformedMessage(String),
    /// The message could not be handed to the peer's queue or network.
    #[error("failed to send bitswap message to {peer}: {reason}")]
    SendFailure { peer: PeerId, reason: String },
    /// The local want was withdrawn with an explicit unwant.
    #[error("block {0} unwanted")]
    Unwanted(Cid),
    /// The caller's cancellation token fired before the block arrived.
    #[error("want for block {0} aborted")]
    Aborted(Cid),
    #[error("invalid bitswap configuration: {0}")]
    Config(String),
    #[error("block store failure: {0}")]
    Store(#[from] anyhow::Error),
    #[error("network failure: {0}")]
    Network(anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BitswapError {
    pub(crate) fn malformed(e: impl std::fmt::Display) -> Self {
        Self::MalformedMessage(e.to_string())
    }

    pub(crate) fn send_failure(peer: PeerId, e: impl std::fmt::Display) -> Self {
        Self::SendFailure {
            peer,
            reason: e.to_string(),
        }
    }
}
