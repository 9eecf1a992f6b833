// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT
//! A libp2p
//! bitswap([SPEC](https://github.com/ipfs/specs/blob/main/BITSWAP.md))
//! block exchange engine in Rust.
//!
//! ## Features
//!
//! - Wire compatible with `/ipfs/bitswap/1.0.0`, `1.1.0` and `1.2.0`
//! - Per-peer ledgers with fair, size bounded response scheduling
//! - `HAVE` / `DONT_HAVE` block presences and `pendingBytes` hints
//! - Prometheus metrics
//!
//! ## Usage
//!
//! [`Bitswap`] is transport agnostic. Plug a [`Network`] implementation in for
//! connection management and content routing, and a [`BitswapStore`] for block
//! persistence. Inbound frames are decoded with [`BitswapCodec`] (or handed over
//! raw via [`Bitswap::receive_bytes`]); outbound messages leave through
//! [`Network::send_message`].

mod bitswap;
mod block;
pub mod config;
pub mod decision;
mod error;
pub mod message;
pub mod message_queue;
pub mod metrics;
pub mod network;
pub mod notifications;
pub mod protocol;
pub mod stats;
pub mod store;
pub mod utils;
pub mod want_manager;
pub mod wantlist;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

pub use bitswap::Bitswap;
pub use block::Block;
pub use config::BitswapConfig;
pub use decision::LedgerSnapshot;
pub use error::BitswapError;
pub use message::{
    BitswapCodec, BitswapEntry, BitswapMessage, BlockPresence, BlockPresenceType, WantType,
};
pub use network::Network;
pub use protocol::ProtocolVersion;
pub use stats::Stat;
pub use store::{BitswapStore, MemoryBlockstore};
pub use wantlist::WantlistEntry;
