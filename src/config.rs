// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::{BitswapError, protocol::DEFAULT_PROTOCOL_PREFIX};

/// Bitswap settings. Missing fields fall back to their defaults when
/// deserialized, e.g. from a `[bitswap]` table of a node config file.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct BitswapConfig {
    /// Protocol names are `/<prefix>/bitswap/<version>`.
    #[default(DEFAULT_PROTOCOL_PREFIX.to_owned())]
    pub protocol_prefix: String,
    /// Largest outbound message; bigger ones are split.
    #[default(4 * 1024 * 1024)]
    pub max_message_size: usize,
    /// How long a peer's queue collects changes before sending them as one
    /// message.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[default(Duration::from_millis(10))]
    pub message_queue_delay: Duration,
    /// How long the decision engine collects wants before serving them.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[default(Duration::from_millis(10))]
    pub process_tasks_delay: Duration,
    /// Interval of full wantlist rebroadcasts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[default(Duration::from_secs(60))]
    pub rebroadcast_interval: Duration,
    /// Minimum bytes of tasks popped for one outbound engine message.
    #[default(16 * 1024)]
    pub target_message_size: usize,
    /// Blocks up to this size are sent in place of a `HAVE`.
    #[default(1024)]
    pub max_size_replace_has_with_block: usize,
    /// In-flight task limit per peer.
    #[default(32)]
    pub max_active_tasks_per_peer: usize,
}

impl BitswapConfig {
    /// Rejects settings that would stall or spin the background tasks.
    pub fn validate(&self) -> Result<(), BitswapError> {
        let fail = |msg: &str| Err(BitswapError::Config(msg.to_owned()));
        if self.protocol_prefix.is_empty() || self.protocol_prefix.contains('/') {
            return fail("protocol_prefix must be a non-empty path segment");
        }
        if self.max_message_size == 0 {
            return fail("max_message_size must be positive");
        }
        if self.rebroadcast_interval.is_zero() {
            return fail("rebroadcast_interval must be positive");
        }
        if self.target_message_size == 0 {
            return fail("target_message_size must be positive");
        }
        if self.target_message_size > self.max_message_size {
            return fail("target_message_size must not exceed max_message_size");
        }
        if self.max_active_tasks_per_peer == 0 {
            return fail("max_active_tasks_per_peer must be positive");
        }
        Ok(())
    }
}
