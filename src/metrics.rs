// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::LazyLock;

use parking_lot::{RwLock, RwLockWriteGuard};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

static DEFAULT_REGISTRY: LazyLock<RwLock<Registry>> = LazyLock::new(Default::default);

/// Registry all `bitswap` metrics are registered into. Exporting it is up to
/// the embedding application.
pub fn default_registry<'a>() -> RwLockWriteGuard<'a, Registry> {
    DEFAULT_REGISTRY.write()
}

/// Encodes the registry in the text exposition format.
pub fn encode_text() -> Result<String, std::fmt::Error> {
    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &DEFAULT_REGISTRY.read())?;
    Ok(text)
}

pub static MESSAGE_TOTAL: LazyLock<Family<KindLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    default_registry().register(
        "bitswap_message",
        "Number of bitswap messages",
        metric.clone(),
    );
    metric
});

pub static FAILURE_TOTAL: LazyLock<Family<KindLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    default_registry().register(
        "bitswap_failure",
        "Number of failed bitswap peer operations",
        metric.clone(),
    );
    metric
});

pub static BLOCK_TOTAL: LazyLock<Family<KindLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    default_registry().register(
        "bitswap_block",
        "Number of blocks exchanged",
        metric.clone(),
    );
    metric
});

pub static BYTES_TOTAL: LazyLock<Family<KindLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    default_registry().register(
        "bitswap_bytes",
        "Block payload bytes exchanged",
        metric.clone(),
    );
    metric
});

pub static WANTLIST_SIZE: LazyLock<Gauge> = LazyLock::new(|| {
    let metric = Gauge::default();
    default_registry().register(
        "bitswap_wantlist_size",
        "Number of entries in the local wantlist",
        metric.clone(),
    );
    metric
});

pub static PEER_QUEUES: LazyLock<Gauge> = LazyLock::new(|| {
    let metric = Gauge::default();
    default_registry().register(
        "bitswap_peer_queues",
        "Number of live per-peer message queues",
        metric.clone(),
    );
    metric
});

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet, derive_more::Constructor)]
pub struct KindLabel {
    kind: &'static str,
}

pub mod values {
    use super::KindLabel;

    /// Inbound message decoded.
    pub const INBOUND: KindLabel = KindLabel::new("inbound");
    /// Outbound message handed to the network.
    pub const OUTBOUND: KindLabel = KindLabel::new("outbound");
    /// Inbound bytes that did not decode.
    pub const MALFORMED: KindLabel = KindLabel::new("malformed");

    pub const CONNECT: KindLabel = KindLabel::new("connect");
    pub const SEND: KindLabel = KindLabel::new("send");
    /// Engine message that could not be queued.
    pub const DISPATCH: KindLabel = KindLabel::new("dispatch");
    pub const STORE: KindLabel = KindLabel::new("store");

    pub const RECEIVED: KindLabel = KindLabel::new("received");
    /// Received block that was already stored.
    pub const DUPLICATE: KindLabel = KindLabel::new("duplicate");
    pub const SENT: KindLabel = KindLabel::new("sent");
}
