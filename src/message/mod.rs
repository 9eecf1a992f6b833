// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod codec;
#[rustfmt::skip]
pub(crate) mod pb;
mod prefix;

pub use codec::BitswapCodec;
pub use prefix::Prefix;

use std::mem;

use cid::Cid;
use indexmap::IndexMap;
use quick_protobuf::{BytesReader, MessageRead as _, MessageWrite as _, Writer, sizeofs::sizeof_len};

use crate::{
    BitswapError, Block, ProtocolVersion,
    utils::cid::{CidKey, CidKeyExt as _},
};

use pb::mod_Message::{self as pb_message, mod_Wantlist as pb_wantlist};

/// Upper bound of the bytes a message spends outside of its entries, blocks
/// and presences.
const MESSAGE_OVERHEAD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WantType {
    /// Wants the block itself
    #[default]
    Block,
    /// Only wants to know whether the remote has the block
    Have,
}

impl From<pb_wantlist::WantType> for WantType {
    fn from(ty: pb_wantlist::WantType) -> Self {
        match ty {
            pb_wantlist::WantType::Block => Self::Block,
            pb_wantlist::WantType::Have => Self::Have,
        }
    }
}

impl From<WantType> for pb_wantlist::WantType {
    fn from(ty: WantType) -> Self {
        match ty {
            WantType::Block => Self::Block,
            WantType::Have => Self::Have,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockPresenceType {
    Have,
    DontHave,
}

/// A wantlist entry as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitswapEntry {
    pub cid: Cid,
    pub priority: i32,
    pub want_type: WantType,
    pub cancel: bool,
    pub send_dont_have: bool,
}

impl BitswapEntry {
    pub fn new_block(cid: Cid, priority: i32) -> Self {
        Self {
            cid,
            priority,
            want_type: WantType::Block,
            cancel: false,
            send_dont_have: false,
        }
    }

    pub fn new_have(cid: Cid, priority: i32) -> Self {
        Self {
            want_type: WantType::Have,
            ..Self::new_block(cid, priority)
        }
    }

    pub fn new_cancel(cid: Cid) -> Self {
        Self {
            cancel: true,
            ..Self::new_block(cid, 0)
        }
    }

    pub fn send_dont_have(mut self, b: bool) -> Self {
        self.send_dont_have = b;
        self
    }

    /// `None` when the entry cannot be expressed in `version`.
    fn to_proto(&self, version: ProtocolVersion) -> Option<pb_wantlist::Entry> {
        let typed = version.supports_want_types();
        // 1.0.0 peers only understand want-block
        if !typed && !self.cancel && self.want_type == WantType::Have {
            return None;
        }
        Some(pb_wantlist::Entry {
            block: self.cid.to_bytes(),
            priority: self.priority,
            cancel: self.cancel,
            wantType: if typed {
                self.want_type.into()
            } else {
                pb_wantlist::WantType::Block
            },
            sendDontHave: typed && self.send_dont_have,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPresence {
    pub cid: Cid,
    pub ty: BlockPresenceType,
}

impl BlockPresence {
    fn to_proto(self) -> pb_message::BlockPresence {
        pb_message::BlockPresence {
            cid: self.cid.to_bytes(),
            type_pb: match self.ty {
                BlockPresenceType::Have => pb_message::BlockPresenceType::Have,
                BlockPresenceType::DontHave => pb_message::BlockPresenceType::DontHave,
            },
        }
    }
}

/// Bytes a block presence for `cid` occupies in an encoded message.
pub fn block_presence_size(cid: &Cid) -> usize {
    let presence = BlockPresence {
        cid: *cid,
        ty: BlockPresenceType::DontHave,
    };
    1 + sizeof_len(presence.to_proto().get_size())
}

fn payload_to_proto(block: &Block) -> pb_message::Block {
    pb_message::Block {
        prefix: Prefix::from(block.cid()).to_bytes(),
        data: block.data().to_vec(),
    }
}

/// A `bitswap` message: wantlist changes, blocks, block presences and the
/// number of bytes still owed to the receiver.
///
/// Everything is keyed by the canonical hash, so adding the same content
/// twice under different `Cid` encodings keeps a single item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitswapMessage {
    full: bool,
    wantlist: IndexMap<CidKey, BitswapEntry>,
    blocks: IndexMap<CidKey, Block>,
    block_presences: IndexMap<CidKey, BlockPresence>,
    pending_bytes: Option<i32>,
}

impl BitswapMessage {
    /// Creates an empty message. A `full` message replaces the receiver's
    /// view of our wantlist rather than patching it.
    pub fn new(full: bool) -> Self {
        Self {
            full,
            ..Default::default()
        }
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Whether there is nothing worth sending.
    pub fn is_empty(&self) -> bool {
        self.wantlist.is_empty() && self.blocks.is_empty() && self.block_presences.is_empty()
    }

    /// Adds or replaces the entry for the entry's content.
    pub fn add_entry(&mut self, entry: BitswapEntry) {
        let key = entry.cid.key();
        self.wantlist.shift_remove(&key);
        self.wantlist.insert(key, entry);
    }

    /// Replaces any want for `cid` with a cancel.
    pub fn cancel(&mut self, cid: Cid) {
        self.add_entry(BitswapEntry::new_cancel(cid));
    }

    pub fn wantlist(&self) -> impl ExactSizeIterator<Item = &BitswapEntry> {
        self.wantlist.values()
    }

    pub fn entry(&self, cid: &Cid) -> Option<&BitswapEntry> {
        self.wantlist.get(&cid.key())
    }

    /// Adds a block, superseding any presence for the same content.
    pub fn add_block(&mut self, block: Block) {
        let key = block.key();
        self.block_presences.shift_remove(&key);
        self.blocks.entry(key).or_insert(block);
    }

    pub fn blocks(&self) -> impl ExactSizeIterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn into_blocks(self) -> impl ExactSizeIterator<Item = Block> {
        self.blocks.into_values()
    }

    pub fn add_have(&mut self, cid: Cid) {
        self.add_block_presence(cid, BlockPresenceType::Have)
    }

    pub fn add_dont_have(&mut self, cid: Cid) {
        self.add_block_presence(cid, BlockPresenceType::DontHave)
    }

    fn add_block_presence(&mut self, cid: Cid, ty: BlockPresenceType) {
        let key = cid.key();
        if self.blocks.contains_key(&key) {
            return;
        }
        self.block_presences.insert(key, BlockPresence { cid, ty });
    }

    pub fn block_presences(&self) -> impl ExactSizeIterator<Item = &BlockPresence> {
        self.block_presences.values()
    }

    pub fn block_presence(&self, cid: &Cid) -> Option<BlockPresenceType> {
        self.block_presences.get(&cid.key()).map(|p| p.ty)
    }

    pub fn set_pending_bytes(&mut self, pending_bytes: i32) {
        self.pending_bytes = Some(pending_bytes);
    }

    /// Bytes the sender still owes us, `0` when not reported.
    pub fn pending_bytes(&self) -> i32 {
        self.pending_bytes.unwrap_or_default()
    }

    /// Folds a message queued after `self` into `self`.
    ///
    /// A later full wantlist replaces earlier entries, later entries win over
    /// earlier ones for the same content and a later pending bytes figure
    /// replaces an earlier one.
    pub fn merge(&mut self, other: BitswapMessage) {
        if other.full {
            self.wantlist.clear();
            self.full = true;
        }
        for entry in other.wantlist.into_values() {
            self.add_entry(entry);
        }
        for block in other.blocks.into_values() {
            self.add_block(block);
        }
        for presence in other.block_presences.into_values() {
            self.add_block_presence(presence.cid, presence.ty);
        }
        if other.pending_bytes.is_some() {
            self.pending_bytes = other.pending_bytes;
        }
    }

    /// Splits the message into parts that encode to at most `max_size` bytes
    /// each, unless a single item is larger than that on its own.
    ///
    /// Only the first part carries the `full` flag, so the receiver resets
    /// its view once and patches it with the remaining parts.
    pub fn split(self, max_size: usize) -> Vec<BitswapMessage> {
        if self.encoded_len(ProtocolVersion::V120) <= max_size {
            return vec![self];
        }
        let mut splitter = Splitter::new(max_size, self.full, self.pending_bytes);
        for entry in self.wantlist.into_values() {
            let size = entry
                .to_proto(ProtocolVersion::V120)
                .map_or(0, |pb| 1 + sizeof_len(pb.get_size()));
            splitter.reserve(size).add_entry(entry);
        }
        for presence in self.block_presences.into_values() {
            let size = block_presence_size(&presence.cid);
            splitter
                .reserve(size)
                .add_block_presence(presence.cid, presence.ty);
        }
        for block in self.blocks.into_values() {
            let size = 1 + sizeof_len(payload_to_proto(&block).get_size());
            splitter.reserve(size).add_block(block);
        }
        splitter.finish()
    }

    /// Size of the protobuf body when encoded for `version`.
    pub fn encoded_len(&self, version: ProtocolVersion) -> usize {
        self.to_proto(version).get_size()
    }

    pub(crate) fn to_proto(&self, version: ProtocolVersion) -> pb::Message {
        let mut msg = pb::Message::default();
        if self.full || !self.wantlist.is_empty() {
            msg.wantlist = Some(pb_message::Wantlist {
                entries: self
                    .wantlist
                    .values()
                    .filter_map(|entry| entry.to_proto(version))
                    .collect(),
                full: self.full,
            });
        }
        if version.supports_prefixes() {
            msg.payload = self.blocks.values().map(payload_to_proto).collect();
        } else {
            msg.blocks = self.blocks.values().map(|b| b.data().to_vec()).collect();
        }
        if version.supports_presences() {
            msg.blockPresences = self
                .block_presences
                .values()
                .map(|p| p.to_proto())
                .collect();
        }
        if version.supports_pending_bytes() {
            msg.pendingBytes = self.pending_bytes.unwrap_or_default();
        }
        msg
    }

    /// Encodes the protobuf body (without length prefix) for `version`.
    pub fn to_bytes(&self, version: ProtocolVersion) -> Result<Vec<u8>, BitswapError> {
        let msg = self.to_proto(version);
        let mut bytes = Vec::with_capacity(msg.get_size());
        msg.write_message(&mut Writer::new(&mut bytes))
            .map_err(|e| BitswapError::Io(std::io::Error::other(e)))?;
        Ok(bytes)
    }

    /// Decodes a protobuf body of any protocol version. Fields a version does
    /// not know about are simply absent.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BitswapError> {
        let mut reader = BytesReader::from_bytes(bytes);
        let msg = pb::Message::from_reader(&mut reader, bytes).map_err(BitswapError::malformed)?;
        Self::try_from(msg)
    }
}

impl TryFrom<pb::Message> for BitswapMessage {
    type Error = BitswapError;

    fn try_from(msg: pb::Message) -> Result<Self, Self::Error> {
        let wantlist = msg.wantlist.unwrap_or_default();
        let mut result = BitswapMessage::new(wantlist.full);
        for entry in wantlist.entries {
            let cid = Cid::try_from(entry.block.as_slice()).map_err(BitswapError::malformed)?;
            result.add_entry(if entry.cancel {
                BitswapEntry::new_cancel(cid)
            } else {
                BitswapEntry {
                    cid,
                    priority: entry.priority,
                    want_type: entry.wantType.into(),
                    cancel: false,
                    send_dont_have: entry.sendDontHave,
                }
            });
        }
        for data in msg.blocks {
            let cid = Cid::from_raw_block_v0(&data).map_err(BitswapError::malformed)?;
            result.add_block(Block::new(cid, data));
        }
        for payload in msg.payload {
            let cid = Prefix::new(&payload.prefix)?.to_cid(&payload.data)?;
            result.add_block(Block::new(cid, payload.data));
        }
        for presence in msg.blockPresences {
            let cid = Cid::try_from(presence.cid.as_slice()).map_err(BitswapError::malformed)?;
            match presence.type_pb {
                pb_message::BlockPresenceType::Have => result.add_have(cid),
                pb_message::BlockPresenceType::DontHave => result.add_dont_have(cid),
            }
        }
        if msg.pendingBytes != 0 {
            result.pending_bytes = Some(msg.pendingBytes);
        }
        Ok(result)
    }
}

struct Splitter {
    max_size: usize,
    parts: Vec<BitswapMessage>,
    current: BitswapMessage,
    size: usize,
}

impl Splitter {
    fn new(max_size: usize, full: bool, pending_bytes: Option<i32>) -> Self {
        Self {
            max_size,
            parts: vec![],
            current: BitswapMessage {
                full,
                pending_bytes,
                ..Default::default()
            },
            size: MESSAGE_OVERHEAD,
        }
    }

    /// Makes room for an item of `item_size` bytes, starting a new part when
    /// the current one would overflow.
    fn reserve(&mut self, item_size: usize) -> &mut BitswapMessage {
        if self.size + item_size > self.max_size && !self.current.is_empty() {
            let next = BitswapMessage {
                pending_bytes: self.current.pending_bytes,
                ..Default::default()
            };
            self.parts.push(mem::replace(&mut self.current, next));
            self.size = MESSAGE_OVERHEAD;
        }
        self.size += item_size;
        &mut self.current
    }

    fn finish(mut self) -> Vec<BitswapMessage> {
        if !self.current.is_empty() || self.parts.is_empty() {
            self.parts.push(self.current);
        }
        self.parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multihash_codetable::{Code, MultihashDigest as _};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const RAW: u64 = 0x55;

    fn block(data: &[u8]) -> Block {
        Block::new(Cid::new_v1(RAW, Code::Sha2_256.digest(data)), data.to_vec())
    }

    fn cid(data: &[u8]) -> Cid {
        *block(data).cid()
    }

    fn sample() -> BitswapMessage {
        let mut msg = BitswapMessage::new(true);
        msg.add_entry(BitswapEntry::new_block(cid(b"a"), 10));
        msg.add_entry(BitswapEntry::new_have(cid(b"b"), 5).send_dont_have(true));
        msg.cancel(cid(b"c"));
        msg.add_block(block(b"block one"));
        msg.add_have(cid(b"d"));
        msg.add_dont_have(cid(b"e"));
        msg.set_pending_bytes(1024);
        msg
    }

    #[test]
    fn v120_keeps_everything() {
        let msg = sample();
        let decoded =
            BitswapMessage::from_bytes(&msg.to_bytes(ProtocolVersion::V120).unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.pending_bytes(), 1024);
        assert_eq!(
            decoded.entry(&cid(b"b")).unwrap(),
            &BitswapEntry::new_have(cid(b"b"), 5).send_dont_have(true)
        );
        assert!(decoded.entry(&cid(b"c")).unwrap().cancel);
    }

    #[test]
    fn v110_drops_pending_bytes() {
        let msg = sample();
        let decoded =
            BitswapMessage::from_bytes(&msg.to_bytes(ProtocolVersion::V110).unwrap()).unwrap();
        assert_eq!(decoded.pending_bytes(), 0);
        assert_eq!(decoded.block_presences().len(), 2);
        assert_eq!(decoded.blocks().len(), 1);
        assert_eq!(decoded.wantlist().len(), 3);
    }

    #[test]
    fn v100_drops_newer_fields() {
        let msg = sample();
        let decoded =
            BitswapMessage::from_bytes(&msg.to_bytes(ProtocolVersion::V100).unwrap()).unwrap();
        assert!(decoded.is_full());
        assert_eq!(decoded.pending_bytes(), 0);
        assert_eq!(decoded.block_presences().len(), 0);
        // want-have is not expressible, the want-block and the cancel are
        assert_eq!(decoded.wantlist().len(), 2);
        assert!(decoded.entry(&cid(b"b")).is_none());
        assert!(!decoded.entry(&cid(b"a")).unwrap().send_dont_have);
        // raw blocks come back as CIDv0 of the same content
        let received = decoded.blocks().next().unwrap();
        assert_eq!(received.cid().version(), cid::Version::V0);
        assert_eq!(received.key(), block(b"block one").key());
        assert_eq!(received.data(), block(b"block one").data());
    }

    #[rstest]
    #[case(ProtocolVersion::V100)]
    #[case(ProtocolVersion::V110)]
    #[case(ProtocolVersion::V120)]
    fn encoded_len_matches_bytes(#[case] version: ProtocolVersion) {
        let msg = sample();
        assert_eq!(msg.encoded_len(version), msg.to_bytes(version).unwrap().len());
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        let err = BitswapMessage::from_bytes(&[0x0a, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, BitswapError::MalformedMessage(_)));

        let mut bad_cid = pb::Message::default();
        bad_cid.blockPresences.push(pb_message::BlockPresence {
            cid: vec![1, 2, 3],
            type_pb: pb_message::BlockPresenceType::Have,
        });
        assert!(matches!(
            BitswapMessage::try_from(bad_cid),
            Err(BitswapError::MalformedMessage(_))
        ));
    }

    #[test]
    fn entries_are_keyed_by_canonical_hash() {
        let v0 = Cid::new_v0(Code::Sha2_256.digest(b"x")).unwrap();
        let v1 = Cid::new_v1(RAW, *v0.hash());
        let mut msg = BitswapMessage::new(false);
        msg.add_entry(BitswapEntry::new_block(v0, 1));
        msg.add_entry(BitswapEntry::new_have(v1, 2));
        assert_eq!(msg.wantlist().len(), 1);
        assert_eq!(msg.entry(&v0).unwrap().want_type, WantType::Have);
    }

    #[test]
    fn block_supersedes_presence() {
        let mut msg = BitswapMessage::new(false);
        msg.add_have(cid(b"a"));
        msg.add_block(block(b"a"));
        msg.add_dont_have(cid(b"a"));
        assert_eq!(msg.block_presence(&cid(b"a")), None);
        assert_eq!(msg.blocks().len(), 1);
    }

    #[test]
    fn merge_applies_later_changes() {
        let mut first = BitswapMessage::new(false);
        first.add_entry(BitswapEntry::new_block(cid(b"a"), 1));
        first.add_entry(BitswapEntry::new_block(cid(b"b"), 1));
        first.set_pending_bytes(10);

        let mut second = BitswapMessage::new(false);
        second.cancel(cid(b"a"));
        second.add_block(block(b"c"));
        first.merge(second);
        assert!(first.entry(&cid(b"a")).unwrap().cancel);
        assert_eq!(first.pending_bytes(), 10);
        assert_eq!(
            first.wantlist().map(|e| e.cid).collect::<Vec<_>>(),
            vec![cid(b"b"), cid(b"a")]
        );

        let mut full = BitswapMessage::new(true);
        full.add_entry(BitswapEntry::new_block(cid(b"z"), 1));
        full.set_pending_bytes(0);
        first.merge(full);
        assert!(first.is_full());
        assert_eq!(first.wantlist().len(), 1);
        assert_eq!(first.blocks().len(), 1);
        assert_eq!(first.pending_bytes(), 0);
    }

    #[test]
    fn small_message_is_not_split() {
        let msg = sample();
        assert_eq!(msg.clone().split(usize::MAX), vec![msg]);
    }

    #[test]
    fn split_respects_max_size() {
        let mut msg = BitswapMessage::new(true);
        for i in 0..100u32 {
            msg.add_entry(BitswapEntry::new_block(cid(&i.to_be_bytes()), 1));
        }
        let total = msg.wantlist().len();
        let max_size = 512;
        let parts = msg.split(max_size);
        assert!(parts.len() > 1);
        assert!(parts[0].is_full());
        assert!(parts[1..].iter().all(|p| !p.is_full()));
        assert!(
            parts
                .iter()
                .all(|p| p.encoded_len(ProtocolVersion::V120) <= max_size)
        );
        assert_eq!(parts.iter().map(|p| p.wantlist().len()).sum::<usize>(), total);
    }

    #[test]
    fn oversized_block_travels_alone() {
        let mut msg = BitswapMessage::new(false);
        msg.add_block(block(&[1; 300]));
        msg.add_block(block(&[2; 300]));
        let parts = msg.split(200);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.blocks().len() == 1));
    }
}
