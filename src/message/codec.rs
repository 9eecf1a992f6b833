// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use asynchronous_codec::{Decoder, Encoder};
use bytes::BytesMut;
use quick_protobuf_codec::Codec;

use super::{BitswapMessage, pb};
use crate::{BitswapError, ProtocolVersion};

/// Length prefixed framing of [`BitswapMessage`]s for one negotiated
/// protocol version.
pub struct BitswapCodec {
    version: ProtocolVersion,
    inner: Codec<pb::Message>,
}

impl BitswapCodec {
    pub fn new(version: ProtocolVersion, max_message_size: usize) -> Self {
        Self {
            version,
            inner: Codec::new(max_message_size),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }
}

impl Encoder for BitswapCodec {
    type Item<'a> = BitswapMessage;
    type Error = BitswapError;

    fn encode(&mut self, item: Self::Item<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner
            .encode(item.to_proto(self.version), dst)
            .map_err(|e| BitswapError::Io(e.into()))
    }
}

impl Decoder for BitswapCodec {
    type Item = BitswapMessage;
    type Error = BitswapError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src).map_err(BitswapError::malformed)? {
            Some(msg) => Ok(Some(BitswapMessage::try_from(msg)?)),
            None => Ok(None),
        }
    }
}
