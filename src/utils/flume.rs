// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub trait FlumeSenderExt<T> {
    /// Sends without blocking, dropping the message with a warning when the
    /// channel is full or has no receivers left.
    fn try_send_or_warn(&self, msg: T);
}

impl<T> FlumeSenderExt<T> for flume::Sender<T> {
    fn try_send_or_warn(&self, msg: T) {
        if let Err(e) = self.try_send(msg) {
            tracing::warn!("{e}");
        }
    }
}
