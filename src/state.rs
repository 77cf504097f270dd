// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The tracked payment channel.
//!
//! [`ChannelState`] is the only handle that can write the record and is
//! owned by the channel manager. Everyone else gets a [`ChannelReader`],
//! which hands out copies.

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// `None` until discovered on-chain or opened.
    pub id: Option<B256>,
    pub token: Address,
    pub counterparty: Address,
    /// Token units escrowed in the channel.
    pub deposit: U256,
}

impl Channel {
    pub fn unset(token: Address, counterparty: Address) -> Self {
        Self {
            id: None,
            token,
            counterparty,
            deposit: U256::ZERO,
        }
    }

    pub fn is_open(&self) -> bool {
        self.id.is_some()
    }
}

/// Writer side. Deliberately not `Clone`.
pub struct ChannelState {
    inner: Arc<RwLock<Channel>>,
}

impl ChannelState {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Arc::new(RwLock::new(channel)),
        }
    }

    pub fn reader(&self) -> ChannelReader {
        ChannelReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub async fn snapshot(&self) -> Channel {
        self.inner.read().await.clone()
    }

    pub async fn set_open(&self, id: B256, deposit: U256) {
        let mut channel = self.inner.write().await;
        channel.id = Some(id);
        channel.deposit = deposit;
    }
}

/// Read-only handle returning snapshots.
#[derive(Clone)]
pub struct ChannelReader {
    inner: Arc<RwLock<Channel>>,
}

impl ChannelReader {
    pub async fn snapshot(&self) -> Channel {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256};

    #[tokio::test]
    async fn readers_see_writes_as_snapshots() {
        let state = ChannelState::new(Channel::unset(
            address!("00000000000000000000000000000000000000aa"),
            address!("00000000000000000000000000000000000000bb"),
        ));
        let reader = state.reader();

        let before = reader.snapshot().await;
        assert!(!before.is_open());

        let id = b256!("0000000000000000000000000000000000000000000000000000000000000abc");
        state.set_open(id, U256::from(1000)).await;

        let after = reader.clone().snapshot().await;
        assert_eq!(after.id, Some(id));
        assert_eq!(after.deposit, U256::from(1000));
        // Earlier snapshots are unaffected.
        assert_eq!(before.id, None);
        assert_eq!(state.snapshot().await, after);
    }
}
