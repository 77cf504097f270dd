// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Channel Manager
//!
//! Owns the single payment channel between this device and the hub.
//!
//! ## Lifecycle
//!
//! 1. **Discover**: `getChannelId(wallet, hub)` on the channels contract. An
//!    all-zero id means no channel exists.
//! 2. **Fund**: wait until the wallet holds at least the minimum token
//!    balance.
//! 3. **Open**: `approve(channels, amount)` on the token, then
//!    `openChannel(token, hub, amount)`, then discover again to learn the id.
//!
//! A revert in step 3 is fatal. Once the allowance or the channel exists
//! on-chain, a restart picks it up again through discovery and the token
//! balance rather than any local record.

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use tracing::{debug, info, warn};

use crate::blockchain::client::ChainClient;
use crate::blockchain::codec::{
    address_word, b256_word, decode_word, decode_word_u256, encode_method, u256_word, CallData,
    CodecError, Method,
};
use crate::blockchain::confirmation::{ConfirmationTracker, TxOutcome};
use crate::blockchain::erc20::approve_call;
use crate::blockchain::transactions::TxSender;
use crate::blockchain::transport::{RpcCause, RpcError};
use crate::blockchain::types::{GasParams, OPEN_CHANNEL_GAS_LIMIT};
use crate::error::AgentError;
use crate::pacer::Pacer;
use crate::state::{Channel, ChannelReader, ChannelState};

/// `getChannelId(sender, recipient)`
pub fn channel_id_call(sender: Address, recipient: Address) -> Result<CallData, CodecError> {
    encode_method(
        Method::GetChannelId,
        &[&address_word(sender), &address_word(recipient)],
    )
}

/// `getDeposit(channelId)`
pub fn deposit_call(channel_id: B256) -> Result<CallData, CodecError> {
    encode_method(Method::GetDeposit, &[&b256_word(channel_id)])
}

/// `openChannel(token, recipient, amount)`
pub fn open_channel_call(token: Address, recipient: Address, amount: U256) -> Result<CallData, CodecError> {
    encode_method(
        Method::OpenChannel,
        &[&address_word(token), &address_word(recipient), &u256_word(amount)],
    )
}

fn encode_error(e: CodecError) -> RpcError {
    RpcError::new("eth_call", RpcCause::Encode(e))
}

pub struct ChannelManager {
    client: ChainClient,
    sender: Arc<TxSender>,
    tracker: Arc<ConfirmationTracker>,
    channels: Address,
    min_funding: U256,
    state: ChannelState,
}

impl ChannelManager {
    pub fn new(
        client: ChainClient,
        sender: Arc<TxSender>,
        tracker: Arc<ConfirmationTracker>,
        channels: Address,
        token: Address,
        counterparty: Address,
        min_funding: U256,
    ) -> Self {
        Self {
            client,
            sender,
            tracker,
            channels,
            min_funding,
            state: ChannelState::new(Channel::unset(token, counterparty)),
        }
    }

    /// Read access for the settlement engine.
    pub fn reader(&self) -> ChannelReader {
        self.state.reader()
    }

    pub async fn snapshot(&self) -> Channel {
        self.state.snapshot().await
    }

    /// Look up the channel from this wallet to the counterparty.
    pub async fn discover(&self) -> Result<Option<B256>, RpcError> {
        let wallet = self.sender.address();
        let counterparty = self.state.snapshot().await.counterparty;
        let data = channel_id_call(wallet, counterparty).map_err(encode_error)?;

        let raw = self.client.call(wallet, self.channels, &data).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let id = decode_word(&raw)
            .map(B256::from)
            .map_err(|e| RpcError::decode("eth_call", format!("getChannelId: {e}")))?;

        Ok((!id.is_zero()).then_some(id))
    }

    /// Token units escrowed in `channel_id`.
    pub async fn read_deposit(&self, channel_id: B256) -> Result<U256, RpcError> {
        let data = deposit_call(channel_id).map_err(encode_error)?;
        let raw = self
            .client
            .call(self.sender.address(), self.channels, &data)
            .await?;
        if raw.is_empty() {
            warn!(channel_id = %channel_id, "Channels contract returned no deposit, assuming 0");
            return Ok(U256::ZERO);
        }
        decode_word_u256(&raw).map_err(|e| RpcError::decode("eth_call", format!("getDeposit: {e}")))
    }

    /// Approve and open a channel funded with `amount`, returning its id.
    ///
    /// Transport failures are retried indefinitely. A reverted approval or
    /// open is returned as [`AgentError::RevertedTransaction`].
    pub async fn open(&self, amount: U256, gas: GasParams, pacer: &Pacer) -> Result<B256, AgentError> {
        let channel = self.state.snapshot().await;
        let tracker = self.tracker.as_ref();

        info!(
            token = %channel.token,
            counterparty = %channel.counterparty,
            amount = %amount,
            "Opening payment channel"
        );

        let approve = approve_call(self.channels, amount)?;
        let (pending, outcome) = self
            .sender
            .send_and_confirm("approve", channel.token, &approve, gas, tracker, pacer)
            .await?;
        if outcome != TxOutcome::Succeeded {
            return Err(AgentError::RevertedTransaction {
                action: "approve",
                hash: pending.hash,
            });
        }

        let open = open_channel_call(channel.token, channel.counterparty, amount)?;
        let (pending, outcome) = self
            .sender
            .send_and_confirm(
                "openChannel",
                self.channels,
                &open,
                gas.with_gas_limit(OPEN_CHANNEL_GAS_LIMIT),
                tracker,
                pacer,
            )
            .await?;
        if outcome != TxOutcome::Succeeded {
            return Err(AgentError::RevertedTransaction {
                action: "openChannel",
                hash: pending.hash,
            });
        }

        let interval = tracker.poll_interval();
        let id = loop {
            let found = pacer
                .retry_forever("getChannelId", interval, || async move {
                    self.discover().await.map_err(AgentError::from)
                })
                .await?;
            match found {
                Some(id) => break id,
                None => {
                    debug!(tx_hash = %pending.hash, "Channel not visible yet");
                    pacer.sleep(interval).await?;
                }
            }
        };

        self.state.set_open(id, amount).await;
        info!(channel_id = %id, deposit = %amount, "Payment channel opened");
        Ok(id)
    }

    /// Return the open channel, discovering or opening one first if needed.
    ///
    /// With no channel on-chain this blocks until the wallet's token balance
    /// reaches the minimum funding, then opens a channel with the whole
    /// balance.
    pub async fn ensure_channel(&self, gas: GasParams, pacer: &Pacer) -> Result<Channel, AgentError> {
        let current = self.state.snapshot().await;
        if current.is_open() {
            return Ok(current);
        }

        let interval = self.tracker.poll_interval();
        let discovered = pacer
            .retry_forever("getChannelId", interval, || async move {
                self.discover().await.map_err(AgentError::from)
            })
            .await?;

        if let Some(id) = discovered {
            let deposit = pacer
                .retry_forever("getDeposit", interval, || async move {
                    self.read_deposit(id).await.map_err(AgentError::from)
                })
                .await?;
            self.state.set_open(id, deposit).await;
            info!(channel_id = %id, deposit = %deposit, "Found existing payment channel");
            return Ok(self.state.snapshot().await);
        }

        let balance = self.wait_for_funding(current.token, pacer).await?;
        self.open(balance, gas, pacer).await?;
        Ok(self.state.snapshot().await)
    }

    async fn wait_for_funding(&self, token: Address, pacer: &Pacer) -> Result<U256, AgentError> {
        let wallet = self.sender.address();
        let interval = self.tracker.poll_interval();
        let mut reported = false;

        loop {
            let balance = pacer
                .retry_forever("balanceOf", interval, || async move {
                    self.client
                        .get_token_balance(wallet, token)
                        .await
                        .map_err(AgentError::from)
                })
                .await?;

            if balance >= self.min_funding {
                return Ok(balance);
            }
            if !reported {
                warn!(
                    wallet = %wallet,
                    balance = %balance,
                    required = %self.min_funding,
                    "Insufficient token balance to open a channel, waiting for deposit"
                );
                reported = true;
            }
            pacer.sleep(interval).await?;
        }
    }
}
