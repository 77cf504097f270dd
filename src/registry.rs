// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device registration against the registry contract.
//!
//! A device ships with a factory setup key that the registry already knows.
//! On first boot the setup key adds the device wallet under the hashed
//! serial number; after that the device waits until an owner claims it.

use std::time::Duration;

use alloy::primitives::{Address, B256};
use tracing::{debug, info, warn};

use crate::blockchain::client::ChainClient;
use crate::blockchain::codec::{
    address_word, b256_word, decode_word_u256, encode_method, CallData, CodecError, Method,
};
use crate::blockchain::confirmation::{ConfirmationTracker, TxOutcome};
use crate::blockchain::transactions::TxSender;
use crate::blockchain::transport::{RpcCause, RpcError};
use crate::blockchain::types::GasParams;
use crate::error::AgentError;
use crate::pacer::Pacer;

/// `addWallet(wallet, serialHash)`
pub fn add_wallet_call(wallet: Address, serial_hash: B256) -> Result<CallData, CodecError> {
    encode_method(Method::AddWallet, &[&address_word(wallet), &b256_word(serial_hash)])
}

pub struct Registry {
    client: ChainClient,
    address: Address,
}

impl Registry {
    pub fn new(client: ChainClient, address: Address) -> Self {
        Self { client, address }
    }

    /// Read a boolean mapping keyed by address. An empty result is `false`.
    async fn flag(&self, method: Method, who: Address) -> Result<bool, RpcError> {
        let data = encode_method(method, &[&address_word(who)])
            .map_err(|e| RpcError::new("eth_call", RpcCause::Encode(e)))?;
        let raw = self.client.call(who, self.address, &data).await?;
        if raw.is_empty() {
            return Ok(false);
        }
        let value = decode_word_u256(&raw)
            .map_err(|e| RpcError::decode("eth_call", format!("{}({who}): {e}", method.name())))?;
        Ok(!value.is_zero())
    }

    pub async fn is_registered(&self, address: Address) -> Result<bool, RpcError> {
        self.flag(Method::Registered, address).await
    }

    pub async fn is_claimed(&self, address: Address) -> Result<bool, RpcError> {
        self.flag(Method::Claimed, address).await
    }

    /// Make sure `wallet` is in the registry, adding it with the setup key
    /// if needed.
    ///
    /// Fails with [`AgentError::NotRegistered`] when neither the wallet nor
    /// the setup address is known to the registry. A reverted `addWallet`
    /// is retried after a pause until it succeeds.
    pub async fn ensure_wallet_added(
        &self,
        setup: &TxSender,
        wallet: Address,
        serial_hash: B256,
        gas: GasParams,
        tracker: &ConfirmationTracker,
        pacer: &Pacer,
    ) -> Result<(), AgentError> {
        let interval = tracker.poll_interval();
        let setup_address = setup.address();
        let data = add_wallet_call(wallet, serial_hash)?;

        loop {
            let wallet_known = pacer
                .retry_forever("registered(wallet)", interval, || async move {
                    self.is_registered(wallet).await.map_err(AgentError::from)
                })
                .await?;
            if wallet_known {
                info!(wallet = %wallet, "Wallet already registered");
                return Ok(());
            }

            let setup_known = pacer
                .retry_forever("registered(setup)", interval, || async move {
                    self.is_registered(setup_address).await.map_err(AgentError::from)
                })
                .await?;
            if !setup_known {
                return Err(AgentError::NotRegistered(setup_address));
            }

            info!(wallet = %wallet, setup = %setup_address, "Adding wallet to registry");
            let (pending, outcome) = setup
                .send_and_confirm("addWallet", self.address, &data, gas, tracker, pacer)
                .await?;

            match outcome {
                TxOutcome::Succeeded => {
                    info!(wallet = %wallet, tx_hash = %pending.hash, "Wallet added");
                    return Ok(());
                }
                outcome => {
                    warn!(
                        wallet = %wallet,
                        tx_hash = %pending.hash,
                        ?outcome,
                        "addWallet did not succeed, retrying"
                    );
                    pacer.sleep(interval).await?;
                }
            }
        }
    }

    /// Block until an owner has claimed `wallet`.
    pub async fn wait_until_claimed(
        &self,
        wallet: Address,
        interval: Duration,
        pacer: &Pacer,
    ) -> Result<(), AgentError> {
        info!(wallet = %wallet, "Waiting for device to be claimed");
        loop {
            let claimed = pacer
                .retry_forever("claimed", interval, || async move {
                    self.is_claimed(wallet).await.map_err(AgentError::from)
                })
                .await?;
            if claimed {
                info!(wallet = %wallet, "Device claimed");
                return Ok(());
            }
            debug!(wallet = %wallet, "Not claimed yet");
            pacer.sleep(interval).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alloy::primitives::{address, b256};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::blockchain::client::fake::FakeNode;
    use crate::blockchain::signing::signer_from_bytes;

    const REGISTRY: Address = address!("00000000000000000000000000000000000000aa");
    const WALLET: Address = address!("1111111111111111111111111111111111111111");
    const SERIAL: B256 = b256!("00000000000000000000000000000000000000000000000000000000000000ff");
    const INTERVAL: Duration = Duration::from_secs(10);

    const TRUE: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
    const FALSE: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";
    const TX_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000042";

    fn setup(node: &Arc<FakeNode>) -> TxSender {
        TxSender::new(
            ChainClient::new(node.clone()),
            signer_from_bytes(&[0x11; 32]).unwrap(),
            1,
        )
        .unwrap()
    }

    fn tracker(node: &Arc<FakeNode>) -> ConfirmationTracker {
        ConfirmationTracker::new(ChainClient::new(node.clone()), INTERVAL)
    }

    #[test]
    fn add_wallet_layout() {
        let data = add_wallet_call(WALLET, SERIAL).unwrap();
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data.as_bytes()[..4], &[0xb9, 0x93, 0xb3, 0xf5]);
        assert_eq!(&data.as_bytes()[16..36], WALLET.as_slice());
        assert_eq!(&data.as_bytes()[36..], SERIAL.as_slice());
    }

    #[tokio::test]
    async fn flags_decode_and_empty_is_false() {
        let node = Arc::new(FakeNode::new());
        node.reply("eth_call:0xb2dd5c07", json!(TRUE))
            .reply("eth_call:0xc884ef83", json!("0x"));
        let registry = Registry::new(ChainClient::new(node.clone()), REGISTRY);

        assert!(registry.is_registered(WALLET).await.unwrap());
        assert!(!registry.is_claimed(WALLET).await.unwrap());

        let (_, params) = &node.requests()[0];
        assert_eq!(params[0]["to"], REGISTRY.to_string());
    }

    #[tokio::test]
    async fn registered_wallet_skips_submission() {
        let node = Arc::new(FakeNode::new());
        node.reply("eth_call:0xb2dd5c07", json!(TRUE));
        let registry = Registry::new(ChainClient::new(node.clone()), REGISTRY);
        let pacer = Pacer::new(CancellationToken::new());

        registry
            .ensure_wallet_added(&setup(&node), WALLET, SERIAL, GasParams::default(), &tracker(&node), &pacer)
            .await
            .unwrap();
        assert_eq!(node.count("eth_sendRawTransaction"), 0);
    }

    #[tokio::test]
    async fn unknown_setup_address_is_fatal() {
        let node = Arc::new(FakeNode::new());
        node.reply("eth_call:0xb2dd5c07", json!(FALSE));
        let registry = Registry::new(ChainClient::new(node.clone()), REGISTRY);
        let pacer = Pacer::new(CancellationToken::new());
        let sender = setup(&node);

        let err = registry
            .ensure_wallet_added(&sender, WALLET, SERIAL, GasParams::default(), &tracker(&node), &pacer)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotRegistered(a) if a == sender.address()));
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_add_is_retried() {
        let node = Arc::new(FakeNode::new());
        // wallet unknown, setup known, then again after the revert.
        node.queue("eth_call:0xb2dd5c07", Ok(json!(FALSE)))
            .queue("eth_call:0xb2dd5c07", Ok(json!(TRUE)))
            .queue("eth_call:0xb2dd5c07", Ok(json!(FALSE)))
            .queue("eth_call:0xb2dd5c07", Ok(json!(TRUE)))
            .reply("eth_getTransactionCount", json!("0x0"))
            .reply("eth_sendRawTransaction", json!(TX_HASH))
            .queue("eth_getTransactionReceipt", Ok(json!({"cumulativeGasUsed": "0x5208", "status": "0x0"})))
            .reply("eth_getTransactionReceipt", json!({"cumulativeGasUsed": "0x5208", "status": "0x1"}));
        let registry = Registry::new(ChainClient::new(node.clone()), REGISTRY);
        let pacer = Pacer::new(CancellationToken::new());

        registry
            .ensure_wallet_added(&setup(&node), WALLET, SERIAL, GasParams::default(), &tracker(&node), &pacer)
            .await
            .unwrap();
        assert_eq!(node.count("eth_sendRawTransaction"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_claim() {
        let node = Arc::new(FakeNode::new());
        node.queue("eth_call:0xc884ef83", Ok(json!(FALSE)))
            .queue("eth_call:0xc884ef83", Ok(json!(FALSE)))
            .reply("eth_call:0xc884ef83", json!(TRUE));
        let registry = Registry::new(ChainClient::new(node.clone()), REGISTRY);
        let pacer = Pacer::new(CancellationToken::new());

        registry.wait_until_claimed(WALLET, INTERVAL, &pacer).await.unwrap();
        assert_eq!(node.count("eth_call"), 3);
    }
}
