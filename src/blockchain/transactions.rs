// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction building and broadcasting.
//!
//! [`TxSender`] owns one signing key. Nonce lookup, signing and broadcast
//! happen under a single async mutex so two submissions from the same key
//! can never pick the same nonce.

use std::time::Duration;

use alloy::{
    primitives::{Address, U256},
    signers::local::PrivateKeySigner,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::ChainClient;
use super::codec::CallData;
use super::confirmation::{ConfirmationTracker, TxOutcome};
use super::signing::{sign_transaction, SigningError};
use super::transport::{RpcCause, RpcError};
use super::types::{GasParams, PendingTx, SignedTransaction, Transaction};
use crate::error::AgentError;
use crate::pacer::Pacer;

/// Node rejections meaning the same bytes are already pooled or mined.
const ALREADY_ACCEPTED: [&str; 3] = ["already known", "known transaction", "nonce too low"];

fn already_accepted(err: &RpcError) -> bool {
    match &err.cause {
        RpcCause::Node { message, .. } => {
            let message = message.to_ascii_lowercase();
            ALREADY_ACCEPTED.iter().any(|known| message.contains(known))
        }
        _ => false,
    }
}

pub struct TxSender {
    client: ChainClient,
    signer: PrivateKeySigner,
    chain_id: u64,
    lock: Mutex<()>,
}

impl TxSender {
    /// A chain id of 0 is refused up front.
    pub fn new(client: ChainClient, signer: PrivateKeySigner, chain_id: u64) -> Result<Self, SigningError> {
        if chain_id == 0 {
            return Err(SigningError::MissingChainId);
        }
        Ok(Self {
            client,
            signer,
            chain_id,
            lock: Mutex::new(()),
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_next(
        &self,
        to: Address,
        data: &CallData,
        gas: GasParams,
    ) -> Result<(u64, SignedTransaction), AgentError> {
        let nonce = self.client.get_nonce(self.address()).await?;
        let tx = Transaction {
            nonce,
            to,
            value: U256::ZERO,
            data: data.clone(),
            gas_limit: gas.gas_limit,
            gas_price: gas.gas_price,
            chain_id: self.chain_id,
        };
        Ok((nonce, sign_transaction(&tx, &self.signer)?))
    }

    async fn broadcast(&self, signed: &SignedTransaction) -> Result<(), AgentError> {
        match self.client.send_raw_transaction(signed).await {
            Ok(reported) => {
                if reported != signed.hash() {
                    warn!(
                        expected = %signed.hash(),
                        reported = %reported,
                        "Node reported a different transaction hash"
                    );
                }
                Ok(())
            }
            Err(e) if already_accepted(&e) => {
                debug!(tx_hash = %signed.hash(), error = %e, "Node already has the transaction");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sign a zero-value contract call with the next nonce and broadcast it.
    ///
    /// The transaction is signed exactly once. Failed broadcasts resend the
    /// same bytes, so a broadcast that reached the node before failing can
    /// never produce a second transaction.
    pub async fn submit(
        &self,
        action: &str,
        to: Address,
        data: &CallData,
        gas: GasParams,
        interval: Duration,
        pacer: &Pacer,
    ) -> Result<PendingTx, AgentError> {
        let _guard = self.lock.lock().await;

        let (nonce, signed) = pacer
            .retry_forever(action, interval, || self.sign_next(to, data, gas))
            .await?;
        pacer
            .retry_forever(action, interval, || self.broadcast(&signed))
            .await?;

        info!(
            action,
            tx_hash = %signed.hash(),
            nonce,
            to = %to,
            selector = ?data.selector().map(|s| s.to_string()),
            gas_limit = gas.gas_limit,
            "Transaction submitted"
        );

        Ok(PendingTx {
            hash: signed.hash(),
            nonce,
            gas_limit: gas.gas_limit,
        })
    }

    /// Submit and wait for a terminal outcome.
    ///
    /// Only a dropped transaction is signed again, with a freshly read
    /// nonce. `Succeeded` and `Reverted` are returned to the caller, which
    /// owns the policy for reverts.
    pub async fn send_and_confirm(
        &self,
        action: &str,
        to: Address,
        data: &CallData,
        gas: GasParams,
        tracker: &ConfirmationTracker,
        pacer: &Pacer,
    ) -> Result<(PendingTx, TxOutcome), AgentError> {
        loop {
            let pending = self
                .submit(action, to, data, gas, tracker.poll_interval(), pacer)
                .await?;

            match tracker.await_outcome(&pending, pacer).await? {
                TxOutcome::Dropped => {
                    warn!(action, tx_hash = %pending.hash, "Resubmitting dropped transaction");
                }
                outcome => return Ok((pending, outcome)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alloy::primitives::{address, keccak256, B256};
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use crate::blockchain::client::fake::FakeNode;
    use crate::blockchain::codec::{decode_hex, Selector};
    use crate::blockchain::confirmation::DEFAULT_POLL_INTERVAL;
    use crate::blockchain::signing::signer_from_bytes;

    const TARGET: Address = address!("3535353535353535353535353535353535353535");

    fn signer() -> PrivateKeySigner {
        signer_from_bytes(&[0x46; 32]).unwrap()
    }

    fn data() -> CallData {
        crate::blockchain::codec::encode_call(Selector([0xde, 0xad, 0xbe, 0xef]), &[&[1]]).unwrap()
    }

    /// Hash the node would report for a raw transaction.
    fn raw_hash(params: &Value) -> B256 {
        keccak256(decode_hex(params[0].as_str().unwrap()).unwrap())
    }

    #[test]
    fn zero_chain_id_is_refused() {
        let node = Arc::new(FakeNode::new());
        assert!(matches!(
            TxSender::new(ChainClient::new(node), signer(), 0),
            Err(SigningError::MissingChainId)
        ));
    }

    fn broadcasts(node: &FakeNode) -> Vec<Value> {
        node.requests()
            .into_iter()
            .filter(|(m, _)| m == "eth_sendRawTransaction")
            .map(|(_, params)| params)
            .collect()
    }

    #[test]
    fn pooled_or_mined_rejections_count_as_accepted() {
        let node_error = |message: &str| {
            RpcError::new(
                "eth_sendRawTransaction",
                RpcCause::Node {
                    code: -32000,
                    message: message.into(),
                },
            )
        };
        assert!(already_accepted(&node_error("already known")));
        assert!(already_accepted(&node_error("Nonce too low: next nonce 4")));
        assert!(!already_accepted(&node_error("insufficient funds for gas")));
        assert!(!already_accepted(&RpcError::transport("eth_sendRawTransaction", "timeout")));
    }

    #[tokio::test]
    async fn submit_uses_node_nonce_and_returns_hash() {
        let node = Arc::new(FakeNode::new());
        node.reply("eth_getTransactionCount", json!("0x7"))
            .reply(
                "eth_sendRawTransaction",
                json!("0x0000000000000000000000000000000000000000000000000000000000000001"),
            );
        let sender = TxSender::new(ChainClient::new(node.clone()), signer(), 1).unwrap();
        let pacer = Pacer::new(CancellationToken::new());

        let pending = sender
            .submit("call", TARGET, &data(), GasParams::default(), DEFAULT_POLL_INTERVAL, &pacer)
            .await
            .unwrap();

        assert_eq!(pending.nonce, 7);
        assert_eq!(pending.gas_limit, 100_000);
        assert_eq!(pending.hash, raw_hash(&broadcasts(&node)[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_transaction_is_resubmitted() {
        let node = Arc::new(FakeNode::new());
        node.reply("eth_getTransactionCount", json!("0x1"))
            .reply(
                "eth_sendRawTransaction",
                json!("0x0000000000000000000000000000000000000000000000000000000000000001"),
            )
            .reply("eth_getTransactionByHash", Value::Null);
        for _ in 0..3 {
            node.queue("eth_getTransactionReceipt", Ok(Value::Null));
        }
        node.reply(
            "eth_getTransactionReceipt",
            json!({"cumulativeGasUsed": "0x100"}),
        );

        let client = ChainClient::new(node.clone());
        let sender = TxSender::new(client.clone(), signer(), 1).unwrap();
        let tracker =
            ConfirmationTracker::new(client, DEFAULT_POLL_INTERVAL).with_drop_after_polls(3);
        let pacer = Pacer::new(CancellationToken::new());

        let (_, outcome) = sender
            .send_and_confirm("call", TARGET, &data(), GasParams::default(), &tracker, &pacer)
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::Succeeded);
        assert_eq!(node.count("eth_sendRawTransaction"), 2);
        assert_eq!(node.count("eth_getTransactionCount"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_broadcast_resends_the_same_bytes() {
        let node = Arc::new(FakeNode::new());
        node.queue("eth_getTransactionCount", Ok(json!("0x0")))
            .reply("eth_getTransactionCount", json!("0x1"))
            .queue(
                "eth_sendRawTransaction",
                Err(RpcCause::Transport("operation timed out".into())),
            )
            .reply(
                "eth_sendRawTransaction",
                json!("0x0000000000000000000000000000000000000000000000000000000000000001"),
            )
            .reply(
                "eth_getTransactionReceipt",
                json!({"cumulativeGasUsed": "0x186a0"}),
            );

        let client = ChainClient::new(node.clone());
        let sender = TxSender::new(client.clone(), signer(), 1).unwrap();
        let tracker = ConfirmationTracker::new(client, DEFAULT_POLL_INTERVAL);
        let pacer = Pacer::new(CancellationToken::new());

        let (pending, outcome) = sender
            .send_and_confirm("call", TARGET, &data(), GasParams::default(), &tracker, &pacer)
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::Reverted);
        let sent = broadcasts(&node);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(node.count("eth_getTransactionCount"), 1);
        assert_eq!(pending.nonce, 0);
        assert_eq!(pending.hash, raw_hash(&sent[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn already_known_rebroadcast_tracks_signed_hash() {
        let node = Arc::new(FakeNode::new());
        node.reply("eth_getTransactionCount", json!("0x4"))
            .queue(
                "eth_sendRawTransaction",
                Err(RpcCause::Transport("connection reset".into())),
            )
            .fail(
                "eth_sendRawTransaction",
                RpcCause::Node {
                    code: -32000,
                    message: "already known".into(),
                },
            )
            .reply(
                "eth_getTransactionReceipt",
                json!({"status": "0x1", "cumulativeGasUsed": "0x5208"}),
            );

        let client = ChainClient::new(node.clone());
        let sender = TxSender::new(client.clone(), signer(), 1).unwrap();
        let tracker = ConfirmationTracker::new(client, DEFAULT_POLL_INTERVAL);
        let pacer = Pacer::new(CancellationToken::new());

        let (pending, outcome) = sender
            .send_and_confirm("call", TARGET, &data(), GasParams::default(), &tracker, &pacer)
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::Succeeded);
        let sent = broadcasts(&node);
        assert_eq!(sent.len(), 2);
        assert_eq!(pending.hash, raw_hash(&sent[1]));
        assert_eq!(node.count("eth_getTransactionCount"), 1);
    }
}
