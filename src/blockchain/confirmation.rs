// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Confirmation Tracker
//!
//! Polls the node for a submitted transaction's receipt and classifies it.
//!
//! ## Classification
//!
//! | Receipt | Outcome |
//! |---------|---------|
//! | absent, or `cumulativeGasUsed` empty | `Pending` |
//! | explicit `status` field | `Succeeded` / `Reverted` per status |
//! | `cumulativeGasUsed < gas sent` | `Succeeded` |
//! | `cumulativeGasUsed >= gas sent` | `Reverted` |
//!
//! The gas comparison is the fallback for nodes that predate receipt status.
//! A transaction the node stops knowing about altogether is reported as
//! `Dropped` after a run of consecutive empty polls.
//!
//! The tracker never resubmits; that is the caller's decision.

use std::time::Duration;

use alloy::primitives::B256;
use tracing::{debug, info, warn};

use super::client::ChainClient;
use super::types::{PendingTx, Receipt};
use crate::error::AgentError;
use crate::pacer::Pacer;

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive polls without receipt or transaction before giving up on it.
pub const DEFAULT_DROP_AFTER_POLLS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Pending,
    Succeeded,
    Reverted,
    /// The node no longer knows the transaction; it will never be mined.
    Dropped,
}

impl TxOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxOutcome::Pending)
    }
}

/// Classify a receipt against the gas the transaction was sent with.
pub fn classify(receipt: Option<&Receipt>, gas_sent: u64) -> TxOutcome {
    let Some(receipt) = receipt else {
        return TxOutcome::Pending;
    };

    if let Some(status) = receipt.status {
        return if status {
            TxOutcome::Succeeded
        } else {
            TxOutcome::Reverted
        };
    }

    match receipt.cumulative_gas_used {
        None => TxOutcome::Pending,
        Some(used) if used < gas_sent => TxOutcome::Succeeded,
        Some(_) => TxOutcome::Reverted,
    }
}

pub struct ConfirmationTracker {
    client: ChainClient,
    poll_interval: Duration,
    drop_after_polls: u32,
}

impl ConfirmationTracker {
    pub fn new(client: ChainClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            drop_after_polls: DEFAULT_DROP_AFTER_POLLS,
        }
    }

    pub fn with_drop_after_polls(mut self, polls: u32) -> Self {
        self.drop_after_polls = polls.max(1);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll until the transaction leaves `Pending`.
    ///
    /// Transport failures are retried at the poll interval. Returns
    /// `Dropped` once neither a receipt nor the transaction itself has been
    /// seen for `drop_after_polls` consecutive polls.
    pub async fn await_outcome(
        &self,
        pending: &PendingTx,
        pacer: &Pacer,
    ) -> Result<TxOutcome, AgentError> {
        let hash = pending.hash;
        let mut unseen_polls = 0u32;

        loop {
            let receipt = pacer
                .retry_forever("eth_getTransactionReceipt", self.poll_interval, || async move {
                    self.client.get_receipt(hash).await.map_err(AgentError::from)
                })
                .await?;

            let outcome = classify(receipt.as_ref(), pending.gas_limit);
            if outcome.is_terminal() {
                info!(tx_hash = %hash, nonce = pending.nonce, ?outcome, "Transaction settled");
                return Ok(outcome);
            }

            if receipt.is_none() {
                match self.client.get_transaction(hash).await {
                    Ok(Some(_)) => unseen_polls = 0,
                    Ok(None) => {
                        unseen_polls += 1;
                        if unseen_polls >= self.drop_after_polls {
                            warn!(tx_hash = %hash, polls = unseen_polls, "Transaction dropped by node");
                            return Ok(TxOutcome::Dropped);
                        }
                    }
                    Err(e) => debug!(tx_hash = %hash, error = %e, "Transaction lookup failed"),
                }
            }

            debug!(tx_hash = %hash, "Transaction pending");
            pacer.sleep(self.poll_interval).await?;
        }
    }

    /// Await a transaction this agent did not send, such as a faucet
    /// transfer. The gas allotment is read from the node.
    pub async fn await_external(&self, hash: B256, pacer: &Pacer) -> Result<TxOutcome, AgentError> {
        let mut unseen_polls = 0u32;

        let info = loop {
            let lookup = pacer
                .retry_forever("eth_getTransactionByHash", self.poll_interval, || async move {
                    self.client.get_transaction(hash).await.map_err(AgentError::from)
                })
                .await?;

            match lookup {
                Some(info) => break info,
                None => {
                    unseen_polls += 1;
                    if unseen_polls >= self.drop_after_polls {
                        warn!(tx_hash = %hash, "External transaction never appeared");
                        return Ok(TxOutcome::Dropped);
                    }
                }
            }
            pacer.sleep(self.poll_interval).await?;
        };

        let pending = PendingTx {
            hash,
            nonce: info.nonce,
            gas_limit: info.gas,
        };
        self.await_outcome(&pending, pacer).await
    }
}
