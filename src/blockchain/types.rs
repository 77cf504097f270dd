// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use super::codec::{format_quantity, parse_quantity_u64, CallData, CodecError};

/// Gas limit used when the hub does not supply one.
pub const DEFAULT_GAS_LIMIT: u64 = 100_000;

/// Gas price (wei) used when the hub does not supply one.
pub const DEFAULT_GAS_PRICE: u128 = 2_000_000_000;

/// Gas limit for the channel-open transaction.
pub const OPEN_CHANNEL_GAS_LIMIT: u64 = 150_000;

/// Gas parameters for one transaction. Supplied externally, never estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: u64,
    pub gas_price: u128,
}

impl GasParams {
    pub fn new(gas_limit: u64, gas_price: u128) -> Self {
        Self {
            gas_limit,
            gas_price,
        }
    }

    /// Upper bound on the fee the transaction can burn.
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.gas_price)
    }

    pub fn with_gas_limit(self, gas_limit: u64) -> Self {
        Self { gas_limit, ..self }
    }
}

impl Default for GasParams {
    fn default() -> Self {
        Self::new(DEFAULT_GAS_LIMIT, DEFAULT_GAS_PRICE)
    }
}

/// Unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub data: CallData,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: u64,
}

/// Wire-ready signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    raw: Bytes,
    hash: B256,
}

impl SignedTransaction {
    pub(crate) fn new(raw: Bytes, hash: B256) -> Self {
        Self { raw, hash }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Hash the node will report for this transaction.
    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn to_hex(&self) -> String {
        alloy::hex::encode_prefixed(&self.raw)
    }
}

/// A transaction that has been accepted by the node but not yet classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: B256,
    pub nonce: u64,
    /// Gas allotment the transaction was sent with.
    pub gas_limit: u64,
}

/// Fields of a transaction receipt consumed by the confirmation tracker.
///
/// `status` is only reported by nodes that implement post-Byzantium
/// receipts; older nodes leave it out and the tracker falls back to the
/// gas heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawReceipt", into = "RawReceipt")]
pub struct Receipt {
    pub transaction_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub cumulative_gas_used: Option<u64>,
    pub gas_used: Option<u64>,
    pub status: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    block_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cumulative_gas_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gas_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

pub(crate) fn parse_hash(raw: &str) -> Result<B256, CodecError> {
    raw.trim()
        .parse::<B256>()
        .map_err(|e| CodecError::InvalidHex(format!("{raw}: {e}")))
}

/// Empty strings are how some nodes spell "not yet known".
fn optional_quantity(raw: Option<String>) -> Result<Option<u64>, CodecError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_quantity_u64(value).map(Some),
    }
}

impl TryFrom<RawReceipt> for Receipt {
    type Error = CodecError;

    fn try_from(raw: RawReceipt) -> Result<Self, Self::Error> {
        let status = match optional_quantity(raw.status)? {
            None => None,
            Some(0) => Some(false),
            Some(1) => Some(true),
            Some(other) => {
                return Err(CodecError::InvalidQuantity(format!("receipt status {other}")))
            }
        };
        Ok(Self {
            transaction_hash: raw.transaction_hash.as_deref().map(parse_hash).transpose()?,
            block_number: optional_quantity(raw.block_number)?,
            cumulative_gas_used: optional_quantity(raw.cumulative_gas_used)?,
            gas_used: optional_quantity(raw.gas_used)?,
            status,
        })
    }
}

impl From<Receipt> for RawReceipt {
    fn from(receipt: Receipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash.map(|h| h.to_string()),
            block_number: receipt.block_number.map(format_quantity),
            cumulative_gas_used: receipt.cumulative_gas_used.map(format_quantity),
            gas_used: receipt.gas_used.map(format_quantity),
            status: receipt.status.map(|ok| format_quantity(u64::from(ok))),
        }
    }
}

/// The parts of `eth_getTransactionByHash` the agent reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub hash: B256,
    pub nonce: u64,
    pub gas: u64,
    /// `None` while the transaction sits in the mempool.
    pub block_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTransactionInfo {
    hash: String,
    nonce: String,
    gas: String,
    #[serde(default)]
    block_number: Option<String>,
}

impl TryFrom<RawTransactionInfo> for TransactionInfo {
    type Error = CodecError;

    fn try_from(raw: RawTransactionInfo) -> Result<Self, Self::Error> {
        Ok(Self {
            hash: parse_hash(&raw.hash)?,
            nonce: parse_quantity_u64(&raw.nonce)?,
            gas: parse_quantity_u64(&raw.gas)?,
            block_number: optional_quantity(raw.block_number)?,
        })
    }
}

/// Signed off-chain authorization letting the hub draw `amount` from the
/// channel.
///
/// `amount` is cumulative over the life of the channel, not a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAuthorization {
    pub message_hash: B256,
    pub amount: U256,
    /// Recovery id plus 27.
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;
    use serde_json::json;

    #[test]
    fn receipt_roundtrips_through_wire_form() {
        let receipt = Receipt {
            transaction_hash: Some(b256!(
                "88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b"
            )),
            block_number: Some(0x5daf3b),
            cumulative_gas_used: Some(21_000),
            gas_used: Some(21_000),
            status: None,
        };
        let wire = serde_json::to_value(&receipt).unwrap();
        assert_eq!(wire["cumulativeGasUsed"], "0x5208");
        assert!(wire.get("status").is_none());

        let decoded: Receipt = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, receipt);
    }

    #[test]
    fn receipt_with_empty_gas_decodes_as_unknown() {
        let receipt: Receipt = serde_json::from_value(json!({
            "transactionHash": null,
            "cumulativeGasUsed": "",
            "status": "0x1"
        }))
        .unwrap();
        assert_eq!(receipt.cumulative_gas_used, None);
        assert_eq!(receipt.status, Some(true));
    }

    #[test]
    fn receipt_rejects_garbage_quantities() {
        let result: Result<Receipt, _> = serde_json::from_value(json!({
            "cumulativeGasUsed": "0xnothex"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn gas_params_cost() {
        let gas = GasParams::default();
        assert_eq!(gas.max_cost(), U256::from(200_000_000_000_000u64));
        assert_eq!(gas.with_gas_limit(1).gas_price, DEFAULT_GAS_PRICE);
    }
}
