// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger node client.
//!
//! Thin typed layer over [`RpcTransport`]. Every method is one request;
//! retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use url::Url;

use super::codec::{decode_hex, parse_quantity, parse_quantity_u64, CallData};
use super::erc20::Erc20Contract;
use super::transport::{HttpTransport, RpcError, RpcTransport};
use super::types::{parse_hash, RawTransactionInfo, Receipt, SignedTransaction, TransactionInfo};

/// Block tag used for every state read, nonces included.
const BLOCK_TAG: &str = "latest";

/// Client for a single ledger node.
#[derive(Clone)]
pub struct ChainClient {
    transport: Arc<dyn RpcTransport>,
}

impl ChainClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    /// Client over HTTP with a per-request timeout.
    pub fn http(url: Url, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self::new(Arc::new(HttpTransport::new(url, timeout)?)))
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let value = self.transport.request(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::decode(method, e.to_string()))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<U256, RpcError> {
        let raw: String = self.request(method, params).await?;
        parse_quantity(&raw).map_err(|e| RpcError::decode(method, e.to_string()))
    }

    async fn quantity_u64(&self, method: &str, params: Value) -> Result<u64, RpcError> {
        let raw: String = self.request(method, params).await?;
        parse_quantity_u64(&raw).map_err(|e| RpcError::decode(method, e.to_string()))
    }

    /// Native balance in wei.
    pub async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        self.quantity("eth_getBalance", json!([address.to_string(), BLOCK_TAG]))
            .await
    }

    /// Token balance in atomic units.
    pub async fn get_token_balance(&self, address: Address, token: Address) -> Result<U256, RpcError> {
        Erc20Contract::new(self, token).balance_of(address).await
    }

    pub async fn get_token_decimals(&self, token: Address) -> Result<u8, RpcError> {
        Erc20Contract::new(self, token).decimals().await
    }

    /// Transaction count of `address`, i.e. its next nonce.
    pub async fn get_nonce(&self, address: Address) -> Result<u64, RpcError> {
        self.quantity_u64("eth_getTransactionCount", json!([address.to_string(), BLOCK_TAG]))
            .await
    }

    /// Execute a read-only contract call.
    pub async fn call(&self, from: Address, to: Address, data: &CallData) -> Result<Bytes, RpcError> {
        let raw: String = self
            .request(
                "eth_call",
                json!([{ "from": from.to_string(), "to": to.to_string(), "data": data.to_hex() }, BLOCK_TAG]),
            )
            .await?;
        decode_hex(&raw)
            .map(Bytes::from)
            .map_err(|e| RpcError::decode("eth_call", e.to_string()))
    }

    pub async fn send_raw_transaction(&self, signed: &SignedTransaction) -> Result<B256, RpcError> {
        let raw: String = self
            .request("eth_sendRawTransaction", json!([signed.to_hex()]))
            .await?;
        parse_hash(&raw).map_err(|e| RpcError::decode("eth_sendRawTransaction", e.to_string()))
    }

    /// `None` while the transaction is unmined.
    pub async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>, RpcError> {
        self.request("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await
    }

    /// `None` when the node does not know the transaction at all.
    pub async fn get_transaction(&self, hash: B256) -> Result<Option<TransactionInfo>, RpcError> {
        let raw: Option<RawTransactionInfo> = self
            .request("eth_getTransactionByHash", json!([hash.to_string()]))
            .await?;
        raw.map(TransactionInfo::try_from)
            .transpose()
            .map_err(|e| RpcError::decode("eth_getTransactionByHash", e.to_string()))
    }

    /// Chain id for replay protection.
    ///
    /// Tries `eth_chainId` first and falls back to `net_version` for older
    /// nodes. A reported id of 0 is an error, never a default.
    pub async fn get_chain_id(&self) -> Result<u64, RpcError> {
        let chain_id = match self.quantity_u64("eth_chainId", json!([])).await {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(error = %e, "eth_chainId unavailable, trying net_version");
                let raw: String = self.request("net_version", json!([])).await?;
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| RpcError::decode("net_version", format!("{raw}: {e}")))?
            }
        };

        if chain_id == 0 {
            return Err(RpcError::decode("eth_chainId", "node reported chain id 0"));
        }
        Ok(chain_id)
    }

    pub async fn get_block_number(&self) -> Result<u64, RpcError> {
        self.quantity_u64("eth_blockNumber", json!([])).await
    }
}
