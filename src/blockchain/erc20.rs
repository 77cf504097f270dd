// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ERC-20 token contract interactions.

use alloy::primitives::{Address, U256};

use super::client::ChainClient;
use super::codec::{
    address_word, decode_word_u256, encode_method, u256_word, CallData, CodecError, Method,
};
use super::transport::{RpcCause, RpcError};

/// `balanceOf(owner)`
pub fn balance_of_call(owner: Address) -> Result<CallData, CodecError> {
    encode_method(Method::BalanceOf, &[&address_word(owner)])
}

/// `decimals()`
pub fn decimals_call() -> Result<CallData, CodecError> {
    encode_method(Method::Decimals, &[])
}

/// `approve(spender, amount)`
pub fn approve_call(spender: Address, amount: U256) -> Result<CallData, CodecError> {
    encode_method(Method::Approve, &[&address_word(spender), &u256_word(amount)])
}

/// Read-only view of one token contract.
pub struct Erc20Contract {
    client: ChainClient,
    address: Address,
}

impl Erc20Contract {
    pub fn new(client: &ChainClient, address: Address) -> Self {
        Self {
            client: client.clone(),
            address,
        }
    }

    /// Get the token decimals.
    pub async fn decimals(&self) -> Result<u8, RpcError> {
        let data = decimals_call().map_err(encode_error)?;
        let raw = self.client.call(Address::ZERO, self.address, &data).await?;
        let value = decode_word_u256(&raw)
            .map_err(|e| RpcError::decode("eth_call", format!("decimals(): {e}")))?;

        u8::try_from(value)
            .map_err(|_| RpcError::decode("eth_call", format!("decimals() out of range: {value}")))
    }

    /// Get the token balance of an address, in atomic units.
    pub async fn balance_of(&self, owner: Address) -> Result<U256, RpcError> {
        let data = balance_of_call(owner).map_err(encode_error)?;
        let raw = self.client.call(owner, self.address, &data).await?;
        decode_word_u256(&raw)
            .map_err(|e| RpcError::decode("eth_call", format!("balanceOf({owner}): {e}")))
    }
}

fn encode_error(e: CodecError) -> RpcError {
    RpcError::new("eth_call", RpcCause::Encode(e))
}
