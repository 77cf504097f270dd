// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Contract call encoding.
//!
//! Every call the agent makes against the registry, token and channel
//! contracts has the same fixed layout:
//!
//! ```text
//! selector (4 bytes) || arg_1 (32 bytes) || ... || arg_n (32 bytes)
//! ```
//!
//! Arguments are left-padded with zero bytes to a full word. Anything wider
//! than a word is rejected; values are never truncated to fit.
//!
//! The selectors used by the agent live in the [`Method`] table together
//! with their argument counts, so call sites never spell out raw bytes.

use std::fmt;

use alloy::primitives::{Address, Bytes, B256, U256};

/// Width of one ABI word.
pub const WORD_LEN: usize = 32;

/// Width of a method selector.
pub const SELECTOR_LEN: usize = 4;

/// Errors produced while encoding calls or decoding their results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("argument {index} is {len} bytes wide, a word holds at most 32")]
    ArgumentTooLong { index: usize, len: usize },

    #[error("{method} takes {expected} argument(s), got {actual}")]
    ArgumentCount {
        method: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("call returned no data")]
    EmptyReturn,
}

impl CodecError {
    /// Encoding errors are caller bugs; decoding errors come from the node.
    pub fn is_encoding(&self) -> bool {
        matches!(
            self,
            CodecError::ArgumentTooLong { .. } | CodecError::ArgumentCount { .. }
        )
    }
}

/// A 4-byte contract method identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selector(pub [u8; SELECTOR_LEN]);

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", alloy::hex::encode_prefixed(self.0))
    }
}

/// Encoded call payload: selector followed by 32-byte words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallData(Bytes);

impl CallData {
    /// No payload, for plain value transfers.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn selector(&self) -> Option<Selector> {
        let head: [u8; SELECTOR_LEN] = self.0.get(..SELECTOR_LEN)?.try_into().ok()?;
        Some(Selector(head))
    }

    /// `0x`-prefixed hex, the form the node expects in `eth_call`.
    pub fn to_hex(&self) -> String {
        alloy::hex::encode_prefixed(&self.0)
    }
}

impl From<CallData> for Bytes {
    fn from(value: CallData) -> Self {
        value.0
    }
}

impl fmt::Display for CallData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// =============================================================================
// Method table
// =============================================================================

/// Contract methods called by the agent.
///
/// | Method          | Contract | Selector   | Args |
/// |-----------------|----------|------------|------|
/// | `BalanceOf`     | token    | `70a08231` | 1    |
/// | `Decimals`      | token    | `313ce567` | 0    |
/// | `Approve`       | token    | `095ea7b3` | 2    |
/// | `OpenChannel`   | channels | `cfa40e4f` | 3    |
/// | `GetChannelId`  | channels | `2460ee73` | 2    |
/// | `GetDeposit`    | channels | `7a86983f` | 1    |
/// | `Registered`    | registry | `b2dd5c07` | 1    |
/// | `Claimed`       | registry | `c884ef83` | 1    |
/// | `AddWallet`     | registry | `b993b3f5` | 2    |
///
/// These are wire constants of the deployed contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    BalanceOf,
    Decimals,
    Approve,
    OpenChannel,
    GetChannelId,
    GetDeposit,
    Registered,
    Claimed,
    AddWallet,
}

impl Method {
    pub const fn selector(self) -> Selector {
        Selector(match self {
            Method::BalanceOf => [0x70, 0xa0, 0x82, 0x31],
            Method::Decimals => [0x31, 0x3c, 0xe5, 0x67],
            Method::Approve => [0x09, 0x5e, 0xa7, 0xb3],
            Method::OpenChannel => [0xcf, 0xa4, 0x0e, 0x4f],
            Method::GetChannelId => [0x24, 0x60, 0xee, 0x73],
            Method::GetDeposit => [0x7a, 0x86, 0x98, 0x3f],
            Method::Registered => [0xb2, 0xdd, 0x5c, 0x07],
            Method::Claimed => [0xc8, 0x84, 0xef, 0x83],
            Method::AddWallet => [0xb9, 0x93, 0xb3, 0xf5],
        })
    }

    pub const fn arg_count(self) -> usize {
        match self {
            Method::Decimals => 0,
            Method::BalanceOf | Method::GetDeposit | Method::Registered | Method::Claimed => 1,
            Method::Approve | Method::GetChannelId | Method::AddWallet => 2,
            Method::OpenChannel => 3,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Method::BalanceOf => "balanceOf",
            Method::Decimals => "decimals",
            Method::Approve => "approve",
            Method::OpenChannel => "openChannel",
            Method::GetChannelId => "getChannelId",
            Method::GetDeposit => "getDeposit",
            Method::Registered => "registered",
            Method::Claimed => "claimed",
            Method::AddWallet => "addWallet",
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Build `selector || pad32(arg_1) || ... || pad32(arg_n)`.
pub fn encode_call(selector: Selector, args: &[&[u8]]) -> Result<CallData, CodecError> {
    let mut out = Vec::with_capacity(SELECTOR_LEN + WORD_LEN * args.len());
    out.extend_from_slice(&selector.0);

    for (index, arg) in args.iter().enumerate() {
        if arg.len() > WORD_LEN {
            return Err(CodecError::ArgumentTooLong {
                index,
                len: arg.len(),
            });
        }
        out.resize(out.len() + WORD_LEN - arg.len(), 0);
        out.extend_from_slice(arg);
    }

    Ok(CallData(out.into()))
}

/// Encode a call from the method table, checking the argument count.
pub fn encode_method(method: Method, args: &[&[u8]]) -> Result<CallData, CodecError> {
    if args.len() != method.arg_count() {
        return Err(CodecError::ArgumentCount {
            method: method.name(),
            expected: method.arg_count(),
            actual: args.len(),
        });
    }
    encode_call(method.selector(), args)
}

pub fn address_word(address: Address) -> [u8; WORD_LEN] {
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - 20..].copy_from_slice(address.as_slice());
    word
}

pub fn u256_word(value: U256) -> [u8; WORD_LEN] {
    value.to_be_bytes::<WORD_LEN>()
}

pub fn b256_word(value: B256) -> [u8; WORD_LEN] {
    value.0
}

// =============================================================================
// Decoding
// =============================================================================

/// Remove leading `0x`/`0X` markers, leaving bare hex digits.
///
/// Repeated markers are all removed so that stripping twice is the same as
/// stripping once.
pub fn strip_prefix(hex: &str) -> &str {
    let mut rest = hex;
    while let Some(stripped) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        rest = stripped;
    }
    rest
}

pub fn decode_hex(hex: &str) -> Result<Vec<u8>, CodecError> {
    alloy::hex::decode(strip_prefix(hex.trim())).map_err(|e| CodecError::InvalidHex(e.to_string()))
}

/// Read the first return word of a call.
///
/// Short results are treated as left-padded.
pub fn decode_word(data: &[u8]) -> Result<[u8; WORD_LEN], CodecError> {
    if data.is_empty() {
        return Err(CodecError::EmptyReturn);
    }
    let mut word = [0u8; WORD_LEN];
    if data.len() >= WORD_LEN {
        word.copy_from_slice(&data[..WORD_LEN]);
    } else {
        word[WORD_LEN - data.len()..].copy_from_slice(data);
    }
    Ok(word)
}

pub fn decode_word_u256(data: &[u8]) -> Result<U256, CodecError> {
    decode_word(data).map(U256::from_be_bytes::<WORD_LEN>)
}

/// Parse a JSON-RPC quantity (`0x`-prefixed hex, no leading zeros required).
pub fn parse_quantity(raw: &str) -> Result<U256, CodecError> {
    let digits = strip_prefix(raw.trim());
    if digits.is_empty() {
        return Err(CodecError::InvalidQuantity(raw.to_string()));
    }
    U256::from_str_radix(digits, 16).map_err(|_| CodecError::InvalidQuantity(raw.to_string()))
}

pub fn parse_quantity_u64(raw: &str) -> Result<u64, CodecError> {
    let value = parse_quantity(raw)?;
    u64::try_from(value).map_err(|_| CodecError::InvalidQuantity(raw.to_string()))
}

pub fn format_quantity(value: u64) -> String {
    format!("{value:#x}")
}
