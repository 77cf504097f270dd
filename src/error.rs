// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Agent-wide error taxonomy.
//!
//! Layer errors ([`RpcError`], [`HubError`], [`SigningError`], ...) convert
//! into [`AgentError`], which is what the retry helpers and the run loop
//! reason about:
//!
//! | Variant | Policy |
//! |---------|--------|
//! | `Transport` | retried forever |
//! | `Decode` | retried, surfaces after repeated consecutive failures |
//! | `Unauthorized` | re-authenticate, then retried |
//! | `InsufficientBalance` | reported, deferred to the next cycle |
//! | everything else | fatal |

use alloy::primitives::{Address, B256, U256};

use crate::blockchain::codec::CodecError;
use crate::blockchain::signing::SigningError;
use crate::blockchain::transport::{RpcCause, RpcError};
use crate::config::ConfigError;
use crate::models::DecimalAmount;
use crate::providers::hub::HubError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Hub rejected the access token")]
    Unauthorized,

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("Invalid call encoding: {0}")]
    Encoding(CodecError),

    #[error("{action} transaction {hash} reverted")]
    RevertedTransaction { action: &'static str, hash: B256 },

    #[error("Insufficient channel balance: {needed} due, {available} available")]
    InsufficientBalance {
        needed: DecimalAmount,
        available: DecimalAmount,
    },

    #[error("Setup address {0} is not registered")]
    NotRegistered(Address),

    #[error(
        "Refusing to authorize {attempted} on channel {channel_id}, {previous} was already authorized"
    )]
    NonMonotonicAmount {
        channel_id: B256,
        previous: U256,
        attempted: U256,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Shutdown requested")]
    Cancelled,
}

impl AgentError {
    /// Transient failures that the caller should retry after a pause.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Transport(_) | AgentError::Decode(_) | AgentError::Unauthorized
        )
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, AgentError::Decode(_))
    }

    /// Business conditions that are reported and retried next cycle.
    pub fn is_deferred(&self) -> bool {
        matches!(self, AgentError::InsufficientBalance { .. })
    }
}

impl From<RpcError> for AgentError {
    fn from(err: RpcError) -> Self {
        match err.cause {
            RpcCause::Encode(codec) => AgentError::Encoding(codec),
            RpcCause::Decode(_) => AgentError::Decode(err.to_string()),
            RpcCause::Transport(_) | RpcCause::Node { .. } => AgentError::Transport(err.to_string()),
        }
    }
}

impl From<HubError> for AgentError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Unauthorized => AgentError::Unauthorized,
            HubError::InvalidResponse(_) => AgentError::Decode(err.to_string()),
            HubError::Request(_) | HubError::Status { .. } => AgentError::Transport(err.to_string()),
        }
    }
}

impl From<CodecError> for AgentError {
    fn from(err: CodecError) -> Self {
        if err.is_encoding() {
            AgentError::Encoding(err)
        } else {
            AgentError::Decode(err.to_string())
        }
    }
}
