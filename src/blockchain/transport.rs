// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC transport to the ledger node.
//!
//! [`HttpTransport`] delegates the envelope, request ids and error objects
//! to alloy's [`RpcClient`]. The transport only moves values; interpreting
//! `result` is up to [`ChainClient`](super::client::ChainClient).

use std::time::Duration;

use alloy::rpc::client::RpcClient;
use alloy::transports::http::{reqwest, Http};
use alloy::transports::{TransportError, TransportErrorKind};
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::codec::CodecError;

/// Why a node request failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcCause {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("request could not be encoded: {0}")]
    Encode(CodecError),
}

/// A failed node request, tagged with the RPC method that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{method} failed: {cause}")]
pub struct RpcError {
    pub method: String,
    pub cause: RpcCause,
}

impl RpcError {
    pub fn new(method: impl Into<String>, cause: RpcCause) -> Self {
        Self {
            method: method.into(),
            cause,
        }
    }

    pub fn transport(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(method, RpcCause::Transport(message.into()))
    }

    pub fn decode(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(method, RpcCause::Decode(message.into()))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self.cause, RpcCause::Decode(_))
    }
}

/// Request/response channel to a ledger node.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send one request and return its `result` (`Null` when absent).
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Sort a client failure into the agent's causes.
fn classify(err: TransportError) -> RpcCause {
    match err {
        TransportError::ErrorResp(payload) => RpcCause::Node {
            code: payload.code,
            message: payload.message.to_string(),
        },
        TransportError::DeserError { err, text } => {
            RpcCause::Decode(format!("invalid JSON-RPC body: {err}: {text}"))
        }
        TransportError::Transport(TransportErrorKind::HttpError(http)) => {
            RpcCause::Transport(format!("node returned {}: {}", http.status, http.body))
        }
        other => RpcCause::Transport(other.to_string()),
    }
}

/// JSON-RPC over HTTP.
pub struct HttpTransport {
    client: RpcClient,
}

impl HttpTransport {
    /// Every request is bounded by `timeout`.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::transport("connect", format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: RpcClient::new(Http::with_client(http, url), false),
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let response: Result<Value, TransportError> =
            self.client.request(method.to_string(), params).await;
        match response {
            Ok(result) => Ok(result),
            Err(TransportError::NullResp) => Ok(Value::Null),
            Err(e) => Err(RpcError::new(method, classify(e))),
        }
    }
}
