// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Billing hub REST client.
//!
//! Every endpoint answers `{"result": ...}`. Billing endpoints require the
//! token obtained from `/Authenticate`, sent as `x-access-token`.
//!
//! | Method | Path | Auth | Result |
//! |--------|------|------|--------|
//! | GET | `/Registry`, `/USDX`, `/Hub`, `/Channels` | no | contract address |
//! | GET | `/Gas` | no | `{gas, gasPrice}` (top level) |
//! | GET | `/AuthDatum` | no | challenge string |
//! | POST | `/Authenticate` | no | access token |
//! | GET | `/Bills` | yes | `[{bill_id, amount}]` |
//! | GET | `/ChannelSum?channel_id=` | yes | committed token units |
//! | POST | `/PayBills` | yes | `{paid, remaining}` |
//! | POST | `/Faucet` | yes | transaction hash |

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::info;

use crate::blockchain::codec::parse_quantity;
use crate::blockchain::types::{parse_hash, GasParams, PaymentAuthorization};
use crate::models::{Bill, BillId};

const ACCESS_TOKEN_HEADER: &str = "x-access-token";

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Hub request failed: {0}")]
    Request(String),

    #[error("Hub returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Hub rejected or lacks an access token")]
    Unauthorized,

    #[error("Hub response was invalid: {0}")]
    InvalidResponse(String),
}

/// Contracts whose addresses the hub publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Contract {
    Registry,
    Token,
    Hub,
    Channels,
}

impl Contract {
    pub const ALL: [Contract; 4] = [
        Contract::Registry,
        Contract::Token,
        Contract::Hub,
        Contract::Channels,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Contract::Registry => "/Registry",
            Contract::Token => "/USDX",
            Contract::Hub => "/Hub",
            Contract::Channels => "/Channels",
        }
    }
}

/// A signed authorization together with the bills it settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillPayment {
    pub bill_ids: Vec<BillId>,
    pub authorization: PaymentAuthorization,
}

impl BillPayment {
    fn to_json(&self) -> Value {
        let auth = &self.authorization;
        json!({
            "bill_ids": self.bill_ids,
            "msg": auth.message_hash.to_string(),
            "v": auth.v,
            "r": auth.r.to_string(),
            "s": auth.s.to_string(),
            "value": format!("0x{:x}", auth.amount),
        })
    }
}

/// Hub's answer to a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillPaymentReceipt {
    pub paid: Vec<BillId>,
    /// Token units left in the channel after this payment.
    pub remaining: U256,
}

/// Operations the agent needs from the hub.
#[async_trait]
pub trait HubClient: Send + Sync {
    /// `None` while the hub has not published the address yet.
    async fn contract_address(&self, contract: Contract) -> Result<Option<Address>, HubError>;

    async fn gas_params(&self) -> Result<GasParams, HubError>;

    async fn auth_challenge(&self) -> Result<String, HubError>;

    /// Exchange a signed challenge for an access token, kept by the client.
    async fn authenticate(&self, owner: Address, signature: &str) -> Result<(), HubError>;

    async fn unpaid_bills(&self) -> Result<Vec<Bill>, HubError>;

    /// Cumulative token units already committed to the channel.
    async fn channel_sum(&self, channel_id: B256) -> Result<U256, HubError>;

    async fn pay_bills(&self, payment: &BillPayment) -> Result<BillPaymentReceipt, HubError>;

    /// Ask the hub to send native currency for gas. Returns the transfer hash.
    async fn request_faucet(&self, agent: Address) -> Result<B256, HubError>;
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Deserialize)]
struct ResultEnvelope<T> {
    result: T,
}

/// Integers arrive as JSON numbers, decimal strings or hex strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireInteger {
    Number(serde_json::Number),
    Text(String),
}

impl WireInteger {
    fn to_u256(&self) -> Result<U256, HubError> {
        match self {
            WireInteger::Number(n) => n.as_u64().map(U256::from).ok_or_else(|| not_an_integer(n)),
            WireInteger::Text(s) => {
                let s = s.trim();
                if s.starts_with("0x") || s.starts_with("0X") {
                    parse_quantity(s).map_err(|_| not_an_integer(s))
                } else {
                    U256::from_str_radix(s, 10).map_err(|_| not_an_integer(s))
                }
            }
        }
    }
}

fn not_an_integer(raw: impl std::fmt::Display) -> HubError {
    HubError::InvalidResponse(format!("not an unsigned integer: {raw}"))
}

#[derive(Deserialize)]
struct GasResponse {
    gas: WireInteger,
    #[serde(rename = "gasPrice")]
    gas_price: WireInteger,
}

#[derive(Deserialize)]
struct PaidResult {
    paid: Vec<BillId>,
    remaining: WireInteger,
}

// =============================================================================
// HTTP client
// =============================================================================

pub struct HttpHubClient {
    base_url: String,
    http: Client,
    token: RwLock<Option<String>>,
}

impl HttpHubClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HubError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HubError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn with_token(&self, request: RequestBuilder) -> Result<RequestBuilder, HubError> {
        let token = self.token.read().await;
        let token = token.as_deref().ok_or(HubError::Unauthorized)?;
        Ok(request.header(ACCESS_TOKEN_HEADER, token))
    }

    async fn send<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T, HubError> {
        let response = request
            .send()
            .await
            .map_err(|e| HubError::Request(format!("{what} failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(HubError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HubError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| HubError::InvalidResponse(format!("{what} invalid JSON: {e}")))
    }

    async fn get_result<T: DeserializeOwned>(&self, path: &str, authed: bool) -> Result<T, HubError> {
        let mut request = self.http.get(self.url(path));
        if authed {
            request = self.with_token(request).await?;
        }
        let envelope: ResultEnvelope<T> = self.send(&format!("GET {path}"), request).await?;
        Ok(envelope.result)
    }

    async fn post_result<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        authed: bool,
    ) -> Result<T, HubError> {
        let mut request = self.http.post(self.url(path)).json(body);
        if authed {
            request = self.with_token(request).await?;
        }
        let envelope: ResultEnvelope<T> = self.send(&format!("POST {path}"), request).await?;
        Ok(envelope.result)
    }
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn contract_address(&self, contract: Contract) -> Result<Option<Address>, HubError> {
        let raw: String = self.get_result(contract.path(), false).await?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<Address>()
            .map(Some)
            .map_err(|e| HubError::InvalidResponse(format!("{}: {raw}: {e}", contract.path())))
    }

    async fn gas_params(&self) -> Result<GasParams, HubError> {
        let raw: GasResponse = self.send("GET /Gas", self.http.get(self.url("/Gas"))).await?;
        let gas_limit = u64::try_from(raw.gas.to_u256()?)
            .map_err(|_| HubError::InvalidResponse("gas limit out of range".to_string()))?;
        let gas_price = u128::try_from(raw.gas_price.to_u256()?)
            .map_err(|_| HubError::InvalidResponse("gas price out of range".to_string()))?;
        Ok(GasParams::new(gas_limit, gas_price))
    }

    async fn auth_challenge(&self) -> Result<String, HubError> {
        self.get_result("/AuthDatum", false).await
    }

    async fn authenticate(&self, owner: Address, signature: &str) -> Result<(), HubError> {
        let token: String = self
            .post_result(
                "/Authenticate",
                &json!({ "owner": owner.to_string(), "sig": signature }),
                false,
            )
            .await?;
        if token.trim().is_empty() {
            return Err(HubError::InvalidResponse(
                "authentication response did not include a token".to_string(),
            ));
        }

        *self.token.write().await = Some(token);
        info!(owner = %owner, "Authenticated with hub");
        Ok(())
    }

    async fn unpaid_bills(&self) -> Result<Vec<Bill>, HubError> {
        self.get_result("/Bills", true).await
    }

    async fn channel_sum(&self, channel_id: B256) -> Result<U256, HubError> {
        let raw: WireInteger = self
            .get_result(&format!("/ChannelSum?channel_id={channel_id}"), true)
            .await?;
        raw.to_u256()
    }

    async fn pay_bills(&self, payment: &BillPayment) -> Result<BillPaymentReceipt, HubError> {
        let raw: PaidResult = self
            .post_result("/PayBills", &payment.to_json(), true)
            .await?;
        Ok(BillPaymentReceipt {
            paid: raw.paid,
            remaining: raw.remaining.to_u256()?,
        })
    }

    async fn request_faucet(&self, agent: Address) -> Result<B256, HubError> {
        let raw: String = self
            .post_result("/Faucet", &json!({ "agent": agent.to_string() }), true)
            .await?;
        parse_hash(&raw).map_err(|e| HubError::InvalidResponse(format!("faucet hash: {e}")))
    }
}
