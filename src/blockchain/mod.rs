// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger integration.
//!
//! This module provides functionality for:
//! - Encoding contract calls (selector + 32-byte words)
//! - Hashing and signing transactions and payment authorizations
//! - Talking JSON-RPC to the ledger node
//! - Submitting transactions and tracking them to a terminal outcome

pub mod client;
pub mod codec;
pub mod confirmation;
pub mod erc20;
pub mod signing;
pub mod transactions;
pub mod transport;
pub mod types;

pub use client::ChainClient;
pub use confirmation::{ConfirmationTracker, TxOutcome};
pub use transactions::TxSender;
pub use transport::{HttpTransport, RpcCause, RpcError, RpcTransport};
pub use types::*;
