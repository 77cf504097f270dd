// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Channel Agent - device-side payment channel settlement
//!
//! Runs on a metered device. Registers the device wallet, funds an on-chain
//! payment channel with the billing hub, and settles bills by signing
//! cumulative off-chain payment authorizations.
//!
//! ## Modules
//!
//! - `agent` - Startup sequence and settlement loop
//! - `blockchain` - Call encoding, signing, JSON-RPC client, confirmations
//! - `channel` - Payment channel discovery, funding and opening
//! - `providers` - Billing hub REST client
//! - `registry` - Device registration
//! - `settlement` - Bill settlement against the channel

pub mod agent;
pub mod blockchain;
pub mod channel;
pub mod config;
pub mod error;
pub mod models;
pub mod pacer;
pub mod providers;
pub mod registry;
pub mod settlement;
pub mod state;
