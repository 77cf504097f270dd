// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External service clients.

pub mod hub;

pub use hub::{HttpHubClient, HubClient, HubError};
