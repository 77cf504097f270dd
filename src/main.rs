// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use relational_channel_agent::agent::Agent;
use relational_channel_agent::blockchain::signing::load_private_key;
use relational_channel_agent::blockchain::ChainClient;
use relational_channel_agent::config::{AgentConfig, LogFormat, DEFAULT_LOG_FILTER, LOG_FORMAT_ENV};
use relational_channel_agent::error::AgentError;
use relational_channel_agent::providers::HttpHubClient;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match LogFormat::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref()) {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match start().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Agent stopped");
            ExitCode::FAILURE
        }
    }
}

async fn start() -> Result<(), AgentError> {
    let config = AgentConfig::from_env()?;

    let wallet = load_private_key(&config.wallet_key_path)?;
    let setup = config
        .setup
        .as_ref()
        .map(|setup| load_private_key(&setup.key_path))
        .transpose()?;
    if setup.is_none() {
        info!("No setup key configured, skipping wallet registration");
    }

    let client = ChainClient::http(config.rpc_url.clone(), config.rpc_timeout)?;
    let block = client.get_block_number().await?;
    let chain_id = client.get_chain_id().await?;
    info!(rpc_url = %config.rpc_url, block, chain_id, "Connected to ledger node");

    let hub = HttpHubClient::new(config.hub_api_url.as_str(), config.rpc_timeout)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    Agent::new(config, client, Arc::new(hub), wallet, setup, chain_id)
        .run(shutdown)
        .await
}
