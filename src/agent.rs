// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Agent Loop
//!
//! Sequences the startup steps and then runs one settlement cycle per poll
//! interval until shutdown.
//!
//! ## Startup
//!
//! 1. Resolve the contract addresses published by the hub (waits until all
//!    four are known).
//! 2. Add the wallet to the registry with the setup key, if one is
//!    configured, and wait for the device to be claimed.
//! 3. Authenticate with the hub.
//!
//! ## Each cycle
//!
//! 1. Fetch gas parameters (defaults when the hub cannot supply them).
//! 2. Top up native currency from the hub faucet when the wallet cannot pay
//!    for one transaction.
//! 3. Make sure a payment channel is open.
//! 4. Settle unpaid bills.
//!
//! Failed cycles are retried on the next tick, except that malformed
//! responses in several consecutive cycles stop the agent.
//!
//! ## Shutdown
//!
//! Every sleep goes through a [`Pacer`] built on the `CancellationToken`
//! passed to [`Agent::run`], which then returns `Ok(())`.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blockchain::client::ChainClient;
use crate::blockchain::confirmation::ConfirmationTracker;
use crate::blockchain::signing::sign_auth_challenge;
use crate::blockchain::transactions::TxSender;
use crate::blockchain::types::GasParams;
use crate::channel::ChannelManager;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::pacer::Pacer;
use crate::providers::hub::{Contract, HubClient};
use crate::registry::Registry;
use crate::settlement::{CycleOutcome, SettlementEngine};

/// Pause after a failed faucet request.
const FAUCET_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Contract addresses published by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub registry: Address,
    pub token: Address,
    /// The hub's own account, counterparty of the channel.
    pub hub: Address,
    pub channels: Address,
}

pub struct Agent {
    config: AgentConfig,
    client: ChainClient,
    hub: Arc<dyn HubClient>,
    wallet: PrivateKeySigner,
    setup: Option<PrivateKeySigner>,
    chain_id: u64,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        client: ChainClient,
        hub: Arc<dyn HubClient>,
        wallet: PrivateKeySigner,
        setup: Option<PrivateKeySigner>,
        chain_id: u64,
    ) -> Self {
        Self {
            config,
            client,
            hub,
            wallet,
            setup,
            chain_id,
        }
    }

    /// Run until the token is cancelled or a fatal error occurs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let pacer = Pacer::new(shutdown);
        info!(
            wallet = %self.wallet.address(),
            chain_id = self.chain_id,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Agent starting"
        );

        match self.run_until_fatal(&pacer).await {
            Err(AgentError::Cancelled) => {
                info!("Agent shutting down");
                Ok(())
            }
            other => other,
        }
    }

    async fn run_until_fatal(&self, pacer: &Pacer) -> Result<(), AgentError> {
        let wallet = self.wallet.address();
        let addresses = self.resolve_addresses(pacer).await?;
        info!(
            registry = %addresses.registry,
            token = %addresses.token,
            hub = %addresses.hub,
            channels = %addresses.channels,
            "Contract addresses resolved"
        );

        let tracker = Arc::new(ConfirmationTracker::new(
            self.client.clone(),
            self.config.confirmation_interval,
        ));
        let sender = Arc::new(TxSender::new(
            self.client.clone(),
            self.wallet.clone(),
            self.chain_id,
        )?);

        let registry = Registry::new(self.client.clone(), addresses.registry);
        if let (Some(setup_key), Some(setup)) = (&self.setup, &self.config.setup) {
            let setup_sender = TxSender::new(self.client.clone(), setup_key.clone(), self.chain_id)?;
            let gas = self.gas_params().await;
            registry
                .ensure_wallet_added(
                    &setup_sender,
                    wallet,
                    setup.serial_hash(),
                    gas,
                    &tracker,
                    pacer,
                )
                .await?;
        }
        registry
            .wait_until_claimed(wallet, self.config.poll_interval, pacer)
            .await?;

        self.authenticate(pacer).await?;

        match self.client.get_balance(wallet).await {
            Ok(balance) => info!(wallet = %wallet, balance_wei = %balance, "Setup complete"),
            Err(e) => warn!(wallet = %wallet, error = %e, "Setup complete, balance unavailable"),
        }

        let channels = ChannelManager::new(
            self.client.clone(),
            sender,
            tracker.clone(),
            addresses.channels,
            addresses.token,
            addresses.hub,
            self.config.min_channel_funding,
        );
        let mut engine = SettlementEngine::new(
            Arc::clone(&self.hub),
            self.client.clone(),
            channels.reader(),
            self.wallet.clone(),
        );

        let mut malformed_cycles = 0u32;
        loop {
            pacer.check()?;

            let result = self.cycle(&channels, &mut engine, &tracker, pacer).await;
            if matches!(result, Err(ref e) if e.is_decode()) {
                malformed_cycles += 1;
            } else {
                malformed_cycles = 0;
            }

            match result {
                Ok(outcome) => debug!(?outcome, "Cycle complete"),
                Err(e) if e.is_decode() && malformed_cycles >= pacer.max_decode_errors() => {
                    error!(error = %e, cycles = malformed_cycles, "Giving up after repeated malformed responses");
                    return Err(e);
                }
                Err(AgentError::Unauthorized) => {
                    warn!("Hub access token rejected, re-authenticating");
                    self.authenticate(pacer).await?;
                }
                Err(e) if e.is_deferred() => warn!(error = %e, "Payment deferred"),
                Err(e) if e.is_retryable() => warn!(error = %e, "Cycle failed, retrying"),
                Err(e) => return Err(e),
            }

            pacer.sleep(self.config.poll_interval).await?;
        }
    }

    async fn cycle(
        &self,
        channels: &ChannelManager,
        engine: &mut SettlementEngine,
        tracker: &ConfirmationTracker,
        pacer: &Pacer,
    ) -> Result<CycleOutcome, AgentError> {
        let gas = self.gas_params().await;
        self.ensure_ether(gas, tracker, pacer).await?;
        channels.ensure_channel(gas, pacer).await?;
        engine.run_cycle().await
    }

    /// Poll the hub until every contract address is published.
    pub async fn resolve_addresses(&self, pacer: &Pacer) -> Result<ContractAddresses, AgentError> {
        let interval = self.config.poll_interval;
        loop {
            let mut found = Vec::with_capacity(Contract::ALL.len());
            for contract in Contract::ALL {
                let address = pacer
                    .retry_forever(contract.path(), interval, || async move {
                        self.hub
                            .contract_address(contract)
                            .await
                            .map_err(AgentError::from)
                    })
                    .await?;
                found.push(address);
            }

            if let [Some(registry), Some(token), Some(hub), Some(channels)] = found[..] {
                return Ok(ContractAddresses {
                    registry,
                    token,
                    hub,
                    channels,
                });
            }
            info!("Hub has not published all contract addresses yet");
            pacer.sleep(interval).await?;
        }
    }

    /// Sign the hub's challenge and exchange it for an access token.
    async fn authenticate(&self, pacer: &Pacer) -> Result<(), AgentError> {
        let owner = self.wallet.address();
        pacer
            .retry_forever("authenticate", self.config.poll_interval, || async move {
                let challenge = self.hub.auth_challenge().await?;
                let signature = sign_auth_challenge(&challenge, &self.wallet)?;
                self.hub.authenticate(owner, &signature).await?;
                Ok::<(), AgentError>(())
            })
            .await
    }

    async fn gas_params(&self) -> GasParams {
        match self.hub.gas_params().await {
            Ok(gas) => gas,
            Err(e) => {
                let gas = GasParams::default();
                warn!(
                    error = %e,
                    gas_limit = gas.gas_limit,
                    gas_price = gas.gas_price,
                    "Using default gas parameters"
                );
                gas
            }
        }
    }

    /// Make sure the wallet can pay for one transaction at `gas`, calling
    /// the faucet until it can.
    async fn ensure_ether(
        &self,
        gas: GasParams,
        tracker: &ConfirmationTracker,
        pacer: &Pacer,
    ) -> Result<(), AgentError> {
        let wallet = self.wallet.address();
        let needed = gas.max_cost();

        loop {
            let balance = pacer
                .retry_forever("eth_getBalance", tracker.poll_interval(), || async move {
                    self.client.get_balance(wallet).await.map_err(AgentError::from)
                })
                .await?;
            if balance >= needed {
                return Ok(());
            }

            warn!(balance_wei = %balance, needed_wei = %needed, "Low balance, calling faucet");
            let hash = match self.hub.request_faucet(wallet).await.map_err(AgentError::from) {
                Ok(hash) => hash,
                Err(e) if e.is_retryable() && !matches!(e, AgentError::Unauthorized) => {
                    warn!(error = %e, "Faucet request failed");
                    pacer.sleep(FAUCET_RETRY_INTERVAL).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let outcome = tracker.await_external(hash, pacer).await?;
            info!(tx_hash = %hash, ?outcome, "Faucet transfer settled");
        }
    }
}
