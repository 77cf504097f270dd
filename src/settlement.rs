// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Engine
//!
//! One cycle settles every unpaid bill at once, or none of them.
//!
//! ```text
//! unpaid     = Σ bill.amount
//! available  = (deposit - committed) / 10^decimals
//! cumulative = committed + ceil(unpaid × 10^decimals)
//! ```
//!
//! `committed` is what the hub has already drawn against the channel. The
//! signed authorization always carries the cumulative total, so an amount
//! lower than one already submitted is refused before signing.

use std::sync::Arc;

use alloy::primitives::{B256, U256};
use alloy::signers::local::PrivateKeySigner;
use tracing::{debug, info};

use crate::blockchain::client::ChainClient;
use crate::blockchain::signing::sign_payment;
use crate::error::AgentError;
use crate::models::{format_units, total_due, Bill, BillId, DecimalAmount};
use crate::providers::hub::{BillPayment, HubClient};
use crate::state::ChannelReader;

/// What the engine decided to pay in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPlan {
    pub bill_ids: Vec<BillId>,
    pub unpaid: DecimalAmount,
    /// Cumulative token units to authorize.
    pub cumulative: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NothingDue,
    /// Bills are due but no channel is open yet.
    NoChannel,
    Paid {
        bill_ids: Vec<BillId>,
        amount: U256,
        remaining: U256,
    },
}

/// Decide whether `bills` can be paid from the channel.
///
/// Returns `Ok(None)` when nothing is due and
/// [`AgentError::InsufficientBalance`] when the channel cannot cover the
/// whole batch.
pub fn plan_payment(
    bills: &[Bill],
    deposit: U256,
    committed: U256,
    decimals: u8,
) -> Result<Option<PaymentPlan>, AgentError> {
    let unpaid = total_due(bills)
        .ok_or_else(|| AgentError::Decode("bill total overflows".to_string()))?;
    if !unpaid.is_positive() {
        return Ok(None);
    }

    let available = DecimalAmount::from_atomic(deposit.saturating_sub(committed), decimals)
        .ok_or_else(|| AgentError::Decode(format!("channel balance {deposit} out of range")))?;
    if available < unpaid {
        return Err(AgentError::InsufficientBalance {
            needed: unpaid,
            available,
        });
    }

    let cumulative = unpaid
        .to_atomic_ceil(decimals)
        .and_then(|owed| committed.checked_add(owed))
        .ok_or_else(|| AgentError::Decode(format!("payment of {unpaid} out of range")))?;

    Ok(Some(PaymentPlan {
        bill_ids: bills.iter().map(|bill| bill.bill_id.clone()).collect(),
        unpaid,
        cumulative,
    }))
}

pub struct SettlementEngine {
    hub: Arc<dyn HubClient>,
    client: ChainClient,
    channel: ChannelReader,
    signer: PrivateKeySigner,
    last_authorized: Option<(B256, U256)>,
    remaining: Option<U256>,
}

impl SettlementEngine {
    pub fn new(
        hub: Arc<dyn HubClient>,
        client: ChainClient,
        channel: ChannelReader,
        signer: PrivateKeySigner,
    ) -> Self {
        Self {
            hub,
            client,
            channel,
            signer,
            last_authorized: None,
            remaining: None,
        }
    }

    /// Highest cumulative amount submitted successfully.
    pub fn last_authorized(&self) -> Option<U256> {
        self.last_authorized.map(|(_, amount)| amount)
    }

    /// Run one settlement cycle.
    ///
    /// Nothing is recorded unless the hub accepts the payment, so a failed
    /// cycle is simply recomputed next time.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, AgentError> {
        let bills = self.hub.unpaid_bills().await?;
        let unpaid = total_due(&bills)
            .ok_or_else(|| AgentError::Decode("bill total overflows".to_string()))?;
        if !unpaid.is_positive() {
            debug!(bills = bills.len(), "Nothing due");
            return Ok(CycleOutcome::NothingDue);
        }

        let channel = self.channel.snapshot().await;
        let Some(channel_id) = channel.id else {
            return Ok(CycleOutcome::NoChannel);
        };

        let committed = self.hub.channel_sum(channel_id).await?;
        let decimals = self.client.get_token_decimals(channel.token).await?;
        let reserve = self
            .client
            .get_token_balance(self.signer.address(), channel.token)
            .await?;
        info!(
            token_reserve = %format_units(reserve, decimals),
            channel_balance = %self
                .remaining
                .map_or_else(|| "unknown".to_string(), |left| format_units(left, decimals)),
            "Balances"
        );

        let Some(plan) = plan_payment(&bills, channel.deposit, committed, decimals)? else {
            return Ok(CycleOutcome::NothingDue);
        };
        info!(
            channel_id = %channel_id,
            bills = plan.bill_ids.len(),
            unpaid = %plan.unpaid,
            cumulative = %plan.cumulative,
            "Authorizing payment"
        );

        if let Some((last_channel, previous)) = self.last_authorized {
            if last_channel == channel_id && plan.cumulative < previous {
                return Err(AgentError::NonMonotonicAmount {
                    channel_id,
                    previous,
                    attempted: plan.cumulative,
                });
            }
        }

        let authorization = sign_payment(channel_id, plan.cumulative, &self.signer)?;
        let payment = BillPayment {
            bill_ids: plan.bill_ids,
            authorization,
        };
        let receipt = self.hub.pay_bills(&payment).await?;

        self.last_authorized = Some((channel_id, plan.cumulative));
        self.remaining = Some(receipt.remaining);

        info!(
            paid = receipt.paid.len(),
            channel_balance = %format_units(receipt.remaining, decimals),
            "Bills paid"
        );

        Ok(CycleOutcome::Paid {
            bill_ids: receipt.paid,
            amount: plan.cumulative,
            remaining: receipt.remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, Address};
    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    use serde_json::json;

    use crate::blockchain::client::fake::FakeNode;
    use crate::blockchain::signing::signer_from_bytes;
    use crate::providers::hub::fake::FakeHub;
    use crate::state::{Channel, ChannelState};

    const TOKEN: Address = address!("2222222222222222222222222222222222222222");
    const HUB: Address = address!("3333333333333333333333333333333333333333");
    const CHANNEL_ID: B256 =
        b256!("00000000000000000000000000000000000000000000000000000000000abc01");

    fn dec(s: &str) -> DecimalAmount {
        s.parse().unwrap()
    }

    fn bill(id: u64, amount: &str) -> Bill {
        Bill {
            bill_id: BillId::Number(id),
            amount: dec(amount),
        }
    }

    fn signer() -> PrivateKeySigner {
        signer_from_bytes(&[0x33; 32]).unwrap()
    }

    /// Engine over an open channel and a token with 2 decimals.
    fn engine(hub: Arc<FakeHub>, deposit: u64) -> (SettlementEngine, ChannelState) {
        let node = Arc::new(FakeNode::new());
        node.reply("eth_call:0x313ce567", json!("0x02"))
            .reply("eth_call:0x70a08231", json!(format!("0x{:064x}", 2500)));
        let state = ChannelState::new(Channel {
            id: Some(CHANNEL_ID),
            token: TOKEN,
            counterparty: HUB,
            deposit: U256::from(deposit),
        });
        let engine = SettlementEngine::new(hub, ChainClient::new(node), state.reader(), signer());
        (engine, state)
    }

    #[test]
    fn plan_covers_whole_batch() {
        let bills = [bill(1, "3.00"), bill(2, "2.50")];
        let plan = plan_payment(&bills, U256::from(1000), U256::ZERO, 2)
            .unwrap()
            .unwrap();
        assert_eq!(plan.unpaid, dec("5.5"));
        assert_eq!(plan.cumulative, U256::from(550));
        assert_eq!(plan.bill_ids, vec![BillId::Number(1), BillId::Number(2)]);

        // Prior commitments shrink what is available and raise the total.
        let plan = plan_payment(&bills, U256::from(1000), U256::from(300), 2)
            .unwrap()
            .unwrap();
        assert_eq!(plan.cumulative, U256::from(850));
    }

    #[test]
    fn plan_rounds_fractions_of_a_unit_up() {
        let plan = plan_payment(&[bill(1, "0.001")], U256::from(1000), U256::ZERO, 2)
            .unwrap()
            .unwrap();
        assert_eq!(plan.cumulative, U256::from(1));
    }

    #[test]
    fn plan_refuses_partial_payment() {
        let bills = [bill(1, "3.00"), bill(2, "2.50")];
        let err = plan_payment(&bills, U256::from(400), U256::ZERO, 2).unwrap_err();
        match err {
            AgentError::InsufficientBalance { needed, available } => {
                assert_eq!(needed, dec("5.50"));
                assert_eq!(available, dec("4.00"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(plan_payment(&bills, U256::from(600), U256::from(300), 2).is_err());
    }

    #[test]
    fn nothing_due_for_empty_or_zero_bills() {
        assert_eq!(plan_payment(&[], U256::from(1000), U256::ZERO, 2).unwrap(), None);
        assert_eq!(
            plan_payment(&[bill(1, "0")], U256::from(1000), U256::ZERO, 2).unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn pays_bills_with_signed_cumulative_amount() {
        let hub = Arc::new(
            FakeHub::new()
                .with_bills(vec![bill(1, "3.00"), bill(2, "2.50")])
                .with_deposit(1000, 0),
        );
        let (mut engine, _state) = engine(hub.clone(), 1000);

        let outcome = engine.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Paid {
                bill_ids: vec![BillId::Number(1), BillId::Number(2)],
                amount: U256::from(550),
                remaining: U256::from(450),
            }
        );
        assert_eq!(engine.remaining, Some(U256::from(450)));
        assert_eq!(engine.last_authorized(), Some(U256::from(550)));

        let payments = hub.payments();
        assert_eq!(payments.len(), 1);
        let auth = &payments[0].authorization;
        assert_eq!(auth.amount, U256::from(550));
        assert!(auth.v == 27 || auth.v == 28);

        let mut sig = [0u8; 64];
        sig[..32].copy_from_slice(auth.r.as_slice());
        sig[32..].copy_from_slice(auth.s.as_slice());
        let signature = k256::ecdsa::Signature::from_slice(&sig).unwrap();
        let key = signer();
        key.credential()
            .verifying_key()
            .verify_prehash(auth.message_hash.as_slice(), &signature)
            .unwrap();

        assert_eq!(engine.run_cycle().await.unwrap(), CycleOutcome::NothingDue);
    }

    #[tokio::test]
    async fn reads_token_reserve_of_the_paying_wallet() {
        let node = Arc::new(FakeNode::new());
        node.reply("eth_call:0x313ce567", json!("0x02"))
            .reply("eth_call:0x70a08231", json!(format!("0x{:064x}", 2500)));
        let state = ChannelState::new(Channel {
            id: Some(CHANNEL_ID),
            token: TOKEN,
            counterparty: HUB,
            deposit: U256::from(1000),
        });
        let hub = Arc::new(
            FakeHub::new()
                .with_bills(vec![bill(1, "1.00")])
                .with_deposit(1000, 0),
        );
        let mut engine =
            SettlementEngine::new(hub, ChainClient::new(node.clone()), state.reader(), signer());

        engine.run_cycle().await.unwrap();

        let requests = node.requests();
        let (_, params) = requests
            .iter()
            .find(|(_, params)| {
                params[0]["data"]
                    .as_str()
                    .is_some_and(|data| data.starts_with("0x70a08231"))
            })
            .unwrap();
        assert_eq!(params[0]["to"], json!(TOKEN.to_string()));
        let wallet = signer().address().to_string().to_lowercase();
        assert!(params[0]["data"].as_str().unwrap().ends_with(&wallet[2..]));
    }

    #[tokio::test]
    async fn insufficient_balance_submits_nothing() {
        let hub = Arc::new(
            FakeHub::new()
                .with_bills(vec![bill(1, "3.00"), bill(2, "2.50")])
                .with_deposit(400, 0),
        );
        let (mut engine, _state) = engine(hub.clone(), 400);

        let err = engine.run_cycle().await.unwrap_err();
        assert!(err.is_deferred());
        assert!(hub.payments().is_empty());
        assert_eq!(hub.bills.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn no_channel_yet() {
        let hub = Arc::new(FakeHub::new().with_bills(vec![bill(1, "1")]));
        let (mut engine, state) = engine(hub.clone(), 1000);
        let unset = ChannelState::new(Channel::unset(TOKEN, HUB));
        engine.channel = unset.reader();
        drop(state);

        assert_eq!(engine.run_cycle().await.unwrap(), CycleOutcome::NoChannel);
    }

    #[tokio::test]
    async fn failed_submission_is_not_recorded() {
        let hub = Arc::new(
            FakeHub::new()
                .with_bills(vec![bill(1, "1.00")])
                .with_deposit(1000, 0),
        );
        *hub.reject_payments.lock().unwrap() = true;
        let (mut engine, _state) = engine(hub.clone(), 1000);

        let err = engine.run_cycle().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(engine.last_authorized(), None);

        *hub.reject_payments.lock().unwrap() = false;
        let outcome = engine.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Paid { amount, .. } if amount == U256::from(100)));
    }

    #[tokio::test]
    async fn cumulative_amount_never_decreases() {
        let hub = Arc::new(
            FakeHub::new()
                .with_bills(vec![bill(1, "3.00"), bill(2, "2.50")])
                .with_deposit(1000, 0),
        );
        let (mut engine, _state) = engine(hub.clone(), 1000);

        engine.run_cycle().await.unwrap();
        *hub.bills.lock().unwrap() = vec![bill(3, "1.00")];
        engine.run_cycle().await.unwrap();
        assert_eq!(engine.last_authorized(), Some(U256::from(650)));

        // The hub loses track of earlier payments.
        *hub.committed.lock().unwrap() = U256::ZERO;
        *hub.bills.lock().unwrap() = vec![bill(4, "1.00")];
        let err = engine.run_cycle().await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::NonMonotonicAmount { previous, attempted, .. }
                if previous == U256::from(650) && attempted == U256::from(100)
        ));
        assert_eq!(hub.payments().len(), 2);
    }
}
