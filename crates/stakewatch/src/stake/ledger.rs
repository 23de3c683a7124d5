//! Per-wallet accumulation of classified events before FIFO resolution.

use crate::stake::events::{RawTransferEvent, TransferDirection};
use crate::stake::summary::{ms_from_timestamp, WalletStakeSummary};
use std::collections::HashMap;
use tracing::debug;

/// A wallet's raw deposit and withdrawal events for one run.
///
/// Invariant: `net_amount == sum(deposits) - sum(withdrawals)` at all times.
/// The net is diagnostic only and may legitimately go negative transiently.
#[derive(Clone, Debug, Default)]
pub struct WalletLedger {
    pub wallet: String,
    pub deposits: Vec<RawTransferEvent>,
    pub withdrawals: Vec<RawTransferEvent>,
    pub net_amount: f64,
}

impl WalletLedger {
    fn new(wallet: &str) -> Self {
        Self {
            wallet: wallet.to_string(),
            ..Self::default()
        }
    }
}

/// Fold classified events into one ledger per wallet.
///
/// For incremental runs, `prior` seeds each previously staked wallet with
/// one synthetic deposit per open stake, keeping the stake's original date
/// so lock status survives recomputation. Prior withdrawals are not
/// re-materialized; they are already netted into the surviving amounts,
/// which is what makes repeated incremental runs idempotent.
pub fn build_ledgers(
    events: &[RawTransferEvent],
    prior: Option<&[WalletStakeSummary]>,
) -> HashMap<String, WalletLedger> {
    let mut ledgers: HashMap<String, WalletLedger> = HashMap::new();

    if let Some(prior) = prior {
        for summary in prior.iter().filter(|s| s.total_staked > 0.0) {
            let ledger = ledgers
                .entry(summary.wallet_address.clone())
                .or_insert_with(|| WalletLedger::new(&summary.wallet_address));
            for stake in &summary.stakes {
                ledger.deposits.push(RawTransferEvent {
                    direction: TransferDirection::Deposit,
                    wallet: summary.wallet_address.clone(),
                    amount: stake.amount,
                    timestamp_ms: ms_from_timestamp(stake.stake_date),
                    signature: String::new(),
                });
                ledger.net_amount += stake.amount;
            }
        }
        debug!(wallets = ledgers.len(), "seeded ledgers from prior snapshot");
    }

    let mut ordered: Vec<&RawTransferEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp_ms);
    for event in ordered {
        let ledger = ledgers
            .entry(event.wallet.clone())
            .or_insert_with(|| WalletLedger::new(&event.wallet));
        match event.direction {
            TransferDirection::Deposit => {
                ledger.deposits.push(event.clone());
                ledger.net_amount += event.amount;
            }
            TransferDirection::Withdrawal => {
                ledger.withdrawals.push(event.clone());
                ledger.net_amount -= event.amount;
            }
        }
    }

    ledgers
}
