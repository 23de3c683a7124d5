//! FIFO withdrawal matching: the oldest open deposit is consumed first.

use crate::stake::events::{RawTransferEvent, TransferDirection};
use crate::stake::ledger::WalletLedger;
use std::collections::VecDeque;
use tracing::debug;

/// Residual amounts below this are treated as zero (float rounding).
pub const AMOUNT_EPSILON: f64 = 1e-9;

/// A deposit (or remaining fragment thereof) not yet consumed by a later
/// withdrawal.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenDeposit {
    pub amount: f64,
    pub timestamp_ms: i64,
    pub signature: String,
}

/// Replay a wallet's events chronologically and return the surviving open
/// deposits.
///
/// Withdrawals consume the oldest open deposit first. The chain data cannot
/// tell which specific deposit a withdrawal belongs to, so oldest-first is
/// the deterministic convention. A withdrawal larger than all tracked
/// deposits (possible when the earliest deposits predate the fetched
/// history) drains the queue and stops; amounts never go negative.
pub fn resolve_open_deposits(ledger: &WalletLedger) -> Vec<OpenDeposit> {
    let deposited: f64 = ledger.deposits.iter().map(|e| e.amount).sum();
    let withdrawn: f64 = ledger.withdrawals.iter().map(|e| e.amount).sum();
    if deposited - withdrawn <= AMOUNT_EPSILON {
        return Vec::new();
    }

    let mut stream: Vec<&RawTransferEvent> = ledger
        .deposits
        .iter()
        .chain(ledger.withdrawals.iter())
        .collect();
    // Deposits sort ahead of withdrawals at equal timestamps so a
    // same-instant withdrawal can consume the deposit.
    stream.sort_by(|a, b| {
        (a.timestamp_ms, a.direction == TransferDirection::Withdrawal)
            .cmp(&(b.timestamp_ms, b.direction == TransferDirection::Withdrawal))
            .then_with(|| a.signature.cmp(&b.signature))
    });

    let mut active: VecDeque<OpenDeposit> = VecDeque::new();
    for event in stream {
        match event.direction {
            TransferDirection::Deposit => active.push_back(OpenDeposit {
                amount: event.amount,
                timestamp_ms: event.timestamp_ms,
                signature: event.signature.clone(),
            }),
            TransferDirection::Withdrawal => {
                let mut remaining = event.amount;
                while remaining > AMOUNT_EPSILON {
                    let Some(head) = active.front_mut() else {
                        debug!(
                            wallet = %ledger.wallet,
                            excess = remaining,
                            signature = %event.signature,
                            "withdrawal exceeds tracked deposits"
                        );
                        break;
                    };
                    if head.amount > remaining + AMOUNT_EPSILON {
                        head.amount -= remaining;
                        remaining = 0.0;
                    } else {
                        remaining -= head.amount;
                        active.pop_front();
                    }
                }
            }
        }
    }

    active
        .into_iter()
        .filter(|d| d.amount > AMOUNT_EPSILON)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(deposits: Vec<(f64, i64)>, withdrawals: Vec<(f64, i64)>) -> WalletLedger {
        let mk = |direction, pairs: Vec<(f64, i64)>| {
            pairs
                .into_iter()
                .map(|(amount, timestamp_ms)| RawTransferEvent {
                    direction,
                    wallet: "w".to_string(),
                    amount,
                    timestamp_ms,
                    signature: format!("sig-{timestamp_ms}"),
                })
                .collect::<Vec<_>>()
        };
        let deposits = mk(TransferDirection::Deposit, deposits);
        let withdrawals = mk(TransferDirection::Withdrawal, withdrawals);
        let net: f64 = deposits.iter().map(|e| e.amount).sum::<f64>()
            - withdrawals.iter().map(|e| e.amount).sum::<f64>();
        WalletLedger {
            wallet: "w".to_string(),
            deposits,
            withdrawals,
            net_amount: net,
        }
    }

    #[test]
    fn withdrawal_consumes_oldest_deposit_first() {
        // D1(t=0, 100), D2(t=1, 50), W(t=2, 120): all of D1 and 20 of D2 are
        // consumed, leaving 30 with D2's date.
        let open = resolve_open_deposits(&ledger(vec![(100.0, 0), (50.0, 1)], vec![(120.0, 2)]));
        assert_eq!(open.len(), 1);
        assert!((open[0].amount - 30.0).abs() < 1e-9);
        assert_eq!(open[0].timestamp_ms, 1);
    }

    #[test]
    fn full_withdrawal_drains_exactly() {
        let open = resolve_open_deposits(&ledger(vec![(100.0, 0)], vec![(100.0, 5)]));
        assert!(open.is_empty());
    }

    #[test]
    fn over_withdrawal_stops_at_zero() {
        let open = resolve_open_deposits(&ledger(vec![(100.0, 0)], vec![(500.0, 5)]));
        assert!(open.is_empty());
    }

    #[test]
    fn negative_net_short_circuits() {
        let open = resolve_open_deposits(&ledger(vec![(10.0, 9)], vec![(100.0, 5)]));
        assert!(open.is_empty());
    }

    #[test]
    fn unconsumed_deposits_survive_untouched() {
        let open = resolve_open_deposits(&ledger(
            vec![(100.0, 0), (50.0, 1), (25.0, 4)],
            vec![(100.0, 2)],
        ));
        assert_eq!(open.len(), 2);
        assert!((open[0].amount - 50.0).abs() < 1e-9);
        assert_eq!(open[0].timestamp_ms, 1);
        assert!((open[1].amount - 25.0).abs() < 1e-9);
    }

    #[test]
    fn conservation_holds() {
        let l = ledger(vec![(100.0, 0), (40.0, 2), (60.0, 4)], vec![(75.0, 3)]);
        let open = resolve_open_deposits(&l);
        let surviving: f64 = open.iter().map(|d| d.amount).sum();
        assert!((surviving - 125.0).abs() < 1e-9);
        assert!(surviving <= 200.0);
    }

    #[test]
    fn withdrawal_order_is_chronological_not_input_order() {
        // Withdrawal listed before the deposits but timestamped after the
        // first one: only D1 should be consumed.
        let open = resolve_open_deposits(&ledger(vec![(50.0, 0), (50.0, 10)], vec![(50.0, 5)]));
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].timestamp_ms, 10);
    }
}
