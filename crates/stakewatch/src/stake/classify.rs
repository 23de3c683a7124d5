//! Deposit/withdrawal classification from a transaction's balance deltas.

use crate::stake::config::MatchTolerances;
use crate::stake::events::{OwnerDelta, RawTransferEvent, TransactionBalances, TransferDirection};
use tracing::{debug, warn};

/// Classify one transaction's balance changes into zero, one, or two
/// transfer events against the custody owner.
///
/// A custody gain is a deposit and must be matched to a non-custody wallet
/// whose balance decreased by the same amount; a custody loss is a
/// withdrawal matched to a wallet whose balance increased. Matching is
/// tolerance-based to absorb fee-related rounding. A transfer with no
/// counterparty within tolerance emits nothing and is recorded as a warning;
/// the reconciliation check exists to surface the resulting undercount.
pub fn classify_transaction(
    tx: &TransactionBalances,
    custody_owner: &str,
    tolerances: &MatchTolerances,
    warnings: &mut Vec<String>,
) -> Vec<RawTransferEvent> {
    if tx.failed {
        debug!(signature = %tx.signature, "skipping failed transaction");
        return Vec::new();
    }
    let mut events = Vec::new();

    let custody_gain: f64 = tx
        .changes
        .iter()
        .filter(|c| c.owner == custody_owner && c.delta > 0.0)
        .map(|c| c.delta)
        .sum();
    let custody_loss: f64 = tx
        .changes
        .iter()
        .filter(|c| c.owner == custody_owner && c.delta < 0.0)
        .map(|c| -c.delta)
        .sum();

    if custody_gain > 0.0 {
        match find_counterparty(&tx.changes, custody_owner, -custody_gain, tolerances.deposit_abs)
        {
            Some(wallet) => events.push(RawTransferEvent {
                direction: TransferDirection::Deposit,
                wallet,
                amount: custody_gain,
                timestamp_ms: tx.block_time_ms,
                signature: tx.signature.clone(),
            }),
            None => {
                warn!(signature = %tx.signature, amount = custody_gain, "unresolved deposit: no matching counterparty");
                warnings.push(format!(
                    "tx {}: unresolved deposit of {custody_gain}",
                    tx.signature
                ));
            }
        }
    }

    if custody_loss > 0.0 {
        // Withdrawals can be large, so the tolerance scales with the amount.
        let tolerance = tolerances
            .withdrawal_abs
            .max(custody_loss * tolerances.withdrawal_pct / 100.0);
        match find_counterparty(&tx.changes, custody_owner, custody_loss, tolerance) {
            Some(wallet) => events.push(RawTransferEvent {
                direction: TransferDirection::Withdrawal,
                wallet,
                amount: custody_loss,
                timestamp_ms: tx.block_time_ms,
                signature: tx.signature.clone(),
            }),
            None => {
                warn!(signature = %tx.signature, amount = custody_loss, "unresolved withdrawal: no matching counterparty");
                warnings.push(format!(
                    "tx {}: unresolved withdrawal of {custody_loss}",
                    tx.signature
                ));
            }
        }
    }

    events
}

/// Closest non-custody owner whose delta matches `target` within
/// `tolerance`.
fn find_counterparty(
    changes: &[OwnerDelta],
    custody_owner: &str,
    target: f64,
    tolerance: f64,
) -> Option<String> {
    changes
        .iter()
        .filter(|c| c.owner != custody_owner)
        .map(|c| (c, (c.delta - target).abs()))
        .filter(|(_, diff)| *diff < tolerance)
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c.owner.clone())
}
