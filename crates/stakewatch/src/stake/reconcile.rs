//! Balance reconciliation against the custody account.

use crate::stake::summary::WalletStakeSummary;
use tracing::{debug, warn};

/// Outcome of comparing reconstructed totals to the custody balance.
/// Diagnostic only; nothing downstream is scaled or corrected from it.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconciliationReport {
    pub calculated_total: f64,
    pub onchain_total: f64,
    pub difference_pct: f64,
    pub within_threshold: bool,
}

/// Compare the sum of reconstructed wallet totals to the custody account's
/// authoritative balance. A material mismatch is surfaced, never corrected:
/// silently rescaling would mask real classification bugs.
pub fn reconcile(
    staking_data: &[WalletStakeSummary],
    onchain_total: f64,
    threshold_pct: f64,
) -> ReconciliationReport {
    let calculated_total: f64 = staking_data.iter().map(|w| w.total_staked).sum();
    let difference_pct = if onchain_total.abs() > f64::EPSILON {
        (calculated_total - onchain_total).abs() / onchain_total * 100.0
    } else if calculated_total.abs() > f64::EPSILON {
        100.0
    } else {
        0.0
    };
    let within_threshold = difference_pct <= threshold_pct;
    if within_threshold {
        debug!(calculated_total, onchain_total, difference_pct, "reconciliation ok");
    } else {
        warn!(
            calculated_total,
            onchain_total,
            difference_pct,
            "reconstructed total deviates from custody balance"
        );
    }
    ReconciliationReport {
        calculated_total,
        onchain_total,
        difference_pct,
        within_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(wallet: &str, total: f64) -> WalletStakeSummary {
        WalletStakeSummary {
            wallet_address: wallet.to_string(),
            total_staked: total,
            total_locked: total,
            total_unlocked: 0.0,
            stakes: vec![],
        }
    }

    #[test]
    fn matching_totals_are_within_threshold() {
        let data = vec![summary("a", 600.0), summary("b", 400.0)];
        let report = reconcile(&data, 1_000.0, 1.0);
        assert!(report.within_threshold);
        assert!((report.calculated_total - 1_000.0).abs() < 1e-9);
        assert!(report.difference_pct < 1e-9);
    }

    #[test]
    fn small_drift_stays_within_threshold() {
        let data = vec![summary("a", 995.0)];
        assert!(reconcile(&data, 1_000.0, 1.0).within_threshold);
    }

    #[test]
    fn material_mismatch_is_flagged() {
        let data = vec![summary("a", 800.0)];
        let report = reconcile(&data, 1_000.0, 1.0);
        assert!(!report.within_threshold);
        assert!((report.difference_pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn zero_onchain_balance_with_stakes_is_flagged() {
        let data = vec![summary("a", 10.0)];
        let report = reconcile(&data, 0.0, 1.0);
        assert!(!report.within_threshold);
    }

    #[test]
    fn empty_both_sides_is_clean() {
        let report = reconcile(&[], 0.0, 1.0);
        assert!(report.within_threshold);
        assert_eq!(report.difference_pct, 0.0);
    }
}
