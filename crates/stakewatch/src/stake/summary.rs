//! Lock status, per-wallet rollups, and the top-level snapshot result.

use crate::stake::fifo::OpenDeposit;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// One surviving deposit with its lock window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stake {
    pub amount: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub stake_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub unlock_date: OffsetDateTime,
    pub is_locked: bool,
    pub mint_address: String,
}

/// Per-wallet rollup. `total_staked == total_locked + total_unlocked ==
/// sum(stakes.amount)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletStakeSummary {
    pub wallet_address: String,
    pub total_staked: f64,
    pub total_locked: f64,
    pub total_unlocked: f64,
    pub stakes: Vec<Stake>,
}

/// Output of one pipeline run, persisted wholesale. `last_signature` plus
/// the resolved stakes are all an incremental run needs from its
/// predecessor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakingSnapshotResult {
    pub contract_address: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub total_staked: f64,
    pub total_locked: f64,
    pub total_unlocked: f64,
    pub last_signature: Option<String>,
    pub is_incremental: bool,
    pub staking_data: Vec<WalletStakeSummary>,
    /// Degraded-but-not-fatal conditions from this run (skipped fetches,
    /// unresolved transfers, reconciliation mismatches).
    pub warnings: Vec<String>,
    /// SHA-256 over the normalized `staking_data`, for reproducibility
    /// checks.
    pub data_digest: String,
}

pub fn timestamp_from_ms(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

pub fn ms_from_timestamp(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Derive a stake's lock window from its deposit date. A stake unlocking at
/// exactly `now` counts as unlocked.
pub fn stake_from_deposit(
    deposit: &OpenDeposit,
    mint: &str,
    lock_period_days: i64,
    now: OffsetDateTime,
) -> Stake {
    let stake_date = timestamp_from_ms(deposit.timestamp_ms);
    let unlock_date = stake_date + Duration::days(lock_period_days);
    Stake {
        amount: deposit.amount,
        stake_date,
        unlock_date,
        is_locked: unlock_date > now,
        mint_address: mint.to_string(),
    }
}

/// Roll one wallet's open deposits up into a summary. Returns None when
/// nothing remains staked; such wallets are dropped from results entirely.
pub fn summarize_wallet(
    wallet: &str,
    open: &[OpenDeposit],
    mint: &str,
    lock_period_days: i64,
    now: OffsetDateTime,
) -> Option<WalletStakeSummary> {
    let stakes: Vec<Stake> = open
        .iter()
        .map(|d| stake_from_deposit(d, mint, lock_period_days, now))
        .collect();
    let total_locked: f64 = stakes.iter().filter(|s| s.is_locked).map(|s| s.amount).sum();
    let total_unlocked: f64 = stakes
        .iter()
        .filter(|s| !s.is_locked)
        .map(|s| s.amount)
        .sum();
    let total_staked = total_locked + total_unlocked;
    if total_staked <= 0.0 {
        return None;
    }
    Some(WalletStakeSummary {
        wallet_address: wallet.to_string(),
        total_staked,
        total_locked,
        total_unlocked,
        stakes,
    })
}

/// Largest staker first; wallet address breaks ties deterministically.
pub fn sort_by_total_staked_desc(summaries: &mut [WalletStakeSummary]) {
    summaries.sort_by(|a, b| {
        b.total_staked
            .partial_cmp(&a.total_staked)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.wallet_address.cmp(&b.wallet_address))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    fn deposit(amount: f64, timestamp_ms: i64) -> OpenDeposit {
        OpenDeposit {
            amount,
            timestamp_ms,
            signature: "sig".to_string(),
        }
    }

    #[test]
    fn unlock_date_is_stake_date_plus_lock_period() {
        let now = timestamp_from_ms(100 * DAY_MS);
        let stake = stake_from_deposit(&deposit(10.0, 3 * DAY_MS), "mint", 90, now);
        assert_eq!(stake.unlock_date - stake.stake_date, Duration::days(90));
    }

    #[test]
    fn lock_boundary_is_strict() {
        let now = timestamp_from_ms(1_000 * DAY_MS);
        // staked 90 days and 1 ms ago: unlock passed 1 ms ago, unlocked
        let past = stake_from_deposit(&deposit(10.0, 910 * DAY_MS - 1), "mint", 90, now);
        assert!(!past.is_locked);
        // staked 89 days ago: still locked for another day
        let recent = stake_from_deposit(&deposit(10.0, 911 * DAY_MS), "mint", 90, now);
        assert!(recent.is_locked);
        // unlocking exactly now counts as unlocked
        let exact = stake_from_deposit(&deposit(10.0, 910 * DAY_MS), "mint", 90, now);
        assert!(!exact.is_locked);
    }

    #[test]
    fn totals_partition_by_lock_status() {
        let now = timestamp_from_ms(200 * DAY_MS);
        let summary = summarize_wallet(
            "w",
            &[deposit(100.0, 0), deposit(40.0, 180 * DAY_MS)],
            "mint",
            90,
            now,
        )
        .unwrap();
        assert!((summary.total_unlocked - 100.0).abs() < 1e-9);
        assert!((summary.total_locked - 40.0).abs() < 1e-9);
        assert!((summary.total_staked - 140.0).abs() < 1e-9);
        let stake_sum: f64 = summary.stakes.iter().map(|s| s.amount).sum();
        assert!((summary.total_staked - stake_sum).abs() < 1e-9);
    }

    #[test]
    fn empty_wallet_is_dropped() {
        let now = timestamp_from_ms(0);
        assert!(summarize_wallet("w", &[], "mint", 90, now).is_none());
    }

    #[test]
    fn summaries_sort_descending_by_total() {
        let now = timestamp_from_ms(0);
        let mut summaries = vec![
            summarize_wallet("small", &[deposit(1.0, 0)], "m", 90, now).unwrap(),
            summarize_wallet("big", &[deposit(100.0, 0)], "m", 90, now).unwrap(),
            summarize_wallet("mid", &[deposit(10.0, 0)], "m", 90, now).unwrap(),
        ];
        sort_by_total_staked_desc(&mut summaries);
        let order: Vec<&str> = summaries.iter().map(|s| s.wallet_address.as_str()).collect();
        assert_eq!(order, vec!["big", "mid", "small"]);
    }

    #[test]
    fn timestamp_roundtrip_is_lossless_at_ms() {
        let ms = 1_700_000_123_456;
        assert_eq!(ms_from_timestamp(timestamp_from_ms(ms)), ms);
    }
}
