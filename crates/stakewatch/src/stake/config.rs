//! Deployment identifiers and matching thresholds for the tracked token.
//!
//! Load from: env `STAKEWATCH_CONFIG_PATH`, or `./config/stakewatch.json`,
//! or `./stakewatch.json`. Custody and mint addresses have no usable
//! defaults; a run fails fast when they are missing.

use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_LOCK_PERIOD_DAYS: i64 = 90;
const DEFAULT_RECONCILE_THRESHOLD_PCT: f64 = 1.0;

/// Tolerances for matching a custody balance change to its counterparty
/// wallet. Empirically chosen to survive fee-related rounding; the right
/// values depend on the token's fee structure and decimal precision, so they
/// stay configurable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchTolerances {
    /// Absolute tolerance for deposit matching (UI units).
    #[serde(default = "default_deposit_abs")]
    pub deposit_abs: f64,
    /// Absolute floor for withdrawal matching (UI units).
    #[serde(default = "default_withdrawal_abs")]
    pub withdrawal_abs: f64,
    /// Relative tolerance for withdrawal matching, as a percentage of the
    /// withdrawn amount. The effective tolerance is
    /// `max(withdrawal_abs, amount * withdrawal_pct / 100)`.
    #[serde(default = "default_withdrawal_pct")]
    pub withdrawal_pct: f64,
}

fn default_deposit_abs() -> f64 {
    1.0
}

fn default_withdrawal_abs() -> f64 {
    1.0
}

fn default_withdrawal_pct() -> f64 {
    0.1
}

impl Default for MatchTolerances {
    fn default() -> Self {
        Self {
            deposit_abs: default_deposit_abs(),
            withdrawal_abs: default_withdrawal_abs(),
            withdrawal_pct: default_withdrawal_pct(),
        }
    }
}

/// Chain deployment constants plus tunables. The custody address, mint, and
/// lock period are part of the external contract and must match the real
/// deployment to produce correct results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Owner of the custody token account (the staking contract).
    #[serde(default)]
    pub custody_address: String,
    /// The tracked token mint.
    #[serde(default)]
    pub mint_address: String,
    #[serde(default = "default_lock_period_days")]
    pub lock_period_days: i64,
    #[serde(default)]
    pub tolerances: MatchTolerances,
    /// Reconciliation warns when calculated and on-chain totals diverge by
    /// more than this percentage.
    #[serde(default = "default_reconcile_threshold_pct")]
    pub reconcile_threshold_pct: f64,
}

fn default_lock_period_days() -> i64 {
    DEFAULT_LOCK_PERIOD_DAYS
}

fn default_reconcile_threshold_pct() -> f64 {
    DEFAULT_RECONCILE_THRESHOLD_PCT
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            custody_address: String::new(),
            mint_address: String::new(),
            lock_period_days: default_lock_period_days(),
            tolerances: MatchTolerances::default(),
            reconcile_threshold_pct: default_reconcile_threshold_pct(),
        }
    }
}

impl StakingConfig {
    /// Load config from path. Returns default (empty) on error or missing
    /// file.
    pub fn load_from_path(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Load config: env `STAKEWATCH_CONFIG_PATH`, then
    /// `./config/stakewatch.json`, then `./stakewatch.json`.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("STAKEWATCH_CONFIG_PATH") {
            let p = Path::new(&path);
            if p.exists() {
                return Self::load_from_path(p);
            }
        }
        for candidate in [
            Path::new("./config/stakewatch.json"),
            Path::new("./stakewatch.json"),
        ] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Self::default()
    }
}
