//! The full reconstruction pipeline: fetch, classify, aggregate, resolve,
//! reconcile, persist.

use crate::chain::fetch::{fetch_custody_history, CancelToken, FetchConfig, FetchError};
use crate::chain::rpc::{ChainRpc, RpcError};
use crate::digest::{staking_data_digest, DigestError};
use crate::stake::{
    build_ledgers, classify_transaction, reconcile, resolve_open_deposits,
    sort_by_total_staked_desc, summarize_wallet, StakingConfig, StakingSnapshotResult,
    WalletStakeSummary,
};
use crate::store::{SnapshotStore, StoreError};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("config: {0}")]
    Config(String),
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("digest: {0}")]
    Digest(#[from] DigestError),
    #[error("no token account of the tracked mint owned by {0}")]
    NoCustodyAccount(String),
}

/// Run one full or incremental reconstruction and persist the result.
///
/// Incremental runs resume from the prior snapshot's checkpoint signature
/// and seed wallet ledgers from its resolved stakes; when no prior snapshot
/// exists the run silently falls back to a full one. Fatal conditions
/// (missing config, unresolvable custody account, unreadable custody
/// balance) abort before anything is written, so the previous checkpoint
/// stays valid and the run is safe to retry. Degraded conditions end up in
/// the result's `warnings`.
pub async fn compute_staking_snapshot<R: ChainRpc>(
    rpc: &R,
    store: &SnapshotStore,
    config: &StakingConfig,
    fetch_config: &FetchConfig,
    use_incremental: bool,
    cancel: &CancelToken,
) -> Result<StakingSnapshotResult, PipelineError> {
    if config.custody_address.is_empty() || config.mint_address.is_empty() {
        return Err(PipelineError::Config(
            "custody_address and mint_address must be set".to_string(),
        ));
    }

    let prior = if use_incremental {
        store.load_latest_snapshot()?
    } else {
        None
    };
    let checkpoint = prior.as_ref().and_then(|p| p.last_signature.clone());
    if use_incremental && prior.is_none() {
        info!("no prior snapshot; running full reconstruction");
    }

    let token_accounts = rpc
        .token_accounts_by_owner(&config.custody_address, &config.mint_address)
        .await?;
    let custody_token_account = token_accounts
        .first()
        .cloned()
        .ok_or_else(|| PipelineError::NoCustodyAccount(config.custody_address.clone()))?;
    let onchain_balance = rpc.token_account_balance(&custody_token_account).await?;
    info!(
        custody_token_account,
        onchain_balance, "resolved custody account"
    );

    let fetched = fetch_custody_history(
        rpc,
        fetch_config,
        &custody_token_account,
        &config.mint_address,
        checkpoint.as_deref(),
        cancel,
    )
    .await?;
    let mut warnings = fetched.warnings;

    let mut events = Vec::new();
    for tx in &fetched.transactions {
        events.extend(classify_transaction(
            tx,
            &config.custody_address,
            &config.tolerances,
            &mut warnings,
        ));
    }
    info!(
        transactions = fetched.transactions.len(),
        events = events.len(),
        "classified transfers"
    );

    let seed = prior.as_ref().map(|p| p.staking_data.as_slice());
    let ledgers = build_ledgers(&events, seed);

    let now = OffsetDateTime::now_utc();
    let mut staking_data: Vec<WalletStakeSummary> = ledgers
        .values()
        .filter_map(|ledger| {
            let open = resolve_open_deposits(ledger);
            summarize_wallet(
                &ledger.wallet,
                &open,
                &config.mint_address,
                config.lock_period_days,
                now,
            )
        })
        .collect();
    sort_by_total_staked_desc(&mut staking_data);

    let total_locked: f64 = staking_data.iter().map(|w| w.total_locked).sum();
    let total_unlocked: f64 = staking_data.iter().map(|w| w.total_unlocked).sum();
    let total_staked = total_locked + total_unlocked;

    let report = reconcile(&staking_data, onchain_balance, config.reconcile_threshold_pct);
    if !report.within_threshold {
        warnings.push(format!(
            "reconciliation: reconstructed {:.4} vs custody balance {:.4} ({:.2}% apart)",
            report.calculated_total, report.onchain_total, report.difference_pct
        ));
    }

    // No new transactions means the prior checkpoint stays valid.
    let last_signature = fetched.checkpoint.or(checkpoint);
    let data_digest = staking_data_digest(&staking_data)?;
    let result = StakingSnapshotResult {
        contract_address: config.custody_address.clone(),
        timestamp: now,
        total_staked,
        total_locked,
        total_unlocked,
        last_signature,
        is_incremental: use_incremental && prior.is_some(),
        staking_data,
        warnings,
        data_digest,
    };
    let snapshot_id = store.save_snapshot(&result)?;
    info!(
        snapshot_id,
        wallets = result.staking_data.len(),
        total_staked = result.total_staked,
        warnings = result.warnings.len(),
        "snapshot persisted"
    );
    Ok(result)
}
