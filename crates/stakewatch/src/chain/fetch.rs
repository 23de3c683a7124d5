//! Custody-account history fetch: backward signature pagination, batched
//! detail fetches, checkpoint capture for incremental runs.

use crate::chain::rpc::{ChainRpc, ParsedTransaction, RpcError, SignatureInfo};
use crate::stake::{OwnerDelta, TransactionBalances};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const PAGE_SIZE: usize = 100;
const BATCH_SIZE: usize = 5;
const BATCH_DELAY_MS: u64 = 200;

#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Signatures per pagination page.
    pub page_size: usize,
    /// Concurrent transaction-detail fetches per batch.
    pub batch_size: usize,
    /// Delay between detail batches.
    pub batch_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            batch_size: BATCH_SIZE,
            batch_delay_ms: BATCH_DELAY_MS,
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
    #[error("fetch cancelled")]
    Cancelled,
}

/// Cooperative cancellation, checked at every page and batch boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Result of one history fetch.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Sorted ascending by block time.
    pub transactions: Vec<TransactionBalances>,
    /// Newest signature of the first page; the checkpoint the next
    /// incremental run resumes from. None when no new transactions exist.
    pub checkpoint: Option<String>,
    /// Degraded-but-not-fatal conditions encountered along the way.
    pub warnings: Vec<String>,
}

/// Fetch all transactions touching `account` newer than `checkpoint` (or the
/// whole history when None) and reduce each to its mint-restricted balance
/// changes.
///
/// Pages walk backward in time via a `before` cursor; the checkpoint is
/// passed as the `until` boundary so only strictly newer transactions come
/// back. The new checkpoint is captured from the very first page, before any
/// further pagination, so concurrent writes during a long fetch cannot shift
/// it. When pagination fails mid-walk a full fetch keeps the pages already
/// collected; an incremental fetch discards them and reports no checkpoint,
/// leaving the prior one in effect.
pub async fn fetch_custody_history<R: ChainRpc>(
    rpc: &R,
    config: &FetchConfig,
    account: &str,
    mint: &str,
    checkpoint: Option<&str>,
    cancel: &CancelToken,
) -> Result<FetchOutcome, FetchError> {
    let mut outcome = FetchOutcome::default();
    let mut signatures: Vec<SignatureInfo> = Vec::new();
    let mut before: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let page = match rpc
            .signatures_for_address(account, before.as_deref(), checkpoint, config.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "signature pagination aborted");
                outcome
                    .warnings
                    .push(format!("signature pagination aborted: {e}"));
                // An incremental run must not advance the checkpoint past
                // the unwalked gap: drop the partial walk so the next run
                // retries from the prior checkpoint. A full run proceeds
                // with partial history and the reconciliation check
                // surfaces the undercount.
                if checkpoint.is_some() {
                    signatures.clear();
                    outcome.checkpoint = None;
                }
                break;
            }
        };
        if outcome.checkpoint.is_none() {
            outcome.checkpoint = page.first().map(|s| s.signature.clone());
        }
        let page_len = page.len();
        if let Some(last) = page.last() {
            before = Some(last.signature.clone());
        }
        signatures.extend(page);
        if page_len < config.page_size {
            break;
        }
    }
    info!(count = signatures.len(), "signature pagination complete");

    let failed_on_chain = signatures.iter().filter(|s| s.err.is_some()).count();
    if failed_on_chain > 0 {
        debug!(count = failed_on_chain, "skipping failed transactions");
    }
    let fetchable: Vec<&SignatureInfo> = signatures.iter().filter(|s| s.err.is_none()).collect();

    for chunk in fetchable.chunks(config.batch_size) {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let fetches = chunk.iter().map(|s| rpc.parsed_transaction(&s.signature));
        for (sig, res) in chunk.iter().zip(join_all(fetches).await) {
            match res {
                Ok(Some(tx)) => outcome
                    .transactions
                    .push(transaction_balances(sig, &tx, mint)),
                Ok(None) => {
                    warn!(signature = %sig.signature, "transaction not found on node");
                    outcome
                        .warnings
                        .push(format!("tx {}: not found on node", sig.signature));
                }
                Err(e) => {
                    warn!(signature = %sig.signature, error = %e, "detail fetch failed after retries");
                    outcome
                        .warnings
                        .push(format!("tx {}: detail fetch failed: {e}", sig.signature));
                }
            }
        }
        if config.batch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.batch_delay_ms)).await;
        }
    }

    // Pagination walks backward, so raw order is descending; classification
    // and FIFO resolution need ascending block time.
    outcome.transactions.sort_by(|a, b| {
        a.block_time_ms
            .cmp(&b.block_time_ms)
            .then_with(|| a.signature.cmp(&b.signature))
    });
    Ok(outcome)
}

/// Reduce one parsed transaction to per-owner balance deltas of the tracked
/// mint.
pub fn transaction_balances(
    sig: &SignatureInfo,
    tx: &ParsedTransaction,
    mint: &str,
) -> TransactionBalances {
    let failed = sig.err.is_some() || tx.meta.as_ref().is_none_or(|m| m.err.is_some());
    let block_time_ms = sig
        .block_time
        .or(tx.block_time)
        .map(|t| t * 1000)
        .unwrap_or(0);

    let mut deltas: BTreeMap<String, f64> = BTreeMap::new();
    if let Some(meta) = tx.meta.as_ref() {
        for b in meta.pre_token_balances.iter().filter(|b| b.mint == mint) {
            if let Some(owner) = &b.owner {
                *deltas.entry(owner.clone()).or_default() -= b.ui_amount();
            }
        }
        for b in meta.post_token_balances.iter().filter(|b| b.mint == mint) {
            if let Some(owner) = &b.owner {
                *deltas.entry(owner.clone()).or_default() += b.ui_amount();
            }
        }
    }
    let changes = deltas
        .into_iter()
        .filter(|(_, delta)| delta.abs() > f64::EPSILON)
        .map(|(owner, delta)| OwnerDelta { owner, delta })
        .collect();

    TransactionBalances {
        signature: sig.signature.clone(),
        block_time_ms,
        failed,
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::rpc::{TokenBalance, TransactionMeta, UiTokenAmount};

    struct PagedRpc {
        /// Newest first, as the chain returns them.
        signatures: Vec<SignatureInfo>,
    }

    fn sig(name: &str, block_time: i64) -> SignatureInfo {
        SignatureInfo {
            signature: name.to_string(),
            block_time: Some(block_time),
            err: None,
        }
    }

    fn balance(mint: &str, owner: &str, amount: f64) -> TokenBalance {
        TokenBalance {
            account_index: 0,
            mint: mint.to_string(),
            owner: Some(owner.to_string()),
            ui_token_amount: UiTokenAmount {
                ui_amount: Some(amount),
                decimals: 6,
                amount: String::new(),
            },
        }
    }

    impl ChainRpc for PagedRpc {
        async fn token_account_balance(&self, _account: &str) -> Result<f64, RpcError> {
            Ok(0.0)
        }

        async fn token_accounts_by_owner(
            &self,
            _owner: &str,
            _mint: &str,
        ) -> Result<Vec<String>, RpcError> {
            Ok(vec![])
        }

        async fn signatures_for_address(
            &self,
            _account: &str,
            before: Option<&str>,
            until: Option<&str>,
            limit: usize,
        ) -> Result<Vec<SignatureInfo>, RpcError> {
            let mut out = Vec::new();
            let mut started = before.is_none();
            for s in &self.signatures {
                if !started {
                    if Some(s.signature.as_str()) == before {
                        started = true;
                    }
                    continue;
                }
                if Some(s.signature.as_str()) == until {
                    break;
                }
                out.push(s.clone());
                if out.len() == limit {
                    break;
                }
            }
            Ok(out)
        }

        async fn parsed_transaction(
            &self,
            signature: &str,
        ) -> Result<Option<ParsedTransaction>, RpcError> {
            let block_time = self
                .signatures
                .iter()
                .find(|s| s.signature == signature)
                .and_then(|s| s.block_time);
            Ok(Some(ParsedTransaction {
                meta: Some(TransactionMeta::default()),
                block_time,
            }))
        }
    }

    #[tokio::test]
    async fn paginates_and_captures_checkpoint_from_first_page() {
        let rpc = PagedRpc {
            signatures: vec![sig("s5", 50), sig("s4", 40), sig("s3", 30), sig("s2", 20), sig("s1", 10)],
        };
        let config = FetchConfig {
            page_size: 2,
            batch_size: 2,
            batch_delay_ms: 0,
        };
        let out = fetch_custody_history(&rpc, &config, "acct", "mint", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(out.checkpoint.as_deref(), Some("s5"));
        assert_eq!(out.transactions.len(), 5);
        // ascending block time
        let times: Vec<i64> = out.transactions.iter().map(|t| t.block_time_ms).collect();
        assert_eq!(times, vec![10_000, 20_000, 30_000, 40_000, 50_000]);
    }

    #[tokio::test]
    async fn until_boundary_stops_at_prior_checkpoint() {
        let rpc = PagedRpc {
            signatures: vec![sig("s5", 50), sig("s4", 40), sig("s3", 30)],
        };
        let config = FetchConfig {
            page_size: 10,
            batch_size: 5,
            batch_delay_ms: 0,
        };
        let out =
            fetch_custody_history(&rpc, &config, "acct", "mint", Some("s3"), &CancelToken::new())
                .await
                .unwrap();
        assert_eq!(out.checkpoint.as_deref(), Some("s5"));
        let sigs: Vec<&str> = out
            .transactions
            .iter()
            .map(|t| t.signature.as_str())
            .collect();
        assert_eq!(sigs, vec!["s4", "s5"]);
    }

    #[tokio::test]
    async fn empty_history_yields_no_checkpoint() {
        let rpc = PagedRpc { signatures: vec![] };
        let out = fetch_custody_history(
            &rpc,
            &FetchConfig::default(),
            "acct",
            "mint",
            None,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert!(out.checkpoint.is_none());
        assert!(out.transactions.is_empty());
    }

    /// Fails signature pagination after the first page.
    struct FlakyRpc {
        inner: PagedRpc,
    }

    impl ChainRpc for FlakyRpc {
        async fn token_account_balance(&self, account: &str) -> Result<f64, RpcError> {
            self.inner.token_account_balance(account).await
        }

        async fn token_accounts_by_owner(
            &self,
            owner: &str,
            mint: &str,
        ) -> Result<Vec<String>, RpcError> {
            self.inner.token_accounts_by_owner(owner, mint).await
        }

        async fn signatures_for_address(
            &self,
            account: &str,
            before: Option<&str>,
            until: Option<&str>,
            limit: usize,
        ) -> Result<Vec<SignatureInfo>, RpcError> {
            if before.is_some() {
                return Err(RpcError::Http(500, "node unavailable".to_string()));
            }
            self.inner
                .signatures_for_address(account, before, until, limit)
                .await
        }

        async fn parsed_transaction(
            &self,
            signature: &str,
        ) -> Result<Option<ParsedTransaction>, RpcError> {
            self.inner.parsed_transaction(signature).await
        }
    }

    fn flaky_five() -> FlakyRpc {
        FlakyRpc {
            inner: PagedRpc {
                signatures: vec![
                    sig("s5", 50),
                    sig("s4", 40),
                    sig("s3", 30),
                    sig("s2", 20),
                    sig("s1", 10),
                ],
            },
        }
    }

    #[tokio::test]
    async fn pagination_failure_on_incremental_keeps_prior_checkpoint() {
        let config = FetchConfig {
            page_size: 2,
            batch_size: 2,
            batch_delay_ms: 0,
        };
        let out = fetch_custody_history(
            &flaky_five(),
            &config,
            "acct",
            "mint",
            Some("s1"),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        // the partial walk is dropped; the caller falls back to "s1"
        assert!(out.checkpoint.is_none());
        assert!(out.transactions.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("pagination aborted"));
    }

    #[tokio::test]
    async fn pagination_failure_on_full_run_keeps_partial_history() {
        let config = FetchConfig {
            page_size: 2,
            batch_size: 2,
            batch_delay_ms: 0,
        };
        let out = fetch_custody_history(
            &flaky_five(),
            &config,
            "acct",
            "mint",
            None,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out.checkpoint.as_deref(), Some("s5"));
        assert_eq!(out.transactions.len(), 2);
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_first_page() {
        let rpc = PagedRpc {
            signatures: vec![sig("s1", 10)],
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let res =
            fetch_custody_history(&rpc, &FetchConfig::default(), "acct", "mint", None, &cancel)
                .await;
        assert!(matches!(res, Err(FetchError::Cancelled)));
    }

    #[test]
    fn balance_changes_restricted_to_mint_and_summed_per_owner() {
        let s = sig("tx1", 100);
        let tx = ParsedTransaction {
            block_time: Some(100),
            meta: Some(TransactionMeta {
                err: None,
                pre_token_balances: vec![
                    balance("mint", "wallet_a", 1000.0),
                    balance("mint", "custody", 50.0),
                    balance("other_mint", "wallet_a", 7.0),
                ],
                post_token_balances: vec![
                    balance("mint", "wallet_a", 400.0),
                    balance("mint", "custody", 650.0),
                    balance("other_mint", "wallet_a", 0.0),
                ],
            }),
        };
        let out = transaction_balances(&s, &tx, "mint");
        assert!(!out.failed);
        assert_eq!(out.block_time_ms, 100_000);
        assert_eq!(out.changes.len(), 2);
        let custody = out.changes.iter().find(|c| c.owner == "custody").unwrap();
        let wallet = out.changes.iter().find(|c| c.owner == "wallet_a").unwrap();
        assert!((custody.delta - 600.0).abs() < 1e-9);
        assert!((wallet.delta + 600.0).abs() < 1e-9);
    }

    #[test]
    fn execution_error_marks_failed() {
        let mut s = sig("tx1", 100);
        s.err = Some(serde_json::json!({"InstructionError": [0, "Custom"]}));
        let tx = ParsedTransaction {
            block_time: Some(100),
            meta: Some(TransactionMeta::default()),
        };
        assert!(transaction_balances(&s, &tx, "mint").failed);
    }
}
