//! Solana JSON-RPC client with rate limiting and retries.
//!
//! The only module that knows the RPC wire shape. Everything downstream of
//! the fetcher works on [`crate::stake::TransactionBalances`].

use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
const RATE_LIMIT_MS: u64 = 200;
const MAX_RETRIES: u32 = 5;
const RETRY_BACKOFF_MS: u64 = 500;

#[derive(Clone, Debug)]
pub struct RpcConfig {
    pub url: String,
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            rate_limit_ms: RATE_LIMIT_MS,
            max_retries: MAX_RETRIES,
            retry_backoff_ms: RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {0}: {1}")]
    Http(u16, String),
    #[error("rpc error {0}: {1}")]
    Rpc(i64, String),
    #[error("decode: {0}")]
    Decode(String),
}

/// One entry of a `getSignaturesForAddress` page.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    pub block_time: Option<i64>,
    pub err: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    pub ui_amount: Option<f64>,
    pub decimals: u8,
    pub amount: String,
}

/// One pre/post token-balance record of a parsed transaction.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

impl TokenBalance {
    /// Balance in UI display units; falls back to the raw amount when the
    /// node omits `uiAmount`.
    pub fn ui_amount(&self) -> f64 {
        self.ui_token_amount.ui_amount.unwrap_or_else(|| {
            self.ui_token_amount
                .amount
                .parse::<f64>()
                .map(|raw| raw / 10f64.powi(i32::from(self.ui_token_amount.decimals)))
                .unwrap_or(0.0)
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTransaction {
    pub meta: Option<TransactionMeta>,
    pub block_time: Option<i64>,
}

/// The subset of chain RPC the pipeline depends on. Implemented over HTTP by
/// [`HttpRpcClient`]; test harnesses provide canned data.
#[allow(async_fn_in_trait)]
pub trait ChainRpc {
    /// Current token balance of a token account, in UI units.
    async fn token_account_balance(&self, account: &str) -> Result<f64, RpcError>;
    /// Token accounts of `owner` holding `mint`.
    async fn token_accounts_by_owner(&self, owner: &str, mint: &str)
        -> Result<Vec<String>, RpcError>;
    /// One page of signatures touching `account`, newest first.
    async fn signatures_for_address(
        &self,
        account: &str,
        before: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, RpcError>;
    /// Full parsed transaction, or None when the node no longer has it.
    async fn parsed_transaction(&self, signature: &str)
        -> Result<Option<ParsedTransaction>, RpcError>;
}

/// HTTP JSON-RPC client with rate limiting, retries, and a request counter.
pub struct HttpRpcClient {
    config: RpcConfig,
    client: reqwest::Client,
    last_request: std::sync::Mutex<Option<OffsetDateTime>>,
    request_count: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            config,
            client,
            last_request: std::sync::Mutex::new(None),
            request_count: AtomicU64::new(0),
        })
    }

    async fn rate_limit(&self) {
        let sleep_ms = {
            let last = self.last_request.lock().unwrap();
            let prev = *last;
            drop(last);
            if let Some(prev) = prev {
                let elapsed = (OffsetDateTime::now_utc() - prev).whole_milliseconds();
                let need_i: i128 = self.config.rate_limit_ms as i128;
                if elapsed < need_i {
                    (need_i - elapsed).max(0) as u64
                } else {
                    0
                }
            } else {
                0
            }
        };
        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        *self.last_request.lock().unwrap() = Some(OffsetDateTime::now_utc());
    }

    /// POST one JSON-RPC call, retrying transport and HTTP-status failures
    /// with exponential backoff. RPC-level errors are not retried.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        self.rate_limit().await;
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            let res = self.client.post(&self.config.url).json(&body).send().await;
            match res {
                Ok(r) => {
                    let status = r.status();
                    let text = r.text().await.unwrap_or_default();
                    if !status.is_success() {
                        last_err = Some(RpcError::Http(status.as_u16(), text));
                        if attempt < self.config.max_retries {
                            let ms = self.config.retry_backoff_ms * (1 << attempt);
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                        }
                        continue;
                    }
                    self.request_count.fetch_add(1, Ordering::Relaxed);
                    let value: serde_json::Value =
                        serde_json::from_str(&text).map_err(|e| RpcError::Decode(e.to_string()))?;
                    if let Some(err) = value.get("error") {
                        let code = err
                            .get("code")
                            .and_then(serde_json::Value::as_i64)
                            .unwrap_or(0);
                        let message = err
                            .get("message")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or("unknown")
                            .to_string();
                        return Err(RpcError::Rpc(code, message));
                    }
                    return Ok(value.get("result").cloned().unwrap_or(serde_json::Value::Null));
                }
                Err(e) => {
                    last_err = Some(RpcError::Request(e));
                    if attempt < self.config.max_retries {
                        let ms = self.config.retry_backoff_ms * (1 << attempt);
                        warn!(attempt, ms, method, "retry after transport error");
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(RpcError::Http(0, "unknown".to_string())))
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

impl ChainRpc for HttpRpcClient {
    async fn token_account_balance(&self, account: &str) -> Result<f64, RpcError> {
        let result = self
            .call("getTokenAccountBalance", serde_json::json!([account]))
            .await?;
        if let Some(ui) = result
            .pointer("/value/uiAmount")
            .and_then(serde_json::Value::as_f64)
        {
            return Ok(ui);
        }
        let raw = result
            .pointer("/value/amount")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| RpcError::Decode(format!("no balance value for {account}")))?;
        let decimals = result
            .pointer("/value/decimals")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        Ok(raw / 10f64.powi(decimals as i32))
    }

    async fn token_accounts_by_owner(
        &self,
        owner: &str,
        mint: &str,
    ) -> Result<Vec<String>, RpcError> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                serde_json::json!([owner, { "mint": mint }, { "encoding": "jsonParsed" }]),
            )
            .await?;
        let accounts = result
            .pointer("/value")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(accounts
            .iter()
            .filter_map(|a| a.get("pubkey").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn signatures_for_address(
        &self,
        account: &str,
        before: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, RpcError> {
        let mut opts = serde_json::Map::new();
        opts.insert("limit".to_string(), serde_json::json!(limit));
        if let Some(before) = before {
            opts.insert("before".to_string(), serde_json::json!(before));
        }
        if let Some(until) = until {
            opts.insert("until".to_string(), serde_json::json!(until));
        }
        let result = self
            .call("getSignaturesForAddress", serde_json::json!([account, opts]))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::Decode(format!("signatures for {account}: {e}")))
    }

    async fn parsed_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ParsedTransaction>, RpcError> {
        let result = self
            .call(
                "getTransaction",
                serde_json::json!([
                    signature,
                    { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0 }
                ]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| RpcError::Decode(format!("transaction {signature}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_info_deserializes() {
        let json = r#"[
            {"signature": "sig1", "blockTime": 1700000000, "err": null, "slot": 1},
            {"signature": "sig2", "blockTime": null, "err": {"InstructionError": [0, "Custom"]}}
        ]"#;
        let sigs: Vec<SignatureInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].signature, "sig1");
        assert!(sigs[0].err.is_none());
        assert!(sigs[1].err.is_some());
    }

    #[test]
    fn parsed_transaction_deserializes() {
        let json = r#"{
            "blockTime": 1700000000,
            "meta": {
                "err": null,
                "preTokenBalances": [
                    {"accountIndex": 1, "mint": "MintXYZ", "owner": "WalletA",
                     "uiTokenAmount": {"uiAmount": 1500.0, "decimals": 6, "amount": "1500000000"}}
                ],
                "postTokenBalances": []
            },
            "transaction": {"signatures": ["sig1"]}
        }"#;
        let tx: ParsedTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.block_time, Some(1_700_000_000));
        let meta = tx.meta.unwrap();
        assert_eq!(meta.pre_token_balances.len(), 1);
        assert_eq!(meta.pre_token_balances[0].ui_amount(), 1500.0);
    }

    #[test]
    fn ui_amount_falls_back_to_raw() {
        let b = TokenBalance {
            account_index: 0,
            mint: "m".into(),
            owner: None,
            ui_token_amount: UiTokenAmount {
                ui_amount: None,
                decimals: 6,
                amount: "2500000".into(),
            },
        };
        assert!((b.ui_amount() - 2.5).abs() < 1e-9);
    }
}
