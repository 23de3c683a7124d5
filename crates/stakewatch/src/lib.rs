//! stakewatch — custody stake reconstruction for a tracked SPL token.
//!
//! Rebuilds each wallet's open stake deposits from the custody account's
//! transfer history, applies withdrawals oldest-first, computes lock status
//! against a fixed lock period, and persists snapshots that later
//! incremental runs resume from.

pub mod chain;
pub mod digest;
pub mod pipeline;
pub mod stake;
pub mod store;

pub use chain::fetch::{fetch_custody_history, CancelToken, FetchConfig, FetchOutcome};
pub use chain::rpc::{ChainRpc, HttpRpcClient, ParsedTransaction, RpcConfig, RpcError, SignatureInfo};
pub use digest::staking_data_digest;
pub use pipeline::{compute_staking_snapshot, PipelineError};
pub use stake::{
    RawTransferEvent, Stake, StakingConfig, StakingSnapshotResult, TransactionBalances,
    WalletStakeSummary,
};
pub use store::SnapshotStore;
