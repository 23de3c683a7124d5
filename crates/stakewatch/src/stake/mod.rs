//! Stake reconstruction: classification, ledgers, FIFO resolution, lock
//! status, reconciliation.

mod classify;
mod config;
pub(crate) mod events;
mod fifo;
mod ledger;
mod reconcile;
mod summary;

pub use classify::classify_transaction;
pub use config::{MatchTolerances, StakingConfig};
pub use events::{OwnerDelta, RawTransferEvent, TransactionBalances, TransferDirection};
pub use fifo::{resolve_open_deposits, OpenDeposit, AMOUNT_EPSILON};
pub use ledger::{build_ledgers, WalletLedger};
pub use reconcile::{reconcile, ReconciliationReport};
pub use summary::{
    ms_from_timestamp, sort_by_total_staked_desc, stake_from_deposit, summarize_wallet,
    timestamp_from_ms, Stake, StakingSnapshotResult, WalletStakeSummary,
};
