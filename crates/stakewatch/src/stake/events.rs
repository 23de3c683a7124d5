//! Transfer events and the classifier's view of a transaction.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Deposit,
    Withdrawal,
}

/// One counterparty-matched balance-change pair extracted from a transaction.
/// Never persisted directly; only resolved stakes are.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawTransferEvent {
    pub direction: TransferDirection,
    pub wallet: String,
    /// Token amount in UI display units.
    pub amount: f64,
    /// Block time, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Transaction signature; empty for synthetic deposits seeded from a
    /// prior snapshot.
    pub signature: String,
}

/// Net change of the tracked mint's balance for one owning wallet within a
/// single transaction (summed over that wallet's token accounts).
#[derive(Clone, Debug, PartialEq)]
pub struct OwnerDelta {
    pub owner: String,
    pub delta: f64,
}

/// Mint-restricted balance changes of one transaction. This is the only view
/// of a transaction the classifier sees; the fetcher builds it from the RPC
/// response so the core never touches wire types.
#[derive(Clone, Debug)]
pub struct TransactionBalances {
    pub signature: String,
    pub block_time_ms: i64,
    pub failed: bool,
    pub changes: Vec<OwnerDelta>,
}
