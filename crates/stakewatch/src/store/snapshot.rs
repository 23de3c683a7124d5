//! SQLite snapshot store: one snapshot row plus wallet and stake rows,
//! written in a single transaction.

use crate::stake::{
    ms_from_timestamp, timestamp_from_ms, Stake, StakingSnapshotResult, WalletStakeSummary,
};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Persisted snapshots. The newest row's `last_signature` is the checkpoint
/// an incremental run resumes from, so the whole result set is committed
/// atomically: a crash mid-write must never leave a checkpoint pointing past
/// data that was not actually persisted.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open or create the store at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                contract_address TEXT NOT NULL,
                created_ms INTEGER NOT NULL,
                total_staked REAL NOT NULL,
                total_locked REAL NOT NULL,
                total_unlocked REAL NOT NULL,
                last_signature TEXT,
                is_incremental INTEGER NOT NULL,
                warnings TEXT NOT NULL,
                data_digest TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS wallet_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
                wallet_address TEXT NOT NULL,
                total_staked REAL NOT NULL,
                total_locked REAL NOT NULL,
                total_unlocked REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS stakes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                summary_id INTEGER NOT NULL REFERENCES wallet_summaries(id),
                amount REAL NOT NULL,
                stake_date_ms INTEGER NOT NULL,
                unlock_date_ms INTEGER NOT NULL,
                is_locked INTEGER NOT NULL,
                mint_address TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_summaries_snapshot ON wallet_summaries(snapshot_id);
            CREATE INDEX IF NOT EXISTS idx_stakes_summary ON stakes(summary_id);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist one run's result atomically. Returns the snapshot row id.
    pub fn save_snapshot(&self, result: &StakingSnapshotResult) -> Result<i64, StoreError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO snapshots (contract_address, created_ms, total_staked, total_locked,
                 total_unlocked, last_signature, is_incremental, warnings, data_digest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                result.contract_address,
                ms_from_timestamp(result.timestamp),
                result.total_staked,
                result.total_locked,
                result.total_unlocked,
                result.last_signature,
                result.is_incremental,
                serde_json::to_string(&result.warnings)?,
                result.data_digest,
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();
        for summary in &result.staking_data {
            tx.execute(
                "INSERT INTO wallet_summaries (snapshot_id, wallet_address, total_staked,
                     total_locked, total_unlocked)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    snapshot_id,
                    summary.wallet_address,
                    summary.total_staked,
                    summary.total_locked,
                    summary.total_unlocked,
                ],
            )?;
            let summary_id = tx.last_insert_rowid();
            for stake in &summary.stakes {
                tx.execute(
                    "INSERT INTO stakes (summary_id, amount, stake_date_ms, unlock_date_ms,
                         is_locked, mint_address)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        summary_id,
                        stake.amount,
                        ms_from_timestamp(stake.stake_date),
                        ms_from_timestamp(stake.unlock_date),
                        stake.is_locked,
                        stake.mint_address,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(snapshot_id)
    }

    /// Reassemble the most recent snapshot, or None when the store is empty.
    pub fn load_latest_snapshot(&self) -> Result<Option<StakingSnapshotResult>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let head = conn
            .query_row(
                "SELECT id, contract_address, created_ms, total_staked, total_locked,
                     total_unlocked, last_signature, is_incremental, warnings, data_digest
                 FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, f64>(3)?,
                        r.get::<_, f64>(4)?,
                        r.get::<_, f64>(5)?,
                        r.get::<_, Option<String>>(6)?,
                        r.get::<_, bool>(7)?,
                        r.get::<_, String>(8)?,
                        r.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?;
        let Some((
            snapshot_id,
            contract_address,
            created_ms,
            total_staked,
            total_locked,
            total_unlocked,
            last_signature,
            is_incremental,
            warnings_json,
            data_digest,
        )) = head
        else {
            return Ok(None);
        };

        let mut staking_data = Vec::new();
        let mut summaries_stmt = conn.prepare(
            "SELECT id, wallet_address, total_staked, total_locked, total_unlocked
             FROM wallet_summaries WHERE snapshot_id = ?1
             ORDER BY total_staked DESC, wallet_address",
        )?;
        let summaries: Vec<(i64, String, f64, f64, f64)> = summaries_stmt
            .query_map([snapshot_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })?
            .collect::<Result<_, _>>()?;
        let mut stakes_stmt = conn.prepare(
            "SELECT amount, stake_date_ms, unlock_date_ms, is_locked, mint_address
             FROM stakes WHERE summary_id = ?1 ORDER BY stake_date_ms, id",
        )?;
        for (summary_id, wallet_address, w_staked, w_locked, w_unlocked) in summaries {
            let stakes: Vec<Stake> = stakes_stmt
                .query_map([summary_id], |r| {
                    Ok(Stake {
                        amount: r.get(0)?,
                        stake_date: timestamp_from_ms(r.get(1)?),
                        unlock_date: timestamp_from_ms(r.get(2)?),
                        is_locked: r.get(3)?,
                        mint_address: r.get(4)?,
                    })
                })?
                .collect::<Result<_, _>>()?;
            staking_data.push(WalletStakeSummary {
                wallet_address,
                total_staked: w_staked,
                total_locked: w_locked,
                total_unlocked: w_unlocked,
                stakes,
            });
        }

        Ok(Some(StakingSnapshotResult {
            contract_address,
            timestamp: timestamp_from_ms(created_ms),
            total_staked,
            total_locked,
            total_unlocked,
            last_signature,
            is_incremental,
            staking_data,
            warnings: serde_json::from_str(&warnings_json)?,
            data_digest,
        }))
    }
}
