//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by table:
//! - `headers.rs` - Block header store
//! - `watermarks.rs` - Per-chain processing watermark
//! - `positions.rs` - Tracked position records
//! - `ledger.rs` - Ledger entries and their position side effects

mod headers;
mod ledger;
mod positions;
mod watermarks;

pub use positions::PositionRecord;

use crate::domain::{BlockNumber, Chain, Decimal};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

/// What a rollback removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    pub ancestor: BlockNumber,
    pub headers_deleted: u64,
    pub entries_deleted: u64,
    pub positions_recomputed: usize,
}

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    /// Undo everything derived from blocks above `ancestor` on `chain`.
    ///
    /// Runs in a single transaction: headers and ledger entries above the
    /// ancestor are deleted, each affected position's liquidity is recomputed
    /// from its remaining entries (or its base liquidity), and the watermark is
    /// forced down to the ancestor.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is changed in that case.
    pub async fn rollback_to(
        &self,
        chain: &Chain,
        ancestor: BlockNumber,
    ) -> Result<RollbackSummary, sqlx::Error> {
        let height = to_db_height(ancestor);
        let mut tx = self.pool.begin().await?;

        let headers = sqlx::query("DELETE FROM block_headers WHERE chain = ? AND block_number > ?")
            .bind(chain.as_str())
            .bind(height)
            .execute(&mut *tx)
            .await?;

        let affected: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT position_id FROM ledger_entries
            WHERE chain = ? AND block_number > ?
            ORDER BY position_id
            "#,
        )
        .bind(chain.as_str())
        .bind(height)
        .fetch_all(&mut *tx)
        .await?;

        let entries =
            sqlx::query("DELETE FROM ledger_entries WHERE chain = ? AND block_number > ?")
                .bind(chain.as_str())
                .bind(height)
                .execute(&mut *tx)
                .await?;

        for position_id in &affected {
            sqlx::query(
                r#"
                UPDATE positions SET liquidity = COALESCE(
                    (SELECT liquidity_after FROM ledger_entries
                     WHERE position_id = ?
                     ORDER BY block_number DESC, transaction_index DESC, log_index DESC
                     LIMIT 1),
                    base_liquidity
                )
                WHERE id = ?
                "#,
            )
            .bind(position_id)
            .bind(position_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO watermarks (chain, last_processed_height, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(chain) DO UPDATE SET
                last_processed_height = excluded.last_processed_height,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chain.as_str())
        .bind(height)
        .bind(now_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let summary = RollbackSummary {
            ancestor,
            headers_deleted: headers.rows_affected(),
            entries_deleted: entries.rows_affected(),
            positions_recomputed: affected.len(),
        };
        info!(
            chain = %chain,
            ancestor,
            headers_deleted = summary.headers_deleted,
            entries_deleted = summary.entries_deleted,
            positions_recomputed = summary.positions_recomputed,
            "Rolled back chain state"
        );
        Ok(summary)
    }
}

// SQLite integers are signed; heights beyond i64::MAX are not real.
pub(crate) fn to_db_height(height: BlockNumber) -> i64 {
    i64::try_from(height).unwrap_or(i64::MAX)
}

pub(crate) fn from_db_height(value: i64) -> BlockNumber {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Read a canonical decimal string column.
pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Address, BlockHeader, PositionKey};
    use crate::ledger::{LedgerBalances, LedgerEntry};
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn header(chain: &Chain, number: u64, hash: &str) -> BlockHeader {
        BlockHeader {
            chain: chain.clone(),
            number,
            hash: hash.to_string(),
            parent_hash: format!("0xparent{}", number),
            timestamp: 1_700_000_000 + number,
        }
    }

    fn entry(position_id: i64, chain: &Chain, block: u64, before: u64, after: u64) -> LedgerEntry {
        let delta = after - before;
        LedgerEntry {
            id: None,
            position_id,
            chain: chain.clone(),
            event_type: "increase_liquidity".to_string(),
            block_number: block,
            block_timestamp: 1_700_000_000 + block,
            transaction_hash: format!("0xtx{}", block),
            transaction_index: 0,
            log_index: 0,
            liquidity_delta: Decimal::from(delta),
            amount0: Decimal::from(delta),
            amount1: Decimal::zero(),
            recipient: None,
            before: LedgerBalances {
                liquidity: Decimal::from(before),
                cost_basis: Decimal::from(before),
                ..LedgerBalances::default()
            },
            after: LedgerBalances {
                liquidity: Decimal::from(after),
                cost_basis: Decimal::from(after),
                ..LedgerBalances::default()
            },
        }
    }

    #[tokio::test]
    async fn test_rollback_removes_state_above_ancestor() {
        let (repo, _temp) = setup_test_db().await;
        let chain = Chain::new("ethereum");
        let key = PositionKey {
            chain: chain.clone(),
            protocol: "uniswap-v3".to_string(),
            external_id: "7".to_string(),
        };
        let position_id = repo
            .upsert_position(&Address::new("0xowner"), &key, Decimal::from(5u64))
            .await
            .unwrap();

        for n in 48..=50 {
            repo.insert_header(&header(&chain, n, &format!("0xh{}", n)))
                .await
                .unwrap();
        }
        repo.insert_ledger_entry(&entry(position_id, &chain, 48, 5, 10))
            .await
            .unwrap();
        repo.insert_ledger_entry(&entry(position_id, &chain, 50, 10, 30))
            .await
            .unwrap();
        repo.set_watermark(&chain, 50).await.unwrap();

        let summary = repo.rollback_to(&chain, 49).await.unwrap();
        assert_eq!(summary.headers_deleted, 1);
        assert_eq!(summary.entries_deleted, 1);
        assert_eq!(summary.positions_recomputed, 1);

        assert_eq!(repo.get_watermark(&chain).await.unwrap(), Some(49));
        assert!(repo.get_header(&chain, 50).await.unwrap().is_none());
        assert!(repo.get_header(&chain, 49).await.unwrap().is_some());
        assert_eq!(repo.count_ledger_entries_above(&chain, 49).await.unwrap(), 0);

        let position = repo.get_position(position_id).await.unwrap().unwrap();
        assert_eq!(position.liquidity, Decimal::from(10u64));
    }

    #[tokio::test]
    async fn test_rollback_restores_base_liquidity_when_no_entries_remain() {
        let (repo, _temp) = setup_test_db().await;
        let chain = Chain::new("ethereum");
        let key = PositionKey {
            chain: chain.clone(),
            protocol: "uniswap-v3".to_string(),
            external_id: "9".to_string(),
        };
        let position_id = repo
            .upsert_position(&Address::new("0xowner"), &key, Decimal::from(5u64))
            .await
            .unwrap();
        repo.insert_ledger_entry(&entry(position_id, &chain, 60, 5, 25))
            .await
            .unwrap();

        repo.rollback_to(&chain, 59).await.unwrap();

        let position = repo.get_position(position_id).await.unwrap().unwrap();
        assert_eq!(position.liquidity, Decimal::from(5u64));
    }

    #[tokio::test]
    async fn test_rollback_leaves_other_chains_untouched() {
        let (repo, _temp) = setup_test_db().await;
        let eth = Chain::new("ethereum");
        let arb = Chain::new("arbitrum");

        repo.insert_header(&header(&eth, 100, "0xe100")).await.unwrap();
        repo.insert_header(&header(&arb, 100, "0xa100")).await.unwrap();
        repo.set_watermark(&arb, 100).await.unwrap();

        repo.rollback_to(&eth, 90).await.unwrap();

        assert!(repo.get_header(&arb, 100).await.unwrap().is_some());
        assert_eq!(repo.get_watermark(&arb).await.unwrap(), Some(100));
        assert_eq!(repo.get_watermark(&eth).await.unwrap(), Some(90));
    }
}
