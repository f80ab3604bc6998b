//! Ledger entry operations.

use crate::domain::{Address, BlockNumber, Chain};
use crate::ledger::{LedgerBalances, LedgerEntry};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decimal_column, from_db_height, now_rfc3339, to_db_height, Repository};

const ENTRY_COLUMNS: &str = r#"
    id, position_id, chain, event_type, block_number, block_timestamp,
    transaction_hash, transaction_index, log_index,
    liquidity_delta, amount0, amount1, recipient,
    liquidity_before, cost_basis_before, realized_pnl_before,
    fees_collected0_before, fees_collected1_before,
    liquidity_after, cost_basis_after, realized_pnl_after,
    fees_collected0_after, fees_collected1_after
"#;

impl Repository {
    /// Whether the position already has an entry for this log.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn ledger_entry_exists(
        &self,
        position_id: i64,
        transaction_hash: &str,
        log_index: u64,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM ledger_entries
            WHERE position_id = ? AND transaction_hash = ? AND log_index = ?
            "#,
        )
        .bind(position_id)
        .bind(transaction_hash.to_lowercase())
        .bind(to_db_height(log_index))
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Latest entry of a position by `(block, transaction index, log index)`.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored decimal is corrupt.
    pub async fn latest_ledger_entry(
        &self,
        position_id: i64,
    ) -> Result<Option<LedgerEntry>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE position_id = ?
            ORDER BY block_number DESC, transaction_index DESC, log_index DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    /// Append an entry and set the position's liquidity to its after-state.
    ///
    /// Both writes share one transaction. Returns `None` when an entry for the
    /// same `(position, transaction, log index)` already exists; nothing is
    /// written in that case.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_ledger_entry(
        &self,
        entry: &LedgerEntry,
    ) -> Result<Option<i64>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                position_id, chain, event_type, block_number, block_timestamp,
                transaction_hash, transaction_index, log_index,
                liquidity_delta, amount0, amount1, recipient,
                liquidity_before, cost_basis_before, realized_pnl_before,
                fees_collected0_before, fees_collected1_before,
                liquidity_after, cost_basis_after, realized_pnl_after,
                fees_collected0_after, fees_collected1_after,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(position_id, transaction_hash, log_index) DO NOTHING
            "#,
        )
        .bind(entry.position_id)
        .bind(entry.chain.as_str())
        .bind(&entry.event_type)
        .bind(to_db_height(entry.block_number))
        .bind(to_db_height(entry.block_timestamp))
        .bind(entry.transaction_hash.to_lowercase())
        .bind(to_db_height(entry.transaction_index))
        .bind(to_db_height(entry.log_index))
        .bind(entry.liquidity_delta.to_canonical_string())
        .bind(entry.amount0.to_canonical_string())
        .bind(entry.amount1.to_canonical_string())
        .bind(entry.recipient.as_ref().map(|r| r.as_str().to_string()))
        .bind(entry.before.liquidity.to_canonical_string())
        .bind(entry.before.cost_basis.to_canonical_string())
        .bind(entry.before.realized_pnl.to_canonical_string())
        .bind(entry.before.fees_collected0.to_canonical_string())
        .bind(entry.before.fees_collected1.to_canonical_string())
        .bind(entry.after.liquidity.to_canonical_string())
        .bind(entry.after.cost_basis.to_canonical_string())
        .bind(entry.after.realized_pnl.to_canonical_string())
        .bind(entry.after.fees_collected0.to_canonical_string())
        .bind(entry.after.fees_collected1.to_canonical_string())
        .bind(now_rfc3339())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        let id = result.last_insert_rowid();

        sqlx::query("UPDATE positions SET liquidity = ? WHERE id = ?")
            .bind(entry.after.liquidity.to_canonical_string())
            .bind(entry.position_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(id))
    }

    /// Every entry of a position in ledger order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored decimal is corrupt.
    pub async fn query_ledger_entries(
        &self,
        position_id: i64,
    ) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE position_id = ?
            ORDER BY block_number ASC, transaction_index ASC, log_index ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(position_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_ledger_entries_above(
        &self,
        chain: &Chain,
        height: BlockNumber,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_entries WHERE chain = ? AND block_number > ?",
        )
        .bind(chain.as_str())
        .bind(to_db_height(height))
        .fetch_one(&self.pool)
        .await
    }
}

fn balances(row: &SqliteRow, suffix: &str) -> Result<LedgerBalances, sqlx::Error> {
    Ok(LedgerBalances {
        liquidity: decimal_column(row, &format!("liquidity_{suffix}"))?,
        cost_basis: decimal_column(row, &format!("cost_basis_{suffix}"))?,
        realized_pnl: decimal_column(row, &format!("realized_pnl_{suffix}"))?,
        fees_collected0: decimal_column(row, &format!("fees_collected0_{suffix}"))?,
        fees_collected1: decimal_column(row, &format!("fees_collected1_{suffix}"))?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry, sqlx::Error> {
    Ok(LedgerEntry {
        id: Some(row.try_get("id")?),
        position_id: row.try_get("position_id")?,
        chain: Chain::new(row.try_get::<String, _>("chain")?),
        event_type: row.try_get("event_type")?,
        block_number: from_db_height(row.try_get("block_number")?),
        block_timestamp: from_db_height(row.try_get("block_timestamp")?),
        transaction_hash: row.try_get("transaction_hash")?,
        transaction_index: from_db_height(row.try_get("transaction_index")?),
        log_index: from_db_height(row.try_get("log_index")?),
        liquidity_delta: decimal_column(row, "liquidity_delta")?,
        amount0: decimal_column(row, "amount0")?,
        amount1: decimal_column(row, "amount1")?,
        recipient: row
            .try_get::<Option<String>, _>("recipient")?
            .map(Address::new),
        before: balances(row, "before")?,
        after: balances(row, "after")?,
    })
}
