//! Per-chain processing watermark.

use crate::domain::{BlockNumber, Chain};

use super::{from_db_height, now_rfc3339, to_db_height, Repository};

impl Repository {
    /// Highest fully processed height for `chain`, if one was recorded.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_watermark(&self, chain: &Chain) -> Result<Option<BlockNumber>, sqlx::Error> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT last_processed_height FROM watermarks WHERE chain = ?")
                .bind(chain.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.map(from_db_height))
    }

    /// Set the watermark unconditionally (startup and rollback).
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn set_watermark(
        &self,
        chain: &Chain,
        height: BlockNumber,
    ) -> Result<(), sqlx::Error> {
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
        .bind(to_db_height(height))
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move the watermark forward to `height`.
    ///
    /// Returns `false` without writing when `height` is not above the current value.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn advance_watermark(
        &self,
        chain: &Chain,
        height: BlockNumber,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO watermarks (chain, last_processed_height, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(chain) DO UPDATE SET
                last_processed_height = excluded.last_processed_height,
                updated_at = excluded.updated_at
            WHERE excluded.last_processed_height > watermarks.last_processed_height
            "#,
        )
        .bind(chain.as_str())
        .bind(to_db_height(height))
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
