//! Tracked position records.
//!
//! Rows are written by the import path; the ledger only reads them and keeps
//! `liquidity` in step with the latest entry.

use crate::domain::{Address, Chain, Decimal, PositionKey};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decimal_column, Repository};

/// One local record tracking an on-chain position for one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub id: i64,
    pub owner: Address,
    pub key: PositionKey,
    /// Liquidity before the first ledger entry.
    pub base_liquidity: Decimal,
    pub liquidity: Decimal,
}

impl Repository {
    /// Register a position for an owner and return its id.
    ///
    /// Registering an already known `(owner, key)` is a no-op that returns the existing id.
    ///
    /// # Errors
    /// Returns an error if the insert or lookup fails.
    pub async fn upsert_position(
        &self,
        owner: &Address,
        key: &PositionKey,
        base_liquidity: Decimal,
    ) -> Result<i64, sqlx::Error> {
        let base = base_liquidity.to_canonical_string();
        sqlx::query(
            r#"
            INSERT INTO positions (owner, chain, protocol, external_id, base_liquidity, liquidity)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner, chain, protocol, external_id) DO NOTHING
            "#,
        )
        .bind(owner.as_str())
        .bind(key.chain.as_str())
        .bind(&key.protocol)
        .bind(&key.external_id)
        .bind(&base)
        .bind(&base)
        .execute(&self.pool)
        .await?;

        sqlx::query_scalar(
            r#"
            SELECT id FROM positions
            WHERE owner = ? AND chain = ? AND protocol = ? AND external_id = ?
            "#,
        )
        .bind(owner.as_str())
        .bind(key.chain.as_str())
        .bind(&key.protocol)
        .bind(&key.external_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Every local record sharing `key`, ordered by id.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored decimal is corrupt.
    pub async fn find_positions(
        &self,
        key: &PositionKey,
    ) -> Result<Vec<PositionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, chain, protocol, external_id, base_liquidity, liquidity
            FROM positions
            WHERE chain = ? AND protocol = ? AND external_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(key.chain.as_str())
        .bind(&key.protocol)
        .bind(&key.external_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_position).collect()
    }

    /// # Errors
    /// Returns an error if the query fails or a stored decimal is corrupt.
    pub async fn get_position(&self, id: i64) -> Result<Option<PositionRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, chain, protocol, external_id, base_liquidity, liquidity
            FROM positions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_position).transpose()
    }
}

fn row_to_position(row: &SqliteRow) -> Result<PositionRecord, sqlx::Error> {
    Ok(PositionRecord {
        id: row.try_get("id")?,
        owner: Address::new(row.try_get::<String, _>("owner")?),
        key: PositionKey {
            chain: Chain::new(row.try_get::<String, _>("chain")?),
            protocol: row.try_get("protocol")?,
            external_id: row.try_get("external_id")?,
        },
        base_liquidity: decimal_column(row, "base_liquidity")?,
        liquidity: decimal_column(row, "liquidity")?,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::migrations::init_db;
    use crate::db::Repository;
    use crate::domain::{Address, Chain, Decimal, PositionKey};
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

    fn key(id: &str) -> PositionKey {
        PositionKey {
            chain: Chain::new("ethereum"),
            protocol: "uniswap-v3".to_string(),
            external_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_position_is_idempotent() {
        let (repo, _temp) = setup_test_db().await;
        let owner = Address::new("0xOwner");

        let first = repo
            .upsert_position(&owner, &key("1"), Decimal::from(10u64))
            .await
            .unwrap();
        let second = repo
            .upsert_position(&owner, &key("1"), Decimal::from(99u64))
            .await
            .unwrap();
        assert_eq!(first, second);

        let record = repo.get_position(first).await.unwrap().unwrap();
        assert_eq!(record.owner.as_str(), "0xowner");
        assert_eq!(record.base_liquidity, Decimal::from(10u64));
        assert_eq!(record.liquidity, Decimal::from(10u64));
    }

    #[tokio::test]
    async fn test_find_positions_returns_every_owner() {
        let (repo, _temp) = setup_test_db().await;

        let a = repo
            .upsert_position(&Address::new("0xa"), &key("5"), Decimal::zero())
            .await
            .unwrap();
        let b = repo
            .upsert_position(&Address::new("0xb"), &key("5"), Decimal::zero())
            .await
            .unwrap();
        repo.upsert_position(&Address::new("0xa"), &key("6"), Decimal::zero())
            .await
            .unwrap();

        let found: Vec<i64> = repo
            .find_positions(&key("5"))
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(found, vec![a, b]);
        assert!(repo.find_positions(&key("404")).await.unwrap().is_empty());
        assert!(repo.get_position(9999).await.unwrap().is_none());
    }
}
