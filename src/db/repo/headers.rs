//! Block header store.
//!
//! Holds only headers above the finality boundary; older rows are pruned.

use crate::domain::{BlockHeader, BlockNumber, Chain};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_db_height, to_db_height, Repository};

impl Repository {
    /// Store a header, replacing any existing row at the same height.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_header(&self, header: &BlockHeader) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO block_headers (chain, block_number, hash, parent_hash, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(header.chain.as_str())
        .bind(to_db_height(header.number))
        .bind(header.hash.to_lowercase())
        .bind(header.parent_hash.to_lowercase())
        .bind(to_db_height(header.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_header(
        &self,
        chain: &Chain,
        number: BlockNumber,
    ) -> Result<Option<BlockHeader>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT chain, block_number, hash, parent_hash, timestamp
            FROM block_headers
            WHERE chain = ? AND block_number = ?
            "#,
        )
        .bind(chain.as_str())
        .bind(to_db_height(number))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_header(&r)))
    }

    /// Headers strictly above `boundary`, ascending by height.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_headers_above(
        &self,
        chain: &Chain,
        boundary: BlockNumber,
    ) -> Result<Vec<BlockHeader>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT chain, block_number, hash, parent_hash, timestamp
            FROM block_headers
            WHERE chain = ? AND block_number > ?
            ORDER BY block_number ASC
            "#,
        )
        .bind(chain.as_str())
        .bind(to_db_height(boundary))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_header).collect())
    }

    /// Drop headers at or below the finality boundary.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn prune_headers_at_or_below(
        &self,
        chain: &Chain,
        boundary: BlockNumber,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM block_headers WHERE chain = ? AND block_number <= ?")
            .bind(chain.as_str())
            .bind(to_db_height(boundary))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Wipe every stored header of a chain.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete_all_headers(&self, chain: &Chain) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM block_headers WHERE chain = ?")
            .bind(chain.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn row_to_header(row: &SqliteRow) -> BlockHeader {
    BlockHeader {
        chain: Chain::new(row.get::<String, _>("chain")),
        number: from_db_height(row.get("block_number")),
        hash: row.get("hash"),
        parent_hash: row.get("parent_hash"),
        timestamp: from_db_height(row.get("timestamp")),
    }
}

#[cfg(test)]
mod tests {
    use crate::db::migrations::init_db;
    use crate::db::Repository;
    use crate::domain::{BlockHeader, Chain};
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

    fn header(number: u64, hash: &str) -> BlockHeader {
        BlockHeader {
            chain: Chain::new("ethereum"),
            number,
            hash: hash.to_string(),
            parent_hash: "0x00".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_insert_replaces_same_height() {
        let (repo, _temp) = setup_test_db().await;
        let chain = Chain::new("ethereum");

        repo.insert_header(&header(10, "0xAA")).await.unwrap();
        repo.insert_header(&header(10, "0xBB")).await.unwrap();

        let stored = repo.get_header(&chain, 10).await.unwrap().unwrap();
        assert_eq!(stored.hash, "0xbb");
        assert_eq!(repo.get_headers_above(&chain, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_headers_above_sorted_and_pruned() {
        let (repo, _temp) = setup_test_db().await;
        let chain = Chain::new("ethereum");

        for n in [5, 3, 4, 7, 6] {
            repo.insert_header(&header(n, &format!("0x{}", n)))
                .await
                .unwrap();
        }

        let above: Vec<u64> = repo
            .get_headers_above(&chain, 4)
            .await
            .unwrap()
            .iter()
            .map(|h| h.number)
            .collect();
        assert_eq!(above, vec![5, 6, 7]);

        let pruned = repo.prune_headers_at_or_below(&chain, 5).await.unwrap();
        assert_eq!(pruned, 3);
        assert!(repo.get_header(&chain, 5).await.unwrap().is_none());

        assert_eq!(repo.delete_all_headers(&chain).await.unwrap(), 2);
        assert!(repo.get_headers_above(&chain, 0).await.unwrap().is_empty());
    }
}
