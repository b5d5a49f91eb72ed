use super::{lock, parse_timestamp, SharedConnection};
use crate::error::PersistenceError;
use crate::watermark::{Watermark, WatermarkStore};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

/// SQLite watermark store, one row per token address
pub struct SqliteWatermarkStore {
    conn: SharedConnection,
}

impl SqliteWatermarkStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn load(&self, token_address: &str) -> Result<Option<Watermark>, PersistenceError> {
        let conn = lock(&self.conn)?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT signature, updated_at FROM watermarks WHERE token_address = ?1",
                params![token_address],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((signature, updated_at)) => Ok(Some(Watermark {
                token_address: token_address.to_string(),
                signature,
                updated_at: parse_timestamp(&updated_at)?,
            })),
            None => Ok(None),
        }
    }

    async fn save(&self, watermark: &Watermark) -> Result<(), PersistenceError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO watermarks (token_address, signature, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(token_address) DO UPDATE SET
                signature = excluded.signature,
                updated_at = excluded.updated_at",
            params![
                watermark.token_address,
                watermark.signature,
                watermark.updated_at.to_rfc3339()
            ],
        )?;

        log::debug!("💾 Saved watermark {} for {}", watermark.signature, watermark.token_address);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        expected: Option<&str>,
        watermark: &Watermark,
    ) -> Result<bool, PersistenceError> {
        let conn = lock(&self.conn)?;
        let changed = match expected {
            None => conn.execute(
                "INSERT INTO watermarks (token_address, signature, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(token_address) DO NOTHING",
                params![
                    watermark.token_address,
                    watermark.signature,
                    watermark.updated_at.to_rfc3339()
                ],
            )?,
            Some(previous) => conn.execute(
                "UPDATE watermarks SET signature = ?2, updated_at = ?3
                 WHERE token_address = ?1 AND signature = ?4",
                params![
                    watermark.token_address,
                    watermark.signature,
                    watermark.updated_at.to_rfc3339(),
                    previous
                ],
            )?,
        };

        Ok(changed == 1)
    }

    async fn clear(&self, token_address: &str) -> Result<(), PersistenceError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "DELETE FROM watermarks WHERE token_address = ?1",
            params![token_address],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_database, open_in_memory};
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_save_and_load_scoped_by_token() {
        let store = SqliteWatermarkStore::new(open_in_memory().unwrap());

        store.save(&Watermark::new("TokenA", "sigA")).await.unwrap();
        store.save(&Watermark::new("TokenB", "sigB")).await.unwrap();
        store.save(&Watermark::new("TokenA", "sigA2")).await.unwrap();

        assert_eq!(store.load("TokenA").await.unwrap().unwrap().signature, "sigA2");
        assert_eq!(store.load("TokenB").await.unwrap().unwrap().signature, "sigB");
        assert!(store.load("TokenC").await.unwrap().is_none());

        store.clear("TokenA").await.unwrap();
        assert!(store.load("TokenA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = SqliteWatermarkStore::new(open_in_memory().unwrap());

        assert!(store.compare_and_swap(None, &Watermark::new("T", "s1")).await.unwrap());
        // Someone already wrote a watermark
        assert!(!store.compare_and_swap(None, &Watermark::new("T", "other")).await.unwrap());

        assert!(store.compare_and_swap(Some("s1"), &Watermark::new("T", "s2")).await.unwrap());
        // Stale expectation loses
        assert!(!store.compare_and_swap(Some("s1"), &Watermark::new("T", "s3")).await.unwrap());

        assert_eq!(store.load("T").await.unwrap().unwrap().signature, "s2");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp = NamedTempFile::new().unwrap();

        {
            let store = SqliteWatermarkStore::new(open_database(temp.path()).unwrap());
            store.save(&Watermark::new("T", "persisted")).await.unwrap();
        }

        let store = SqliteWatermarkStore::new(open_database(temp.path()).unwrap());
        let loaded = store.load("T").await.unwrap().unwrap();
        assert_eq!(loaded.signature, "persisted");
        assert_eq!(loaded.token_address, "T");
    }
}
