//! Database service for persistent enrollment state.
//!
//! Wraps SQLite access via sqlx. Every store borrows the same pool.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tunnelgate_core::credential::TOKEN_SPACE;

/// Rows per insert statement when seeding the word list.
const SEED_CHUNK: usize = 256;

/// Database service wrapping SQLite access.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    ///
    /// Runs migrations and seeds the token word list.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Configuration(format!("Failed to create db directory: {}", e).into())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // WAL mode for better concurrent read performance
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // NORMAL sync balances durability vs speed
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // Single writer serializes enrollment transactions
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    /// Open a private in-memory database.
    ///
    /// The single connection is never recycled, so the data lives as long as
    /// the returned handle.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::migrate!().run(&pool).await?;

        let db = Self { pool };
        let seeded = db.seed_token_words().await?;
        if seeded > 0 {
            tracing::info!(words = seeded, "Seeded token word list");
        }
        Ok(db)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load the BIP-39 English list into `token_words`, identifier = index + 1.
    ///
    /// Idempotent: existing rows are left alone. Returns the number of rows
    /// inserted.
    pub async fn seed_token_words(&self) -> Result<u64, sqlx::Error> {
        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM token_words")
            .fetch_one(&self.pool)
            .await?;
        if existing as usize >= TOKEN_SPACE {
            return Ok(0);
        }

        let words = bip39::Language::English.word_list();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for (chunk_index, chunk) in words.chunks(SEED_CHUNK).enumerate() {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO token_words (token_id, token_text) ");
            builder.push_values(chunk.iter().enumerate(), |mut row, (offset, word)| {
                let token_id = (chunk_index * SEED_CHUNK + offset + 1) as i64;
                row.push_bind(token_id).push_bind(*word);
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let db = Database::open(&db_path).await.unwrap();

        for table in [
            "devices",
            "device_peers",
            "device_endpoints",
            "token_words",
            "enrollment_credentials",
        ] {
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(db.pool())
                .await
                .unwrap();
            assert!(count >= 0);
        }
    }

    #[tokio::test]
    async fn test_word_list_is_seeded_once() {
        let db = Database::open_in_memory().await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM token_words")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 2048);

        assert_eq!(db.seed_token_words().await.unwrap(), 0);

        let (first,): (String,) =
            sqlx::query_as("SELECT token_text FROM token_words WHERE token_id = 1")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(first, "abandon");

        let (last,): (String,) =
            sqlx::query_as("SELECT token_text FROM token_words WHERE token_id = 2048")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(last, "zoo");
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("reopen.db");

        {
            let db = Database::open(&db_path).await.unwrap();
            sqlx::query(
                "INSERT INTO devices (owner_id, name, network_address, enrolled_at) VALUES (1, 'lamp', ?, '2025-01-01T00:00:00Z')",
            )
            .bind(vec![0u8; 16])
            .execute(db.pool())
            .await
            .unwrap();
            db.pool().close().await;
        }

        let db = Database::open(&db_path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
