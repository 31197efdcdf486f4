//! One-time enrollment credentials.
//!
//! A credential is three token identifiers bound to a device and to the file
//! name of its client config. Identifiers stay in the database; callers only
//! see words. Among live credentials each identifier appears at most once per
//! position, so a triple always names exactly one device.

use chrono::Utc;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use sqlx::{SqliteConnection, SqlitePool};
use tunnelgate_core::credential::{normalize_word, TokenId, TokenPosition, TokenTriple, TokenWords};
use tunnelgate_core::DeviceId;

use super::{decode_error, encode_timestamp, is_foreign_key_violation};

/// Errors from issuing, resolving and revoking credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Unknown word, unknown triple, or already revoked.
    #[error("credential not found")]
    NotFound,
    #[error("no free token identifier for {0}")]
    TokenSpaceExhausted(TokenPosition),
    #[error("device {0} already holds a live credential")]
    AlreadyIssued(DeviceId),
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A live credential resolved from its words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub device_id: DeviceId,
    pub config_reference: String,
    pub triple: TokenTriple,
}

/// Persistent storage for enrollment credentials.
#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Issue a credential for `device_id` and return its words.
    ///
    /// Each position is drawn uniformly from the identifiers not live in that
    /// position. Fails with `TokenSpaceExhausted` instead of reusing one.
    pub async fn issue(
        &self,
        conn: &mut SqliteConnection,
        device_id: DeviceId,
        config_reference: &str,
    ) -> Result<TokenWords, CredentialError> {
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT device_id FROM enrollment_credentials WHERE device_id = ?")
                .bind(device_id.get())
                .fetch_optional(&mut *conn)
                .await?;
        if existing.is_some() {
            return Err(CredentialError::AlreadyIssued(device_id));
        }

        let triple = TokenTriple {
            one: pick_free(conn, TokenPosition::One).await?,
            two: pick_free(conn, TokenPosition::Two).await?,
            three: pick_free(conn, TokenPosition::Three).await?,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO enrollment_credentials
                (device_id, token_one, token_two, token_three, config_reference, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(device_id.get())
        .bind(i64::from(triple.one.get()))
        .bind(i64::from(triple.two.get()))
        .bind(i64::from(triple.three.get()))
        .bind(config_reference)
        .bind(encode_timestamp(Utc::now()))
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if is_foreign_key_violation(&e) => {
                return Err(CredentialError::UnknownDevice(device_id))
            }
            Err(e) => return Err(e.into()),
        }

        Ok(TokenWords::new(
            word_for(conn, triple.one).await?,
            word_for(conn, triple.two).await?,
            word_for(conn, triple.three).await?,
        ))
    }

    /// Resolve three words to the live credential they name.
    ///
    /// Does not revoke. Words are matched trimmed and case-insensitively.
    pub async fn redeem(&self, words: &TokenWords) -> Result<Redemption, CredentialError> {
        let mut conn = self.pool.acquire().await?;

        let triple = TokenTriple {
            one: id_for(&mut conn, words.get(TokenPosition::One)).await?,
            two: id_for(&mut conn, words.get(TokenPosition::Two)).await?,
            three: id_for(&mut conn, words.get(TokenPosition::Three)).await?,
        };

        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT device_id, config_reference
            FROM enrollment_credentials
            WHERE token_one = ? AND token_two = ? AND token_three = ?
            "#,
        )
        .bind(i64::from(triple.one.get()))
        .bind(i64::from(triple.two.get()))
        .bind(i64::from(triple.three.get()))
        .fetch_optional(&mut *conn)
        .await?;

        let (device_id, config_reference) = row.ok_or(CredentialError::NotFound)?;
        Ok(Redemption {
            device_id: DeviceId::new(device_id),
            config_reference,
            triple,
        })
    }

    /// Delete the device's credential. Returns whether one existed.
    pub async fn revoke(&self, device_id: DeviceId) -> Result<bool, CredentialError> {
        let result = sqlx::query("DELETE FROM enrollment_credentials WHERE device_id = ?")
            .bind(device_id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete the credential only if it still carries `triple`.
    ///
    /// Zero rows affected means a concurrent redemption already consumed it.
    pub async fn revoke_matching(
        &self,
        conn: &mut SqliteConnection,
        device_id: DeviceId,
        triple: &TokenTriple,
    ) -> Result<(), CredentialError> {
        let result = sqlx::query(
            r#"
            DELETE FROM enrollment_credentials
            WHERE device_id = ? AND token_one = ? AND token_two = ? AND token_three = ?
            "#,
        )
        .bind(device_id.get())
        .bind(i64::from(triple.one.get()))
        .bind(i64::from(triple.two.get()))
        .bind(i64::from(triple.three.get()))
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CredentialError::NotFound);
        }
        Ok(())
    }

    /// Whether the device currently holds a live credential.
    pub async fn is_live(&self, device_id: DeviceId) -> Result<bool, CredentialError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT device_id FROM enrollment_credentials WHERE device_id = ?")
                .bind(device_id.get())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Number of live credentials.
    pub async fn live_count(&self) -> Result<u64, CredentialError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM enrollment_credentials")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

async fn pick_free(
    conn: &mut SqliteConnection,
    position: TokenPosition,
) -> Result<TokenId, CredentialError> {
    // The column name comes from a fixed set, never from input.
    let query = format!(
        "SELECT token_id FROM token_words WHERE token_id NOT IN (SELECT {column} FROM enrollment_credentials)",
        column = position.column()
    );
    let free: Vec<(i64,)> = sqlx::query_as(&query).fetch_all(&mut *conn).await?;

    let (id,) = free
        .choose(&mut OsRng)
        .ok_or(CredentialError::TokenSpaceExhausted(position))?;

    u16::try_from(*id)
        .ok()
        .and_then(TokenId::new)
        .ok_or_else(|| CredentialError::Database(decode_error(InvalidTokenId(*id))))
}

async fn word_for(conn: &mut SqliteConnection, id: TokenId) -> Result<String, CredentialError> {
    let (word,): (String,) = sqlx::query_as("SELECT token_text FROM token_words WHERE token_id = ?")
        .bind(i64::from(id.get()))
        .fetch_one(&mut *conn)
        .await?;
    Ok(word)
}

async fn id_for(conn: &mut SqliteConnection, word: &str) -> Result<TokenId, CredentialError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT token_id FROM token_words WHERE token_text = ?")
            .bind(normalize_word(word))
            .fetch_optional(&mut *conn)
            .await?;

    row.and_then(|(id,)| u16::try_from(id).ok())
        .and_then(TokenId::new)
        .ok_or(CredentialError::NotFound)
}

#[derive(Debug, thiserror::Error)]
#[error("stored token id {0} is out of range")]
struct InvalidTokenId(i64);
