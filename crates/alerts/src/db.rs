//! SQLite persistence for subscribers and seen tokens.

use crate::registry::SubscriberStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tokenwatch_core::{LedgerIndex, SubscriberId, TokenId};
use tokenwatch_engine::{NoveltyStore, StoreError};
use tracing::warn;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        StoreError(e.to_string())
    }
}

/// Database connection for subscriber and token state.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to SQLite database at the given path.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                chat_id INTEGER PRIMARY KEY,
                subscribed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_tokens (
                issuer TEXT NOT NULL,
                currency TEXT NOT NULL,
                first_ledger INTEGER NOT NULL,
                first_seen_at TEXT NOT NULL,
                PRIMARY KEY (issuer, currency)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_subscriber(&self, id: SubscriberId) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO subscribers (chat_id, subscribed_at) VALUES (?, ?)")
            .bind(id.get())
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns true if a row was deleted.
    pub async fn delete_subscriber(&self, id: SubscriberId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM subscribers WHERE chat_id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_subscribers(&self) -> Result<Vec<SubscriberId>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT chat_id FROM subscribers ORDER BY chat_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(SubscriberId).collect())
    }

    /// Record a token; the first ledger it was seen in is kept.
    pub async fn insert_seen_token(
        &self,
        token: &TokenId,
        ledger_index: LedgerIndex,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO seen_tokens (issuer, currency, first_ledger, first_seen_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(token.issuer.as_str())
        .bind(token.currency.as_str())
        .bind(i64::from(ledger_index))
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All stored tokens. Rows that no longer parse are skipped.
    pub async fn list_seen_tokens(&self) -> Result<Vec<TokenId>, DbError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT issuer, currency FROM seen_tokens ORDER BY first_ledger",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(issuer, currency)| match TokenId::parse(&issuer, &currency) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(issuer = %issuer, currency = %currency, error = %e, "Skipping invalid stored token");
                    None
                }
            })
            .collect())
    }

    pub async fn first_ledger(&self, token: &TokenId) -> Result<Option<LedgerIndex>, DbError> {
        let ledger = sqlx::query_scalar::<_, i64>(
            "SELECT first_ledger FROM seen_tokens WHERE issuer = ? AND currency = ?",
        )
        .bind(token.issuer.as_str())
        .bind(token.currency.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(ledger.and_then(|l| LedgerIndex::try_from(l).ok()))
    }
}

#[async_trait]
impl SubscriberStore for Database {
    async fn load_subscribers(&self) -> Result<Vec<SubscriberId>, StoreError> {
        Ok(self.list_subscribers().await?)
    }

    async fn add_subscriber(&self, id: SubscriberId) -> Result<(), StoreError> {
        Ok(self.insert_subscriber(id).await?)
    }

    async fn remove_subscriber(&self, id: SubscriberId) -> Result<(), StoreError> {
        self.delete_subscriber(id).await?;
        Ok(())
    }
}

#[async_trait]
impl NoveltyStore for Database {
    async fn load_seen(&self) -> Result<Vec<TokenId>, StoreError> {
        Ok(self.list_seen_tokens().await?)
    }

    async fn record_seen(&self, token: &TokenId, ledger_index: LedgerIndex) -> Result<(), StoreError> {
        Ok(self.insert_seen_token(token, ledger_index).await?)
    }
}
