use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Postgres, Row};

use supportbot_common::traits::store::KeyValueStore;

use crate::Error;

/// [`KeyValueStore`] over the `support_kv` table. Expired rows are invisible
/// to reads and removed by [`PostgresKeyValueStore::purge_expired`].
#[derive(Clone)]
pub struct PostgresKeyValueStore {
    pool: Pool<Postgres>,
}

impl PostgresKeyValueStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM support_kv
            WHERE expires_at IS NOT NULL AND expires_at <= NOW()
            "#,
        )
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Escapes LIKE wildcards so a prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let escaped = prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{}%", escaped)
}

#[async_trait]
impl KeyValueStore for PostgresKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let row = sqlx::query(
            r#"
            SELECT value
            FROM support_kv
            WHERE key = $1
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(r.try_get::<Vec<u8>, _>("value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<(), Error> {
        let expires_at: Option<DateTime<Utc>> =
            ttl_seconds.map(|ttl| Utc::now() + Duration::seconds(ttl as i64));

        sqlx::query(
            r#"
            INSERT INTO support_kv (key, value, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key)
            DO UPDATE SET
               value      = EXCLUDED.value,
               expires_at = EXCLUDED.expires_at,
               updated_at = NOW()
            "#,
        )
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM support_kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT key
            FROM support_kv
            WHERE key LIKE $1 ESCAPE '\'
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
            .bind(like_prefix(prefix))
            .fetch_all(&self.pool)
            .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for r in rows {
            keys.push(r.try_get::<String, _>("key")?);
        }
        Ok(keys)
    }
}
