//! Caller-supplied deduplication keys for the two non-idempotent creates.
//!
//! A key is scoped by operation and actor and stays live for a bounded window.
//! The key row is written in the same transaction as the resource it names, so a
//! retried request either sees the committed resource or creates it itself.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::translate;
use crate::error::{AppError, AppResult};

pub const MAX_KEY_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    CreateItem,
    CreateReservation,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::CreateItem => "create_item",
            Scope::CreateReservation => "create_reservation",
        }
    }
}

/// A validated key bound to its scope and actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey {
    pub scope: Scope,
    pub actor: String,
    pub key: String,
    /// Account the key is purged with on cascade deletion.
    pub owner_id: Option<Uuid>,
}

impl IdempotencyKey {
    pub fn new(
        scope: Scope,
        actor: String,
        key: &str,
        owner_id: Option<Uuid>,
    ) -> AppResult<Self> {
        let key = key.trim();
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(AppError::InvalidInput(format!(
                "idempotency key must be 1..={} characters",
                MAX_KEY_LEN
            )));
        }
        Ok(Self {
            scope,
            actor,
            key: key.to_string(),
            owner_id,
        })
    }

    /// Optional key from a caller; `None` stays `None`.
    pub fn optional(
        scope: Scope,
        actor: String,
        key: Option<&str>,
        owner_id: Option<Uuid>,
    ) -> AppResult<Option<Self>> {
        key.map(|k| Self::new(scope, actor, k, owner_id)).transpose()
    }
}

/// A live key presented with a request other than the one it recorded.
pub fn key_reused() -> AppError {
    AppError::InvalidInput("idempotency key reused for a different request".to_string())
}

/// Result of a create guarded by an idempotency key.
#[derive(Debug)]
pub enum CreateOutcome<T> {
    Created(T),
    Replayed(T),
}

/// Resource id recorded under a live key.
pub async fn lookup(
    conn: &mut PgConnection,
    key: &IdempotencyKey,
    window_secs: i64,
) -> AppResult<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT resource_id FROM idempotency_keys \
         WHERE scope = $1 AND actor = $2 AND key = $3 \
         AND created_at > NOW() - make_interval(secs => $4)",
    )
    .bind(key.scope.as_str())
    .bind(&key.actor)
    .bind(&key.key)
    .bind(window_secs as f64)
    .fetch_optional(&mut *conn)
    .await
    .map_err(translate)?;

    Ok(row.map(|(id,)| id))
}

/// Claims the key for `resource_id`. Expired keys are taken over; a live key
/// held by someone else yields `false` and the caller must roll back.
pub async fn record(
    conn: &mut PgConnection,
    key: &IdempotencyKey,
    resource_id: Uuid,
    window_secs: i64,
) -> AppResult<bool> {
    let rows = sqlx::query(
        "INSERT INTO idempotency_keys (scope, actor, key, owner_id, resource_id) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (scope, actor, key) DO UPDATE \
         SET owner_id = EXCLUDED.owner_id, resource_id = EXCLUDED.resource_id, created_at = NOW() \
         WHERE idempotency_keys.created_at <= NOW() - make_interval(secs => $6)",
    )
    .bind(key.scope.as_str())
    .bind(&key.actor)
    .bind(&key.key)
    .bind(key.owner_id)
    .bind(resource_id)
    .bind(window_secs as f64)
    .execute(&mut *conn)
    .await
    .map_err(translate)?
    .rows_affected();

    Ok(rows == 1)
}

pub async fn purge_expired(pool: &PgPool, window_secs: i64) -> AppResult<u64> {
    let rows = sqlx::query(
        "DELETE FROM idempotency_keys WHERE created_at <= NOW() - make_interval(secs => $1)",
    )
    .bind(window_secs as f64)
    .execute(pool)
    .await
    .map_err(translate)?
    .rows_affected();

    tracing::info!("Purged {} expired idempotency keys", rows);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        let key = IdempotencyKey::new(Scope::CreateItem, "user:1".into(), "  abc  ", None).unwrap();
        assert_eq!(key.key, "abc");

        assert!(IdempotencyKey::new(Scope::CreateItem, "user:1".into(), "   ", None).is_err());
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(IdempotencyKey::new(Scope::CreateItem, "user:1".into(), &long, None).is_err());
    }

    #[test]
    fn test_optional_passes_through_none() {
        let key = IdempotencyKey::optional(Scope::CreateReservation, "guest:a@b.c".into(), None, None);
        assert_eq!(key, Ok(None));
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(Scope::CreateItem.as_str(), "create_item");
        assert_eq!(Scope::CreateReservation.as_str(), "create_reservation");
    }
}
