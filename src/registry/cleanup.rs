use std::sync::Arc;

use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::translate;
use crate::error::AppResult;
use crate::models::{ReservationModel, RESERVATION_COLUMNS};
use crate::notifier::{self, NotificationEvent, Notifier};

pub const ACCOUNT_DELETED_REASON: &str = "account_deleted";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub owner_id: Uuid,
    pub items_deleted: u64,
    pub wishlists_deleted: u64,
    pub attachments_deleted: u64,
    pub reservations_deleted: u64,
    /// Reservations that were active on the deleted items.
    pub reservations_invalidated: u64,
    /// Active reservations the deleted user held on other owners' items.
    pub held_reservations_canceled: u64,
}

#[derive(Debug, FromRow)]
struct ReservationWithTitle {
    #[sqlx(flatten)]
    reservation: ReservationModel,
    item_title: String,
}

/// Atomic removal of everything an account owns.
pub struct AccountCleanup {
    pool: PgPool,
    notifier: Arc<dyn Notifier>,
}

impl AccountCleanup {
    pub fn new(pool: PgPool, notifier: Arc<dyn Notifier>) -> Self {
        Self { pool, notifier }
    }

    /// Hard-deletes the owner's items, wishlists, attachments and every
    /// reservation on those items in one transaction. Each reservation that was
    /// active is reported once as `reservation-invalidated` after commit.
    pub async fn cascade_delete_owner(&self, owner_id: Uuid) -> AppResult<CascadeReport> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        // Lock the owner's items first; reservers hold FOR SHARE on them, so no
        // new reservation can commit on these items past this point.
        sqlx::query("SELECT id FROM items WHERE owner_id = $1 FOR UPDATE")
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(translate)?;

        let invalidated_sql = format!(
            "SELECT {}, items.title AS item_title FROM reservations \
             JOIN items ON items.id = reservations.item_id \
             WHERE items.owner_id = $1 AND reservations.status = 'active' \
             FOR UPDATE OF reservations",
            RESERVATION_COLUMNS
        );
        let invalidated: Vec<ReservationWithTitle> = sqlx::query_as(&invalidated_sql)
            .bind(owner_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(translate)?;

        let reservations_deleted = sqlx::query(
            "DELETE FROM reservations \
             WHERE item_id IN (SELECT id FROM items WHERE owner_id = $1)",
        )
        .bind(owner_id)
        .execute(&mut *tx)
        .await
        .map_err(translate)?
        .rows_affected();

        let attachments_deleted = sqlx::query(
            "DELETE FROM wishlist_items \
             WHERE item_id IN (SELECT id FROM items WHERE owner_id = $1) \
             OR wishlist_id IN (SELECT id FROM wishlists WHERE owner_id = $1)",
        )
        .bind(owner_id)
        .execute(&mut *tx)
        .await
        .map_err(translate)?
        .rows_affected();

        let items_deleted = sqlx::query("DELETE FROM items WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(translate)?
            .rows_affected();

        let wishlists_deleted = sqlx::query("DELETE FROM wishlists WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(translate)?
            .rows_affected();

        // Free items on other wishlists that the deleted user had reserved.
        let held_sql = format!(
            "UPDATE reservations SET status = 'canceled', canceled_at = NOW(), cancel_reason = $2 \
             FROM items \
             WHERE items.id = reservations.item_id \
             AND reservations.reserved_by_user_id = $1 AND reservations.status = 'active' \
             RETURNING {}, items.title AS item_title",
            RESERVATION_COLUMNS
        );
        let held: Vec<ReservationWithTitle> = sqlx::query_as(&held_sql)
            .bind(owner_id)
            .bind(ACCOUNT_DELETED_REASON)
            .fetch_all(&mut *tx)
            .await
            .map_err(translate)?;

        sqlx::query("DELETE FROM idempotency_keys WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(translate)?;

        tx.commit().await.map_err(translate)?;

        let report = CascadeReport {
            owner_id,
            items_deleted,
            wishlists_deleted,
            attachments_deleted,
            reservations_deleted,
            reservations_invalidated: invalidated.len() as u64,
            held_reservations_canceled: held.len() as u64,
        };
        tracing::info!("Cascade delete committed: {:?}", report);

        let events: Vec<NotificationEvent> = invalidated
            .iter()
            .map(|r| NotificationEvent::reservation_invalidated(&r.reservation, &r.item_title))
            .chain(
                held.iter()
                    .map(|r| NotificationEvent::reservation_canceled(&r.reservation, &r.item_title)),
            )
            .collect();
        notifier::dispatch(self.notifier.as_ref(), &events).await;

        Ok(report)
    }
}
