use std::sync::Arc;

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::authz::{self, RowLock};
use super::idempotency::{self, CreateOutcome, IdempotencyKey, Scope};
use super::token::generate_reservation_token;
use crate::db::translate;
use crate::error::{AppError, AppResult};
use crate::models::{
    item::non_empty, HolderCredential, PublicStatus, ReservationModel, ReservationStatus,
    ReserverIdentity, RESERVATION_COLUMNS,
};
use crate::notifier::{self, NotificationEvent, Notifier};

/// Reservation state machine: `active` -> `canceled` | `fulfilled`.
///
/// At most one `active` reservation per item is guaranteed by the partial
/// unique index `reservations_one_active_per_item`; a losing insert surfaces
/// as `AlreadyReserved`. Fulfillment only happens through `ItemStore::mark_purchased`.
pub struct ReservationEngine {
    pool: PgPool,
    notifier: Arc<dyn Notifier>,
    idempotency_window_secs: i64,
}

impl ReservationEngine {
    pub fn new(pool: PgPool, notifier: Arc<dyn Notifier>, idempotency_window_secs: i64) -> Self {
        Self {
            pool,
            notifier,
            idempotency_window_secs,
        }
    }

    /// Reserves the item for a registered user or a guest. Guests get the
    /// cancellation token back in `reservation_token`.
    pub async fn create_reservation(
        &self,
        item_id: Uuid,
        identity: ReserverIdentity,
        idempotency_key: Option<&str>,
    ) -> AppResult<ReservationModel> {
        let identity = identity.normalized()?;
        let key = IdempotencyKey::optional(
            Scope::CreateReservation,
            identity.actor_key(),
            idempotency_key,
            identity.user_id(),
        )?;

        let outcome = match self.try_create(item_id, &identity, key.as_ref()).await {
            Ok(outcome) => outcome,
            // The same key may have won the race on the partial index.
            Err(err) => match &key {
                Some(key) if !err.is_retryable() => match self.replay_on_pool(key).await? {
                    Some(reservation) => {
                        CreateOutcome::Replayed((for_item(reservation, item_id)?, String::new()))
                    }
                    None => return Err(err),
                },
                _ => return Err(err),
            },
        };

        let (mut reservation, item_title) = match outcome {
            CreateOutcome::Created(created) => created,
            CreateOutcome::Replayed((mut reservation, _)) => {
                // Replays never hand out the guest cancellation token.
                reservation.reservation_token = None;
                tracing::debug!("CreateReservation replayed: reservation_id={}", reservation.id);
                return Ok(reservation);
            }
        };

        tracing::info!(
            "Reservation created: id={} item_id={} guest={}",
            reservation.id,
            item_id,
            reservation.is_guest()
        );

        let event = NotificationEvent::reservation_created(&reservation, &item_title);
        let delivered = notifier::dispatch(self.notifier.as_ref(), &[event]).await;
        if delivered.first().copied().unwrap_or(false) {
            match mark_notification_sent(&self.pool, reservation.id).await {
                Ok(()) => reservation.notification_sent = true,
                Err(e) => tracing::warn!(
                    "Failed to flag notification for reservation {}: {}",
                    reservation.id,
                    e
                ),
            }
        }

        Ok(reservation)
    }

    async fn try_create(
        &self,
        item_id: Uuid,
        identity: &ReserverIdentity,
        key: Option<&IdempotencyKey>,
    ) -> AppResult<CreateOutcome<(ReservationModel, String)>> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        if let Some(key) = key {
            if let Some(reservation) = self.replay(&mut tx, key).await? {
                let reservation = for_item(reservation, item_id)?;
                return Ok(CreateOutcome::Replayed((reservation, String::new())));
            }
        }

        // FOR SHARE lets reservers proceed together while blocking a concurrent purchase.
        let item = authz::fetch_item(&mut tx, item_id, RowLock::Share)
            .await?
            .filter(|item| !item.is_archived())
            .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;
        if item.is_purchased() {
            return Err(AppError::AlreadyPurchased);
        }

        let (user_id, guest_name, guest_email, token) = match identity {
            ReserverIdentity::User(user_id) => (Some(*user_id), None, None, None),
            ReserverIdentity::Guest { name, email } => (
                None,
                Some(name.as_str()),
                Some(email.as_str()),
                Some(generate_reservation_token()?),
            ),
        };

        let sql = format!(
            "INSERT INTO reservations \
             (id, item_id, reserved_by_user_id, guest_name, guest_email, reservation_token, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            RESERVATION_COLUMNS
        );
        let reservation: ReservationModel = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(item_id)
            .bind(user_id)
            .bind(guest_name)
            .bind(guest_email)
            .bind(token)
            .bind(ReservationStatus::Active.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(translate)?;

        if let Some(key) = key {
            if !idempotency::record(&mut tx, key, reservation.id, self.idempotency_window_secs)
                .await?
            {
                drop(tx);
                return match self.replay_on_pool(key).await? {
                    Some(existing) => Ok(CreateOutcome::Replayed((
                        for_item(existing, item_id)?,
                        String::new(),
                    ))),
                    None => Err(AppError::InvalidInput(
                        "idempotency key was already used".to_string(),
                    )),
                };
            }
        }

        tx.commit().await.map_err(translate)?;

        Ok(CreateOutcome::Created((reservation, item.title)))
    }

    async fn replay(
        &self,
        conn: &mut PgConnection,
        key: &IdempotencyKey,
    ) -> AppResult<Option<ReservationModel>> {
        match idempotency::lookup(conn, key, self.idempotency_window_secs).await? {
            Some(reservation_id) => fetch_reservation(conn, reservation_id).await,
            None => Ok(None),
        }
    }

    async fn replay_on_pool(&self, key: &IdempotencyKey) -> AppResult<Option<ReservationModel>> {
        let mut conn = self.pool.acquire().await.map_err(translate)?;
        self.replay(&mut conn, key).await
    }

    /// Moves the active reservation to `canceled`. The item is immediately reservable again.
    pub async fn cancel_reservation(
        &self,
        item_id: Uuid,
        credential: HolderCredential,
        reason: Option<String>,
    ) -> AppResult<ReservationModel> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        let current = fetch_active(&mut tx, item_id, RowLock::Update)
            .await?
            .ok_or(AppError::ReservationNotFound)?;
        if !current.is_held_by(&credential) {
            return Err(AppError::IdentityMismatch);
        }
        if !current.status.can_transition_to(ReservationStatus::Canceled) {
            return Err(AppError::ReservationNotFound);
        }

        let sql = format!(
            "UPDATE reservations SET status = $2, canceled_at = NOW(), cancel_reason = $3 \
             WHERE id = $1 RETURNING {}",
            RESERVATION_COLUMNS
        );
        let reservation: ReservationModel = sqlx::query_as(&sql)
            .bind(current.id)
            .bind(ReservationStatus::Canceled.as_str())
            .bind(non_empty(reason))
            .fetch_one(&mut *tx)
            .await
            .map_err(translate)?;

        let (item_title,): (String,) = sqlx::query_as("SELECT title FROM items WHERE id = $1")
            .bind(item_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(translate)?;

        tx.commit().await.map_err(translate)?;

        tracing::info!("Reservation canceled: id={} item_id={}", reservation.id, item_id);

        let event = NotificationEvent::reservation_canceled(&reservation, &item_title);
        notifier::dispatch(self.notifier.as_ref(), &[event]).await;

        Ok(reservation)
    }

    /// Public-safe status. Never reveals who holds the reservation.
    pub async fn get_reservation_status(&self, item_id: Uuid) -> AppResult<PublicStatus> {
        let row: Option<(bool, bool)> = sqlx::query_as(
            "SELECT items.purchased_at IS NOT NULL, \
             EXISTS (SELECT 1 FROM reservations r WHERE r.item_id = items.id AND r.status = 'active') \
             FROM items WHERE items.id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(translate)?;

        let (purchased, reserved) =
            row.ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;
        Ok(PublicStatus::from_flags(purchased, reserved))
    }

    /// Full active reservation for the item owner or the holder. The owner does
    /// not get the guest's cancellation token.
    pub async fn get_reservation_details(
        &self,
        item_id: Uuid,
        viewer: HolderCredential,
    ) -> AppResult<Option<ReservationModel>> {
        let mut conn = self.pool.acquire().await.map_err(translate)?;

        let item = authz::fetch_item(&mut conn, item_id, RowLock::None)
            .await?
            .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;
        let active = fetch_active(&mut conn, item_id, RowLock::None).await?;

        if let Some(reservation) = &active {
            if reservation.is_held_by(&viewer) {
                return Ok(active);
            }
        }

        match viewer {
            HolderCredential::User(user_id) if user_id == item.owner_id => {
                Ok(active.map(|mut reservation| {
                    reservation.reservation_token = None;
                    reservation
                }))
            }
            _ => Err(AppError::PermissionDenied(
                "Only the item owner or the reservation holder may view it".to_string(),
            )),
        }
    }

    /// Active reservations held by a registered user, newest first.
    pub async fn list_reservations_by_user(&self, user_id: Uuid) -> AppResult<Vec<ReservationModel>> {
        let sql = format!(
            "SELECT {} FROM reservations \
             WHERE reserved_by_user_id = $1 AND status = 'active' \
             ORDER BY reserved_at DESC",
            RESERVATION_COLUMNS
        );
        sqlx::query_as::<_, ReservationModel>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(translate)
    }
}

/// A replayed reservation must be for the item the caller asked about.
fn for_item(reservation: ReservationModel, item_id: Uuid) -> AppResult<ReservationModel> {
    if reservation.item_id == item_id {
        Ok(reservation)
    } else {
        Err(idempotency::key_reused())
    }
}

async fn fetch_reservation(
    conn: &mut PgConnection,
    reservation_id: Uuid,
) -> AppResult<Option<ReservationModel>> {
    let sql = format!("SELECT {} FROM reservations WHERE id = $1", RESERVATION_COLUMNS);
    sqlx::query_as::<_, ReservationModel>(&sql)
        .bind(reservation_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(translate)
}

pub(crate) async fn fetch_active(
    conn: &mut PgConnection,
    item_id: Uuid,
    lock: RowLock,
) -> AppResult<Option<ReservationModel>> {
    let sql = format!(
        "SELECT {} FROM reservations WHERE item_id = $1 AND status = 'active'{}",
        RESERVATION_COLUMNS,
        lock.clause()
    );
    sqlx::query_as::<_, ReservationModel>(&sql)
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(translate)
}

async fn mark_notification_sent(pool: &PgPool, reservation_id: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE reservations SET notification_sent = TRUE WHERE id = $1")
        .bind(reservation_id)
        .execute(pool)
        .await
        .map_err(translate)?;
    Ok(())
}
