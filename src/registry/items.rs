use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::attachments::{insert_attachment, UNATTACHED_CONDITION};
use super::authz::{self, RowLock};
use super::idempotency::{self, CreateOutcome, IdempotencyKey, Scope};
use super::reservations::fetch_active;
use crate::db::translate;
use crate::error::{AppError, AppResult};
use crate::models::{
    AttachedItem, ItemAttributes, ItemListFilter, ItemModel, Page, PageRequest, ReservationModel,
    ReservationStatus, ITEM_COLUMNS, RESERVATION_COLUMNS,
};
use crate::notifier::{self, NotificationEvent, Notifier};

/// Item lifecycle: creation, edits, soft delete and purchase finalization.
pub struct ItemStore {
    pool: PgPool,
    notifier: Arc<dyn Notifier>,
    idempotency_window_secs: i64,
}

impl ItemStore {
    pub fn new(pool: PgPool, notifier: Arc<dyn Notifier>, idempotency_window_secs: i64) -> Self {
        Self {
            pool,
            notifier,
            idempotency_window_secs,
        }
    }

    fn idempotency_key(owner_id: Uuid, key: Option<&str>) -> AppResult<Option<IdempotencyKey>> {
        IdempotencyKey::optional(
            Scope::CreateItem,
            format!("user:{}", owner_id),
            key,
            Some(owner_id),
        )
    }

    pub async fn create_item(
        &self,
        owner_id: Uuid,
        attrs: ItemAttributes,
        idempotency_key: Option<&str>,
    ) -> AppResult<ItemModel> {
        let attrs = attrs.normalized()?;
        let key = Self::idempotency_key(owner_id, idempotency_key)?;

        let mut tx = self.pool.begin().await.map_err(translate)?;

        if let Some(key) = &key {
            if let Some(item) = self.replay(&mut tx, key).await? {
                tracing::debug!("CreateItem replayed: key={} item_id={}", key.key, item.id);
                return Ok(item);
            }
        }

        let item = insert_item(&mut tx, owner_id, &attrs).await?;

        if let Some(key) = &key {
            if !idempotency::record(&mut tx, key, item.id, self.idempotency_window_secs).await? {
                drop(tx);
                return self.replay_claimed(key).await;
            }
        }

        tx.commit().await.map_err(translate)?;

        tracing::info!("Item created: id={} owner_id={}", item.id, owner_id);
        Ok(item)
    }

    /// Creates the item and attaches it to `wishlist_id` in one transaction.
    pub async fn create_item_in_wishlist(
        &self,
        wishlist_id: Uuid,
        owner_id: Uuid,
        attrs: ItemAttributes,
        idempotency_key: Option<&str>,
    ) -> AppResult<AttachedItem> {
        let attrs = attrs.normalized()?;
        let key = Self::idempotency_key(owner_id, idempotency_key)?;

        match self
            .try_create_in_wishlist(wishlist_id, owner_id, &attrs, key.as_ref())
            .await?
        {
            CreateOutcome::Created(attached) => {
                tracing::info!(
                    "Item created in wishlist: id={} wishlist_id={} owner_id={}",
                    attached.item.id,
                    wishlist_id,
                    owner_id
                );
                Ok(attached)
            }
            CreateOutcome::Replayed(attached) => Ok(attached),
        }
    }

    async fn try_create_in_wishlist(
        &self,
        wishlist_id: Uuid,
        owner_id: Uuid,
        attrs: &ItemAttributes,
        key: Option<&IdempotencyKey>,
    ) -> AppResult<CreateOutcome<AttachedItem>> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        authz::owned_wishlist(&mut tx, wishlist_id, owner_id, RowLock::Share).await?;

        if let Some(key) = key {
            if let Some(item) = self.replay(&mut tx, key).await? {
                let added_at = replayed_added_at(&mut tx, wishlist_id, item.id).await?;
                return Ok(CreateOutcome::Replayed(AttachedItem { item, added_at }));
            }
        }

        let item = insert_item(&mut tx, owner_id, attrs).await?;
        let attachment = insert_attachment(&mut tx, wishlist_id, item.id).await?;

        if let Some(key) = key {
            if !idempotency::record(&mut tx, key, item.id, self.idempotency_window_secs).await? {
                drop(tx);
                let item = self.replay_claimed(key).await?;
                return self
                    .attached_view(wishlist_id, item)
                    .await
                    .map(CreateOutcome::Replayed);
            }
        }

        tx.commit().await.map_err(translate)?;

        Ok(CreateOutcome::Created(AttachedItem {
            item,
            added_at: attachment.added_at,
        }))
    }

    async fn attached_view(&self, wishlist_id: Uuid, item: ItemModel) -> AppResult<AttachedItem> {
        let mut conn = self.pool.acquire().await.map_err(translate)?;
        let added_at = replayed_added_at(&mut conn, wishlist_id, item.id).await?;
        Ok(AttachedItem { item, added_at })
    }

    async fn replay(
        &self,
        conn: &mut PgConnection,
        key: &IdempotencyKey,
    ) -> AppResult<Option<ItemModel>> {
        match idempotency::lookup(conn, key, self.idempotency_window_secs).await? {
            Some(item_id) => authz::fetch_item(conn, item_id, RowLock::None).await,
            None => Ok(None),
        }
    }

    /// A concurrent request with the same key won; hand back what it created.
    async fn replay_claimed(&self, key: &IdempotencyKey) -> AppResult<ItemModel> {
        let mut conn = self.pool.acquire().await.map_err(translate)?;
        self.replay(&mut conn, key).await?.ok_or_else(|| {
            AppError::InvalidInput("idempotency key was already used".to_string())
        })
    }

    pub async fn get_item(&self, item_id: Uuid, actor: Uuid) -> AppResult<ItemModel> {
        let mut conn = self.pool.acquire().await.map_err(translate)?;
        authz::owned_item(&mut conn, item_id, actor, RowLock::None).await
    }

    pub async fn update_item(
        &self,
        item_id: Uuid,
        actor: Uuid,
        attrs: ItemAttributes,
    ) -> AppResult<ItemModel> {
        let attrs = attrs.normalized()?;
        let mut tx = self.pool.begin().await.map_err(translate)?;

        authz::owned_item(&mut tx, item_id, actor, RowLock::Update).await?;

        let sql = format!(
            "UPDATE items SET title = $1, description = $2, link = $3, image_url = $4, \
             price = $5, priority = $6, notes = $7, position = $8, updated_at = NOW() \
             WHERE id = $9 RETURNING {}",
            ITEM_COLUMNS
        );
        let item: ItemModel = sqlx::query_as(&sql)
            .bind(&attrs.title)
            .bind(&attrs.description)
            .bind(&attrs.link)
            .bind(&attrs.image_url)
            .bind(attrs.price)
            .bind(attrs.priority)
            .bind(&attrs.notes)
            .bind(attrs.position)
            .bind(item_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(translate)?;

        tx.commit().await.map_err(translate)?;

        tracing::info!("Item updated: id={}", item_id);
        Ok(item)
    }

    /// Soft delete. Archiving an archived item is a no-op that keeps the first stamp.
    pub async fn archive_item(&self, item_id: Uuid, actor: Uuid) -> AppResult<ItemModel> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        let item = authz::owned_item(&mut tx, item_id, actor, RowLock::Update).await?;
        if item.is_archived() {
            tracing::debug!("ArchiveItem no-op: id={} already archived", item_id);
            return Ok(item);
        }

        let item = set_archived(&mut tx, item_id, true).await?;
        tx.commit().await.map_err(translate)?;

        tracing::info!("Item archived: id={}", item_id);
        Ok(item)
    }

    /// Undoes `archive_item`. Restoring an active item is a no-op.
    pub async fn restore_item(&self, item_id: Uuid, actor: Uuid) -> AppResult<ItemModel> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        let item = authz::owned_item(&mut tx, item_id, actor, RowLock::Update).await?;
        if !item.is_archived() {
            return Ok(item);
        }

        let item = set_archived(&mut tx, item_id, false).await?;
        tx.commit().await.map_err(translate)?;

        tracing::info!("Item restored: id={}", item_id);
        Ok(item)
    }

    pub async fn list_items_by_owner(
        &self,
        owner_id: Uuid,
        filter: &ItemListFilter,
    ) -> AppResult<Page<ItemModel>> {
        let request = PageRequest::new(filter.page, filter.limit);

        let mut conditions = vec!["items.owner_id = $1".to_string()];
        if !filter.include_archived {
            conditions.push("items.archived_at IS NULL".to_string());
        }
        if filter.unattached_only {
            conditions.push(UNATTACHED_CONDITION.to_string());
        }
        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_sql = format!("SELECT COUNT(*) FROM items {}", where_clause);
        let (total,): (i64,) = sqlx::query_as(&count_sql)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(translate)?;

        let sql = format!(
            "SELECT {} FROM items {} ORDER BY {} {}, items.id ASC LIMIT $2 OFFSET $3",
            ITEM_COLUMNS,
            where_clause,
            filter.sort.column(),
            filter.order.sql()
        );
        let items: Vec<ItemModel> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(i64::from(request.limit))
            .bind(request.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(translate)?;

        Ok(Page::new(items, total, request))
    }

    /// Owner records the purchase. Any active reservation becomes `fulfilled`.
    pub async fn mark_purchased(
        &self,
        item_id: Uuid,
        actor: Uuid,
        purchased_price: Decimal,
    ) -> AppResult<ItemModel> {
        if purchased_price.is_sign_negative() {
            return Err(AppError::InvalidInput(
                "purchased_price must not be negative".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(translate)?;

        // FOR UPDATE serializes against reservers, which hold FOR SHARE.
        let item = authz::owned_item(&mut tx, item_id, actor, RowLock::Update).await?;
        if item.is_purchased() {
            return Err(AppError::AlreadyPurchased);
        }

        let fulfilled = match fetch_active(&mut tx, item_id, RowLock::Update).await? {
            Some(active) => Some(fulfill(&mut tx, active).await?),
            None => None,
        };

        let purchased_by = fulfilled
            .as_ref()
            .and_then(|r| r.reserved_by_user_id)
            .unwrap_or(actor);

        let sql = format!(
            "UPDATE items SET purchased_at = NOW(), purchased_by_user_id = $2, \
             purchased_price = $3, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ITEM_COLUMNS
        );
        let item: ItemModel = sqlx::query_as(&sql)
            .bind(item_id)
            .bind(purchased_by)
            .bind(purchased_price)
            .fetch_one(&mut *tx)
            .await
            .map_err(translate)?;

        tx.commit().await.map_err(translate)?;

        tracing::info!(
            "Item purchased: id={} price={} fulfilled_reservation={:?}",
            item_id,
            purchased_price,
            fulfilled.as_ref().map(|r| r.id)
        );

        let event = NotificationEvent::purchase_confirmed(&item, fulfilled.as_ref());
        notifier::dispatch(self.notifier.as_ref(), &[event]).await;

        Ok(item)
    }
}

async fn insert_item(
    conn: &mut PgConnection,
    owner_id: Uuid,
    attrs: &ItemAttributes,
) -> AppResult<ItemModel> {
    let sql = format!(
        "INSERT INTO items (id, owner_id, title, description, link, image_url, price, \
         priority, notes, position) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
        ITEM_COLUMNS
    );
    sqlx::query_as::<_, ItemModel>(&sql)
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(&attrs.title)
        .bind(&attrs.description)
        .bind(&attrs.link)
        .bind(&attrs.image_url)
        .bind(attrs.price)
        .bind(attrs.priority)
        .bind(&attrs.notes)
        .bind(attrs.position)
        .fetch_one(&mut *conn)
        .await
        .map_err(translate)
}

async fn fulfill(conn: &mut PgConnection, active: ReservationModel) -> AppResult<ReservationModel> {
    if !active.status.can_transition_to(ReservationStatus::Fulfilled) {
        return Err(AppError::Internal(format!(
            "reservation {} cannot be fulfilled from {}",
            active.id, active.status
        )));
    }

    let sql = format!(
        "UPDATE reservations SET status = $2 WHERE id = $1 RETURNING {}",
        RESERVATION_COLUMNS
    );
    sqlx::query_as::<_, ReservationModel>(&sql)
        .bind(active.id)
        .bind(ReservationStatus::Fulfilled.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(translate)
}

async fn set_archived(conn: &mut PgConnection, item_id: Uuid, archived: bool) -> AppResult<ItemModel> {
    let sql = format!(
        "UPDATE items SET archived_at = CASE WHEN $2 THEN NOW() ELSE NULL END, \
         updated_at = NOW() WHERE id = $1 RETURNING {}",
        ITEM_COLUMNS
    );
    sqlx::query_as::<_, ItemModel>(&sql)
        .bind(item_id)
        .bind(archived)
        .fetch_one(&mut *conn)
        .await
        .map_err(translate)
}

/// When a replayed item joined `wishlist_id`. An item that never did means the
/// key was first used against another wishlist.
async fn replayed_added_at(
    conn: &mut PgConnection,
    wishlist_id: Uuid,
    item_id: Uuid,
) -> AppResult<chrono::DateTime<chrono::Utc>> {
    let row: Option<(chrono::DateTime<chrono::Utc>,)> = sqlx::query_as(
        "SELECT added_at FROM wishlist_items WHERE wishlist_id = $1 AND item_id = $2",
    )
    .bind(wishlist_id)
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(translate)?;

    row.map(|(added_at,)| added_at)
        .ok_or_else(idempotency::key_reused)
}
