use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::authz::{self, RowLock};
use crate::db::translate;
use crate::error::{AppError, AppResult};
use crate::models::{
    AttachedItem, AttachmentModel, Page, PageRequest, WishlistEntry, WishlistItemOrder,
    ITEM_COLUMNS,
};

/// Predicate over `items` selecting rows held by no wishlist.
pub const UNATTACHED_CONDITION: &str =
    "NOT EXISTS (SELECT 1 FROM wishlist_items wi WHERE wi.item_id = items.id)";

/// Many-to-many relation between items and wishlists.
pub struct AttachmentLedger {
    pool: PgPool,
}

impl AttachmentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The actor must own both sides. A duplicate pair is rejected by the primary key.
    pub async fn attach_item(
        &self,
        wishlist_id: Uuid,
        item_id: Uuid,
        actor: Uuid,
    ) -> AppResult<AttachmentModel> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        let wishlist = authz::fetch_wishlist(&mut tx, wishlist_id, RowLock::Share)
            .await?
            .ok_or_else(|| AppError::NotFound("Wishlist not found".to_string()))?;
        let item = authz::fetch_item(&mut tx, item_id, RowLock::Share)
            .await?
            .filter(|item| !item.is_archived())
            .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;

        authz::ensure_owner(actor, wishlist.owner_id, "Wishlist")?;
        authz::ensure_owner(actor, item.owner_id, "Item")?;

        let attachment = insert_attachment(&mut tx, wishlist_id, item_id).await?;
        tx.commit().await.map_err(translate)?;

        tracing::info!("Item attached: item_id={} wishlist_id={}", item_id, wishlist_id);
        Ok(attachment)
    }

    /// Removes the junction row only. The item and its reservations are untouched.
    pub async fn detach_item(&self, wishlist_id: Uuid, item_id: Uuid, actor: Uuid) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        authz::owned_wishlist(&mut tx, wishlist_id, actor, RowLock::Share).await?;

        let rows_affected =
            sqlx::query("DELETE FROM wishlist_items WHERE wishlist_id = $1 AND item_id = $2")
                .bind(wishlist_id)
                .bind(item_id)
                .execute(&mut *tx)
                .await
                .map_err(translate)?
                .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotAttached);
        }

        tx.commit().await.map_err(translate)?;

        tracing::info!("Item detached: item_id={} wishlist_id={}", item_id, wishlist_id);
        Ok(())
    }

    /// Non-archived items of a wishlist, newest attachment first unless told otherwise.
    /// Private wishlists are only listed for their owner; everyone else sees
    /// public projections.
    pub async fn list_wishlist_items(
        &self,
        wishlist_id: Uuid,
        viewer: Option<Uuid>,
        request: PageRequest,
        ordering: WishlistItemOrder,
    ) -> AppResult<Page<WishlistEntry>> {
        let mut conn = self.pool.acquire().await.map_err(translate)?;

        authz::fetch_wishlist(&mut conn, wishlist_id, RowLock::None)
            .await?
            .filter(|w| w.is_visible_to(viewer))
            .ok_or_else(|| AppError::NotFound("Wishlist not found".to_string()))?;

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM wishlist_items \
             JOIN items ON items.id = wishlist_items.item_id \
             WHERE wishlist_items.wishlist_id = $1 AND items.archived_at IS NULL",
        )
        .bind(wishlist_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(translate)?;

        let sql = format!(
            "SELECT {}, wishlist_items.added_at FROM wishlist_items \
             JOIN items ON items.id = wishlist_items.item_id \
             WHERE wishlist_items.wishlist_id = $1 AND items.archived_at IS NULL \
             ORDER BY {} {}, items.id ASC LIMIT $2 OFFSET $3",
            ITEM_COLUMNS,
            ordering.sort.column(),
            ordering.order.sql()
        );
        let items: Vec<AttachedItem> = sqlx::query_as(&sql)
            .bind(wishlist_id)
            .bind(i64::from(request.limit))
            .bind(request.offset())
            .fetch_all(&mut *conn)
            .await
            .map_err(translate)?;

        let entries = items
            .into_iter()
            .map(|attached| WishlistEntry::for_viewer(attached, viewer))
            .collect();

        Ok(Page::new(entries, total, request))
    }

    /// Ids of every wishlist currently holding the item.
    pub async fn list_wishlists_for_item(&self, item_id: Uuid) -> AppResult<Vec<Uuid>> {
        let mut conn = self.pool.acquire().await.map_err(translate)?;

        authz::fetch_item(&mut conn, item_id, RowLock::None)
            .await?
            .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;

        wishlist_ids_for_item(&mut conn, item_id).await
    }
}

pub(crate) async fn insert_attachment(
    conn: &mut PgConnection,
    wishlist_id: Uuid,
    item_id: Uuid,
) -> AppResult<AttachmentModel> {
    sqlx::query_as::<_, AttachmentModel>(
        "INSERT INTO wishlist_items (wishlist_id, item_id) VALUES ($1, $2) \
         RETURNING wishlist_id, item_id, added_at",
    )
    .bind(wishlist_id)
    .bind(item_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate)
}

pub(crate) async fn wishlist_ids_for_item(
    conn: &mut PgConnection,
    item_id: Uuid,
) -> AppResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT wishlist_id FROM wishlist_items WHERE item_id = $1 ORDER BY added_at ASC",
    )
    .bind(item_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(translate)?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
