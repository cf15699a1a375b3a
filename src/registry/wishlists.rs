use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::authz::{self, RowLock};
use crate::db::translate;
use crate::error::{AppError, AppResult};
use crate::models::{
    ItemModel, PublicStatus, PublicWishlistEntry, PublicWishlistView, WishlistAttributes,
    WishlistModel, ITEM_COLUMNS, WISHLIST_COLUMNS,
};

#[derive(Debug, FromRow)]
struct PublicEntryRow {
    #[sqlx(flatten)]
    item: ItemModel,
    added_at: DateTime<Utc>,
    reserved: bool,
}

pub struct WishlistDirectory {
    pool: PgPool,
}

impl WishlistDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_wishlist(
        &self,
        owner_id: Uuid,
        attrs: WishlistAttributes,
    ) -> AppResult<WishlistModel> {
        let attrs = attrs.normalized()?;

        let sql = format!(
            "INSERT INTO wishlists (id, owner_id, title, description, occasion, occasion_date, \
             is_public, public_slug) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            WISHLIST_COLUMNS
        );
        let wishlist: WishlistModel = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(&attrs.title)
            .bind(&attrs.description)
            .bind(&attrs.occasion)
            .bind(attrs.occasion_date)
            .bind(attrs.is_public)
            .bind(&attrs.public_slug)
            .fetch_one(&self.pool)
            .await
            .map_err(translate)?;

        tracing::info!("Wishlist created: id={} owner_id={}", wishlist.id, owner_id);
        Ok(wishlist)
    }

    /// Visible to its owner, or to anyone when public.
    pub async fn get_wishlist(
        &self,
        wishlist_id: Uuid,
        viewer: Option<Uuid>,
    ) -> AppResult<WishlistModel> {
        let mut conn = self.pool.acquire().await.map_err(translate)?;
        authz::fetch_wishlist(&mut conn, wishlist_id, RowLock::None)
            .await?
            .filter(|w| w.is_visible_to(viewer))
            .ok_or_else(|| AppError::NotFound("Wishlist not found".to_string()))
    }

    pub async fn list_wishlists_by_owner(&self, owner_id: Uuid) -> AppResult<Vec<WishlistModel>> {
        let sql = format!(
            "SELECT {} FROM wishlists WHERE owner_id = $1 ORDER BY created_at DESC, id ASC",
            WISHLIST_COLUMNS
        );
        sqlx::query_as::<_, WishlistModel>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(translate)
    }

    /// Public page of a wishlist: bumps `view_count` and pairs each visible item
    /// with its public reservation status.
    pub async fn get_public_view(&self, wishlist_id: Uuid) -> AppResult<PublicWishlistView> {
        let mut tx = self.pool.begin().await.map_err(translate)?;

        let sql = format!(
            "UPDATE wishlists SET view_count = view_count + 1 \
             WHERE id = $1 AND is_public RETURNING {}",
            WISHLIST_COLUMNS
        );
        let wishlist: WishlistModel = sqlx::query_as(&sql)
            .bind(wishlist_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(translate)?
            .ok_or_else(|| AppError::NotFound("Wishlist not found".to_string()))?;

        let entries_sql = format!(
            "SELECT {}, wishlist_items.added_at, \
             EXISTS (SELECT 1 FROM reservations r \
                     WHERE r.item_id = items.id AND r.status = 'active') AS reserved \
             FROM wishlist_items JOIN items ON items.id = wishlist_items.item_id \
             WHERE wishlist_items.wishlist_id = $1 AND items.archived_at IS NULL \
             ORDER BY wishlist_items.added_at DESC, items.id ASC",
            ITEM_COLUMNS
        );
        let rows: Vec<PublicEntryRow> = sqlx::query_as(&entries_sql)
            .bind(wishlist_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(translate)?;

        tx.commit().await.map_err(translate)?;

        let entries = rows
            .into_iter()
            .map(|row| PublicWishlistEntry {
                status: PublicStatus::from_flags(row.item.is_purchased(), row.reserved),
                item: row.item.into(),
                added_at: row.added_at,
            })
            .collect();

        Ok(PublicWishlistView { wishlist, entries })
    }
}
