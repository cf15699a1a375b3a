use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::translate;
use crate::error::{AppError, AppResult};
use crate::models::{ItemModel, WishlistModel, ITEM_COLUMNS, WISHLIST_COLUMNS};

/// Row lock taken while loading a record inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    None,
    Share,
    Update,
}

impl RowLock {
    pub(crate) fn clause(&self) -> &'static str {
        match self {
            RowLock::None => "",
            RowLock::Share => " FOR SHARE",
            RowLock::Update => " FOR UPDATE",
        }
    }
}

/// The single ownership predicate every mutation goes through.
pub fn ensure_owner(actor: Uuid, owner_id: Uuid, what: &str) -> AppResult<()> {
    if actor == owner_id {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(format!("{} belongs to another user", what)))
    }
}

pub async fn fetch_item(
    conn: &mut PgConnection,
    item_id: Uuid,
    lock: RowLock,
) -> AppResult<Option<ItemModel>> {
    let sql = format!(
        "SELECT {} FROM items WHERE items.id = $1{}",
        ITEM_COLUMNS,
        lock.clause()
    );
    sqlx::query_as::<_, ItemModel>(&sql)
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(translate)
}

pub async fn fetch_wishlist(
    conn: &mut PgConnection,
    wishlist_id: Uuid,
    lock: RowLock,
) -> AppResult<Option<WishlistModel>> {
    let sql = format!(
        "SELECT {} FROM wishlists WHERE wishlists.id = $1{}",
        WISHLIST_COLUMNS,
        lock.clause()
    );
    sqlx::query_as::<_, WishlistModel>(&sql)
        .bind(wishlist_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(translate)
}

/// Loads an item the actor must own. Missing is `NotFound`, foreign is `PermissionDenied`.
pub async fn owned_item(
    conn: &mut PgConnection,
    item_id: Uuid,
    actor: Uuid,
    lock: RowLock,
) -> AppResult<ItemModel> {
    let item = fetch_item(conn, item_id, lock)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;
    ensure_owner(actor, item.owner_id, "Item")?;
    Ok(item)
}

pub async fn owned_wishlist(
    conn: &mut PgConnection,
    wishlist_id: Uuid,
    actor: Uuid,
    lock: RowLock,
) -> AppResult<WishlistModel> {
    let wishlist = fetch_wishlist(conn, wishlist_id, lock)
        .await?
        .ok_or_else(|| AppError::NotFound("Wishlist not found".to_string()))?;
    ensure_owner(actor, wishlist.owner_id, "Wishlist")?;
    Ok(wishlist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_owner() {
        let owner = Uuid::new_v4();
        assert!(ensure_owner(owner, owner, "Item").is_ok());
        assert!(matches!(
            ensure_owner(Uuid::new_v4(), owner, "Item"),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_lock_clause() {
        assert_eq!(RowLock::None.clause(), "");
        assert_eq!(RowLock::Share.clause(), " FOR SHARE");
        assert_eq!(RowLock::Update.clause(), " FOR UPDATE");
    }
}
