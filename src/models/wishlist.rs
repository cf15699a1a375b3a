use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::item::{non_empty, ItemModel, PublicItem, SortOrder};
use super::reservation::PublicStatus;
use crate::error::{AppError, AppResult};

pub const WISHLIST_COLUMNS: &str = "wishlists.id, wishlists.owner_id, wishlists.title, \
     wishlists.description, wishlists.occasion, wishlists.occasion_date, wishlists.is_public, \
     wishlists.public_slug, wishlists.view_count, wishlists.created_at, wishlists.updated_at";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct WishlistModel {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub occasion: Option<String>,
    pub occasion_date: Option<NaiveDate>,
    pub is_public: bool,
    pub public_slug: Option<String>,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WishlistModel {
    pub fn is_visible_to(&self, viewer: Option<Uuid>) -> bool {
        self.is_public || viewer == Some(self.owner_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WishlistAttributes {
    pub title: String,
    pub description: Option<String>,
    pub occasion: Option<String>,
    pub occasion_date: Option<NaiveDate>,
    pub is_public: bool,
    pub public_slug: Option<String>,
}

impl WishlistAttributes {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn public(mut self, slug: impl Into<String>) -> Self {
        self.is_public = true;
        self.public_slug = Some(slug.into());
        self
    }

    pub fn normalized(self) -> AppResult<Self> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::InvalidInput("title is required".to_string()));
        }
        let public_slug = non_empty(self.public_slug).map(|s| s.to_ascii_lowercase());
        if let Some(slug) = &public_slug {
            if !slug
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(AppError::InvalidInput(
                    "public_slug may only contain letters, digits, '-' and '_'".to_string(),
                ));
            }
        }

        Ok(Self {
            title,
            description: non_empty(self.description),
            occasion: non_empty(self.occasion),
            occasion_date: self.occasion_date,
            is_public: self.is_public,
            public_slug,
        })
    }
}

/// Junction row: the item is visible in the wishlist.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct AttachmentModel {
    pub wishlist_id: Uuid,
    pub item_id: Uuid,
    pub added_at: DateTime<Utc>,
}

/// An item as listed inside a wishlist.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AttachedItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub item: ItemModel,
    pub added_at: DateTime<Utc>,
}

/// Attached item in the shape non-owners see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicAttachedItem {
    #[serde(flatten)]
    pub item: PublicItem,
    pub added_at: DateTime<Utc>,
}

/// One row of a wishlist listing. Only the owner gets the full item.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WishlistEntry {
    Owner(AttachedItem),
    Public(PublicAttachedItem),
}

impl WishlistEntry {
    /// Projects `attached` for `viewer`.
    pub fn for_viewer(attached: AttachedItem, viewer: Option<Uuid>) -> Self {
        if viewer == Some(attached.item.owner_id) {
            WishlistEntry::Owner(attached)
        } else {
            WishlistEntry::Public(PublicAttachedItem {
                item: attached.item.into(),
                added_at: attached.added_at,
            })
        }
    }

    pub fn item_id(&self) -> Uuid {
        match self {
            WishlistEntry::Owner(a) => a.item.id,
            WishlistEntry::Public(a) => a.item.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            WishlistEntry::Owner(a) => &a.item.title,
            WishlistEntry::Public(a) => &a.item.title,
        }
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        match self {
            WishlistEntry::Owner(a) => a.added_at,
            WishlistEntry::Public(a) => a.added_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WishlistItemSort {
    #[default]
    AddedAt,
    Position,
    Priority,
    Title,
    Price,
}

impl WishlistItemSort {
    pub fn column(&self) -> &'static str {
        match self {
            WishlistItemSort::AddedAt => "wishlist_items.added_at",
            WishlistItemSort::Position => "items.position",
            WishlistItemSort::Priority => "items.priority",
            WishlistItemSort::Title => "items.title",
            WishlistItemSort::Price => "items.price",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WishlistItemOrder {
    pub sort: WishlistItemSort,
    pub order: SortOrder,
}

/// Item entry of a public wishlist page. Holder identity is never included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicWishlistEntry {
    pub item: PublicItem,
    pub added_at: DateTime<Utc>,
    pub status: PublicStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicWishlistView {
    pub wishlist: WishlistModel,
    pub entries: Vec<PublicWishlistEntry>,
}
