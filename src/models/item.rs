use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Column list shared by every query returning an `ItemModel`.
pub const ITEM_COLUMNS: &str = "items.id, items.owner_id, items.title, items.description, \
     items.link, items.image_url, items.price, items.priority, items.notes, items.position, \
     items.created_at, items.updated_at, items.archived_at, \
     items.purchased_at, items.purchased_by_user_id, items.purchased_price";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct ItemModel {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<Decimal>,
    pub priority: i32,
    pub notes: Option<String>,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub purchased_by_user_id: Option<Uuid>,
    pub purchased_price: Option<Decimal>,
}

/// Derived view over the two independent timestamps. Purchase wins over archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Active,
    Archived,
    Purchased,
}

impl ItemModel {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_purchased(&self) -> bool {
        self.purchased_at.is_some()
    }

    pub fn state(&self) -> ItemState {
        if self.is_purchased() {
            ItemState::Purchased
        } else if self.is_archived() {
            ItemState::Archived
        } else {
            ItemState::Active
        }
    }
}

/// Item as shown to anyone other than its owner. Private notes and the
/// purchase record (which names the buyer) are left out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicItem {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<Decimal>,
    pub priority: i32,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ItemModel> for PublicItem {
    fn from(item: ItemModel) -> Self {
        Self {
            id: item.id,
            title: item.title,
            description: item.description,
            link: item.link,
            image_url: item.image_url,
            price: item.price,
            priority: item.priority,
            position: item.position,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

/// Caller-editable item fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemAttributes {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<Decimal>,
    pub priority: i32,
    pub notes: Option<String>,
    pub position: i32,
}

impl ItemAttributes {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// Trims text fields, drops empty optionals and rejects a blank title or negative price.
    pub fn normalized(self) -> AppResult<Self> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::InvalidInput("title is required".to_string()));
        }
        if self.price.is_some_and(|p| p.is_sign_negative()) {
            return Err(AppError::InvalidInput("price must not be negative".to_string()));
        }

        Ok(Self {
            title,
            description: non_empty(self.description),
            link: non_empty(self.link),
            image_url: non_empty(self.image_url),
            price: self.price,
            priority: self.priority,
            notes: non_empty(self.notes),
            position: self.position,
        })
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
    Price,
}

impl ItemSortField {
    pub fn column(&self) -> &'static str {
        match self {
            ItemSortField::CreatedAt => "items.created_at",
            ItemSortField::UpdatedAt => "items.updated_at",
            ItemSortField::Title => "items.title",
            ItemSortField::Price => "items.price",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// NULL prices sort last in either direction.
    pub fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC NULLS LAST",
            SortOrder::Desc => "DESC NULLS LAST",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemListFilter {
    pub include_archived: bool,
    pub unattached_only: bool,
    pub sort: ItemSortField,
    pub order: SortOrder,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> ItemModel {
        let now = Utc::now();
        ItemModel {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "iPhone 15".to_string(),
            description: None,
            link: None,
            image_url: None,
            price: None,
            priority: 0,
            notes: None,
            position: 0,
            created_at: now,
            updated_at: now,
            archived_at: None,
            purchased_at: None,
            purchased_by_user_id: None,
            purchased_price: None,
        }
    }

    #[test]
    fn test_state_prefers_purchase() {
        let mut item = sample();
        assert_eq!(item.state(), ItemState::Active);
        item.archived_at = Some(Utc::now());
        assert_eq!(item.state(), ItemState::Archived);
        item.purchased_at = Some(Utc::now());
        assert_eq!(item.state(), ItemState::Purchased);
    }

    #[test]
    fn test_normalized_trims_and_drops_blanks() {
        let attrs = ItemAttributes {
            title: "  Kindle  ".to_string(),
            description: Some("   ".to_string()),
            link: Some(" https://example.com ".to_string()),
            ..Default::default()
        }
        .normalized()
        .unwrap();

        assert_eq!(attrs.title, "Kindle");
        assert_eq!(attrs.description, None);
        assert_eq!(attrs.link.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_normalized_rejects_blank_title_and_negative_price() {
        assert!(matches!(
            ItemAttributes::new("  ").normalized(),
            Err(AppError::InvalidInput(_))
        ));
        let negative = ItemAttributes::new("Lamp").with_price(Decimal::from_str("-1.00").unwrap());
        assert!(matches!(negative.normalized(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_public_item_hides_buyer_and_notes() {
        let buyer = Uuid::new_v4();
        let mut item = sample();
        item.notes = Some("size M, ask Ana".to_string());
        item.purchased_at = Some(Utc::now());
        item.purchased_by_user_id = Some(buyer);
        item.purchased_price = Some(Decimal::new(95000, 2));

        let json = serde_json::to_value(PublicItem::from(item.clone())).unwrap();
        assert!(json.get("purchased_price").is_none());
        let json = json.to_string();
        assert!(json.contains("iPhone 15"));
        assert!(!json.contains(&buyer.to_string()));
        assert!(!json.contains("ask Ana"));
        assert!(!json.contains(&item.owner_id.to_string()));
    }

    #[test]
    fn test_sort_columns_are_whitelisted() {
        assert_eq!(ItemSortField::default().column(), "items.created_at");
        assert_eq!(ItemSortField::Price.column(), "items.price");
        assert_eq!(SortOrder::default(), SortOrder::Desc);
    }
}
