#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;
use wishlist_core::db::run_migrations;
use wishlist_core::models::{ItemAttributes, ItemModel, WishlistAttributes, WishlistModel};
use wishlist_core::notifier::{NotificationEvent, Notifier, NotifyError};
use wishlist_core::Registry;

/// Captures every event instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

#[tonic::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct TestContext {
    pub pool: PgPool,
    pub registry: Arc<Registry>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Picks the test database. Without one the database tests are skipped, unless
/// `REQUIRE_DATABASE` is set, in which case a missing URL is a failure.
pub fn database_url(url: Option<String>, required: bool) -> Option<String> {
    match url.filter(|u| !u.is_empty()) {
        Some(url) => Some(url),
        None if required => {
            panic!("REQUIRE_DATABASE is set but DATABASE_URL is missing")
        }
        None => {
            eprintln!("DATABASE_URL not set, skipping database test");
            None
        }
    }
}

/// Connects to `DATABASE_URL` and applies the schema. Returns `None` when no
/// database is configured and none is required.
pub async fn setup() -> Option<TestContext> {
    let required = std::env::var_os("REQUIRE_DATABASE").is_some();
    let url = database_url(std::env::var("DATABASE_URL").ok(), required)?;

    let pool = PgPoolOptions::new()
        .max_connections(24)
        .connect(&url)
        .await
        .expect("failed to connect to test database");
    run_migrations(&pool).await.expect("failed to apply migrations");

    let notifier = Arc::new(RecordingNotifier::default());
    let registry = Arc::new(Registry::new(pool.clone(), notifier.clone(), 86_400));

    Some(TestContext {
        pool,
        registry,
        notifier,
    })
}

pub async fn wishlist(ctx: &TestContext, owner: Uuid, title: &str) -> WishlistModel {
    ctx.registry
        .wishlists
        .create_wishlist(owner, WishlistAttributes::new(title))
        .await
        .expect("create wishlist")
}

pub async fn public_wishlist(ctx: &TestContext, owner: Uuid, title: &str) -> WishlistModel {
    let slug = format!("wl-{}", Uuid::new_v4().simple());
    ctx.registry
        .wishlists
        .create_wishlist(owner, WishlistAttributes::new(title).public(slug))
        .await
        .expect("create public wishlist")
}

pub async fn item(ctx: &TestContext, owner: Uuid, title: &str) -> ItemModel {
    ctx.registry
        .items
        .create_item(owner, ItemAttributes::new(title), None)
        .await
        .expect("create item")
}

pub fn price(value: &str) -> Decimal {
    value.parse().expect("decimal literal")
}
