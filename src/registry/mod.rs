// Attachment & reservation core. Each operation runs in one transaction
// against the shared store and keeps no in-process state.

pub mod attachments;
pub mod authz;
pub mod cleanup;
pub mod idempotency;
pub mod items;
pub mod reservations;
pub mod token;
pub mod wishlists;

pub use attachments::AttachmentLedger;
pub use cleanup::{AccountCleanup, CascadeReport};
pub use items::ItemStore;
pub use reservations::ReservationEngine;
pub use wishlists::WishlistDirectory;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::notifier::Notifier;

/// Every component wired to one pool and one notifier.
pub struct Registry {
    pub items: ItemStore,
    pub attachments: AttachmentLedger,
    pub reservations: ReservationEngine,
    pub cleanup: AccountCleanup,
    pub wishlists: WishlistDirectory,
}

impl Registry {
    pub fn new(pool: PgPool, notifier: Arc<dyn Notifier>, idempotency_window_secs: i64) -> Self {
        Self {
            items: ItemStore::new(pool.clone(), notifier.clone(), idempotency_window_secs),
            attachments: AttachmentLedger::new(pool.clone()),
            reservations: ReservationEngine::new(
                pool.clone(),
                notifier.clone(),
                idempotency_window_secs,
            ),
            cleanup: AccountCleanup::new(pool.clone(), notifier),
            wishlists: WishlistDirectory::new(pool),
        }
    }

    pub fn from_config(pool: PgPool, notifier: Arc<dyn Notifier>, config: &Config) -> Self {
        Self::new(pool, notifier, config.idempotency_window_secs)
    }
}
