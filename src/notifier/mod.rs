// Notifier seam: the core emits events, delivery happens elsewhere.

pub mod http_client;
pub mod webhook;

pub use http_client::HttpClient;
pub use webhook::WebhookNotifier;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{ItemModel, Recipient, ReservationModel};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NotificationEvent {
    ReservationCreated {
        reservation_id: Uuid,
        item_id: Uuid,
        item_title: String,
        recipient: Recipient,
        /// Guests need this to cancel later.
        #[serde(skip_serializing_if = "Option::is_none")]
        cancel_token: Option<String>,
    },
    ReservationCanceled {
        reservation_id: Uuid,
        item_id: Uuid,
        item_title: String,
        recipient: Recipient,
        reason: Option<String>,
    },
    PurchaseConfirmed {
        item_id: Uuid,
        item_title: String,
        owner_id: Uuid,
        purchased_price: Decimal,
        reservation_id: Option<Uuid>,
        recipient: Option<Recipient>,
    },
    ReservationInvalidated {
        reservation_id: Uuid,
        item_id: Uuid,
        item_title: String,
        recipient: Recipient,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::ReservationCreated { .. } => "reservation-created",
            NotificationEvent::ReservationCanceled { .. } => "reservation-canceled",
            NotificationEvent::PurchaseConfirmed { .. } => "purchase-confirmed",
            NotificationEvent::ReservationInvalidated { .. } => "reservation-invalidated",
        }
    }

    pub fn reservation_created(reservation: &ReservationModel, item_title: &str) -> Self {
        NotificationEvent::ReservationCreated {
            reservation_id: reservation.id,
            item_id: reservation.item_id,
            item_title: item_title.to_string(),
            recipient: reservation.recipient(),
            cancel_token: reservation.reservation_token.clone(),
        }
    }

    pub fn reservation_canceled(reservation: &ReservationModel, item_title: &str) -> Self {
        NotificationEvent::ReservationCanceled {
            reservation_id: reservation.id,
            item_id: reservation.item_id,
            item_title: item_title.to_string(),
            recipient: reservation.recipient(),
            reason: reservation.cancel_reason.clone(),
        }
    }

    pub fn purchase_confirmed(item: &ItemModel, fulfilled: Option<&ReservationModel>) -> Self {
        NotificationEvent::PurchaseConfirmed {
            item_id: item.id,
            item_title: item.title.clone(),
            owner_id: item.owner_id,
            purchased_price: item.purchased_price.unwrap_or_default(),
            reservation_id: fulfilled.map(|r| r.id),
            recipient: fulfilled.map(ReservationModel::recipient),
        }
    }

    pub fn reservation_invalidated(reservation: &ReservationModel, item_title: &str) -> Self {
        NotificationEvent::ReservationInvalidated {
            reservation_id: reservation.id,
            item_id: reservation.item_id,
            item_title: item_title.to_string(),
            recipient: reservation.recipient(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
    #[error("Notification rejected with status {0}")]
    Rejected(u16),
}

#[tonic::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Records events in the log only. Used when no delivery endpoint is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[tonic::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        tracing::info!("Notification: kind={} event={:?}", event.kind(), event);
        Ok(())
    }
}

/// Picks the notifier implied by the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn Notifier>, NotifyError> {
    match (&config.notifier_webhook_url, config.notifications_enabled) {
        (Some(url), true) => {
            tracing::info!("Webhook notifier enabled: url={}", url);
            Ok(Arc::new(WebhookNotifier::new(url.clone())?))
        }
        (_, false) => {
            tracing::info!("Notifications disabled, events will only be logged");
            Ok(Arc::new(LogNotifier))
        }
        (None, true) => {
            tracing::debug!("Notifier webhook URL not configured, events will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Delivers events after a commit. Failures are logged and never undo the
/// committed change. Returns whether each event was accepted.
pub async fn dispatch(notifier: &dyn Notifier, events: &[NotificationEvent]) -> Vec<bool> {
    let mut delivered = Vec::with_capacity(events.len());
    for event in events {
        match notifier.notify(event).await {
            Ok(()) => delivered.push(true),
            Err(e) => {
                tracing::warn!("Failed to deliver {} notification: {}", event.kind(), e);
                delivered.push(false);
            }
        }
    }
    delivered
}
