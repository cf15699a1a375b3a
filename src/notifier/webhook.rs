use std::time::Duration;

use super::{HttpClient, NotificationEvent, Notifier, NotifyError};

/// Posts each event as JSON to an external delivery service.
pub struct WebhookNotifier {
    url: String,
    http_client: HttpClient,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, NotifyError> {
        let http_client = HttpClient::new(Duration::from_secs(10))
            .map_err(|e| NotifyError::Delivery(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { url, http_client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[tonic::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "event": event.kind(),
            "payload": event,
        });

        let response = self
            .http_client
            .post_json(&self.url, &payload)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if response.status().is_success() {
            tracing::info!("{} notification sent to {}", event.kind(), self.url);
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("{} notification failed: {} - {}", event.kind(), status, body);
            Err(NotifyError::Rejected(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_keeps_url() {
        let notifier = WebhookNotifier::new("http://localhost:9000/hooks".to_string()).unwrap();
        assert_eq!(notifier.url(), "http://localhost:9000/hooks");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_delivery_error() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hooks".to_string()).unwrap();
        let event = NotificationEvent::ReservationInvalidated {
            reservation_id: uuid::Uuid::nil(),
            item_id: uuid::Uuid::nil(),
            item_title: "Lamp".to_string(),
            recipient: crate::models::Recipient::Unknown,
        };
        assert!(matches!(
            notifier.notify(&event).await,
            Err(NotifyError::Delivery(_))
        ));
    }
}
