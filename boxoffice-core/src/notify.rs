use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPurpose {
    TicketConfirmed,
}

impl NotificationPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPurpose::TicketConfirmed => "TICKET_CONFIRMED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRequest {
    pub purpose: NotificationPurpose,
    pub recipient: boxoffice_shared::Masked<String>,
    /// Template variables; contains the ticket URL, so never log it whole.
    #[serde(skip)]
    pub variables: serde_json::Value,
    pub order_id: Uuid,
}

/// What the delivery side reports back
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub success: bool,
    pub skipped_as_duplicate: bool,
    pub error: Option<String>,
}

impl NotifyOutcome {
    pub fn sent() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped_as_duplicate: false,
            error: Some(error.into()),
        }
    }
}

/// Outbound delivery collaborator, invoked once an order is paid.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: NotificationRequest) -> NotifyOutcome;
}

/// Notifier that only records the request in the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, request: NotificationRequest) -> NotifyOutcome {
        info!(
            purpose = request.purpose.as_str(),
            order_id = %request.order_id,
            recipient = %request.recipient,
            "Notification accepted"
        );
        NotifyOutcome::sent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_reports_success() {
        let outcome = LogNotifier
            .notify(NotificationRequest {
                purpose: NotificationPurpose::TicketConfirmed,
                recipient: "buyer@example.com".to_string().into(),
                variables: serde_json::json!({}),
                order_id: Uuid::new_v4(),
            })
            .await;
        assert_eq!(outcome, NotifyOutcome::sent());
    }
}
