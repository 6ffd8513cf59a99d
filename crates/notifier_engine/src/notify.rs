use std::sync::Arc;

use engine_logging::{engine_info, engine_warn};
use notifier_core::CompletionEvent;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("network error: {0}")]
    Network(String),
}

/// Renders a completion to the user. Delivery is best effort.
#[async_trait::async_trait]
pub trait NotificationGateway: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, event: &CompletionEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Primary,
    Fallback { primary_error: NotifyError },
    Dropped {
        primary_error: NotifyError,
        fallback_error: Option<NotifyError>,
    },
}

/// Two-tier delivery: the primary gateway, then a local alert if that fails.
pub struct NotificationDispatcher {
    primary: Arc<dyn NotificationGateway>,
    fallback: Option<Arc<dyn NotificationGateway>>,
}

impl NotificationDispatcher {
    pub fn new(
        primary: Arc<dyn NotificationGateway>,
        fallback: Option<Arc<dyn NotificationGateway>>,
    ) -> Self {
        Self { primary, fallback }
    }

    pub async fn deliver(&self, event: &CompletionEvent) -> DeliveryOutcome {
        let primary_error = match self.primary.notify(event).await {
            Ok(()) => return DeliveryOutcome::Primary,
            Err(err) => err,
        };
        engine_warn!(
            "Gateway {} failed for pipeline #{}: {}",
            self.primary.name(),
            event.pipeline_id,
            primary_error
        );

        let Some(fallback) = &self.fallback else {
            return DeliveryOutcome::Dropped {
                primary_error,
                fallback_error: None,
            };
        };
        match fallback.notify(event).await {
            Ok(()) => DeliveryOutcome::Fallback { primary_error },
            Err(err) => DeliveryOutcome::Dropped {
                primary_error,
                fallback_error: Some(err),
            },
        }
    }

    /// Fire-and-forget delivery on the current runtime.
    pub fn dispatch(self: &Arc<Self>, event: CompletionEvent) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            match dispatcher.deliver(&event).await {
                DeliveryOutcome::Dropped {
                    primary_error,
                    fallback_error,
                } => engine_warn!(
                    "Dropped notification for pipeline #{}: {} / {:?}",
                    event.pipeline_id,
                    primary_error,
                    fallback_error
                ),
                outcome => engine_info!(
                    "Delivered notification for pipeline #{}: {:?}",
                    event.pipeline_id,
                    outcome
                ),
            }
        });
    }
}

/// Posts completions as JSON to a webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookGateway {
    client: reqwest::Client,
    url: String,
}

impl WebhookGateway {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl NotificationGateway for WebhookGateway {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &CompletionEvent) -> Result<(), NotifyError> {
        let body = json!({
            "title": event.title(),
            "message": event.message(),
            "pipelineId": event.pipeline_id,
            "stage": event.stage,
            "status": event.status,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| NotifyError::Network(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::HttpStatus(status.as_u16()))
        }
    }
}

/// Local alert path: writes the notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlert;

#[async_trait::async_trait]
impl NotificationGateway for LogAlert {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &CompletionEvent) -> Result<(), NotifyError> {
        engine_info!("{} - {}", event.title(), event.message());
        Ok(())
    }
}
