//! Delivery of transition events to a notification sink.
//!
//! Delivery is best effort. Each event is offered to the sink exactly once;
//! if the sink is missing or refuses it, the event is dropped and a warning
//! is logged. Nothing is queued or retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::model::{Transition, TransitionEvent};

/// User-facing text for a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn for_event(event: &TransitionEvent) -> Self {
        let (title, verb) = match event.transition {
            Transition::Enter => ("Geofence entered", "entered"),
            Transition::Exit => ("Geofence left", "left"),
        };
        Self {
            title: title.to_string(),
            body: format!(
                "You have {} '{}' at {:.5}, {:.5}",
                verb, event.region_id, event.fix.latitude, event.fix.longitude
            ),
        }
    }
}

/// Receiver of detected transitions.
///
/// `deliver` must not block: sinks that do I/O hand the work off and
/// return immediately.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, event: &TransitionEvent) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

/// Writes the rendered notification to the log.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, event: &TransitionEvent) -> Result<(), SinkError> {
        let notification = Notification::for_event(event);
        info!(
            region_id = %event.region_id,
            transition = event.transition.as_str(),
            title = %notification.title,
            "{}",
            notification.body
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Forwards events into a bounded tokio channel without waiting.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<TransitionEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<TransitionEvent>) -> Self {
        Self { sender }
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, event: &TransitionEvent) -> Result<(), SinkError> {
        self.sender.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SinkError::Unavailable("channel full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SinkError::Unavailable("channel closed".to_string())
            }
        })
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// POSTs each event as JSON to a URL, fire-and-forget.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

impl NotificationSink for WebhookSink {
    fn deliver(&self, event: &TransitionEvent) -> Result<(), SinkError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let client = self.client.clone();
        let url = self.url.clone();
        let event = event.clone();
        handle.spawn(async move {
            let result = client
                .post(&url)
                .json(&event)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match result {
                Ok(_) => debug!(url = %url, region_id = %event.region_id, "Webhook delivered"),
                Err(e) => warn!(
                    url = %url,
                    region_id = %event.region_id,
                    error = %e,
                    "Webhook delivery failed, event dropped"
                ),
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub dropped: u64,
}

pub struct Dispatcher {
    sink: Option<Arc<dyn NotificationSink>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Dispatcher {
    pub fn new(sink: Option<Arc<dyn NotificationSink>>) -> Self {
        Self {
            sink,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn with_sink(sink: impl NotificationSink + 'static) -> Self {
        let sink: Arc<dyn NotificationSink> = Arc::new(sink);
        Self::new(Some(sink))
    }

    /// Offer an event to the sink once. Returns whether it was accepted.
    pub fn dispatch(&self, event: &TransitionEvent) -> bool {
        let Some(sink) = &self.sink else {
            warn!(region_id = %event.region_id, "No notification sink, event dropped");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sink.deliver(event) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(
                    sink = sink.name(),
                    region_id = %event.region_id,
                    transition = event.transition.as_str(),
                    error = %e,
                    "Notification sink unavailable, event dropped"
                );
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_sink(LogSink)
    }
}
