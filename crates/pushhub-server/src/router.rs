//! Publishing entry point and local mailbox delivery.
//!
//! [`Router::publish`] only hands the encoded envelope to the backplane.
//! Every process, including the publisher, delivers it later through
//! [`Router::publish_local`] when its bridge receives it back, so
//! `publish_local` is the single code path that touches mailboxes.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use pushhub_backplane::Backplane;
use pushhub_core::{Event, PublishError};
use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::Payload;
use crate::metrics::{
    MESSAGES_DELIVERED_TOTAL, MESSAGES_DROPPED_TOTAL, PUBLISH_ERRORS_TOTAL, PUBLISH_TOTAL,
};
use crate::registry::ConnectionRegistry;

/// Outcome of one local delivery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Connections matched by the target at delivery time.
    pub recipients: usize,
    /// Mailboxes that accepted the payload.
    pub delivered: usize,
    /// Mailboxes that were full or already closed.
    pub dropped: usize,
}

/// Routes events to the backplane and from it into mailboxes.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    backplane: Arc<dyn Backplane>,
    channel: String,
}

impl Router {
    /// Create a router publishing on `channel`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        backplane: Arc<dyn Backplane>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            backplane,
            channel: channel.into(),
        }
    }

    /// Backplane channel this router publishes on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Encode `event` and hand it to the backplane.
    ///
    /// Returns once the backplane accepted the message; delivery happens
    /// asynchronously. A target with no connections anywhere is not an error.
    pub async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let result = self.try_publish(event).await;
        match &result {
            Ok(()) => {
                counter!(PUBLISH_TOTAL).increment(1);
                debug!(event_target = %event.target, channel = %self.channel, "published event");
            }
            Err(err) => {
                counter!(PUBLISH_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
                warn!(event_target = %event.target, error = %err, "publish failed");
            }
        }
        result
    }

    async fn try_publish(&self, event: &Event) -> Result<(), PublishError> {
        let bytes = event.encode()?;
        self.backplane
            .publish(&self.channel, Bytes::from(bytes))
            .await?;
        Ok(())
    }

    /// Offer the event's payload to every matching local mailbox without
    /// blocking. Full mailboxes drop the payload.
    pub fn publish_local(&self, event: &Event) -> DeliveryReport {
        let recipients = match event.target.client_id() {
            None => self.registry.all_connections(),
            Some(client_id) => self.registry.connections_for(client_id),
        };
        let mut report = DeliveryReport {
            recipients: recipients.len(),
            ..DeliveryReport::default()
        };
        if recipients.is_empty() {
            debug!(event_target = %event.target, "no local recipients");
            return report;
        }

        let payload: Payload = Arc::from(event.payload.as_str());
        for connection in &recipients {
            if connection.enqueue(Arc::clone(&payload)) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
                warn!(
                    client_id = %connection.client_id(),
                    connection_id = %connection.id(),
                    dropped_total = connection.dropped_count(),
                    "mailbox full, message dropped"
                );
            }
        }

        counter!(MESSAGES_DELIVERED_TOTAL).increment(report.delivered as u64);
        if report.dropped > 0 {
            counter!(MESSAGES_DROPPED_TOTAL).increment(report.dropped as u64);
        }
        debug!(
            event_target = %event.target,
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            "delivered locally"
        );
        report
    }
}
