//! In-process backplane built on `tokio::sync::broadcast`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pushhub_core::BackplaneError;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Backplane, Subscription};

/// Per-channel buffer. A subscriber that falls this far behind skips ahead.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct Inner {
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
    available: AtomicBool,
    closed: AtomicBool,
    /// Cancelled by `sever_subscriptions`, then replaced.
    sever: Mutex<CancellationToken>,
}

/// In-memory [`Backplane`] with fault injection.
///
/// Cloning yields a handle to the same hub.
#[derive(Clone)]
pub struct MemoryBackplane {
    inner: Arc<Inner>,
}

impl MemoryBackplane {
    /// Create an empty backplane.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an empty backplane with a custom per-channel buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                sever: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Simulate an outage. While unavailable, `publish` and `subscribe` fail
    /// with [`BackplaneError::Unavailable`]. Existing subscriptions are not
    /// affected; combine with [`sever_subscriptions`](Self::sever_subscriptions).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Whether the backplane currently accepts publishes and subscriptions.
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Drop every live subscription. Each yields
    /// [`BackplaneError::ConnectionLost`] once and then ends.
    pub fn sever_subscriptions(&self) {
        let old = std::mem::take(&mut *self.inner.sever.lock());
        old.cancel();
        warn!("backplane subscriptions severed");
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Shut the backplane down. Live subscriptions yield
    /// [`BackplaneError::Closed`]; later calls fail with the same error.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.channels.lock().clear();
    }

    fn check_ready(&self) -> Result<(), BackplaneError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BackplaneError::Closed);
        }
        if !self.is_available() {
            return Err(BackplaneError::Unavailable(
                "memory backplane is offline".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryBackplane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backplane for MemoryBackplane {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackplaneError> {
        self.check_ready()?;
        let sender = self.inner.channels.lock().get(channel).cloned();
        let receivers = match sender {
            // Err only means there are no receivers right now
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        };
        debug!(channel, receivers, "published to memory backplane");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackplaneError> {
        self.check_ready()?;
        let mut rx = self
            .inner
            .channels
            .lock()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();
        let sever = self.inner.sever.lock().clone();
        let channel = channel.to_owned();
        debug!(channel = %channel, "subscribed to memory backplane");

        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    () = sever.cancelled() => None,
                    msg = rx.recv() => Some(msg),
                };
                match next {
                    None => {
                        yield Err(BackplaneError::ConnectionLost(format!(
                            "subscription to {channel} severed"
                        )));
                        break;
                    }
                    Some(Ok(bytes)) => yield Ok(bytes),
                    Some(Err(RecvError::Lagged(skipped))) => {
                        warn!(channel = %channel, skipped, "backplane subscriber lagged");
                    }
                    Some(Err(RecvError::Closed)) => {
                        yield Err(BackplaneError::Closed);
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::StreamExt;

    use super::*;

    const CHANNEL: &str = "events";

    async fn next(sub: &mut Subscription) -> Option<Result<Bytes, BackplaneError>> {
        tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for backplane message")
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bp = MemoryBackplane::new();
        let mut a = bp.subscribe(CHANNEL).await.unwrap();
        let mut b = bp.subscribe(CHANNEL).await.unwrap();

        bp.publish(CHANNEL, Bytes::from_static(b"hi")).await.unwrap();

        assert_eq!(next(&mut a).await.unwrap().unwrap(), "hi");
        assert_eq!(next(&mut b).await.unwrap().unwrap(), "hi");
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bp = MemoryBackplane::new();
        bp.publish(CHANNEL, Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(bp.subscriber_count(CHANNEL), 0);
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let bp = MemoryBackplane::new();
        let _early = bp.subscribe(CHANNEL).await.unwrap();
        bp.publish(CHANNEL, Bytes::from_static(b"old")).await.unwrap();

        let mut late = bp.subscribe(CHANNEL).await.unwrap();
        bp.publish(CHANNEL, Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(next(&mut late).await.unwrap().unwrap(), "new");
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bp = MemoryBackplane::new();
        let mut other = bp.subscribe("other").await.unwrap();
        bp.publish(CHANNEL, Bytes::from_static(b"x")).await.unwrap();
        bp.publish("other", Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(next(&mut other).await.unwrap().unwrap(), "y");
    }

    #[tokio::test]
    async fn clones_share_one_hub() {
        let a = MemoryBackplane::new();
        let b = a.clone();
        let mut sub = b.subscribe(CHANNEL).await.unwrap();
        a.publish(CHANNEL, Bytes::from_static(b"shared")).await.unwrap();
        assert_eq!(next(&mut sub).await.unwrap().unwrap(), "shared");
        assert_eq!(a.subscriber_count(CHANNEL), 1);
    }

    #[tokio::test]
    async fn separate_instances_do_not_share() {
        let a = MemoryBackplane::new();
        let b = MemoryBackplane::new();
        let _sub = b.subscribe(CHANNEL).await.unwrap();
        assert_eq!(a.subscriber_count(CHANNEL), 0);
        assert_eq!(b.subscriber_count(CHANNEL), 1);
    }

    #[tokio::test]
    async fn unavailable_rejects_publish_and_subscribe() {
        let bp = MemoryBackplane::new();
        bp.set_available(false);
        assert!(!bp.is_available());

        let err = bp.publish(CHANNEL, Bytes::new()).await.unwrap_err();
        assert_matches!(err, BackplaneError::Unavailable(_));
        let err = bp.subscribe(CHANNEL).await.err().unwrap();
        assert_matches!(err, BackplaneError::Unavailable(_));

        bp.set_available(true);
        assert!(bp.subscribe(CHANNEL).await.is_ok());
    }

    #[tokio::test]
    async fn sever_yields_connection_lost_then_ends() {
        let bp = MemoryBackplane::new();
        let mut sub = bp.subscribe(CHANNEL).await.unwrap();

        bp.sever_subscriptions();

        assert_matches!(next(&mut sub).await, Some(Err(BackplaneError::ConnectionLost(_))));
        assert!(next(&mut sub).await.is_none());
        assert_eq!(bp.subscriber_count(CHANNEL), 0);
    }

    #[tokio::test]
    async fn resubscribe_after_sever_receives_new_messages() {
        let bp = MemoryBackplane::new();
        let mut first = bp.subscribe(CHANNEL).await.unwrap();
        bp.sever_subscriptions();
        assert_matches!(next(&mut first).await, Some(Err(_)));

        let mut second = bp.subscribe(CHANNEL).await.unwrap();
        bp.publish(CHANNEL, Bytes::from_static(b"again")).await.unwrap();
        assert_eq!(next(&mut second).await.unwrap().unwrap(), "again");
    }

    #[tokio::test]
    async fn dropped_subscription_is_released() {
        let bp = MemoryBackplane::new();
        let sub = bp.subscribe(CHANNEL).await.unwrap();
        assert_eq!(bp.subscriber_count(CHANNEL), 1);
        drop(sub);
        assert_eq!(bp.subscriber_count(CHANNEL), 0);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let bp = MemoryBackplane::new();
        let mut sub = bp.subscribe(CHANNEL).await.unwrap();

        bp.close();

        assert_matches!(next(&mut sub).await, Some(Err(BackplaneError::Closed)));
        assert!(next(&mut sub).await.is_none());
        assert_matches!(
            bp.publish(CHANNEL, Bytes::new()).await,
            Err(BackplaneError::Closed)
        );
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let bp = MemoryBackplane::with_capacity(2);
        let mut sub = bp.subscribe(CHANNEL).await.unwrap();
        for i in 0..5u8 {
            bp.publish(CHANNEL, Bytes::from(vec![b'0' + i])).await.unwrap();
        }
        // Only the newest two survive the overflow.
        assert_eq!(next(&mut sub).await.unwrap().unwrap(), "3");
        assert_eq!(next(&mut sub).await.unwrap().unwrap(), "4");
    }
}
