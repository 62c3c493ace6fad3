//! Standing subscription from the backplane into local delivery.
//!
//! The bridge moves through `Disconnected → Connecting → Subscribed` and
//! falls back to `Disconnected` whenever the subscription fails or ends,
//! retrying with bounded exponential backoff until cancelled. Messages
//! published while it is not subscribed are lost for this process.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use metrics::{counter, gauge};
use pushhub_backplane::{Backplane, Subscription};
use pushhub_core::{Backoff, BackoffConfig, BackplaneError, Event};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::metrics::{BRIDGE_RECONNECTS_TOTAL, BRIDGE_SUBSCRIBED, ENVELOPES_MALFORMED_TOTAL};
use crate::router::Router;

/// Subscription state of the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    /// No subscription; waiting to retry or stopped.
    Disconnected,
    /// Subscribe call in flight.
    Connecting,
    /// Receiving messages.
    Subscribed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
        })
    }
}

/// Why a live subscription stopped.
enum PumpExit {
    Cancelled,
    Lost(BackplaneError),
}

/// Feeds backplane envelopes into [`Router::publish_local`].
pub struct BackplaneBridge {
    backplane: Arc<dyn Backplane>,
    channel: String,
    router: Arc<Router>,
    backoff: Backoff,
    state: watch::Sender<BridgeState>,
    cancel: CancellationToken,
}

/// Read-only view of a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    state: watch::Receiver<BridgeState>,
}

impl BridgeHandle {
    /// Current state.
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Wait until the bridge reaches `target`. Returns `false` if the bridge
    /// stopped first.
    pub async fn wait_for_state(&self, target: BridgeState) -> bool {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target).await.is_ok()
    }
}

impl BackplaneBridge {
    /// Create a bridge and the handle observing it. Nothing runs until
    /// [`run`](Self::run) is spawned.
    pub fn new(
        backplane: Arc<dyn Backplane>,
        channel: impl Into<String>,
        router: Arc<Router>,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) -> (Self, BridgeHandle) {
        let (state, rx) = watch::channel(BridgeState::Disconnected);
        let bridge = Self {
            backplane,
            channel: channel.into(),
            router,
            backoff: Backoff::new(backoff),
            state,
            cancel,
        };
        (bridge, BridgeHandle { state: rx })
    }

    /// Run until the cancellation token fires.
    #[instrument(skip_all, name = "backplane_bridge", fields(channel = %self.channel))]
    pub async fn run(mut self) {
        loop {
            self.set_state(BridgeState::Connecting);
            let subscribed = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.backplane.subscribe(&self.channel) => result,
            };

            match subscribed {
                Ok(subscription) => {
                    self.backoff.reset();
                    self.set_state(BridgeState::Subscribed);
                    gauge!(BRIDGE_SUBSCRIBED).set(1.0);

                    let exit = self.pump(subscription).await;
                    gauge!(BRIDGE_SUBSCRIBED).set(0.0);
                    match exit {
                        PumpExit::Cancelled => break,
                        PumpExit::Lost(err) => warn!(error = %err, "backplane subscription lost"),
                    }
                }
                Err(err) => warn!(error = %err, "backplane subscribe failed"),
            }

            self.set_state(BridgeState::Disconnected);
            let delay = self.backoff.next_delay();
            counter!(BRIDGE_RECONNECTS_TOTAL).increment(1);
            info!(
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting to backplane"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.set_state(BridgeState::Disconnected);
        info!("backplane bridge stopped");
    }

    async fn pump(&self, mut subscription: Subscription) -> PumpExit {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PumpExit::Cancelled,
                item = subscription.next() => item,
            };
            match next {
                Some(Ok(bytes)) => self.deliver(&bytes),
                Some(Err(err)) => return PumpExit::Lost(err),
                None => {
                    return PumpExit::Lost(BackplaneError::ConnectionLost(
                        "subscription ended".to_string(),
                    ));
                }
            }
        }
    }

    fn deliver(&self, bytes: &[u8]) {
        match Event::decode(bytes) {
            Ok(event) => {
                let report = self.router.publish_local(&event);
                debug!(recipients = report.recipients, "bridged envelope");
            }
            Err(err) => {
                counter!(ENVELOPES_MALFORMED_TOTAL).increment(1);
                warn!(error = %err, len = bytes.len(), "dropping malformed envelope");
            }
        }
    }

    fn set_state(&self, state: BridgeState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "bridge state changed");
        }
    }
}
