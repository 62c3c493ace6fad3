//! One process's view of the push hub: registry, router and bridge wired
//! together and started.

use std::sync::Arc;

use parking_lot::Mutex;
use pushhub_backplane::Backplane;
use pushhub_core::{ClientId, ConnectionId, Event, PublishError, Target};
use pushhub_settings::{BridgeSettings, HubSettings};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bridge::{BackplaneBridge, BridgeHandle, BridgeState};
use crate::connection::Connection;
use crate::registry::ConnectionRegistry;
use crate::router::Router;

/// A started push hub.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    bridge: BridgeHandle,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Build the registry and router and spawn the backplane bridge.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(hub: &HubSettings, bridge: &BridgeSettings, backplane: Arc<dyn Backplane>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(hub.effective_mailbox_capacity()));
        let router = Arc::new(Router::new(
            registry.clone(),
            backplane.clone(),
            hub.channel.clone(),
        ));
        let cancel = CancellationToken::new();
        let (bridge_task, handle) = BackplaneBridge::new(
            backplane,
            hub.channel.clone(),
            router.clone(),
            bridge.backoff_config(),
            cancel.child_token(),
        );
        let task = tokio::spawn(bridge_task.run());
        info!(
            channel = %hub.channel,
            mailbox_capacity = registry.mailbox_capacity(),
            "hub started"
        );

        Self {
            registry,
            router,
            bridge: handle,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Open a connection. An absent or empty client ID gets a fresh one.
    pub fn register(&self, client_id: Option<ClientId>) -> Arc<Connection> {
        let client_id = client_id
            .filter(|id| !id.is_empty())
            .unwrap_or_default();
        self.registry.register(client_id)
    }

    /// Remove a connection. Unknown IDs are ignored.
    pub fn unregister(&self, connection_id: &ConnectionId) {
        self.registry.unregister(connection_id);
    }

    /// Publish `payload` to `target` through the backplane.
    pub async fn publish(&self, target: Target, payload: impl Into<String>) -> Result<(), PublishError> {
        self.router.publish(&Event::new(target, payload)).await
    }

    /// Publish `payload` to every connection in every process.
    pub async fn broadcast(&self, payload: impl Into<String>) -> Result<(), PublishError> {
        self.publish(Target::Broadcast, payload).await
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Current bridge state.
    pub fn bridge_state(&self) -> BridgeState {
        self.bridge.state()
    }

    /// Handle for observing the bridge.
    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    /// Wait until the bridge holds a live subscription. Returns `false` if
    /// the hub was shut down first.
    pub async fn wait_until_subscribed(&self) -> bool {
        self.bridge.wait_for_state(BridgeState::Subscribed).await
    }

    /// Stop the bridge, wait for it to finish its current delivery, then
    /// close every remaining connection. Later calls are no-ops.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };
        let _ = task.await;
        let closed = self.registry.close_all();
        info!(closed, "hub shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has started.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
