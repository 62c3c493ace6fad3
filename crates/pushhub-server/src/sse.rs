//! Server-Sent Events stream sink.
//!
//! Each `GET /sse` request registers one connection and streams its mailbox
//! as `data:` frames. Dropping the response stream (client went away, or the
//! connection was closed on shutdown) unregisters the connection.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use pushhub_core::{ClientId, ConnectionId};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::connection::Drain;
use crate::registry::ConnectionRegistry;
use crate::server::AppState;

/// Response header carrying the (possibly generated) client ID.
pub const CLIENT_ID_HEADER: &str = "x-client-id";
/// Response header carrying the connection ID.
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// Query string of `GET /sse`.
#[derive(Debug, Default, Deserialize)]
pub struct SseParams {
    /// Client to register as; generated when absent or empty.
    pub id: Option<String>,
}

/// Unregisters its connection when the response stream is dropped.
struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    connection_id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        debug!(connection_id = %self.connection_id, "event stream ended");
        self.registry.unregister(&self.connection_id);
    }
}

/// Build a `data:` frame. SSE cannot carry bare carriage returns, so they
/// are normalized to line feeds; each line becomes its own `data:` field.
pub fn data_frame(payload: &str) -> SseEvent {
    if payload.contains('\r') {
        SseEvent::default().data(payload.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        SseEvent::default().data(payload)
    }
}

fn event_stream(
    guard: ConnectionGuard,
    hello: String,
    mut drain: Drain,
) -> impl futures::Stream<Item = Result<SseEvent, Infallible>> + Send + 'static {
    async_stream::stream! {
        let _guard = guard;
        yield Ok(SseEvent::default().event("connected").data(hello));
        while let Some(payload) = drain.next().await {
            yield Ok(data_frame(&payload));
        }
    }
}

fn set_header(response: &mut Response, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            let _ = response
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
        Err(_) => warn!(header = name, "id is not a valid header value, header omitted"),
    }
}

/// GET /sse
pub async fn sse_handler(State(state): State<AppState>, Query(params): Query<SseParams>) -> Response {
    let registry = state.hub.registry().clone();
    if registry.connection_count() >= state.max_connections {
        warn!(
            max_connections = state.max_connections,
            "connection limit reached, rejecting event stream"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let client_id = ClientId::or_generate(params.id.as_deref());
    let connection = state.hub.register(Some(client_id.clone()));
    let connection_id = connection.id().clone();
    let guard = ConnectionGuard {
        registry,
        connection_id: connection_id.clone(),
    };
    let Some(drain) = connection.drain() else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let hello = json!({
        "clientId": client_id,
        "connectionId": connection_id,
        "connectedAt": chrono::Utc::now().to_rfc3339(),
    })
    .to_string();

    let keep_alive = KeepAlive::new().interval(Duration::from_secs(state.keep_alive_secs.max(1)));
    let mut response = Sse::new(event_stream(guard, hello, drain))
        .keep_alive(keep_alive)
        .into_response();
    set_header(&mut response, CLIENT_ID_HEADER, client_id.as_str());
    set_header(&mut response, CONNECTION_ID_HEADER, connection_id.as_str());
    response
}
