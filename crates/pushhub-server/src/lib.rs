//! # pushhub-server
//!
//! The core of the push hub and its HTTP surface:
//!
//! - [`connection`]: one delivery channel with a bounded, non-blocking mailbox
//! - [`registry`]: client → connections map, the only shared mutable state
//! - [`router`]: publish to the backplane, deliver locally into mailboxes
//! - [`bridge`]: standing backplane subscription with reconnect backoff
//! - [`hub`]: wires the above together for one process
//! - [`sse`] and [`server`]: Server-Sent Events sink and Axum routes
//!
//! Publishing never touches mailboxes directly. An event is encoded onto the
//! backplane, and every process (the publisher included) delivers it when
//! its bridge receives it back.

#![deny(unsafe_code)]

pub mod bridge;
pub mod connection;
pub mod error;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod sse;

pub use bridge::{BackplaneBridge, BridgeHandle, BridgeState};
pub use connection::{Connection, ConnectionState, Drain, Payload};
pub use error::{PublishRejection, ServerError};
pub use hub::Hub;
pub use registry::ConnectionRegistry;
pub use router::{DeliveryReport, Router};
pub use server::PushServer;
pub use shutdown::ShutdownCoordinator;
