//! # pushhub-core
//!
//! Foundation types shared by every push hub crate:
//!
//! - **Branded IDs**: [`ClientId`] and [`ConnectionId`] as newtypes for type safety
//! - **Events**: [`Event`] with a [`Target`] (one client or broadcast) and an opaque payload
//! - **Envelope**: the JSON wire form carried over the backplane
//! - **Errors**: [`EnvelopeError`], [`BackplaneError`], [`PublishError`] via `thiserror`
//! - **Backoff**: bounded exponential backoff with jitter for reconnect loops

#![deny(unsafe_code)]

pub mod backoff;
pub mod envelope;
pub mod errors;
pub mod ids;

pub use backoff::{Backoff, BackoffConfig};
pub use envelope::{Event, Target};
pub use errors::{BackplaneError, EnvelopeError, PublishError};
pub use ids::{ClientId, ConnectionId};
