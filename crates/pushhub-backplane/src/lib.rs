//! # pushhub-backplane
//!
//! The backplane is the shared publish/subscribe transport every cooperating
//! push hub process attaches to. The hub only relies on two capabilities:
//!
//! - `publish(channel, bytes)`: hand one message to every current subscriber
//!   of `channel`, in any process
//! - `subscribe(channel)`: receive those messages as a stream
//!
//! A [`Subscription`] that yields an `Err` or ends is lost; the subscriber is
//! expected to resubscribe. Nothing published while a process holds no
//! subscription is replayed to it.
//!
//! [`MemoryBackplane`] implements the trait in-process. Clones share one hub,
//! so two hubs built on clones of the same backplane behave like two server
//! processes on one broker.

#![deny(unsafe_code)]

pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use pushhub_core::BackplaneError;

pub use memory::MemoryBackplane;

/// Live stream of raw messages from one channel.
pub type Subscription = Pin<Box<dyn Stream<Item = Result<Bytes, BackplaneError>> + Send>>;

/// Publish/subscribe transport shared across processes.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Publish one message to every current subscriber of `channel`.
    ///
    /// Succeeds even when nobody is subscribed.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackplaneError>;

    /// Open a subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackplaneError>;
}
