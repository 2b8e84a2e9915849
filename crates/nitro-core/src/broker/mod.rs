//! Asynchronous messaging
//!
//! A [`Broker`] fans published [`Message`]s out to the subscribers of an
//! event. Both publish and subscribe fail `NotConnected` until
//! [`Broker::connect`] has run. The in-process [`MemoryBroker`] is the
//! default; remote brokers plug in behind the same trait.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;

use crate::error::{Error, Result};

mod memory;

pub use memory::MemoryBroker;

/// A broadcast message: string headers plus an opaque body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Caller metadata delivered alongside the body
    pub headers: HashMap<String, String>,
    /// Encoded payload
    pub body: Vec<u8>,
}

/// Future returned by a subscription handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Processes one delivered message
pub type Handler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

/// Receives handler errors instead of the log, when configured
pub type ErrorHandler = Arc<dyn Fn(&Message, &Error) + Send + Sync>;

/// Options for a subscription
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Where handler errors go; unset means they are logged
    pub error_handler: Option<ErrorHandler>,
}

/// Publish/subscribe seam
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short broker name, e.g. `"memory"`
    fn name(&self) -> &'static str;

    /// The broker's address, once connected
    fn address(&self) -> String;

    /// Open the broker; idempotent
    async fn connect(&self) -> Result<()>;

    /// Close the broker; idempotent
    async fn disconnect(&self) -> Result<()>;

    /// Deliver `message` to every current subscriber of `event`
    async fn publish(&self, event: &str, message: &Message) -> Result<()>;

    /// Register `handler` for `event`
    async fn subscribe(
        &self,
        event: &str,
        handler: Handler,
        opts: SubscribeOptions,
    ) -> Result<Box<dyn Subscriber>>;
}

/// A live subscription
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// The event subscribed to
    fn event(&self) -> &str;

    /// Remove the subscription
    ///
    /// Once this returns the handler will not be invoked again.
    async fn unsubscribe(&self) -> Result<()>;
}
