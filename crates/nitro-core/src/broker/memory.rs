//! In-process broker
//!
//! Subscribers live in an event-keyed map behind an async read-write
//! lock. Publish fans out under the read lock, so deliveries for one
//! event keep their publish order and subscribe/unsubscribe wait for
//! in-flight fan-outs. Each subscription owns a reaper task that removes
//! it when the exit signal fires.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::{Broker, ErrorHandler, Handler, Message, SubscribeOptions, Subscriber};

struct Subscription {
    id: Uuid,
    handler: Handler,
    error_handler: Option<ErrorHandler>,
}

#[derive(Default)]
struct State {
    connected: bool,
    address: String,
    subscribers: HashMap<String, Vec<Subscription>>,
}

/// Local pub/sub broker
pub struct MemoryBroker {
    state: Arc<RwLock<State>>,
}

impl MemoryBroker {
    /// Create a disconnected broker
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn address(&self) -> String {
        self.state
            .try_read()
            .map(|state| state.address.clone())
            .unwrap_or_default()
    }

    async fn connect(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.connected {
            return Ok(());
        }
        // loopback with a synthesized port, as a real broker would report
        let port = 10000 + rand::thread_rng().gen_range(0..20000);
        state.address = format!("127.0.0.1:{port}");
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.connected = false;
        Ok(())
    }

    async fn publish(&self, event: &str, message: &Message) -> Result<()> {
        // the read lock is held across the fan-out: publishes for one
        // event serialize, subscribe/unsubscribe wait for delivery
        let state = self.state.read().await;
        if !state.connected {
            return Err(Error::not_connected("broker is not connected"));
        }

        let Some(subscriptions) = state.subscribers.get(event) else {
            return Ok(());
        };

        for subscription in subscriptions {
            if let Err(err) = (subscription.handler)(message.clone()).await {
                match &subscription.error_handler {
                    Some(error_handler) => error_handler(message, &err),
                    None => {
                        tracing::warn!(event = %event, error = %err, "subscriber handler failed")
                    }
                }
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        event: &str,
        handler: Handler,
        opts: SubscribeOptions,
    ) -> Result<Box<dyn Subscriber>> {
        let id = Uuid::new_v4();
        {
            let mut state = self.state.write().await;
            if !state.connected {
                return Err(Error::not_connected("broker is not connected"));
            }
            state
                .subscribers
                .entry(event.to_string())
                .or_default()
                .push(Subscription {
                    id,
                    handler,
                    error_handler: opts.error_handler,
                });
        }

        let (exit_tx, exit_rx) = mpsc::channel(1);
        tokio::spawn(reaper(
            Arc::clone(&self.state),
            event.to_string(),
            id,
            exit_rx,
        ));

        Ok(Box::new(MemorySubscriber {
            event: event.to_string(),
            exit: exit_tx,
        }))
    }
}

/// Waits for the exit signal, removes the subscription under the write
/// lock, then acknowledges so unsubscribe can return.
async fn reaper(
    state: Arc<RwLock<State>>,
    event: String,
    id: Uuid,
    mut exit: mpsc::Receiver<oneshot::Sender<()>>,
) {
    let Some(ack) = exit.recv().await else {
        // subscriber dropped without unsubscribing; leave it registered
        return;
    };

    let mut state = state.write().await;
    if let Some(subscriptions) = state.subscribers.get_mut(&event) {
        subscriptions.retain(|s| s.id != id);
        if subscriptions.is_empty() {
            state.subscribers.remove(&event);
        }
    }
    let _ = ack.send(());
}

struct MemorySubscriber {
    event: String,
    exit: mpsc::Sender<oneshot::Sender<()>>,
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    fn event(&self) -> &str {
        &self.event
    }

    async fn unsubscribe(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.exit.send(ack_tx).await.is_err() {
            // reaper already ran, nothing left to remove
            return Ok(());
        }
        let _ = ack_rx.await;
        Ok(())
    }
}
