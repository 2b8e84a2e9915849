//! Service discovery
//!
//! A [`Registry`] maps service names to versioned [`Service`] records,
//! each carrying the nodes (address + metadata) the service runs on and
//! the endpoints it exposes. Records registered with a TTL expire on
//! their own; watchers observe every change as a stream of [`Event`]s.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod memory;

pub use memory::MemoryRegistry;

/// One running instance of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id
    pub id: String,
    /// Dialable address
    pub address: String,
    /// Free-form node metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// A callable endpoint advertised by a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint name, `Type.Method`
    pub name: String,
    /// Request schema name, if advertised
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request: String,
    /// Response schema name, if advertised
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response: String,
}

/// A versioned service record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Service name
    pub name: String,
    /// Version label; records are kept per name and version
    pub version: String,
    /// Free-form service metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Endpoints the service exposes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,
    /// Nodes the service runs on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
}

/// What happened to a service record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// First registration under a name
    Create,
    /// Re-registration of an existing name
    Update,
    /// Deregistration or TTL expiry
    Delete,
}

/// A change observed by a watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The kind of change
    pub action: EventAction,
    /// The record after (or, for deletes, before) the change
    pub service: Service,
}

/// Options for a registration
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Expire the record this long after registration; `None` never expires
    pub ttl: Option<Duration>,
}

/// Options for a watch
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Only deliver events for this service name
    pub service: Option<String>,
}

/// Name-to-record store with change notification
#[async_trait]
pub trait Registry: Send + Sync {
    /// Short registry name, e.g. `"memory"`
    fn name(&self) -> &'static str;

    /// Add or refresh the record for `service.name`/`service.version`
    async fn register(&self, service: &Service, opts: RegisterOptions) -> Result<()>;

    /// Remove the record for `service.name`/`service.version`
    async fn deregister(&self, service: &Service) -> Result<()>;

    /// All live versions registered under `name`
    ///
    /// Fails `NotFound` when nothing is registered.
    async fn lookup(&self, name: &str) -> Result<Vec<Service>>;

    /// Every live record in the registry
    async fn list(&self) -> Result<Vec<Service>>;

    /// Observe changes as they happen
    async fn watch(&self, opts: WatchOptions) -> Result<Box<dyn Watcher>>;
}

/// Change stream over registry events
///
/// A watcher that falls too far behind is force-closed by the registry;
/// its next [`Watcher::next`] call fails `Closed`.
#[async_trait]
pub trait Watcher: Send {
    /// Wait for the next event
    async fn next(&mut self) -> Result<Event>;

    /// Stop watching; buffered events are discarded
    fn stop(&mut self);
}
