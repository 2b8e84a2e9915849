//! Route resolution and selection
//!
//! A [`Router`] turns a service name into [`Route`]s; a
//! [`Selector`](selector::Selector) picks one per call. The
//! [`RegistryRouter`] resolves through a [`Registry`](crate::registry::Registry);
//! the [`StaticRouter`] needs no discovery at all.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

mod registry;
pub mod selector;
mod static_router;

pub use registry::RegistryRouter;
pub use selector::{Next, Random, RoundRobin, Selector};
pub use static_router::{StaticRouter, DEFAULT_STATIC_ADDRESS};

/// A resolved destination for a named service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    /// Service the route belongs to
    pub service: String,
    /// Dialable address
    pub address: String,
    /// Gateway address, when traffic is relayed
    pub gateway: String,
    /// Network the route was learned from
    pub network: String,
    /// Router that produced the route
    pub router: String,
    /// Free-form route metadata
    pub metadata: HashMap<String, String>,
}

/// Options for a lookup
#[derive(Debug, Clone, Default)]
pub struct LookupOptions {
    /// Override the resolved address; `"*"` means "pick any"
    pub address: Option<String>,
    /// Restrict to routes learned from this network
    pub network: Option<String>,
}

impl LookupOptions {
    /// An explicit, non-wildcard address override, if one was given
    fn address_override(&self) -> Option<&str> {
        match self.address.as_deref() {
            None | Some("") | Some("*") => None,
            Some(address) => Some(address),
        }
    }
}

/// Resolves service names to routes
#[async_trait]
pub trait Router: Send + Sync {
    /// Short router name, e.g. `"registry"`
    fn name(&self) -> &'static str;

    /// Resolve `service` to the routes it can be reached on
    ///
    /// Fails `NotFound` when the service cannot be resolved.
    async fn lookup(&self, service: &str, opts: LookupOptions) -> Result<Vec<Route>>;
}
