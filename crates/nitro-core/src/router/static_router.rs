//! Static routing
//!
//! The degenerate router for running without discovery: every lookup
//! synthesizes a single route. With a configured default address all
//! services resolve there; without one the service name itself is used
//! as the address, which suits transports whose addresses are names.

use async_trait::async_trait;

use crate::error::Result;

use super::{LookupOptions, Route, Router};

/// Where static lookups land unless configured otherwise
pub const DEFAULT_STATIC_ADDRESS: &str = "unix:///tmp/nitro.sock";

/// Router that synthesizes routes instead of resolving them
pub struct StaticRouter {
    address: Option<String>,
}

impl StaticRouter {
    /// Static router sending everything to [`DEFAULT_STATIC_ADDRESS`]
    pub fn new() -> Self {
        Self {
            address: Some(DEFAULT_STATIC_ADDRESS.to_string()),
        }
    }

    /// Static router sending everything to `address`
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
        }
    }

    /// Static router using each service's name as its address
    pub fn direct() -> Self {
        Self { address: None }
    }
}

impl Default for StaticRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Router for StaticRouter {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn lookup(&self, service: &str, opts: LookupOptions) -> Result<Vec<Route>> {
        let address = match opts.address_override() {
            Some(address) => address.to_string(),
            None => self
                .address
                .clone()
                .unwrap_or_else(|| service.to_string()),
        };

        Ok(vec![Route {
            service: service.to_string(),
            address,
            router: "static".to_string(),
            ..Default::default()
        }])
    }
}
