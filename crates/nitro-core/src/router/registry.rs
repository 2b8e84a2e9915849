//! Registry-backed routing

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    registry::Registry,
};

use super::{LookupOptions, Route, Router};

/// Router that resolves services through a [`Registry`]
///
/// Every node of every live version becomes one route.
pub struct RegistryRouter {
    registry: Arc<dyn Registry>,
}

impl RegistryRouter {
    /// Route through `registry`
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Router for RegistryRouter {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn lookup(&self, service: &str, opts: LookupOptions) -> Result<Vec<Route>> {
        if let Some(address) = opts.address_override() {
            return Ok(vec![Route {
                service: service.to_string(),
                address: address.to_string(),
                router: "registry".to_string(),
                ..Default::default()
            }]);
        }

        let services = self.registry.lookup(service).await?;
        let routes: Vec<Route> = services
            .iter()
            .flat_map(|svc| {
                svc.nodes.iter().map(|node| Route {
                    service: svc.name.clone(),
                    address: node.address.clone(),
                    router: "registry".to_string(),
                    metadata: node.metadata.clone(),
                    ..Default::default()
                })
            })
            .collect();

        if routes.is_empty() {
            return Err(Error::not_found(format!("no nodes for service {service}")));
        }
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::{MemoryRegistry, Node, RegisterOptions, Service};

    fn service(name: &str, addresses: &[&str]) -> Service {
        Service {
            name: name.to_string(),
            version: "latest".to_string(),
            nodes: addresses
                .iter()
                .enumerate()
                .map(|(i, address)| Node {
                    id: format!("{name}-{i}"),
                    address: address.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lookup_flattens_nodes() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register(&service("greeter", &["a:1", "b:2"]), RegisterOptions::default())
            .await
            .unwrap();

        let router = RegistryRouter::new(registry);
        let routes = router
            .lookup("greeter", LookupOptions::default())
            .await
            .unwrap();
        let addresses: Vec<&str> = routes.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains(&"a:1"));
        assert!(addresses.contains(&"b:2"));
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() {
        let router = RegistryRouter::new(Arc::new(MemoryRegistry::new()));
        let err = router
            .lookup("nope", LookupOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_address_override_skips_registry() {
        let router = RegistryRouter::new(Arc::new(MemoryRegistry::new()));
        let routes = router
            .lookup(
                "anything",
                LookupOptions {
                    address: Some("fixed:1234".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(routes[0].address, "fixed:1234");
    }

    #[tokio::test]
    async fn test_service_with_no_nodes_is_not_found() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register(&service("hollow", &[]), RegisterOptions::default())
            .await
            .unwrap();

        let router = RegistryRouter::new(registry);
        let err = router
            .lookup("hollow", LookupOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
