//! In-memory registry
//!
//! A name → version table behind a read-write lock. Records registered
//! with a TTL are filtered out of reads the moment they lapse and swept
//! out of the table by a background task; both paths emit delete events
//! to watchers.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, Weak,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::{Event, EventAction, Registry, RegisterOptions, Service, Watcher, WatchOptions};

/// Events a watcher may buffer before it is force-closed
pub const WATCHER_BACKLOG: usize = 32;

const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

struct Record {
    service: Service,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() > t).unwrap_or(false)
    }
}

struct WatcherEntry {
    service: Option<String>,
    tx: mpsc::Sender<Event>,
}

struct Inner {
    services: RwLock<HashMap<String, HashMap<String, Record>>>,
    watchers: Mutex<Vec<WatcherEntry>>,
}

impl Inner {
    fn notify(&self, event: &Event) {
        let mut watchers = self.watchers.lock().unwrap();
        watchers.retain(|watcher| {
            if let Some(name) = &watcher.service {
                if name != &event.service.name {
                    return true;
                }
            }
            // a full or hung-up channel force-closes the watcher
            watcher.tx.try_send(event.clone()).is_ok()
        });
    }

    fn sweep(&self) -> Vec<Service> {
        let mut expired = Vec::new();
        let mut services = self.services.write().unwrap();
        for versions in services.values_mut() {
            versions.retain(|_, record| {
                if record.is_expired() {
                    expired.push(record.service.clone());
                    false
                } else {
                    true
                }
            });
        }
        services.retain(|_, versions| !versions.is_empty());
        expired
    }
}

/// Process-local registry backed by a name table
pub struct MemoryRegistry {
    inner: Arc<Inner>,
    sweeper_started: AtomicBool,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                services: RwLock::new(HashMap::new()),
                watchers: Mutex::new(Vec::new()),
            }),
            sweeper_started: AtomicBool::new(false),
        }
    }

    fn ensure_sweeper(&self) {
        if self.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            sweeper(inner).await;
        });
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn sweeper(inner: Weak<Inner>) {
    let mut tick = tokio::time::interval(SWEEP_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        for service in inner.sweep() {
            tracing::debug!(service = %service.name, version = %service.version, "registration expired");
            inner.notify(&Event {
                action: EventAction::Delete,
                service,
            });
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn register(&self, service: &Service, opts: RegisterOptions) -> Result<()> {
        if service.name.is_empty() {
            return Err(Error::bad_request("service name is empty"));
        }
        if opts.ttl.is_some() {
            self.ensure_sweeper();
        }

        let action = {
            let mut services = self.inner.services.write().unwrap();
            let versions = services.entry(service.name.clone()).or_default();
            let action = if versions.values().any(|r| !r.is_expired()) {
                EventAction::Update
            } else {
                EventAction::Create
            };
            versions.insert(
                service.version.clone(),
                Record {
                    service: service.clone(),
                    expires_at: opts.ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            action
        };

        self.inner.notify(&Event {
            action,
            service: service.clone(),
        });
        Ok(())
    }

    async fn deregister(&self, service: &Service) -> Result<()> {
        let removed = {
            let mut services = self.inner.services.write().unwrap();
            let removed = services
                .get_mut(&service.name)
                .and_then(|versions| versions.remove(&service.version));
            if services
                .get(&service.name)
                .map(|versions| versions.is_empty())
                .unwrap_or(false)
            {
                services.remove(&service.name);
            }
            removed
        };

        if let Some(record) = removed {
            self.inner.notify(&Event {
                action: EventAction::Delete,
                service: record.service,
            });
        }
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Vec<Service>> {
        let services = self.inner.services.read().unwrap();
        let live: Vec<Service> = services
            .get(name)
            .map(|versions| {
                versions
                    .values()
                    .filter(|record| !record.is_expired())
                    .map(|record| record.service.clone())
                    .collect()
            })
            .unwrap_or_default();

        if live.is_empty() {
            return Err(Error::not_found(format!("service {name} not registered")));
        }
        Ok(live)
    }

    async fn list(&self) -> Result<Vec<Service>> {
        let services = self.inner.services.read().unwrap();
        let mut all: Vec<Service> = services
            .values()
            .flat_map(|versions| {
                versions
                    .values()
                    .filter(|record| !record.is_expired())
                    .map(|record| record.service.clone())
            })
            .collect();
        all.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        Ok(all)
    }

    async fn watch(&self, opts: WatchOptions) -> Result<Box<dyn Watcher>> {
        let (tx, rx) = mpsc::channel(WATCHER_BACKLOG);
        self.inner.watchers.lock().unwrap().push(WatcherEntry {
            service: opts.service,
            tx,
        });
        Ok(Box::new(MemoryWatcher { rx }))
    }
}

struct MemoryWatcher {
    rx: mpsc::Receiver<Event>,
}

#[async_trait]
impl Watcher for MemoryWatcher {
    async fn next(&mut self) -> Result<Event> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::closed("watcher closed"))
    }

    fn stop(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::Node;

    fn service(name: &str, version: &str, address: &str) -> Service {
        Service {
            name: name.to_string(),
            version: version.to_string(),
            nodes: vec![Node {
                id: format!("{name}-1"),
                address: address.to_string(),
                metadata: HashMap::new(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = MemoryRegistry::new();
        registry
            .register(&service("greeter", "latest", "10.0.0.1:8080"), RegisterOptions::default())
            .await
            .unwrap();

        let found = registry.lookup("greeter").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nodes[0].address, "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_lookup_missing_is_not_found() {
        let registry = MemoryRegistry::new();
        let err = registry.lookup("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_lookup_returns_all_versions() {
        let registry = MemoryRegistry::new();
        registry
            .register(&service("greeter", "v1", "a:1"), RegisterOptions::default())
            .await
            .unwrap();
        registry
            .register(&service("greeter", "v2", "b:2"), RegisterOptions::default())
            .await
            .unwrap();

        let found = registry.lookup("greeter").await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = MemoryRegistry::new();
        let svc = service("greeter", "latest", "a:1");
        registry.register(&svc, RegisterOptions::default()).await.unwrap();
        registry.deregister(&svc).await.unwrap();

        assert!(registry.lookup("greeter").await.is_err());
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let registry = MemoryRegistry::new();
        registry
            .register(
                &service("flash", "latest", "a:1"),
                RegisterOptions {
                    ttl: Some(Duration::from_millis(100)),
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.lookup("flash").await.is_ok());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let err = registry.lookup("flash").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let registry = MemoryRegistry::new();
        registry
            .register(&service("steady", "latest", "a:1"), RegisterOptions { ttl: None })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(registry.lookup("steady").await.is_ok());
    }

    #[tokio::test]
    async fn test_reregister_refreshes_ttl() {
        let registry = MemoryRegistry::new();
        let opts = RegisterOptions {
            ttl: Some(Duration::from_millis(150)),
        };
        registry
            .register(&service("beat", "latest", "a:1"), opts.clone())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        registry
            .register(&service("beat", "latest", "a:1"), opts)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.lookup("beat").await.is_ok());
    }

    #[tokio::test]
    async fn test_watcher_sees_lifecycle() {
        let registry = MemoryRegistry::new();
        let mut watcher = registry.watch(WatchOptions::default()).await.unwrap();

        let svc = service("watched", "latest", "a:1");
        registry.register(&svc, RegisterOptions::default()).await.unwrap();
        registry.register(&svc, RegisterOptions::default()).await.unwrap();
        registry.deregister(&svc).await.unwrap();

        assert_eq!(watcher.next().await.unwrap().action, EventAction::Create);
        assert_eq!(watcher.next().await.unwrap().action, EventAction::Update);
        assert_eq!(watcher.next().await.unwrap().action, EventAction::Delete);
    }

    #[tokio::test]
    async fn test_watcher_filters_by_service() {
        let registry = MemoryRegistry::new();
        let mut watcher = registry
            .watch(WatchOptions {
                service: Some("wanted".to_string()),
            })
            .await
            .unwrap();

        registry
            .register(&service("other", "latest", "a:1"), RegisterOptions::default())
            .await
            .unwrap();
        registry
            .register(&service("wanted", "latest", "b:2"), RegisterOptions::default())
            .await
            .unwrap();

        let event = watcher.next().await.unwrap();
        assert_eq!(event.service.name, "wanted");
    }

    #[tokio::test]
    async fn test_slow_watcher_force_closed() {
        let registry = MemoryRegistry::new();
        let mut watcher = registry.watch(WatchOptions::default()).await.unwrap();

        let svc = service("noisy", "latest", "a:1");
        for _ in 0..(WATCHER_BACKLOG + 8) {
            registry.register(&svc, RegisterOptions::default()).await.unwrap();
        }

        // buffered events drain, then the stream ends
        let mut seen = 0;
        loop {
            match watcher.next().await {
                Ok(_) => seen += 1,
                Err(err) => {
                    assert_eq!(err.kind(), ErrorKind::Closed);
                    break;
                }
            }
        }
        assert!(seen <= WATCHER_BACKLOG);
    }

    #[tokio::test]
    async fn test_expiry_emits_delete_event() {
        let registry = MemoryRegistry::new();
        registry
            .register(
                &service("fading", "latest", "a:1"),
                RegisterOptions {
                    ttl: Some(Duration::from_millis(50)),
                },
            )
            .await
            .unwrap();

        let mut watcher = registry.watch(WatchOptions::default()).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), watcher.next())
            .await
            .expect("sweeper should emit a delete")
            .unwrap();
        assert_eq!(event.action, EventAction::Delete);
        assert_eq!(event.service.name, "fading");
    }
}
