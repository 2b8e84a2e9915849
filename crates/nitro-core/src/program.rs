//! Program façade
//!
//! A [`Program`] wires the default component stack together the way an
//! application wants to consume it: name the service, register typed
//! endpoints, subscribe to events, then [`Program::run`]. The same
//! program doubles as a client through [`Program::execute`] and
//! [`Program::broadcast`].

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;

use crate::{
    broker::{Broker, MemoryBroker},
    client::{ClientOptions, RpcClient},
    codec::CONTENT_TYPE_JSON,
    config::Config,
    context::Context,
    error::Result,
    registry::{MemoryRegistry, Registry},
    router::{Random, StaticRouter, DEFAULT_STATIC_ADDRESS},
    server::{RpcServer, ServerOptions},
    transport::{MemoryTransport, SocketTransport, Transport},
};

/// Default address when the memory transport is selected
const DEFAULT_MEMORY_ADDRESS: &str = "memory://nitro";

/// A lifecycle hook; failures abort start or are collected on stop
pub type Hook = Box<dyn Fn() -> Result<()> + Send + Sync>;

#[derive(Default)]
struct Hooks {
    before_start: Vec<Hook>,
    after_start: Vec<Hook>,
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
}

/// A distributed application program
pub struct Program {
    client: RpcClient,
    server: RpcServer,
    broker: Arc<dyn Broker>,
    registry: Arc<dyn Registry>,
    hooks: Hooks,
    shutdown: watch::Sender<bool>,
}

impl Program {
    /// Build a program from the `NITRO_*` environment
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    /// Build a program from an explicit config
    pub fn with_config(config: Config) -> Self {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let registry: Arc<dyn Registry> = match config.registry.as_str() {
            "memory" => Arc::new(MemoryRegistry::new()),
            other => {
                tracing::warn!(registry = %other, "unknown registry, using memory");
                Arc::new(MemoryRegistry::new())
            }
        };

        let (transport, default_address): (Arc<dyn Transport>, &str) =
            match config.transport.as_str() {
                "memory" => (Arc::new(MemoryTransport::new()), DEFAULT_MEMORY_ADDRESS),
                "socket" => (Arc::new(SocketTransport::new()), DEFAULT_STATIC_ADDRESS),
                other => {
                    tracing::warn!(transport = %other, "unknown transport, using socket");
                    (Arc::new(SocketTransport::new()), DEFAULT_STATIC_ADDRESS)
                }
            };
        let address = config
            .server_address
            .unwrap_or_else(|| default_address.to_string());

        let client = RpcClient::new(ClientOptions {
            router: Arc::new(StaticRouter::with_address(address.clone())),
            selector: Arc::new(Random),
            broker: Arc::clone(&broker),
            transport: Arc::clone(&transport),
            content_type: CONTENT_TYPE_JSON.to_string(),
            call: Default::default(),
        });

        let server = RpcServer::new(ServerOptions {
            address,
            registry: Arc::clone(&registry),
            broker: Arc::clone(&broker),
            transport,
            ..Default::default()
        });

        Self {
            client,
            server,
            broker,
            registry,
            hooks: Hooks::default(),
            shutdown: watch::channel(false).0,
        }
    }

    /// Set this program's service name
    pub fn name(&mut self, name: impl Into<String>) {
        self.server.set_name(name);
    }

    /// The RPC client
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// The RPC server
    pub fn server(&self) -> &RpcServer {
        &self.server
    }

    /// The broker shared by client and server
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// The registry the server announces to
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Call `(service, endpoint)` synchronously
    pub async fn execute<Req, Rsp>(&self, service: &str, endpoint: &str, req: &Req) -> Result<Rsp>
    where
        Req: Serialize + Sync,
        Rsp: DeserializeOwned,
    {
        let request = self.client.new_request(service, endpoint, req);
        self.client.call(&Context::background(), &request).await
    }

    /// Publish `msg` to all local subscribers of `event`
    pub async fn broadcast<T: Serialize + Sync>(&self, event: &str, msg: &T) -> Result<()> {
        let message = self.client.new_message(event, msg);
        self.client.publish(&Context::background(), &message).await
    }

    /// Bind a typed handler as `endpoint`
    pub fn register_endpoint<Req, Rsp, F, Fut>(&self, endpoint: &str, handler: F) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Rsp: Serialize + 'static,
        F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Rsp>> + Send + 'static,
    {
        self.server.register_endpoint(endpoint, handler)
    }

    /// Bind a typed handler to broadcast `event`
    pub async fn subscribe<Msg, F, Fut>(&self, event: &str, handler: F) -> Result<()>
    where
        Msg: DeserializeOwned + Send + 'static,
        F: Fn(Context, Msg) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.server.subscribe(event, handler).await
    }

    /// Run a hook before the server starts; a failure aborts start
    pub fn before_start(&mut self, hook: Hook) {
        self.hooks.before_start.push(hook);
    }

    /// Run a hook after the server starts; a failure aborts start
    pub fn after_start(&mut self, hook: Hook) {
        self.hooks.after_start.push(hook);
    }

    /// Run a hook before the server stops
    pub fn before_stop(&mut self, hook: Hook) {
        self.hooks.before_stop.push(hook);
    }

    /// Run a hook after the server stops
    pub fn after_stop(&mut self, hook: Hook) {
        self.hooks.after_stop.push(hook);
    }

    /// Start serving
    pub async fn start(&self) -> Result<()> {
        for hook in &self.hooks.before_start {
            hook()?;
        }
        self.server.start().await?;
        for hook in &self.hooks.after_start {
            hook()?;
        }
        Ok(())
    }

    /// Stop serving
    ///
    /// Stop hooks all run even when one fails; the last failure is
    /// returned.
    pub async fn stop(&self) -> Result<()> {
        let mut failure = None;
        for hook in &self.hooks.before_stop {
            if let Err(err) = hook() {
                failure = Some(err);
            }
        }

        self.server.stop().await?;

        for hook in &self.hooks.after_stop {
            if let Err(err) = hook() {
                failure = Some(err);
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Ask a running [`Program::run`] to return
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Start, serve until interrupted, then stop
    ///
    /// Returns on ctrl-c or [`Program::shutdown`].
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        let mut shutdown = self.shutdown.subscribe();
        if !*shutdown.borrow_and_update() {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, shutting down");
                }
                _ = shutdown.changed() => {}
            }
        }

        self.stop().await
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct HelloRequest {
        name: String,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct HelloResponse {
        message: String,
    }

    fn program_at(address: &str) -> Program {
        Program::with_config(Config {
            server_address: Some(address.to_string()),
            transport: "memory".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_execute_against_own_server() {
        let mut prog = program_at("memory://program-test-self");
        prog.name("helloworld");
        prog.register_endpoint("Handler.Call", |_ctx, req: HelloRequest| async move {
            Ok(HelloResponse {
                message: format!("Hello {}", req.name),
            })
        })
        .unwrap();
        prog.start().await.unwrap();

        let rsp: HelloResponse = prog
            .execute(
                "helloworld",
                "Handler.Call",
                &HelloRequest {
                    name: "Alice".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rsp.message, "Hello Alice");

        prog.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let prog = program_at("memory://program-test-events");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        prog.subscribe("greetings", move |_ctx, _msg: HelloRequest| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        prog.start().await.unwrap();

        prog.broadcast(
            "greetings",
            &HelloRequest {
                name: "Bob".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        prog.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_before_start_hook_aborts() {
        let mut prog = program_at("memory://program-test-hook");
        prog.before_start(Box::new(|| Err(Error::internal("hook failed"))));
        let err = prog.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        // the server never came up
        assert!(prog.server().address().await.is_none());
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown() {
        let mut prog = program_at("memory://program-test-run");
        prog.name("runner");
        let prog = Arc::new(prog);

        let runner = Arc::clone(&prog);
        let handle = tokio::spawn(async move { runner.run().await });

        // wait until the server is up, then ask run to return
        for _ in 0..50 {
            if prog.server().address().await.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        prog.shutdown();

        handle.await.unwrap().unwrap();
        assert!(prog.server().address().await.is_none());
    }
}
