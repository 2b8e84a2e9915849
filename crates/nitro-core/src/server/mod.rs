//! RPC server
//!
//! [`RpcServer`] binds a transport listener, announces itself in the
//! registry, then accepts links and serves them one task each. Requests
//! dispatch to registered endpoint handlers; event envelopes feed the
//! broker; handler failures go back as error envelopes and a panicking
//! handler never takes the worker down.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
    time::Duration,
};

use futures_util::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::{
    broker::{self, Broker, MemoryBroker, SubscribeOptions, Subscriber},
    codec::{self, Codec, Connection, Envelope, MessageType, CONTENT_TYPE_JSON, HEADER_CONTENT_TYPE},
    context::Context,
    error::{Error, ErrorKind, Result},
    registry::{Endpoint, MemoryRegistry, Node, RegisterOptions, Registry, Service},
    transport::{Link, SocketTransport, Transport},
};

/// Future returned by an erased endpoint handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>;

/// An endpoint handler after type erasure: wire body in, wire body out
pub type EndpointHandler = Arc<dyn Fn(Context, Vec<u8>) -> HandlerFuture + Send + Sync>;

/// Components and settings the server is built from
pub struct ServerOptions {
    /// Service name announced to the registry
    pub name: String,
    /// Version label announced to the registry
    pub version: String,
    /// Listen address; empty lets the transport pick one
    pub address: String,
    /// Content type this server speaks on its links
    pub content_type: String,
    /// Where the server announces itself
    pub registry: Arc<dyn Registry>,
    /// Delivery path for subscriptions and inbound event envelopes
    pub broker: Arc<dyn Broker>,
    /// Accepts inbound links
    pub transport: Arc<dyn Transport>,
    /// TTL for the registry record; `None` never expires
    pub register_ttl: Option<Duration>,
    /// How long stop waits for in-flight workers
    pub stop_grace: Duration,
    /// Metadata announced with the service record
    pub metadata: HashMap<String, String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "nitro".to_string(),
            version: "latest".to_string(),
            address: String::new(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            registry: Arc::new(MemoryRegistry::new()),
            broker: Arc::new(MemoryBroker::new()),
            transport: Arc::new(SocketTransport::new()),
            register_ttl: None,
            stop_grace: Duration::from_secs(5),
            metadata: HashMap::new(),
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    workers: TaskTracker,
    service: Service,
    address: String,
}

/// Accept loop, dispatch and lifecycle for one service
pub struct RpcServer {
    opts: ServerOptions,
    endpoints: Arc<RwLock<HashMap<String, EndpointHandler>>>,
    pending_subs: tokio::sync::Mutex<Vec<(String, broker::Handler, SubscribeOptions)>>,
    active_subs: tokio::sync::Mutex<Vec<Box<dyn Subscriber>>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl RpcServer {
    /// Build a server over the given components
    pub fn new(opts: ServerOptions) -> Self {
        Self {
            opts,
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            pending_subs: tokio::sync::Mutex::new(Vec::new()),
            active_subs: tokio::sync::Mutex::new(Vec::new()),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// The server's components and settings
    pub fn options(&self) -> &ServerOptions {
        &self.opts
    }

    /// Rename the service; takes effect on the next start
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.opts.name = name.into();
    }

    /// The bound listen address while running
    pub async fn address(&self) -> Option<String> {
        self.running.lock().await.as_ref().map(|r| r.address.clone())
    }

    /// Bind a typed handler as `endpoint`
    ///
    /// The handler sees a decoded request and returns a typed response;
    /// wire bodies never reach user code. Registration is idempotent:
    /// re-registering a name replaces the prior binding.
    pub fn register_endpoint<Req, Rsp, F, Fut>(&self, endpoint: &str, handler: F) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Rsp: Serialize + 'static,
        F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Rsp>> + Send + 'static,
    {
        if endpoint.is_empty() {
            return Err(Error::bad_request("endpoint name is empty"));
        }

        let content_type = self.opts.content_type.clone();
        let handler = Arc::new(handler);
        let erased: EndpointHandler = Arc::new(move |ctx, body| {
            let handler = Arc::clone(&handler);
            let content_type = content_type.clone();
            Box::pin(async move {
                let request: Req = codec::decode_body(&content_type, &body)?;
                let response = handler(ctx, request).await?;
                codec::encode_body(&content_type, &response)
            })
        });

        self.endpoints
            .write()
            .unwrap()
            .insert(endpoint.to_string(), erased);
        Ok(())
    }

    /// Bind a typed handler to broadcast `event`
    ///
    /// Subscriptions registered before start are queued and attached to
    /// the broker when the server starts.
    pub async fn subscribe<Msg, F, Fut>(&self, event: &str, handler: F) -> Result<()>
    where
        Msg: DeserializeOwned + Send + 'static,
        F: Fn(Context, Msg) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if event.is_empty() {
            return Err(Error::bad_request("event name is empty"));
        }

        let content_type = self.opts.content_type.clone();
        let handler = Arc::new(handler);
        let wrapped: broker::Handler = Arc::new(move |message: broker::Message| {
            let handler = Arc::clone(&handler);
            let content_type = content_type.clone();
            Box::pin(async move {
                let ctx = Context::with_metadata(message.headers.clone());
                let payload: Msg = codec::decode_body(&content_type, &message.body)?;
                handler(ctx, payload).await
            })
        });

        let mut running = self.running.lock().await;
        if running.is_some() {
            let subscriber = self
                .opts
                .broker
                .subscribe(event, wrapped, SubscribeOptions::default())
                .await?;
            self.active_subs.lock().await.push(subscriber);
        } else {
            self.pending_subs.lock().await.push((
                event.to_string(),
                wrapped,
                SubscribeOptions::default(),
            ));
        }
        Ok(())
    }

    /// Bind the transport, announce to the registry, start accepting
    ///
    /// Idempotent: a second start while running is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let listener = self.opts.transport.listen(&self.opts.address).await?;
        let address = listener.address();

        self.opts.broker.connect().await?;

        // attach subscriptions queued before start
        {
            let mut pending = self.pending_subs.lock().await;
            let mut active = self.active_subs.lock().await;
            for (event, handler, sub_opts) in pending.drain(..) {
                let subscriber = self.opts.broker.subscribe(&event, handler, sub_opts).await?;
                active.push(subscriber);
            }
        }

        let service = self.service_record(&address);
        self.opts
            .registry
            .register(
                &service,
                RegisterOptions {
                    ttl: self.opts.register_ttl,
                },
            )
            .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = TaskTracker::new();

        let wire_codec = codec::for_content_type(&self.opts.content_type)?;
        tracing::info!(
            service = %service.name,
            address = %address,
            transport = %self.opts.transport.name(),
            "server started"
        );

        workers.spawn(accept_loop(
            listener,
            Arc::clone(&self.endpoints),
            Arc::clone(&self.opts.broker),
            wire_codec,
            workers.clone(),
            shutdown_rx,
        ));

        *running = Some(Running {
            shutdown: shutdown_tx,
            workers,
            service,
            address,
        });
        Ok(())
    }

    /// Stop accepting, drain workers, withdraw from the registry
    ///
    /// Idempotent: stopping a stopped server is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        let _ = running.shutdown.send(true);
        running.workers.close();
        if tokio::time::timeout(self.opts.stop_grace, running.workers.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                service = %running.service.name,
                grace = ?self.opts.stop_grace,
                "workers did not drain within the grace period"
            );
        }

        for subscriber in self.active_subs.lock().await.drain(..) {
            let _ = subscriber.unsubscribe().await;
        }

        if let Err(err) = self.opts.registry.deregister(&running.service).await {
            tracing::warn!(service = %running.service.name, error = %err, "deregister failed");
        }
        self.opts.broker.disconnect().await?;

        tracing::info!(service = %running.service.name, "server stopped");
        Ok(())
    }

    fn service_record(&self, address: &str) -> Service {
        let mut endpoints: Vec<Endpoint> = self
            .endpoints
            .read()
            .unwrap()
            .keys()
            .map(|name| Endpoint {
                name: name.clone(),
                ..Default::default()
            })
            .collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));

        Service {
            name: self.opts.name.clone(),
            version: self.opts.version.clone(),
            metadata: self.opts.metadata.clone(),
            endpoints,
            nodes: vec![Node {
                id: format!("{}-{}", self.opts.name, Uuid::new_v4()),
                address: address.to_string(),
                metadata: HashMap::new(),
            }],
        }
    }
}

async fn accept_loop(
    listener: Box<dyn crate::transport::Listener>,
    endpoints: Arc<RwLock<HashMap<String, EndpointHandler>>>,
    broker: Arc<dyn Broker>,
    wire_codec: Arc<dyn Codec>,
    workers: TaskTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok(link) => {
                        workers.spawn(serve_link(
                            link,
                            Arc::clone(&endpoints),
                            Arc::clone(&broker),
                            Arc::clone(&wire_codec),
                            shutdown.clone(),
                        ));
                    }
                    Err(err) if err.kind() == ErrorKind::Closed => break,
                    Err(err) => {
                        tracing::error!(error = %err, "accept failed");
                        break;
                    }
                }
            }
        }
    }
    let _ = listener.close().await;
}

/// Serve one link: requests dispatch in arrival order, one in flight
async fn serve_link(
    link: Box<dyn Link>,
    endpoints: Arc<RwLock<HashMap<String, EndpointHandler>>>,
    broker: Arc<dyn Broker>,
    wire_codec: Arc<dyn Codec>,
    mut shutdown: watch::Receiver<bool>,
) {
    let conn = Connection::new(link, wire_codec);
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            message = conn.read() => message,
        };

        let (envelope, body) = match message {
            Ok(message) => message,
            Err(err) => {
                if err.kind() != ErrorKind::Closed {
                    tracing::debug!(error = %err, "link read failed");
                }
                break;
            }
        };

        match envelope.message_type {
            MessageType::Request => {
                if let Err(err) = handle_request(&conn, &endpoints, envelope, body).await {
                    tracing::debug!(error = %err, "reply write failed");
                    break;
                }
            }
            MessageType::Event => {
                let event = if envelope.endpoint.is_empty() {
                    envelope.target.clone()
                } else {
                    envelope.endpoint.clone()
                };
                let message = broker::Message {
                    headers: envelope.headers,
                    body,
                };
                if let Err(err) = broker.publish(&event, &message).await {
                    tracing::warn!(event = %event, error = %err, "publish from link failed");
                }
            }
            other => {
                tracing::debug!(message_type = other.as_str(), "ignoring unexpected message");
            }
        }
    }
    let _ = conn.close().await;
}

async fn handle_request(
    conn: &Connection,
    endpoints: &RwLock<HashMap<String, EndpointHandler>>,
    envelope: Envelope,
    body: Vec<u8>,
) -> Result<()> {
    let handler = endpoints.read().unwrap().get(&envelope.endpoint).cloned();

    let Some(handler) = handler else {
        let err = Error::not_found(format!("unknown endpoint {}", envelope.endpoint));
        return write_error(conn, &envelope, &err).await;
    };

    let ctx = Context::with_metadata(envelope.headers.clone());
    let outcome = std::panic::AssertUnwindSafe(handler(ctx, body))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(response)) => {
            let mut headers = HashMap::new();
            headers.insert(
                HEADER_CONTENT_TYPE.to_string(),
                conn.codec().content_type().to_string(),
            );
            let reply = Envelope {
                id: envelope.id,
                message_type: MessageType::Response,
                target: envelope.target,
                endpoint: envelope.endpoint,
                method: envelope.method,
                error: String::new(),
                headers,
            };
            conn.write(&reply, &response).await
        }
        Ok(Err(err)) => write_error(conn, &envelope, &err).await,
        Err(_panic) => {
            tracing::error!(endpoint = %envelope.endpoint, "handler panicked");
            let err = Error::internal(format!("handler {} panicked", envelope.endpoint));
            write_error(conn, &envelope, &err).await
        }
    }
}

async fn write_error(conn: &Connection, request: &Envelope, err: &Error) -> Result<()> {
    let reply = Envelope {
        id: request.id,
        message_type: MessageType::Error,
        target: request.target.clone(),
        endpoint: request.endpoint.clone(),
        method: request.method.clone(),
        error: err.to_wire(),
        headers: HashMap::new(),
    };
    conn.write(&reply, &[]).await
}
