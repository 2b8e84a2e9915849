//! RPC client
//!
//! [`RpcClient`] drives the request path: resolve the service through the
//! router, pick an address with the selector, dial a fresh link, write
//! the request envelope and body, then wait for the reply on the same
//! link. Publishing dispatches through the broker and never touches a
//! transport.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    broker::{self, Broker, MemoryBroker},
    codec::{self, Connection, Envelope, MessageType, CONTENT_TYPE_JSON, HEADER_CONTENT_TYPE},
    context::Context,
    error::{Error, Result},
    router::{LookupOptions, Random, Router, Selector, StaticRouter},
    transport::{DialOptions, SocketTransport, Transport, DEFAULT_DIAL_TIMEOUT},
};

/// Default bound on one whole call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A request addressed to `(service, endpoint)`
///
/// Immutable once built; the body is serialized at call time with the
/// codec the content type selects.
#[derive(Debug, Clone)]
pub struct Request<T> {
    service: String,
    endpoint: String,
    content_type: String,
    body: T,
}

impl<T> Request<T> {
    /// The destination service
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The destination endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The content type encoding the body
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The unserialized body
    pub fn body(&self) -> &T {
        &self.body
    }

    /// Override the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// An event message for broadcast
#[derive(Debug, Clone)]
pub struct Message<T> {
    event: String,
    content_type: String,
    payload: T,
}

impl<T> Message<T> {
    /// The event name
    pub fn event(&self) -> &str {
        &self.event
    }

    /// The content type encoding the payload
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The unserialized payload
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Override the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Per-call knobs
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Total dial attempts; only dial failures consume the budget
    pub retries: usize,
    /// Bound on each dial attempt
    pub dial_timeout: Duration,
    /// Bound on the whole call when the context has no deadline
    pub request_timeout: Duration,
    /// Dial this address instead of resolving one
    pub address: Option<String>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            retries: 1,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            address: None,
        }
    }
}

/// Components and defaults the client is built from
pub struct ClientOptions {
    /// Resolves service names to routes
    pub router: Arc<dyn Router>,
    /// Picks one address per attempt
    pub selector: Arc<dyn Selector>,
    /// Delivery path for published messages
    pub broker: Arc<dyn Broker>,
    /// Opens links to servers
    pub transport: Arc<dyn Transport>,
    /// Content type for new requests and messages
    pub content_type: String,
    /// Baseline call options
    pub call: CallOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            router: Arc::new(StaticRouter::new()),
            selector: Arc::new(Random),
            broker: Arc::new(MemoryBroker::new()),
            transport: Arc::new(SocketTransport::new()),
            content_type: CONTENT_TYPE_JSON.to_string(),
            call: CallOptions::default(),
        }
    }
}

/// Request/publish dispatch path
pub struct RpcClient {
    opts: ClientOptions,
    seq: AtomicU64,
}

impl RpcClient {
    /// Build a client over the given components
    pub fn new(opts: ClientOptions) -> Self {
        Self {
            opts,
            seq: AtomicU64::new(0),
        }
    }

    /// The client's components and defaults
    pub fn options(&self) -> &ClientOptions {
        &self.opts
    }

    /// Build a request with the client's default content type
    pub fn new_request<T>(
        &self,
        service: impl Into<String>,
        endpoint: impl Into<String>,
        body: T,
    ) -> Request<T> {
        Request {
            service: service.into(),
            endpoint: endpoint.into(),
            content_type: self.opts.content_type.clone(),
            body,
        }
    }

    /// Build a message with the client's default content type
    pub fn new_message<T>(&self, event: impl Into<String>, payload: T) -> Message<T> {
        Message {
            event: event.into(),
            content_type: self.opts.content_type.clone(),
            payload,
        }
    }

    /// Perform a synchronous call with the client's default options
    pub async fn call<Req, Rsp>(&self, ctx: &Context, request: &Request<Req>) -> Result<Rsp>
    where
        Req: Serialize + Sync,
        Rsp: DeserializeOwned,
    {
        self.call_with(ctx, request, self.opts.call.clone()).await
    }

    /// Perform a synchronous call
    ///
    /// The context deadline, when present, bounds the whole call;
    /// otherwise `opts.request_timeout` does. Only dial failures are
    /// retried: once the request is on the wire the outcome is final.
    pub async fn call_with<Req, Rsp>(
        &self,
        ctx: &Context,
        request: &Request<Req>,
        opts: CallOptions,
    ) -> Result<Rsp>
    where
        Req: Serialize + Sync,
        Rsp: DeserializeOwned,
    {
        if request.service.is_empty() || request.endpoint.is_empty() {
            return Err(Error::bad_request("service and endpoint must be non-empty"));
        }

        let budget = match ctx.remaining() {
            Some(remaining) if remaining.is_zero() => {
                return Err(Error::timeout("deadline already passed"))
            }
            Some(remaining) => remaining,
            None => opts.request_timeout,
        };

        match tokio::time::timeout(budget, self.call_inner(ctx, request, &opts)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "calling {}.{} exceeded {budget:?}",
                request.service, request.endpoint
            ))),
        }
    }

    async fn call_inner<Req, Rsp>(
        &self,
        ctx: &Context,
        request: &Request<Req>,
        opts: &CallOptions,
    ) -> Result<Rsp>
    where
        Req: Serialize + Sync,
        Rsp: DeserializeOwned,
    {
        let body = codec::encode_body(&request.content_type, &request.body)?;
        let conn = self.connect(&request.service, &request.content_type, opts).await?;

        let envelope = self.request_envelope(ctx, request);
        conn.write(&envelope, &body).await?;

        let reply = conn.read().await;
        let _ = conn.close().await;

        let (reply_envelope, reply_body) = reply?;
        match reply_envelope.message_type {
            MessageType::Error => Err(Error::from_wire(&reply_envelope.error)),
            MessageType::Response => codec::decode_body(&request.content_type, &reply_body),
            other => Err(Error::wire(format!(
                "unexpected {} message in reply",
                other.as_str()
            ))),
        }
    }

    /// Open a long-lived stream to the service
    ///
    /// The route is resolved and dialed exactly as for a call; the link
    /// stays open until either side closes it.
    pub async fn stream<Req>(&self, ctx: &Context, request: &Request<Req>) -> Result<ClientStream> {
        let conn = self
            .connect(&request.service, &request.content_type, &self.opts.call)
            .await?;
        let mut headers = ctx.metadata().clone();
        headers.insert(
            HEADER_CONTENT_TYPE.to_string(),
            request.content_type.clone(),
        );
        Ok(ClientStream {
            conn,
            id: self.next_id(),
            target: request.service.clone(),
            endpoint: request.endpoint.clone(),
            content_type: request.content_type.clone(),
            headers,
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Publish a message to local subscribers via the broker
    pub async fn publish<T: Serialize + Sync>(
        &self,
        ctx: &Context,
        message: &Message<T>,
    ) -> Result<()> {
        let body = codec::encode_body(&message.content_type, &message.payload)?;
        let mut headers = ctx.metadata().clone();
        headers.insert(
            HEADER_CONTENT_TYPE.to_string(),
            message.content_type.clone(),
        );
        self.opts
            .broker
            .publish(&message.event, &broker::Message { headers, body })
            .await
    }

    /// Resolve, select and dial, honoring the retry budget
    async fn connect(
        &self,
        service: &str,
        content_type: &str,
        opts: &CallOptions,
    ) -> Result<Connection> {
        let lookup = LookupOptions {
            address: opts.address.clone(),
            ..Default::default()
        };
        let routes = self.opts.router.lookup(service, lookup).await?;
        let addresses: Vec<String> = routes.into_iter().map(|route| route.address).collect();
        let mut next = self.opts.selector.select(&addresses)?;

        let attempts = opts.retries.max(1);
        let mut last_error = None;
        for _ in 0..attempts {
            let address = next();
            match self
                .opts
                .transport
                .dial(
                    &address,
                    DialOptions {
                        timeout: opts.dial_timeout,
                    },
                )
                .await
            {
                Ok(link) => {
                    let wire_codec = codec::for_content_type(content_type)?;
                    return Ok(Connection::new(link, wire_codec));
                }
                Err(err) => {
                    tracing::debug!(service = %service, address = %address, error = %err, "dial failed");
                    last_error = Some(err);
                }
            }
        }

        let detail = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        Err(Error::unavailable(format!(
            "dialing {service} failed after {attempts} attempts: {detail}"
        )))
    }

    fn request_envelope<Req>(&self, ctx: &Context, request: &Request<Req>) -> Envelope {
        let mut headers = ctx.metadata().clone();
        headers.insert(
            HEADER_CONTENT_TYPE.to_string(),
            request.content_type.clone(),
        );
        Envelope {
            id: self.next_id(),
            message_type: MessageType::Request,
            target: request.service.clone(),
            endpoint: request.endpoint.clone(),
            method: request.endpoint.clone(),
            error: String::new(),
            headers,
        }
    }

    fn next_id(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A bidirectional typed stream over one link
pub struct ClientStream {
    conn: Connection,
    id: u64,
    target: String,
    endpoint: String,
    content_type: String,
    headers: std::collections::HashMap<String, String>,
    closed: std::sync::atomic::AtomicBool,
}

impl ClientStream {
    /// Send one typed message
    pub async fn send<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::closed("stream is closed"));
        }
        let body = codec::encode_body(&self.content_type, value)?;
        let envelope = Envelope {
            id: self.id,
            message_type: MessageType::Request,
            target: self.target.clone(),
            endpoint: self.endpoint.clone(),
            method: self.endpoint.clone(),
            error: String::new(),
            headers: self.headers.clone(),
        };
        self.conn.write(&envelope, &body).await
    }

    /// Receive the next typed message
    pub async fn recv<T: DeserializeOwned>(&self) -> Result<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::closed("stream is closed"));
        }
        let (envelope, body) = self.conn.read().await?;
        if envelope.message_type == MessageType::Error {
            return Err(Error::from_wire(&envelope.error));
        }
        codec::decode_body(&self.content_type, &body)
    }

    /// Close this half of the stream
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::MemoryTransport;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    fn client_over_memory(address: &str, retries: usize) -> RpcClient {
        RpcClient::new(ClientOptions {
            router: Arc::new(StaticRouter::with_address(address)),
            transport: Arc::new(MemoryTransport::new()),
            call: CallOptions {
                retries,
                request_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_empty_service_is_bad_request() {
        let client = client_over_memory("memory://nowhere", 1);
        let request = client.new_request("", "X.Y", Ping { n: 1 });
        let err = client
            .call::<_, Ping>(&Context::background(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_dial_failure_is_unavailable() {
        let client = client_over_memory("memory://client-test-void", 3);
        let request = client.new_request("ghost", "X.Y", Ping { n: 1 });
        let err = client
            .call::<_, Ping>(&Context::background(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_call_round_trip_over_link() {
        let address = "memory://client-test-echo";
        let transport = MemoryTransport::new();
        let listener = transport.listen(address).await.unwrap();

        // echo the request body back as a response
        tokio::spawn(async move {
            let link = listener.accept().await.unwrap();
            let conn = Connection::new(link, codec::for_content_type(CONTENT_TYPE_JSON).unwrap());
            let (envelope, body) = conn.read().await.unwrap();
            let reply = Envelope {
                id: envelope.id,
                message_type: MessageType::Response,
                target: envelope.target,
                endpoint: envelope.endpoint,
                ..Default::default()
            };
            conn.write(&reply, &body).await.unwrap();
        });

        let client = client_over_memory(address, 1);
        let request = client.new_request("echo", "Echo.Call", Ping { n: 42 });
        let reply: Ping = client
            .call(&Context::background(), &request)
            .await
            .unwrap();
        assert_eq!(reply, Ping { n: 42 });
    }

    #[tokio::test]
    async fn test_error_envelope_surfaces_kind() {
        let address = "memory://client-test-error";
        let transport = MemoryTransport::new();
        let listener = transport.listen(address).await.unwrap();

        tokio::spawn(async move {
            let link = listener.accept().await.unwrap();
            let conn = Connection::new(link, codec::for_content_type(CONTENT_TYPE_JSON).unwrap());
            let (envelope, _) = conn.read().await.unwrap();
            let reply = Envelope {
                id: envelope.id,
                message_type: MessageType::Error,
                error: Error::not_found("unknown endpoint X.Y").to_wire(),
                ..Default::default()
            };
            conn.write(&reply, &[]).await.unwrap();
        });

        let client = client_over_memory(address, 1);
        let request = client.new_request("ghost", "X.Y", Ping { n: 1 });
        let err = client
            .call::<_, Ping>(&Context::background(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "unknown endpoint X.Y");
    }

    #[tokio::test]
    async fn test_expired_deadline_is_timeout() {
        let client = client_over_memory("memory://client-test-void2", 1);
        let request = client.new_request("ghost", "X.Y", Ping { n: 1 });
        let ctx = Context::with_timeout(Duration::ZERO);
        let err = client.call::<_, Ping>(&ctx, &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_publish_requires_connected_broker() {
        let client = client_over_memory("memory://unused", 1);
        let message = client.new_message("event", Ping { n: 1 });
        let err = client
            .publish(&Context::background(), &message)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_stream_send_after_close() {
        let address = "memory://client-test-stream-close";
        let transport = MemoryTransport::new();
        let listener = transport.listen(address).await.unwrap();
        tokio::spawn(async move {
            let _link = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let client = client_over_memory(address, 1);
        let request = client.new_request("sink", "Sink.Stream", ());
        let stream = client
            .stream(&Context::background(), &request)
            .await
            .unwrap();
        stream.close().await.unwrap();
        let err = stream.send(&Ping { n: 1 }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
    }
}
