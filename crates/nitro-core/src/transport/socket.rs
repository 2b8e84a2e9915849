//! Socket transport
//!
//! TCP by default; addresses beginning `unix://` use Unix-domain sockets.
//! Every frame is length-prefixed with a 4-byte big-endian length, which
//! is exactly `LengthDelimitedCodec`'s default framing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    net::{TcpListener, TcpStream},
    time::timeout,
};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::{Error, Result};

use super::{DialOptions, Link, Listener, Transport};

/// Address scheme selecting Unix-domain sockets
pub const UNIX_PREFIX: &str = "unix://";

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// Transport over TCP and Unix-domain sockets
pub struct SocketTransport;

impl SocketTransport {
    /// Create a socket transport
    pub fn new() -> Self {
        Self
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn dial(&self, address: &str, opts: DialOptions) -> Result<Box<dyn Link>> {
        if let Some(path) = address.strip_prefix(UNIX_PREFIX) {
            #[cfg(unix)]
            {
                let stream = timeout(opts.timeout, UnixStream::connect(path))
                    .await
                    .map_err(|_| Error::timeout(format!("dialing {address}")))??;
                return Ok(Box::new(SocketLink::new(Box::new(stream))));
            }
            #[cfg(not(unix))]
            {
                return Err(Error::bad_request(format!(
                    "unix://{path} is not supported on this platform"
                )));
            }
        }

        let stream = timeout(opts.timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::timeout(format!("dialing {address}")))??;
        let _ = stream.set_nodelay(true);
        Ok(Box::new(SocketLink::new(Box::new(stream))))
    }

    async fn listen(&self, address: &str) -> Result<Box<dyn Listener>> {
        if let Some(path) = address.strip_prefix(UNIX_PREFIX) {
            #[cfg(unix)]
            {
                // a previous run may have left the socket file behind
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                return Ok(Box::new(SocketListener {
                    inner: Inner::Unix(listener),
                    address: address.to_string(),
                    closed: AtomicBool::new(false),
                }));
            }
            #[cfg(not(unix))]
            {
                return Err(Error::bad_request(format!(
                    "unix://{path} is not supported on this platform"
                )));
            }
        }

        let bind_to = if address.is_empty() {
            "127.0.0.1:0"
        } else {
            address
        };
        let listener = TcpListener::bind(bind_to).await?;
        let address = listener.local_addr()?.to_string();
        Ok(Box::new(SocketListener {
            inner: Inner::Tcp(listener),
            address,
            closed: AtomicBool::new(false),
        }))
    }
}

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

struct SocketListener {
    inner: Inner,
    address: String,
    closed: AtomicBool,
}

#[async_trait]
impl Listener for SocketListener {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn accept(&self) -> Result<Box<dyn Link>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::closed(format!("listener {} closed", self.address)));
        }
        match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                Ok(Box::new(SocketLink::new(Box::new(stream))))
            }
            #[cfg(unix)]
            Inner::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(SocketLink::new(Box::new(stream))))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        #[cfg(unix)]
        if let Inner::Unix(_) = &self.inner {
            let _ = std::fs::remove_file(self.address.trim_start_matches(UNIX_PREFIX));
        }
        Ok(())
    }
}

struct SocketLink {
    reader: tokio::sync::Mutex<FramedRead<ReadHalf<Box<dyn Io>>, LengthDelimitedCodec>>,
    writer: tokio::sync::Mutex<FramedWrite<WriteHalf<Box<dyn Io>>, LengthDelimitedCodec>>,
}

impl SocketLink {
    fn new(stream: Box<dyn Io>) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: tokio::sync::Mutex::new(FramedRead::new(read, LengthDelimitedCodec::new())),
            writer: tokio::sync::Mutex::new(FramedWrite::new(write, LengthDelimitedCodec::new())),
        }
    }
}

#[async_trait]
impl Link for SocketLink {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Bytes::copy_from_slice(frame))
            .await
            .map_err(Error::from)
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                // zero-length frames are keepalives
                Some(Ok(frame)) if frame.is_empty() => continue,
                Some(Ok(frame)) => return Ok(frame.to_vec()),
                Some(Err(err)) => return Err(err.into()),
                None => return Err(Error::closed("connection closed")),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.close().await.map_err(Error::from)
    }
}
