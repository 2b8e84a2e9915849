//! Connection-oriented, message-framed transports
//!
//! A [`Transport`] opens and accepts [`Link`]s: duplex connections that
//! carry whole byte frames. Each logical call gets its own link; the
//! codec layer sits on top and never sees partial frames.
//!
//! Two implementations ship with the runtime: [`SocketTransport`] for TCP
//! and Unix-domain addresses, and [`MemoryTransport`] for in-process
//! wiring and tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod memory;
mod socket;

pub use memory::MemoryTransport;
pub use socket::SocketTransport;

/// Default bound on a single dial attempt
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for a dial attempt
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Give up on the connection attempt after this long
    pub timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// Opens outbound links and binds listeners
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short transport name, e.g. `"socket"`
    fn name(&self) -> &'static str;

    /// Connect to `address`, bounded by the dial timeout
    async fn dial(&self, address: &str, opts: DialOptions) -> Result<Box<dyn Link>>;

    /// Bind a listener
    ///
    /// An empty address asks the transport to pick one; the bound address
    /// is available from [`Listener::address`].
    async fn listen(&self, address: &str) -> Result<Box<dyn Listener>>;
}

/// Accepts inbound links until closed
#[async_trait]
pub trait Listener: Send + Sync {
    /// The bound address peers can dial
    fn address(&self) -> String;

    /// Wait for the next inbound link
    async fn accept(&self) -> Result<Box<dyn Link>>;

    /// Stop accepting; pending and future accepts fail `Closed`
    async fn close(&self) -> Result<()>;
}

/// One duplex, message-framed connection
///
/// Zero-length frames are keepalives: [`Link::send`] passes them through
/// and [`Link::recv`] silently discards them.
#[async_trait]
pub trait Link: Send + Sync {
    /// Send one frame
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Receive the next non-empty frame
    async fn recv(&self) -> Result<Vec<u8>>;

    /// Close both halves; the peer's recv fails `Closed`
    async fn close(&self) -> Result<()>;
}
