//! # Nitro Core
//!
//! The runtime for building distributed applications: named programs
//! exchanging typed requests and broadcast events.
//!
//! Every piece is a small trait with a default implementation — registry,
//! router, broker, transport and codec all swap out independently — and
//! the [`Program`](program::Program) façade wires the default stack
//! together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nitro_core::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct HelloRequest { name: String }
//!
//! #[derive(Serialize, Deserialize)]
//! struct HelloResponse { message: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut prog = Program::new();
//!     prog.name("helloworld");
//!     prog.register_endpoint("Handler.Call", |_ctx, req: HelloRequest| async move {
//!         Ok(HelloResponse { message: format!("Hello {}", req.name) })
//!     })?;
//!     prog.run().await
//! }
//! ```

#![deny(unsafe_code)]

/// Asynchronous messaging
pub mod broker;

/// RPC client: request dispatch, publish and streams
pub mod client;

/// Wire codecs and the message envelope
pub mod codec;

/// Environment configuration
pub mod config;

/// Request-scoped context
pub mod context;

/// Error taxonomy
pub mod error;

/// Program façade composing the default stack
pub mod program;

/// Service discovery
pub mod registry;

/// Route resolution and selection
pub mod router;

/// RPC server: accept loop and dispatch
pub mod server;

/// Connection-oriented, message-framed transports
pub mod transport;

/// Prelude module for convenient imports
///
/// Commonly used imports for Nitro applications
pub mod prelude {
    /// Re-export broker types
    pub use crate::broker::{Broker, MemoryBroker, Message as BrokerMessage, Subscriber};
    /// Re-export client types
    pub use crate::client::{CallOptions, ClientOptions, ClientStream, Message, Request, RpcClient};
    /// Re-export codec types
    pub use crate::codec::{Codec, Envelope, MessageType};
    /// Re-export configuration
    pub use crate::config::Config;
    /// Re-export the call context
    pub use crate::context::Context;
    /// Re-export error types
    pub use crate::error::{Error, ErrorKind, Result};
    /// Re-export the program façade
    pub use crate::program::Program;
    /// Re-export registry types
    pub use crate::registry::{MemoryRegistry, Registry, Service};
    /// Re-export routing types
    pub use crate::router::{
        Random, RegistryRouter, RoundRobin, Router, Selector, StaticRouter,
    };
    /// Re-export server types
    pub use crate::server::{RpcServer, ServerOptions};
    /// Re-export transport types
    pub use crate::transport::{
        Link, Listener, MemoryTransport, SocketTransport, Transport,
    };
}
