//! # Nitro
//!
//! **Distributed application runtime**
//!
//! Nitro is a runtime for building distributed applications: named
//! programs exchanging typed requests and broadcast events over
//! pluggable discovery, routing and transports.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! nitro = "0.1"
//! ```
//!
//! ## What's Included
//!
//! - **Typed RPC** - register `Type.Method` endpoints, call them by name
//! - **Pub/Sub Events** - broadcast to every local subscriber
//! - **Pluggable Core** - registry, router, broker, transport and codec
//!   are all small traits with in-memory defaults
//! - **Three Wire Formats** - json, json-rpc and raw bytes, selected by
//!   content type
//!
//! ## Example
//!
//! ```rust,ignore
//! use nitro::prelude::*;
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

// Re-export everything from nitro-core
pub use nitro_core::*;
