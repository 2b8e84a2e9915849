//! Wire codecs
//!
//! A [`Codec`] turns an [`Envelope`] plus an opaque body into a single wire
//! frame and back. Three formats are provided, selected by content type:
//!
//! | Content type | Codec | Layout |
//! |---|---|---|
//! | `application/json` | [`JsonCodec`] | length-prefixed JSON envelope, then length-prefixed body |
//! | `application/json-rpc` | [`JsonRpcCodec`] | one JSON-RPC 2.0 object per message |
//! | `application/octet-stream` | [`BytesCodec`] | netstring header block, then length-prefixed raw body |
//!
//! [`Connection`] pairs a codec with a transport [`Link`] and serializes
//! writes, so an envelope and its body always land on the wire atomically.

use std::{collections::HashMap, sync::Arc};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    transport::Link,
};

mod bytes;
mod json;
mod jsonrpc;

pub use self::bytes::BytesCodec;
pub use self::json::JsonCodec;
pub use self::jsonrpc::JsonRpcCodec;

/// Content type served by [`JsonCodec`]; the default for requests
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type served by [`JsonRpcCodec`]
pub const CONTENT_TYPE_JSON_RPC: &str = "application/json-rpc";
/// Content type served by [`BytesCodec`]
pub const CONTENT_TYPE_BYTES: &str = "application/octet-stream";

/// Header key carrying the request content type in envelope headers
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// The role of a wire message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// A call from client to server
    #[default]
    Request,
    /// A reply from server to client
    Response,
    /// A broadcast message
    Event,
    /// A failed call; the `error` field carries the wire error
    Error,
}

impl MessageType {
    /// Stable string form used by the text-based codecs
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::Error => "error",
        }
    }

    /// Parse the string form
    pub fn parse(s: &str) -> Option<MessageType> {
        match s {
            "request" => Some(MessageType::Request),
            "response" => Some(MessageType::Response),
            "event" => Some(MessageType::Event),
            "error" => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// Wire header describing a message's type, addressing and id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sequence id; a response carries the id of its request
    #[serde(default)]
    pub id: u64,
    /// Message role
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    /// Destination service name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    /// Destination endpoint, `Type.Method`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    /// Method name; mirrors `endpoint` for RPC traffic
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Wire error string, set on `Error` messages
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Caller metadata propagated to the handler context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Encode/decode seam between envelopes and wire frames
///
/// Implementations are stateless; one instance is shared across
/// connections.
pub trait Codec: Send + Sync {
    /// Short codec name, e.g. `"json"`
    fn name(&self) -> &'static str;

    /// The content type this codec serves
    fn content_type(&self) -> &'static str;

    /// Encode an envelope and body into one wire frame
    ///
    /// An empty body is valid and encodes as a zero-length body frame.
    fn encode(&self, envelope: &Envelope, body: &[u8]) -> Result<Vec<u8>>;

    /// Decode one wire frame into an envelope and body
    ///
    /// Truncated or malformed frames fail with a `Wire` error.
    fn decode(&self, frame: &[u8]) -> Result<(Envelope, Vec<u8>)>;
}

/// Resolve the codec for a content type
///
/// An empty content type selects the JSON codec; an unknown one is a
/// `BadRequest` error.
pub fn for_content_type(content_type: &str) -> Result<Arc<dyn Codec>> {
    match content_type {
        "" | CONTENT_TYPE_JSON => Ok(Arc::new(JsonCodec)),
        CONTENT_TYPE_JSON_RPC => Ok(Arc::new(JsonRpcCodec)),
        CONTENT_TYPE_BYTES => Ok(Arc::new(BytesCodec)),
        other => Err(Error::bad_request(format!(
            "unsupported content type {other}"
        ))),
    }
}

/// Serialize a typed body for the given content type
///
/// Bodies are JSON text for every content type; the bytes codec carries
/// that text as its raw body. Raw-byte payloads go through the transport
/// [`Link`] directly.
pub fn encode_body<T: Serialize>(content_type: &str, value: &T) -> Result<Vec<u8>> {
    // reject unknown content types up front, same as for_content_type
    for_content_type(content_type)?;
    serde_json::to_vec(value).map_err(|e| Error::bad_request(e.to_string()))
}

/// Deserialize a typed body for the given content type
pub fn decode_body<T: DeserializeOwned>(content_type: &str, body: &[u8]) -> Result<T> {
    for_content_type(content_type)?;
    serde_json::from_slice(body).map_err(|e| Error::bad_request(e.to_string()))
}

/// A codec bound to one transport link
///
/// Writes encode and send under a per-connection lock, so concurrent
/// writers never interleave an envelope with a foreign body. Reads are
/// expected to come from a single task per link.
pub struct Connection {
    link: Box<dyn Link>,
    codec: Arc<dyn Codec>,
    write_lock: tokio::sync::Mutex<()>,
}

impl Connection {
    /// Bind `codec` to `link`
    pub fn new(link: Box<dyn Link>, codec: Arc<dyn Codec>) -> Self {
        Self {
            link,
            codec,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The codec in use
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Encode and send one message
    pub async fn write(&self, envelope: &Envelope, body: &[u8]) -> Result<()> {
        let frame = self.codec.encode(envelope, body)?;
        let _guard = self.write_lock.lock().await;
        self.link.send(&frame).await
    }

    /// Receive and decode the next message
    pub async fn read(&self) -> Result<(Envelope, Vec<u8>)> {
        let frame = self.link.recv().await?;
        self.codec.decode(&frame)
    }

    /// Close the underlying link
    pub async fn close(&self) -> Result<()> {
        self.link.close().await
    }
}
