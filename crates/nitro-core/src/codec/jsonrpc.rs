//! JSON-RPC 2.0 codec
//!
//! Each message is a single JSON-RPC object. Requests map the endpoint to
//! `method` and the body to `params`; responses carry the body as `result`;
//! failures become `error: {code, message}`. An event is a notification,
//! i.e. a request without an id.
//!
//! The format carries no target or caller headers, so only the fields it
//! can represent survive a round trip.

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

use super::{Codec, Envelope, MessageType, CONTENT_TYPE_JSON_RPC};

/// Generic server-error code used for error envelopes
const ERROR_CODE: i64 = -32000;

/// Codec for `application/json-rpc` payloads
pub struct JsonRpcCodec;

impl Codec for JsonRpcCodec {
    fn name(&self) -> &'static str {
        "jsonrpc"
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON_RPC
    }

    fn encode(&self, envelope: &Envelope, body: &[u8]) -> Result<Vec<u8>> {
        let mut msg = Map::new();
        msg.insert("jsonrpc".to_string(), json!("2.0"));

        match envelope.message_type {
            MessageType::Request => {
                msg.insert("id".to_string(), json!(envelope.id));
                msg.insert("method".to_string(), json!(endpoint_of(envelope)));
                if let Some(params) = parse_body(body)? {
                    msg.insert("params".to_string(), params);
                }
            }
            MessageType::Event => {
                msg.insert("method".to_string(), json!(endpoint_of(envelope)));
                if let Some(params) = parse_body(body)? {
                    msg.insert("params".to_string(), params);
                }
            }
            MessageType::Response => {
                msg.insert("id".to_string(), json!(envelope.id));
                if let Some(result) = parse_body(body)? {
                    msg.insert("result".to_string(), result);
                }
            }
            MessageType::Error => {
                msg.insert("id".to_string(), json!(envelope.id));
                msg.insert(
                    "error".to_string(),
                    json!({ "code": ERROR_CODE, "message": envelope.error }),
                );
            }
        }

        serde_json::to_vec(&Value::Object(msg)).map_err(|e| Error::wire(e.to_string()))
    }

    fn decode(&self, frame: &[u8]) -> Result<(Envelope, Vec<u8>)> {
        let msg: Map<String, Value> =
            serde_json::from_slice(frame).map_err(|e| Error::wire(e.to_string()))?;

        let mut envelope = Envelope {
            id: msg.get("id").and_then(Value::as_u64).unwrap_or(0),
            ..Default::default()
        };

        if let Some(err) = msg.get("error") {
            envelope.message_type = MessageType::Error;
            envelope.error = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok((envelope, Vec::new()));
        }

        if msg.contains_key("result") {
            envelope.message_type = MessageType::Response;
            let body = render_body(msg.get("result"))?;
            return Ok((envelope, body));
        }

        if let Some(method) = msg.get("method").and_then(Value::as_str) {
            envelope.message_type = if msg.contains_key("id") {
                MessageType::Request
            } else {
                MessageType::Event
            };
            envelope.endpoint = method.to_string();
            envelope.method = method.to_string();
            let body = render_body(msg.get("params"))?;
            return Ok((envelope, body));
        }

        // a bare id is a response whose result was empty
        if msg.contains_key("id") {
            envelope.message_type = MessageType::Response;
            return Ok((envelope, Vec::new()));
        }

        Err(Error::wire("json-rpc object has no method, result or error"))
    }
}

fn endpoint_of(envelope: &Envelope) -> &str {
    if envelope.endpoint.is_empty() {
        &envelope.method
    } else {
        &envelope.endpoint
    }
}

fn parse_body(body: &[u8]) -> Result<Option<Value>> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| Error::bad_request(format!("json-rpc body is not JSON: {e}")))
}

fn render_body(value: Option<&Value>) -> Result<Vec<u8>> {
    match value {
        None => Ok(Vec::new()),
        Some(v) => serde_json::to_vec(v).map_err(|e| Error::wire(e.to_string())),
    }
}
