//! Raw-bytes codec
//!
//! The envelope travels as a netstring header block, the body as raw
//! bytes:
//!
//! ```text
//! netstring(key) netstring(value) ... 0x00 u32be(body_len) body
//! ```
//!
//! where `netstring(s)` is `"<len>:<s>,"`. Envelope fields use reserved
//! `Nitro-*` keys; every other pair is a caller header.

use std::collections::HashMap;

use crate::error::{Error, Result};

use super::{Codec, Envelope, MessageType, CONTENT_TYPE_BYTES};

const KEY_ID: &str = "Nitro-Id";
const KEY_TYPE: &str = "Nitro-Type";
const KEY_TARGET: &str = "Nitro-Target";
const KEY_ENDPOINT: &str = "Nitro-Endpoint";
const KEY_METHOD: &str = "Nitro-Method";
const KEY_ERROR: &str = "Nitro-Error";

/// Codec for `application/octet-stream` payloads
pub struct BytesCodec;

impl Codec for BytesCodec {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_BYTES
    }

    fn encode(&self, envelope: &Envelope, body: &[u8]) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(64 + body.len());

        put_pair(&mut frame, KEY_ID, &envelope.id.to_string());
        put_pair(&mut frame, KEY_TYPE, envelope.message_type.as_str());
        if !envelope.target.is_empty() {
            put_pair(&mut frame, KEY_TARGET, &envelope.target);
        }
        if !envelope.endpoint.is_empty() {
            put_pair(&mut frame, KEY_ENDPOINT, &envelope.endpoint);
        }
        if !envelope.method.is_empty() {
            put_pair(&mut frame, KEY_METHOD, &envelope.method);
        }
        if !envelope.error.is_empty() {
            put_pair(&mut frame, KEY_ERROR, &envelope.error);
        }
        for (key, value) in &envelope.headers {
            put_pair(&mut frame, key, value);
        }

        frame.push(0);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        Ok(frame)
    }

    fn decode(&self, frame: &[u8]) -> Result<(Envelope, Vec<u8>)> {
        let mut envelope = Envelope::default();
        let mut headers = HashMap::new();
        let mut pos = 0;

        while pos < frame.len() && frame[pos] != 0 {
            let key = take_netstring(frame, &mut pos)?;
            let value = take_netstring(frame, &mut pos)?;
            match key.as_str() {
                KEY_ID => {
                    envelope.id = value
                        .parse()
                        .map_err(|_| Error::wire(format!("bad message id {value}")))?;
                }
                KEY_TYPE => {
                    envelope.message_type = MessageType::parse(&value)
                        .ok_or_else(|| Error::wire(format!("bad message type {value}")))?;
                }
                KEY_TARGET => envelope.target = value,
                KEY_ENDPOINT => envelope.endpoint = value,
                KEY_METHOD => envelope.method = value,
                KEY_ERROR => envelope.error = value,
                _ => {
                    headers.insert(key, value);
                }
            }
        }
        if pos >= frame.len() {
            return Err(Error::wire("missing header terminator"));
        }
        pos += 1; // the 0x00 terminator
        envelope.headers = headers;

        if frame.len() < pos + 4 {
            return Err(Error::wire("short body length"));
        }
        let len =
            u32::from_be_bytes([frame[pos], frame[pos + 1], frame[pos + 2], frame[pos + 3]])
                as usize;
        pos += 4;
        if frame.len() != pos + len {
            return Err(Error::wire(format!(
                "body length {len} does not match frame, {} bytes remain",
                frame.len() - pos
            )));
        }
        Ok((envelope, frame[pos..].to_vec()))
    }
}

fn put_pair(buf: &mut Vec<u8>, key: &str, value: &str) {
    put_netstring(buf, key);
    put_netstring(buf, value);
}

fn put_netstring(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(s.as_bytes());
    buf.push(b',');
}

fn take_netstring(frame: &[u8], pos: &mut usize) -> Result<String> {
    let start = *pos;
    let colon = frame[start..]
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| Error::wire("netstring missing length separator"))?;
    let len: usize = std::str::from_utf8(&frame[start..start + colon])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::wire("netstring has invalid length"))?;

    let data_start = start + colon + 1;
    let data_end = data_start
        .checked_add(len)
        .ok_or_else(|| Error::wire("netstring length overflows"))?;
    if frame.len() <= data_end || frame[data_end] != b',' {
        return Err(Error::wire("truncated netstring"));
    }
    let value = String::from_utf8(frame[data_start..data_end].to_vec())
        .map_err(|_| Error::wire("netstring is not utf-8"))?;
    *pos = data_end + 1;
    Ok(value)
}
