//! JSON codec
//!
//! Envelope and body are both JSON, framed independently:
//!
//! ```text
//! u32be(envelope_len) envelope_json u32be(body_len) body_json
//! ```
//!
//! The body passes through untouched, so any JSON document (or nothing at
//! all) is a valid payload.

use crate::error::{Error, Result};

use super::{Codec, Envelope, CONTENT_TYPE_JSON};

/// Codec for `application/json` payloads
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    fn encode(&self, envelope: &Envelope, body: &[u8]) -> Result<Vec<u8>> {
        let header = serde_json::to_vec(envelope).map_err(|e| Error::wire(e.to_string()))?;

        let mut frame = Vec::with_capacity(8 + header.len() + body.len());
        frame.extend_from_slice(&(header.len() as u32).to_be_bytes());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        Ok(frame)
    }

    fn decode(&self, frame: &[u8]) -> Result<(Envelope, Vec<u8>)> {
        let (header, rest) = take_block(frame, "envelope")?;
        let envelope: Envelope =
            serde_json::from_slice(header).map_err(|e| Error::wire(e.to_string()))?;

        let (body, rest) = take_block(rest, "body")?;
        if !rest.is_empty() {
            return Err(Error::wire(format!(
                "{} trailing bytes after body",
                rest.len()
            )));
        }
        Ok((envelope, body.to_vec()))
    }
}

fn take_block<'a>(buf: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8])> {
    if buf.len() < 4 {
        return Err(Error::wire(format!("short {what} length")));
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(Error::wire(format!(
            "{what} length {len} exceeds frame, {} bytes remain",
            rest.len()
        )));
    }
    Ok((&rest[..len], &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::super::MessageType;
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_round_trip() {
        let codec = JsonCodec;
        let envelope = Envelope {
            id: 9,
            message_type: MessageType::Request,
            target: "greeter".to_string(),
            endpoint: "Handler.Call".to_string(),
            ..Default::default()
        };
        let body = br#"{"name":"Alice"}"#;
        let frame = codec.encode(&envelope, body).unwrap();
        let (decoded, decoded_body) = codec.decode(&frame).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded_body, body);
    }

    #[test]
    fn test_empty_body() {
        let codec = JsonCodec;
        let frame = codec.encode(&Envelope::default(), &[]).unwrap();
        let (_, body) = codec.decode(&frame).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_partial_frame_is_wire_error() {
        let codec = JsonCodec;
        let frame = codec
            .encode(&Envelope::default(), br#""hello""#)
            .unwrap();
        for cut in [2, frame.len() - 3] {
            let err = codec.decode(&frame[..cut]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Wire);
        }
    }

    #[test]
    fn test_trailing_garbage_is_wire_error() {
        let codec = JsonCodec;
        let mut frame = codec.encode(&Envelope::default(), &[]).unwrap();
        frame.push(0xff);
        let err = codec.decode(&frame).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wire);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            id in any::<u64>(),
            target in "[a-zA-Z0-9._-]{0,24}",
            endpoint in "[a-zA-Z0-9._-]{0,24}",
            method in "[a-zA-Z0-9._-]{0,24}",
            error in "[ -~]{0,48}",
            headers in proptest::collection::hash_map("[a-zA-Z-]{1,12}", "[ -~]{0,24}", 0..4),
            body in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let envelope = Envelope {
                id,
                message_type: MessageType::Event,
                target,
                endpoint,
                method,
                error,
                headers: headers.into_iter().collect::<HashMap<_, _>>(),
            };
            let codec = JsonCodec;
            let frame = codec.encode(&envelope, &body).unwrap();
            let (decoded, decoded_body) = codec.decode(&frame).unwrap();
            prop_assert_eq!(decoded, envelope);
            prop_assert_eq!(decoded_body, body);
        }
    }
}
