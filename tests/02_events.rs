//! tests/02_events.rs
//!
//! Broker behavior through the program façade and the broker trait:
//! ordered delivery, full fan-out, and the unsubscribe fence.

use std::sync::{Arc, Mutex};

use nitro::broker::{Broker, Handler, MemoryBroker, Message, SubscribeOptions};
use nitro::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Note {
    text: String,
}

/// Ten messages tagged id 0..9 arrive in publish order
#[tokio::test]
async fn test_broker_delivers_in_sequence() {
    let broker = MemoryBroker::new();
    broker.connect().await.unwrap();

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let handler: Handler = Arc::new(move |message: Message| {
        let seen = Arc::clone(&seen_clone);
        Box::pin(async move {
            seen.lock()
                .unwrap()
                .push(message.headers.get("id").cloned().unwrap_or_default());
            Ok(())
        })
    });
    let sub = broker
        .subscribe("test", handler, SubscribeOptions::default())
        .await
        .unwrap();

    for i in 0..10 {
        let mut headers = std::collections::HashMap::new();
        headers.insert("foo".to_string(), "bar".to_string());
        headers.insert("id".to_string(), i.to_string());
        broker
            .publish(
                "test",
                &Message {
                    headers,
                    body: b"hello world".to_vec(),
                },
            )
            .await
            .unwrap();
    }

    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(seen.lock().unwrap().clone(), expected);

    sub.unsubscribe().await.unwrap();
    broker.disconnect().await.unwrap();
}

/// Every subscriber of an event sees every publish, unchanged
#[tokio::test]
async fn test_fan_out_reaches_all_subscribers() {
    let broker = MemoryBroker::new();
    broker.connect().await.unwrap();

    let mut logs = Vec::new();
    for _ in 0..3 {
        let log: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let handler: Handler = Arc::new(move |message: Message| {
            let log = Arc::clone(&log_clone);
            Box::pin(async move {
                log.lock().unwrap().push(message.body);
                Ok(())
            })
        });
        broker
            .subscribe("fan", handler, SubscribeOptions::default())
            .await
            .unwrap();
        logs.push(log);
    }

    broker
        .publish(
            "fan",
            &Message {
                headers: Default::default(),
                body: b"payload".to_vec(),
            },
        )
        .await
        .unwrap();

    for log in logs {
        assert_eq!(log.lock().unwrap().clone(), vec![b"payload".to_vec()]);
    }
}

/// After unsubscribe returns, the handler is never invoked again
#[tokio::test]
async fn test_unsubscribe_fence() {
    let broker = MemoryBroker::new();
    broker.connect().await.unwrap();

    let count = Arc::new(Mutex::new(0u32));
    let count_clone = Arc::clone(&count);
    let handler: Handler = Arc::new(move |_message: Message| {
        let count = Arc::clone(&count_clone);
        Box::pin(async move {
            *count.lock().unwrap() += 1;
            Ok(())
        })
    });
    let sub = broker
        .subscribe("fenced", handler, SubscribeOptions::default())
        .await
        .unwrap();

    broker
        .publish("fenced", &Message::default())
        .await
        .unwrap();
    sub.unsubscribe().await.unwrap();

    for _ in 0..5 {
        broker
            .publish("fenced", &Message::default())
            .await
            .unwrap();
    }
    assert_eq!(*count.lock().unwrap(), 1);
}

/// Program-level broadcast with typed payloads and ordered delivery
#[tokio::test]
async fn test_program_broadcast_order() {
    let prog = Program::with_config(Config {
        server_address: Some("memory://events-program".to_string()),
        transport: "memory".to_string(),
        ..Default::default()
    });

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    prog.subscribe("notes", move |_ctx, note: Note| {
        let seen = Arc::clone(&seen_clone);
        async move {
            seen.lock().unwrap().push(note.text);
            Ok(())
        }
    })
    .await
    .unwrap();
    prog.start().await.unwrap();

    for i in 0..10 {
        prog.broadcast(
            "notes",
            &Note {
                text: format!("note {i}"),
            },
        )
        .await
        .unwrap();
    }

    let expected: Vec<String> = (0..10).map(|i| format!("note {i}")).collect();
    assert_eq!(seen.lock().unwrap().clone(), expected);

    prog.stop().await.unwrap();
}
