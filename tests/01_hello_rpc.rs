//! tests/01_hello_rpc.rs
//!
//! End-to-end RPC through the program façade: one program serves a
//! greeter endpoint, a second program calls it by name over the memory
//! transport.

use nitro::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct HelloRequest {
    name: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct HelloResponse {
    message: String,
}

fn program_at(address: &str) -> Program {
    Program::with_config(Config {
        server_address: Some(address.to_string()),
        transport: "memory".to_string(),
        ..Default::default()
    })
}

/// Two programs, one conversation
#[tokio::test]
async fn test_hello_between_programs() {
    let address = "memory://hello-rpc";

    let mut server = program_at(address);
    server.name("helloworld");
    server
        .register_endpoint("Handler.Call", |_ctx, req: HelloRequest| async move {
            Ok(HelloResponse {
                message: format!("Hello {}", req.name),
            })
        })
        .unwrap();
    server.start().await.unwrap();

    let mut client = program_at(address);
    client.name("client");

    let rsp: HelloResponse = client
        .execute(
            "helloworld",
            "Handler.Call",
            &HelloRequest {
                name: "Alice".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(rsp.message, "Hello Alice");

    server.stop().await.unwrap();
}

/// Calling an endpoint nobody registered fails with NotFound
#[tokio::test]
async fn test_unknown_endpoint_is_not_found() {
    let address = "memory://hello-rpc-notfound";

    let mut server = program_at(address);
    server.name("helloworld");
    server.start().await.unwrap();

    let client = program_at(address);
    let err = client
        .execute::<_, HelloResponse>(
            "nope",
            "X.Y",
            &HelloRequest {
                name: "nobody".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    server.stop().await.unwrap();
}

/// With no server at all the dial itself fails
#[tokio::test]
async fn test_no_server_is_unavailable() {
    let client = program_at("memory://hello-rpc-void");
    let err = client
        .execute::<_, HelloResponse>(
            "ghost",
            "X.Y",
            &HelloRequest {
                name: "nobody".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

/// Metadata set on the caller's context arrives in the handler's
#[tokio::test]
async fn test_context_metadata_propagates() {
    let address = "memory://hello-rpc-metadata";

    let mut server = program_at(address);
    server.name("echoctx");
    server
        .register_endpoint("Meta.Get", |ctx: Context, _req: HelloRequest| async move {
            Ok(HelloResponse {
                message: ctx.get("trace-id").unwrap_or("missing").to_string(),
            })
        })
        .unwrap();
    server.start().await.unwrap();

    let client = program_at(address);
    let mut ctx = Context::background();
    ctx.set("trace-id", "abc-123");
    let request = client.client().new_request(
        "echoctx",
        "Meta.Get",
        HelloRequest {
            name: String::new(),
        },
    );
    let rsp: HelloResponse = client.client().call(&ctx, &request).await.unwrap();
    assert_eq!(rsp.message, "abc-123");

    server.stop().await.unwrap();
}
