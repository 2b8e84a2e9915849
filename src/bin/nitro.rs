//! Nitro demo program
//!
//! Serves a greeter endpoint until interrupted. Exit codes: 0 on a clean
//! shutdown, 1 when the program fails to start, 2 when handler
//! registration fails.

use std::process::ExitCode;

use nitro::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct HelloRequest {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloResponse {
    message: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut prog = Program::new();
    prog.name("helloworld");

    if let Err(err) = prog.register_endpoint("Handler.Call", handle_call) {
        tracing::error!(error = %err, "handler registration failed");
        return ExitCode::from(2);
    }

    if let Err(err) = prog.run().await {
        tracing::error!(error = %err, "program failed");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

async fn handle_call(_ctx: Context, req: HelloRequest) -> Result<HelloResponse> {
    Ok(HelloResponse {
        message: format!("Hello {}", req.name),
    })
}
