//! TCP Chat Server - Entry Point
//!
//! Starts the TCP listener and Dispatcher actor, accepting connections
//! until Ctrl-C.

use std::env;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tcp_chat_server::{dispatcher, serve};

/// Default server address
const DEFAULT_ADDR: &str = "0.0.0.0:9000";

/// Channel buffer size for dispatcher commands
const CHANNEL_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=tcp_chat_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tcp_chat_server=info")),
        )
        .init();

    let addr = bind_addr(env::args().nth(1));

    info!("Starting chat server...");
    let listener = TcpListener::bind(&addr).await?;
    info!("Chat server listening on {}", listener.local_addr()?);

    // Create Dispatcher actor and start
    let (handle, dispatcher) = dispatcher::channel(CHANNEL_BUFFER_SIZE);
    tokio::spawn(dispatcher.run());

    serve(listener, handle, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;

    info!("Chat server stopped");

    Ok(())
}

/// Fixed chat port unless an address override is given as the only argument
fn bind_addr(arg: Option<String>) -> String {
    arg.unwrap_or_else(|| DEFAULT_ADDR.to_string())
}
