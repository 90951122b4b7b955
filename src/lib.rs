//! Line-oriented TCP Chat Server Library
//!
//! Clients connect over TCP, pick a unique display name, and every line
//! they send is broadcast to all connected clients.
//!
//! # Protocol
//! - Server prompts `Enter you name: ` and reads one line as the name
//! - A name in use gets `Username is already taken.` and a new prompt
//! - On admission everyone (the joiner too) gets `<name> joined the server!`
//! - Each line afterwards is broadcast as `[<name>] <line>`
//! - On disconnect the rest get `<name> left the server!`
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Dispatcher` is the single actor that owns the client registry
//! - Each connection has a `handler` task communicating with the Dispatcher
//! - No locks needed - name checks happen inside the Dispatcher on join
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tcp_chat_server::{dispatcher, serve};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:9000").await.unwrap();
//!     let (handle, dispatcher) = dispatcher::channel(256);
//!
//!     tokio::spawn(dispatcher.run());
//!     serve(listener, handle, std::future::pending()).await;
//! }
//! ```

pub mod acceptor;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod types;

// Re-export main types for convenience
pub use acceptor::serve;
pub use client::Client;
pub use dispatcher::{Dispatcher, DispatcherCommand, DispatcherHandle};
pub use error::{AppError, JoinError, SendError};
pub use handler::handle_connection;
pub use types::ClientId;
