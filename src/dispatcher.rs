//! Dispatcher actor implementation
//!
//! The single owner of the client registry. Every join, disconnect, and
//! chat message passes through one command channel and is processed one
//! at a time, so registry changes and broadcasts never interleave.

use std::collections::HashMap;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{AppError, JoinError};
use crate::message::{join_notice, leave_notice};
use crate::types::ClientId;

/// Commands sent from connection handlers to the Dispatcher
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Admit a client that finished name negotiation
    Join {
        client: Client,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    /// Client's connection is gone
    Disconnect { client_id: ClientId },
    /// Already formatted chat line
    Message { text: String },
}

/// Create a connected Dispatcher and handle pair
pub fn channel(buffer: usize) -> (DispatcherHandle, Dispatcher) {
    let (sender, receiver) = mpsc::channel(buffer);
    (DispatcherHandle::new(sender), Dispatcher::new(receiver))
}

/// The Dispatcher actor
///
/// Holds the registry exclusively. Nothing else reads or writes it;
/// handlers only see the outcome of their own join request.
pub struct Dispatcher {
    /// Registered clients: ClientId -> Client
    clients: HashMap<ClientId, Client>,
    /// Command receiver channel
    receiver: mpsc::Receiver<DispatcherCommand>,
}

impl Dispatcher {
    /// Create a new Dispatcher with the given command receiver
    pub fn new(receiver: mpsc::Receiver<DispatcherCommand>) -> Self {
        Self {
            clients: HashMap::new(),
            receiver,
        }
    }

    /// Run the Dispatcher event loop
    ///
    /// Processes commands in arrival order until all handles are dropped.
    pub async fn run(mut self) {
        info!("Dispatcher started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Dispatcher shutting down");
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: DispatcherCommand) {
        match cmd {
            DispatcherCommand::Join { client, reply } => {
                self.handle_join(client, reply).await;
            }
            DispatcherCommand::Disconnect { client_id } => {
                self.handle_disconnect(client_id).await;
            }
            DispatcherCommand::Message { text } => {
                self.broadcast(&text).await;
            }
        }
    }

    /// Handle a join request
    ///
    /// Uniqueness is checked here, against the live registry, so two
    /// handlers racing for the same name cannot both be admitted.
    async fn handle_join(
        &mut self,
        client: Client,
        reply: oneshot::Sender<Result<(), JoinError>>,
    ) {
        if self.is_name_taken(&client.name) {
            debug!("Rejected join from {}: '{}' is taken", client.id, client.name);
            let _ = reply.send(Err(JoinError::NameTaken(client.name)));
            return;
        }

        let notice = join_notice(&client.name);
        info!("Client {} joined as '{}'", client.id, client.name);
        self.clients.insert(client.id, client);
        let _ = reply.send(Ok(()));

        // The joiner is registered already, so it sees its own notice too
        self.broadcast(&notice).await;
        debug!("Total clients: {}", self.clients.len());
    }

    /// Handle client disconnection
    async fn handle_disconnect(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.remove(&client_id) else {
            debug!("Disconnect for unregistered client {}", client_id);
            return;
        };

        info!("Client {} ('{}') left", client_id, client.name);
        drop(client.sender);

        self.broadcast(&leave_notice(&client.name)).await;
        debug!("Total clients: {}", self.clients.len());
    }

    /// Send one line to every registered client
    ///
    /// A failed delivery is logged and skipped; the client stays
    /// registered until its own handler reports the disconnect.
    async fn broadcast(&self, line: &str) {
        let deliveries = self.clients.values().map(|client| async move {
            if let Err(e) = client.send(line.to_string()).await {
                warn!(
                    "Failed to send message to client {} ('{}'): {}",
                    client.id, client.name, e
                );
            }
        });
        join_all(deliveries).await;
    }

    fn is_name_taken(&self, name: &str) -> bool {
        self.clients.values().any(|c| c.name == name)
    }
}

/// Cloneable sender side of the Dispatcher
///
/// Built once at startup and passed to the accept loop, which gives a
/// clone to every connection handler.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    /// Wrap the command sender of a running Dispatcher
    pub fn new(sender: mpsc::Sender<DispatcherCommand>) -> Self {
        Self { sender }
    }

    /// Ask the Dispatcher to admit `client`
    ///
    /// Resolves once the Dispatcher has decided. On success the client is
    /// registered and the joined notice is on its way to everyone.
    pub async fn submit_join(&self, client: Client) -> Result<(), JoinError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::Join { client, reply })
            .await
            .map_err(|_| JoinError::DispatcherClosed)?;
        response.await.map_err(|_| JoinError::DispatcherClosed)?
    }

    /// Report that a client's connection is gone
    pub async fn submit_disconnect(&self, client_id: ClientId) -> Result<(), AppError> {
        self.send(DispatcherCommand::Disconnect { client_id }).await
    }

    /// Broadcast an already formatted line to every registered client
    pub async fn submit_message(&self, text: String) -> Result<(), AppError> {
        self.send(DispatcherCommand::Message { text }).await
    }

    async fn send(&self, cmd: DispatcherCommand) -> Result<(), AppError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| AppError::DispatcherClosed)
    }
}
