//! Client struct definition
//!
//! Represents a named, registered participant and the channel
//! feeding its connection's writer task.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::types::ClientId;

/// Connected client information
///
/// Created once name negotiation succeeds and handed to the dispatcher
/// with a join request. The display name never changes afterwards.
#[derive(Debug)]
pub struct Client {
    /// Connection handle
    pub id: ClientId,
    /// Display name, unique among registered clients
    pub name: String,
    /// Dispatcher → connection line channel
    pub sender: mpsc::Sender<String>,
}

impl Client {
    /// Create a new client with the given handle, name, and sender channel
    pub fn new(id: ClientId, name: String, sender: mpsc::Sender<String>) -> Self {
        Self { id, name, sender }
    }

    /// Queue a line for this client's connection
    ///
    /// Returns an error if the writer task has ended (connection dead).
    pub async fn send(&self, line: String) -> Result<(), SendError> {
        self.sender
            .send(line)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }
}
