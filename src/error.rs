//! Error types for the chat server
//!
//! Defines application-level errors, join rejections, and line delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Returned by connection handlers and the accept loop. These are logged
/// where the task ends and never reach a client.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on the client stream or listener (fatal for that task)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The dispatcher's command channel is closed
    #[error("Dispatcher closed")]
    DispatcherClosed,
}

/// Reasons a join request is not admitted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    /// Another registered client already uses this display name
    #[error("Username already taken: {0}")]
    NameTaken(String),

    /// The dispatcher stopped before answering
    #[error("Dispatcher closed")]
    DispatcherClosed,
}

/// Line delivery errors
///
/// Occurs when the client's writer task has gone away.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
