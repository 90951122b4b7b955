//! Wire protocol definitions
//!
//! Plain UTF-8 text, newline-terminated. The only server-originated
//! lines are the name prompt, the name-taken notice, and the three
//! broadcast kinds built here.

/// Sent before every name attempt (no trailing newline)
pub const NAME_PROMPT: &str = "Enter you name: ";

/// Sent when the requested name belongs to a registered client
pub const NAME_TAKEN: &str = "Username is already taken.\n";

/// Broadcast line announcing a newly admitted client
pub fn join_notice(name: &str) -> String {
    format!("{} joined the server!\n", name)
}

/// Broadcast line announcing a departed client
pub fn leave_notice(name: &str) -> String {
    format!("{} left the server!\n", name)
}

/// Chat line relayed for `name`
///
/// `line` keeps the newline it was read with.
pub fn chat_line(name: &str, line: &str) -> String {
    format!("[{}] {}", name, line)
}
