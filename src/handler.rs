//! Connection handler
//!
//! Drives one client stream: name negotiation, admission through the
//! Dispatcher, then a plain line relay until the stream fails.

use std::time::Duration;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::dispatcher::DispatcherHandle;
use crate::error::{AppError, JoinError};
use crate::message::{chat_line, NAME_PROMPT, NAME_TAKEN};
use crate::types::ClientId;

/// Per-client outbound line buffer
const CLIENT_BUFFER_SIZE: usize = 32;

/// How long the writer may keep flushing queued lines after disconnect
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle a new connection
///
/// Runs until the client's stream can no longer be read. Read failures
/// are the normal way out and return `Ok(())`; a write failure while
/// negotiating returns the IO error.
pub async fn handle_connection<S>(stream: S, dispatcher: DispatcherHandle) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let client_id = ClientId::new();
    debug!("Client {} negotiating name", client_id);

    // Channel for Dispatcher -> client lines
    let (line_tx, line_rx) = mpsc::channel::<String>(CLIENT_BUFFER_SIZE);

    let Some(name) = negotiate(client_id, &mut reader, &mut writer, &line_tx, &dispatcher).await?
    else {
        debug!("Client {} left during name negotiation", client_id);
        return Ok(());
    };

    // The registry holds the only sender from here on
    drop(line_tx);

    let mut write_task = tokio::spawn(write_lines(client_id, writer, line_rx));

    relay(client_id, &name, &mut reader, &dispatcher).await?;

    dispatcher.submit_disconnect(client_id).await?;

    // A peer that stopped reading must not pin the socket open
    match timeout(WRITER_DRAIN_TIMEOUT, &mut write_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Write task for {} failed: {}", client_id, e),
        Err(_) => {
            debug!("Write task for {} still blocked, aborting", client_id);
            write_task.abort();
        }
    }

    info!("Client {} ('{}') disconnected", client_id, name);

    Ok(())
}

/// Prompt for a name until the Dispatcher admits one
///
/// Returns `None` if the client went away before picking a usable name.
async fn negotiate<R, W>(
    client_id: ClientId,
    reader: &mut R,
    writer: &mut W,
    line_tx: &mpsc::Sender<String>,
    dispatcher: &DispatcherHandle,
) -> Result<Option<String>, AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    loop {
        write_str(writer, NAME_PROMPT).await?;

        let line = match read_full_line(reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!("Read error from {} during negotiation: {}", client_id, e);
                return Ok(None);
            }
        };

        // An empty name is admitted like any other, once
        let name = line.trim();
        let client = Client::new(client_id, name.to_string(), line_tx.clone());
        match dispatcher.submit_join(client).await {
            Ok(()) => return Ok(Some(name.to_string())),
            Err(JoinError::NameTaken(taken)) => {
                debug!("Client {} asked for taken name '{}'", client_id, taken);
                write_str(writer, NAME_TAKEN).await?;
            }
            Err(JoinError::DispatcherClosed) => return Err(AppError::DispatcherClosed),
        }
    }
}

/// Forward every complete inbound line to the Dispatcher
async fn relay<R>(
    client_id: ClientId,
    name: &str,
    reader: &mut R,
    dispatcher: &DispatcherHandle,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        match read_full_line(reader, &mut buf).await {
            Ok(Some(line)) => dispatcher.submit_message(chat_line(name, &line)).await?,
            Ok(None) => {
                debug!("Client {} closed the connection", client_id);
                return Ok(());
            }
            Err(e) => {
                debug!("Read error from {}: {}", client_id, e);
                return Ok(());
            }
        }
    }
}

/// Drain queued lines into the stream
///
/// Stops on the first write failure, or once the Dispatcher drops the
/// client's sender.
async fn write_lines<W>(client_id: ClientId, mut writer: W, mut lines: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        if let Err(e) = write_str(&mut writer, &line).await {
            warn!("Write to client {} failed: {}", client_id, e);
            break;
        }
    }

    let _ = writer.shutdown().await;
    debug!("Write task ended for {}", client_id);
}

/// Read one newline-terminated line, using `buf` as scratch space
///
/// Returns `None` at end of stream. A trailing fragment with no newline
/// counts as end of stream and is discarded. Bytes that are not UTF-8
/// are replaced rather than treated as a read failure.
async fn read_full_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 || !buf.ends_with(b"\n") {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

async fn write_str<W>(writer: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::dispatcher;

    const WAIT: Duration = Duration::from_secs(1);

    struct TestPeer {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
        task: JoinHandle<Result<(), AppError>>,
    }

    impl TestPeer {
        fn connect(dispatcher: &DispatcherHandle) -> Self {
            let (client_side, server_side) = tokio::io::duplex(1024);
            let task = tokio::spawn(handle_connection(server_side, dispatcher.clone()));
            let (reader, writer) = tokio::io::split(client_side);
            Self {
                reader: BufReader::new(reader),
                writer,
                task,
            }
        }

        async fn expect_prompt(&mut self) {
            let mut buf = vec![0u8; NAME_PROMPT.len()];
            timeout(WAIT, self.reader.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(buf, NAME_PROMPT.as_bytes());
        }

        async fn expect_line(&mut self, expected: &str) {
            let mut line = String::new();
            timeout(WAIT, self.reader.read_line(&mut line))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(line, expected);
        }

        async fn send(&mut self, text: &str) {
            self.writer.write_all(text.as_bytes()).await.unwrap();
        }
    }

    /// Registered member backed by a plain channel instead of a stream
    async fn member(handle: &DispatcherHandle, name: &str) -> (ClientId, mpsc::Receiver<String>) {
        let (tx, mut rx) = mpsc::channel(32);
        let id = ClientId::new();
        handle
            .submit_join(Client::new(id, name.to_string(), tx))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            format!("{} joined the server!\n", name)
        );
        (id, rx)
    }

    async fn next(rx: &mut mpsc::Receiver<String>) -> String {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    fn start() -> DispatcherHandle {
        let (handle, dispatcher) = dispatcher::channel(16);
        tokio::spawn(dispatcher.run());
        handle
    }

    #[tokio::test]
    async fn test_join_and_relay() {
        let handle = start();
        let (_bob_id, mut bob) = member(&handle, "bob").await;
        let mut peer = TestPeer::connect(&handle);

        peer.expect_prompt().await;
        peer.send("  alice \n").await;
        peer.expect_line("alice joined the server!\n").await;
        assert_eq!(next(&mut bob).await, "alice joined the server!\n");

        peer.send("hello\n").await;
        peer.expect_line("[alice] hello\n").await;
        assert_eq!(next(&mut bob).await, "[alice] hello\n");
    }

    #[tokio::test]
    async fn test_taken_name_reprompts() {
        let handle = start();
        let (_alice_id, mut alice) = member(&handle, "alice").await;
        let mut peer = TestPeer::connect(&handle);

        peer.expect_prompt().await;
        peer.send("alice\n").await;
        peer.expect_line(NAME_TAKEN).await;
        peer.expect_prompt().await;
        peer.send("bob\n").await;
        peer.expect_line("bob joined the server!\n").await;

        assert_eq!(next(&mut alice).await, "bob joined the server!\n");
    }

    #[tokio::test]
    async fn test_empty_name_admitted_once() {
        let handle = start();
        let mut first = TestPeer::connect(&handle);

        first.expect_prompt().await;
        first.send(" \t \n").await;
        first.expect_line(" joined the server!\n").await;

        let mut second = TestPeer::connect(&handle);
        second.expect_prompt().await;
        second.send("\n").await;
        second.expect_line(NAME_TAKEN).await;
        second.expect_prompt().await;
        second.send("carol\n").await;
        second.expect_line("carol joined the server!\n").await;
        first.expect_line("carol joined the server!\n").await;

        first.send("hi\n").await;
        second.expect_line("[] hi\n").await;
    }

    #[tokio::test]
    async fn test_non_utf8_line_relayed() {
        let handle = start();
        let (_bob_id, mut bob) = member(&handle, "bob").await;
        let mut peer = TestPeer::connect(&handle);

        peer.expect_prompt().await;
        peer.send("alice\n").await;
        peer.expect_line("alice joined the server!\n").await;
        assert_eq!(next(&mut bob).await, "alice joined the server!\n");

        peer.writer.write_all(b"caf\xe9\n").await.unwrap();
        assert_eq!(next(&mut bob).await, "[alice] caf\u{FFFD}\n");

        peer.send("still here\n").await;
        assert_eq!(next(&mut bob).await, "[alice] still here\n");
    }

    #[tokio::test]
    async fn test_eof_during_negotiation_never_joins() {
        let handle = start();
        let (_bob_id, mut bob) = member(&handle, "bob").await;
        let mut peer = TestPeer::connect(&handle);

        peer.expect_prompt().await;
        peer.send("ali").await;
        peer.writer.shutdown().await.unwrap();

        let result = timeout(WAIT, peer.task).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_announced() {
        let handle = start();
        let (_bob_id, mut bob) = member(&handle, "bob").await;
        let mut peer = TestPeer::connect(&handle);

        peer.expect_prompt().await;
        peer.send("alice\n").await;
        peer.expect_line("alice joined the server!\n").await;
        assert_eq!(next(&mut bob).await, "alice joined the server!\n");

        // Unterminated fragment is dropped with the connection
        peer.send("half a li").await;
        peer.writer.shutdown().await.unwrap();

        assert_eq!(next(&mut bob).await, "alice left the server!\n");
        let result = timeout(WAIT, peer.task).await.unwrap().unwrap();
        assert!(result.is_ok());

        // The name is free again
        let (_again, _rx) = member(&handle, "alice").await;
    }

    #[tokio::test]
    async fn test_write_failure_during_negotiation() {
        let handle = start();
        let (client_side, server_side) = tokio::io::duplex(1024);
        drop(client_side);

        let result = handle_connection(server_side, handle).await;

        assert!(matches!(result, Err(AppError::Io(_))));
    }

    #[tokio::test]
    async fn test_read_full_line_discards_fragment() {
        let mut reader = BufReader::new(&b"one\ntwo"[..]);
        let mut buf = Vec::new();

        assert_eq!(
            read_full_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("one\n")
        );
        assert_eq!(read_full_line(&mut reader, &mut buf).await.unwrap(), None);
        assert_eq!(read_full_line(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_write_failure_keeps_client_registered() {
        let handle = start();
        let (_bob_id, mut bob) = member(&handle, "bob").await;

        // Alice's stream is already dead on the far side
        let (stream, far_side) = tokio::io::duplex(64);
        drop(far_side);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER_SIZE);
        let alice_id = ClientId::new();
        let writer = tokio::spawn(write_lines(alice_id, stream, rx));

        handle
            .submit_join(Client::new(alice_id, "alice".to_string(), tx))
            .await
            .unwrap();
        assert_eq!(next(&mut bob).await, "alice joined the server!\n");

        // The join notice hits the broken stream and the writer gives up
        timeout(WAIT, writer).await.unwrap().unwrap();

        handle.submit_message("[bob] you there?\n".to_string()).await.unwrap();
        assert_eq!(next(&mut bob).await, "[bob] you there?\n");

        // Still registered until the handler reports the disconnect
        let (taken_tx, _taken_rx) = mpsc::channel(1);
        assert_eq!(
            handle
                .submit_join(Client::new(ClientId::new(), "alice".to_string(), taken_tx))
                .await,
            Err(JoinError::NameTaken("alice".to_string()))
        );

        handle.submit_disconnect(alice_id).await.unwrap();
        assert_eq!(next(&mut bob).await, "alice left the server!\n");
    }

    #[tokio::test]
    async fn test_stalled_reader_does_not_pin_handler() {
        let handle = start();
        let (client_side, server_side) = tokio::io::duplex(64);
        let task = tokio::spawn(handle_connection(server_side, handle.clone()));
        let (reader, mut writer) = tokio::io::split(client_side);
        let mut reader = BufReader::new(reader);

        let mut prompt = vec![0u8; NAME_PROMPT.len()];
        reader.read_exact(&mut prompt).await.unwrap();
        writer.write_all(b"alice\n").await.unwrap();
        let mut joined = String::new();
        reader.read_line(&mut joined).await.unwrap();
        assert_eq!(joined, "alice joined the server!\n");

        // Far more than the pipe holds, and the client never reads again
        let long = format!("[bob] {}\n", "x".repeat(200));
        for _ in 0..4 {
            handle.submit_message(long.clone()).await.unwrap();
        }
        writer.shutdown().await.unwrap();

        let result = timeout(WRITER_DRAIN_TIMEOUT + WAIT * 3, task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        drop(reader);
    }
}
