//! Newline-delimited JSON transport.
//!
//! One JSON-RPC message per line. Reading happens on the caller's task;
//! writes are funneled through a single writer task so concurrent handlers
//! never interleave partial lines.

use crate::error::{McpError, McpResult};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Capacity of the outgoing message queue.
const OUTGOING_CAPACITY: usize = 100;

/// A line read from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A non-empty line of text.
    Message(String),
    /// A line that is not valid UTF-8.
    InvalidUtf8,
}

/// Reads one message per non-empty line.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    // Holds a partial line across cancelled reads.
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next non-empty line, or `None` at end of input.
    ///
    /// Cancel safe. Only I/O failures are returned as errors.
    pub async fn next_message(&mut self) -> McpResult<Option<Inbound>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;
            if read == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            let raw = std::mem::take(&mut self.buf);
            let line = trim_line_end(&raw);
            match std::str::from_utf8(line) {
                Ok(text) if text.trim().is_empty() => continue,
                Ok(text) => {
                    debug!("Received: {}", text);
                    return Ok(Some(Inbound::Message(text.to_string())));
                }
                Err(e) => {
                    warn!(error = %e, bytes = line.len(), "Received a line that is not UTF-8");
                    return Ok(Some(Inbound::InvalidUtf8));
                }
            }
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Cloneable handle for queueing outgoing messages.
#[derive(Debug, Clone)]
pub struct MessageSender {
    outgoing_tx: mpsc::Sender<String>,
}

impl MessageSender {
    /// Serialize and queue a message.
    pub async fn send<T: Serialize>(&self, message: &T) -> McpResult<()> {
        let json = serde_json::to_string(message)?;
        self.outgoing_tx
            .send(json)
            .await
            .map_err(|_| McpError::transport("output channel closed"))
    }
}

/// Start the writer task.
///
/// The task ends once every [`MessageSender`] has been dropped and the queue
/// is drained.
pub fn spawn_writer<W>(writer: W) -> (MessageSender, JoinHandle<McpResult<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(OUTGOING_CAPACITY);
    let handle = tokio::spawn(write_loop(writer, outgoing_rx));
    (MessageSender { outgoing_tx }, handle)
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        debug!("Sending: {}", msg);
        let written = async {
            writer.write_all(msg.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            error!("Error writing message: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn message(text: &str) -> Option<Inbound> {
        Some(Inbound::Message(text.to_string()))
    }

    #[tokio::test]
    async fn test_reader_skips_blank_lines() {
        let input: &[u8] = b"{\"a\":1}\n\n   \r\n{\"b\":2}\r\n";
        let mut reader = MessageReader::new(input);

        assert_eq!(reader.next_message().await.unwrap(), message("{\"a\":1}"));
        assert_eq!(reader.next_message().await.unwrap(), message("{\"b\":2}"));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_last_line_without_newline() {
        let input: &[u8] = b"{\"a\":1}";
        let mut reader = MessageReader::new(input);
        assert_eq!(reader.next_message().await.unwrap(), message("{\"a\":1}"));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_continues_after_invalid_utf8() {
        let input: &[u8] = b"\xff\xfe garbage\n{\"a\":1}\n";
        let mut reader = MessageReader::new(input);

        assert_eq!(reader.next_message().await.unwrap(), Some(Inbound::InvalidUtf8));
        assert_eq!(reader.next_message().await.unwrap(), message("{\"a\":1}"));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_keeps_partial_line_when_cancelled() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = MessageReader::new(server);

        client.write_all(b"{\"a\":").await.unwrap();
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), reader.next_message())
                .await;
        assert!(pending.is_err());

        client.write_all(b"1}\n").await.unwrap();
        drop(client);
        assert_eq!(reader.next_message().await.unwrap(), message("{\"a\":1}"));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_emits_one_line_per_message() {
        let (client, mut output) = tokio::io::duplex(4096);
        let (sender, handle) = spawn_writer(client);

        sender.send(&serde_json::json!({"id": 1})).await.unwrap();
        sender.send(&serde_json::json!({"id": 2})).await.unwrap();
        drop(sender);
        handle.await.unwrap().unwrap();

        let mut text = String::new();
        output.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "{\"id\":1}\n{\"id\":2}\n");
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped() {
        let (client, output) = tokio::io::duplex(64);
        drop(output);
        let (sender, handle) = spawn_writer(client);

        // The first write fails on the closed pipe and ends the writer task.
        let _ = sender.send(&serde_json::json!({"id": 1})).await;
        assert!(handle.await.unwrap().is_err());
        assert!(sender.send(&serde_json::json!({"id": 2})).await.is_err());
    }
}
