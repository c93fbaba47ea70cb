//! IPC transport halves
//!
//! Messages travel as newline-delimited JSON envelopes over any duplex byte
//! channel. The worker side runs a sender/receiver pair over its own
//! stdout/stdin; the master side runs one pair per child over the child's
//! piped stdin/stdout. The halves are split so the reader can live on its own
//! task while writers are shared behind a channel.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Writing half of an IPC channel
pub struct IpcSender<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> IpcSender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Send one message, wrapped in a versioned envelope
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), IpcError> {
        let envelope = MessageEnvelope::new(message);
        let mut json = serde_json::to_string(&envelope)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        Ok(())
    }
}

/// Reading half of an IPC channel
pub struct IpcReceiver<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> IpcReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Receive the next message. Returns `Ok(None)` once the peer closes its
    /// end of the channel.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, IpcError> {
        self.line.clear();
        let read = self
            .reader
            .read_line(&mut self.line)
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        if read == 0 {
            return Ok(None);
        }

        let envelope: MessageEnvelope<T> = serde_json::from_str(self.line.trim_end())
            .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

        if !envelope.is_compatible() {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: IPC_PROTOCOL_VERSION,
                actual: envelope.protocol_version,
            });
        }

        Ok(Some(envelope.message))
    }
}
