//! Framed TCP transport.
//!
//! One reader task decodes pushes and hands them to the session dispatcher
//! in arrival order; one writer task drains the outbound queue. Both are
//! aborted on disconnect.

use crate::error::ClientError;
use log::{error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::messages::{encode_frame, ClientMessage, ServerPush, FRAME_HEADER_LEN, MAX_FRAME_LEN};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reads one length-prefixed message. Also used by test servers to read
/// the client side of the protocol.
pub async fn read_message<T, R>(reader: &mut R) -> Result<T, ClientError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ClientError::Connection(format!(
            "oversized frame ({} bytes)",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}

/// Writes one length-prefixed message.
pub async fn write_message<T, W>(writer: &mut W, message: &T) -> Result<(), ClientError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// A connected socket with its reader and writer tasks.
pub struct Socket {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Socket {
    /// Connects and starts the IO tasks. Decoded pushes are forwarded to
    /// `push_tx`; the channel closing signals the connection is gone.
    pub async fn connect(
        addr: &str,
        push_tx: mpsc::UnboundedSender<ServerPush>,
    ) -> Result<Socket, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        info!("Connected to {}", addr);
        let (mut read_half, mut write_half) = stream.into_split();

        let reader = tokio::spawn(async move {
            loop {
                match read_message::<ServerPush, _>(&mut read_half).await {
                    Ok(push) => {
                        if push_tx.send(push).is_err() {
                            break;
                        }
                    }
                    Err(ClientError::Io(e)) => {
                        info!("Socket closed: {}", e);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to decode push: {}", e);
                        break;
                    }
                }
            }
        });

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = write_message(&mut write_half, &message).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
            }
        });

        Ok(Socket {
            outbound,
            tasks: Mutex::new(vec![reader, writer]),
        })
    }

    /// Queues a message for sending. Fails only when the connection is gone.
    pub fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.outbound
            .send(message)
            .map_err(|_| ClientError::Connection("socket is closed".to_string()))
    }

    /// Aborts the IO tasks and closes the stream.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.shutdown();
    }
}
