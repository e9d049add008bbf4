//! Client side of the relay protocol.
//!
//! [`RelayClient`] is the surface a front end drives: connect, identify,
//! send text or files, and wait for deliveries. It can be split into a
//! [`RelayReceiver`] and a [`RelaySender`] so reading and writing happen on
//! separate tasks.

use parley_proto::Frame;
use parley_proto::codec::{self, CodecError, DEFAULT_MAX_FRAME_SIZE};
use parley_proto::record::{self, RecordError};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Errors returned by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting or writing failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing failure on the stream.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The frame to send is not a valid record.
    #[error("invalid record: {0}")]
    Record(#[from] RecordError),

    /// A delivery frame from the server is not UTF-8.
    #[error("delivery frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Reading half of a client connection.
pub struct RelayReceiver {
    reader: BufReader<OwnedReadHalf>,
    max_frame_size: usize,
}

impl RelayReceiver {
    /// Waits for the next delivery frame (`"{sender}: {body}"`).
    ///
    /// Returns `Ok(None)` once the server closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on a framing error or a non-UTF-8 frame.
    pub async fn receive_frame(&mut self) -> Result<Option<String>, ClientError> {
        let Some(payload) = codec::read_frame(&mut self.reader, self.max_frame_size).await? else {
            return Ok(None);
        };
        String::from_utf8(payload)
            .map(Some)
            .map_err(|_| ClientError::InvalidUtf8)
    }
}

/// Writing half of a client connection.
pub struct RelaySender {
    writer: OwnedWriteHalf,
}

impl RelaySender {
    /// Sends the identity handshake. Must be the first frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Record`] for an unusable username, or an I/O
    /// error if the write fails.
    pub async fn send_handshake(&mut self, username: &str) -> Result<(), ClientError> {
        record::validate_username(username)?;
        codec::write_frame(&mut self.writer, username.as_bytes()).await?;
        Ok(())
    }

    /// Sends one frame.
    ///
    /// A file header sent this way must be followed by exactly `size` raw
    /// bytes; [`RelaySender::send_file`] does both.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Record`] if the frame cannot be serialized, or
    /// an I/O error if the write fails.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let record = frame.to_record()?;
        codec::write_frame(&mut self.writer, record.as_bytes()).await?;
        Ok(())
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// See [`RelaySender::send_frame`].
    pub async fn send_text(
        &mut self,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> Result<(), ClientError> {
        self.send_frame(&Frame::text(sender, recipient, body)).await
    }

    /// Sends a file header followed by its contents.
    ///
    /// # Errors
    ///
    /// See [`RelaySender::send_frame`].
    pub async fn send_file(
        &mut self,
        sender: &str,
        recipient: &str,
        filename: &str,
        contents: &[u8],
    ) -> Result<(), ClientError> {
        let header = Frame::file_header(sender, recipient, filename, contents.len() as u64);
        self.send_frame(&header).await?;
        self.writer.write_all(contents).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// A connection to a relay server.
pub struct RelayClient {
    receiver: RelayReceiver,
    sender: RelaySender,
}

impl RelayClient {
    /// Connects to the relay at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the connection fails.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            receiver: RelayReceiver {
                reader: BufReader::new(read_half),
                max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            },
            sender: RelaySender { writer: write_half },
        })
    }

    /// Sets the largest delivery frame the client accepts.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.receiver.max_frame_size = max_frame_size;
        self
    }

    /// Sends the identity handshake.
    ///
    /// # Errors
    ///
    /// See [`RelaySender::send_handshake`].
    pub async fn send_handshake(&mut self, username: &str) -> Result<(), ClientError> {
        self.sender.send_handshake(username).await
    }

    /// Sends one frame.
    ///
    /// # Errors
    ///
    /// See [`RelaySender::send_frame`].
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        self.sender.send_frame(frame).await
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// See [`RelaySender::send_frame`].
    pub async fn send_text(
        &mut self,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> Result<(), ClientError> {
        self.sender.send_text(sender, recipient, body).await
    }

    /// Sends a file header followed by its contents.
    ///
    /// # Errors
    ///
    /// See [`RelaySender::send_frame`].
    pub async fn send_file(
        &mut self,
        sender: &str,
        recipient: &str,
        filename: &str,
        contents: &[u8],
    ) -> Result<(), ClientError> {
        self.sender
            .send_file(sender, recipient, filename, contents)
            .await
    }

    /// Waits for the next delivery frame.
    ///
    /// # Errors
    ///
    /// See [`RelayReceiver::receive_frame`].
    pub async fn receive_frame(&mut self) -> Result<Option<String>, ClientError> {
        self.receiver.receive_frame().await
    }

    /// Splits the client into independently owned halves.
    #[must_use]
    pub fn into_split(self) -> (RelayReceiver, RelaySender) {
        (self.receiver, self.sender)
    }
}
