//! File transfers: a header frame followed by raw payload bytes.
//!
//! The payload is always consumed from the stream, whether it is stored or
//! not, so the next frame starts where the client expects it. Permission
//! follows the text rule: the sender must follow the recipient. Stored files
//! land in the configured directory as `received_{basename}`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use parley_proto::FileHeader;
use parley_proto::codec::{self, CodecError};
use tokio::io::AsyncRead;

use crate::store::FollowStore;

/// Prefix prepended to the basename of every stored file.
pub const RECEIVED_PREFIX: &str = "received_";

/// Result of handling one file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Payload written to this path.
    Stored(PathBuf),
    /// The sender does not follow the recipient; payload discarded.
    Denied,
    /// The filename has no usable basename; payload discarded.
    Discarded,
    /// The payload was read but could not be written.
    WriteFailed,
}

/// Receives file payloads announced by a [`FileHeader`].
#[derive(Clone)]
pub struct FileReceiver {
    follows: FollowStore,
    files_dir: PathBuf,
    max_file_size: u64,
}

impl FileReceiver {
    /// Creates a receiver that stores files under `files_dir`.
    #[must_use]
    pub const fn new(follows: FollowStore, files_dir: PathBuf, max_file_size: u64) -> Self {
        Self {
            follows,
            files_dir,
            max_file_size,
        }
    }

    /// Directory received files are written to.
    #[must_use]
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Consumes the payload announced by `header` from `reader` and stores
    /// it if the transfer is permitted.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Oversized`] if the header announces more than
    /// the configured maximum (nothing is read in that case), or
    /// [`CodecError::Truncated`] / [`CodecError::Io`] if the payload cannot
    /// be read in full. Any of these leaves the stream unusable.
    pub async fn receive<R>(
        &self,
        reader: &mut R,
        header: &FileHeader,
    ) -> Result<FileOutcome, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        if header.size > self.max_file_size {
            return Err(CodecError::Oversized {
                size: header.size,
                max: self.max_file_size,
            });
        }

        if !self.is_permitted(header).await {
            codec::discard_payload(reader, header.size).await?;
            tracing::info!(
                sender = %header.sender,
                recipient = %header.recipient,
                filename = %header.filename,
                "file transfer blocked: sender does not follow recipient"
            );
            return Ok(FileOutcome::Denied);
        }

        let Some(target) = self.target_path(&header.filename) else {
            codec::discard_payload(reader, header.size).await?;
            tracing::warn!(
                sender = %header.sender,
                filename = %header.filename,
                "file transfer discarded: no usable file name"
            );
            return Ok(FileOutcome::Discarded);
        };

        let payload = codec::read_payload(reader, header.size).await?;

        if let Err(e) = tokio::fs::create_dir_all(&self.files_dir).await {
            tracing::error!(dir = %self.files_dir.display(), error = %e, "failed to create files directory");
            return Ok(FileOutcome::WriteFailed);
        }
        if let Err(e) = tokio::fs::write(&target, &payload).await {
            tracing::error!(path = %target.display(), error = %e, "failed to write received file");
            return Ok(FileOutcome::WriteFailed);
        }

        tracing::info!(
            sender = %header.sender,
            recipient = %header.recipient,
            path = %target.display(),
            size = header.size,
            "file received"
        );
        Ok(FileOutcome::Stored(target))
    }

    /// Checks the follow edge on the blocking pool. A failed check counts as
    /// denied.
    async fn is_permitted(&self, header: &FileHeader) -> bool {
        let follows = self.follows.clone();
        let (sender, recipient) = (header.sender.clone(), header.recipient.clone());
        let checked =
            tokio::task::spawn_blocking(move || follows.is_following(&sender, &recipient)).await;
        match checked {
            Ok(Ok(permitted)) => permitted,
            Ok(Err(e)) => {
                tracing::error!(
                    sender = %header.sender,
                    recipient = %header.recipient,
                    error = %e,
                    "follow check failed, treating as denied"
                );
                false
            }
            Err(e) => {
                tracing::error!(sender = %header.sender, error = %e, "spawn_blocking join error");
                false
            }
        }
    }

    /// Maps a client-supplied filename to its storage path.
    ///
    /// Only the final path component is kept; names without one (empty,
    /// `..`, a bare root) yield `None`.
    fn target_path(&self, filename: &str) -> Option<PathBuf> {
        let base = Path::new(filename).file_name()?;
        let mut name = OsString::from(RECEIVED_PREFIX);
        name.push(base);
        Some(self.files_dir.join(name))
    }
}
