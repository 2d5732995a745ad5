//! Attachment storage.
//!
//! Uploaded payloads are written once under a fresh random name and served
//! back read-only under the public upload prefix.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use axum::body::Bytes;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

/// Extension used when the suggested name has none or an unusable one.
const FALLBACK_EXTENSION: &str = ".bin";

/// Longest accepted extension, dot included.
const MAX_EXTENSION_LEN: usize = 10;

/// Where a saved attachment lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    /// Public reference, e.g. `/uploads/3f2c...e1.apk`.
    pub url: String,
    /// Stored file name.
    pub file_name: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
}

/// Upload body delivered piece by piece.
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes, AttachmentError>> + Send + 'a>>;

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Persist `bytes` and return a retrievable reference.
    async fn save(
        &self,
        bytes: &[u8],
        suggested_name: Option<&str>,
    ) -> Result<StoredAttachment, AttachmentError>;

    /// Persist a streamed upload. An upload with no bytes is
    /// [`AttachmentError::Empty`] and leaves nothing behind.
    ///
    /// The default buffers the whole stream and calls [`save`](Self::save).
    async fn save_stream(
        &self,
        mut chunks: ChunkStream<'_>,
        suggested_name: Option<&str>,
    ) -> Result<StoredAttachment, AttachmentError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = chunks.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        if buffer.is_empty() {
            return Err(AttachmentError::Empty);
        }
        self.save(&buffer, suggested_name).await
    }

    /// Remove an attachment nothing refers to.
    async fn discard(&self, _attachment: &StoredAttachment) -> Result<(), AttachmentError> {
        Ok(())
    }
}

/// Stores attachments as flat files in one directory.
pub struct FilesystemAttachmentStore {
    base_path: PathBuf,
    public_prefix: String,
}

impl FilesystemAttachmentStore {
    pub fn new(base_path: impl Into<PathBuf>, public_prefix: &str) -> Self {
        Self {
            base_path: base_path.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create a fresh, uniquely named file in the base directory.
    async fn create_file(
        &self,
        suggested_name: Option<&str>,
    ) -> Result<(String, PathBuf, fs::File), AttachmentError> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| io_error(&self.base_path, &e))?;

        let file_name = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            extension_for(suggested_name)
        );
        let path = self.base_path.join(&file_name);
        let file = fs::File::create_new(&path)
            .await
            .map_err(|e| io_error(&path, &e))?;
        Ok((file_name, path, file))
    }

    fn stored(&self, file_name: String, size: u64, sha256: String) -> StoredAttachment {
        info!(file = %file_name, size, "Attachment stored");
        StoredAttachment {
            url: format!("{}/{file_name}", self.public_prefix),
            file_name,
            size,
            sha256,
        }
    }
}

#[async_trait]
impl AttachmentStore for FilesystemAttachmentStore {
    async fn save(
        &self,
        bytes: &[u8],
        suggested_name: Option<&str>,
    ) -> Result<StoredAttachment, AttachmentError> {
        let (file_name, path, mut file) = self.create_file(suggested_name).await?;

        file.write_all(bytes)
            .await
            .map_err(|e| io_error(&path, &e))?;
        file.sync_all().await.map_err(|e| io_error(&path, &e))?;

        Ok(self.stored(file_name, bytes.len() as u64, sha256_hex(bytes)))
    }

    async fn save_stream(
        &self,
        mut chunks: ChunkStream<'_>,
        suggested_name: Option<&str>,
    ) -> Result<StoredAttachment, AttachmentError> {
        let (file_name, path, mut file) = self.create_file(suggested_name).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        let written = async {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                size += chunk.len() as u64;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| io_error(&path, &e))?;
            }
            if size == 0 {
                return Err(AttachmentError::Empty);
            }
            file.sync_all().await.map_err(|e| io_error(&path, &e))
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(remove) = fs::remove_file(&path).await {
                debug!(file = %file_name, error = %remove, "Partial upload not removed");
            }
            return Err(e);
        }

        Ok(self.stored(file_name, size, to_hex(&hasher.finalize())))
    }

    async fn discard(&self, attachment: &StoredAttachment) -> Result<(), AttachmentError> {
        let path = self.base_path.join(&attachment.file_name);
        fs::remove_file(&path)
            .await
            .map_err(|e| io_error(&path, &e))?;
        info!(file = %attachment.file_name, "Attachment discarded");
        Ok(())
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> AttachmentError {
    AttachmentError::Io(format!("{}: {e}", path.display()))
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

fn to_hex(digest: &[u8]) -> String {
    use std::fmt::Write;

    digest
        .iter()
        .fold(String::with_capacity(digest.len() * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

/// Decode a base64 upload. Accepts a `data:...;base64,` prefix and embedded
/// whitespace. `None` when the payload is not valid base64 or decodes to
/// nothing.
pub fn decode_base64_payload(raw: &str) -> Option<Vec<u8>> {
    let trimmed = raw.trim();
    let body = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    STANDARD
        .decode(compact.as_bytes())
        .ok()
        .filter(|bytes| !bytes.is_empty())
}

/// Extension (with dot) kept from the suggested name, or `.bin`.
fn extension_for(suggested_name: Option<&str>) -> String {
    let ext = suggested_name
        .and_then(|name| Path::new(name.trim()).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() < MAX_EXTENSION_LEN)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()));

    ext.map_or_else(
        || FALLBACK_EXTENSION.to_string(),
        |ext| format!(".{}", ext.to_ascii_lowercase()),
    )
}

/// Attachment storage errors.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("I/O error: {0}")]
    Io(String),

    /// The upload body could not be read.
    #[error("Upload interrupted: {0}")]
    Upload(String),

    #[error("Upload is empty")]
    Empty,
}
