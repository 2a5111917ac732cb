// Profile image upload
// Presigned PUT straight to object storage, with progress and cancellation

use anyhow::Context;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::PresignedUpload;

/// Bytes handed to the body stream per progress tick
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Receives integer upload percentages (0-100)
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("Image is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("Image file is empty")]
    Empty,

    /// Aborted by the caller; not a failure
    #[error("Upload cancelled")]
    Cancelled,

    #[error("Storage rejected upload: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Upload failed: {0}")]
    Transport(String),
}

impl UploadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

/// An image ready to upload
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read an image from disk, guessing its MIME type from the extension
    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image: {}", path.display()))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Image path has no file name")?
            .to_string();

        Ok(Self {
            content_type: guess_content_type(&file_name).to_string(),
            file_name,
            bytes: Bytes::from(bytes),
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// Rounded percentage of `sent` over `total`
fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent * 100 + total / 2) / total).min(100) as u8
}

/// PUTs images to presigned URLs
///
/// Uses its own client without a cookie jar: presigned URLs carry their own
/// authorization and must not receive the session credential.
pub struct ImageUploader {
    client: Client,
    max_bytes: u64,
    chunk_size: usize,
}

impl ImageUploader {
    pub fn new(max_bytes: u64, request_timeout: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create upload HTTP client")?;

        Ok(Self {
            client,
            max_bytes,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Check size and type before any network call
    pub fn validate(&self, file: &ImageFile) -> Result<(), UploadError> {
        if file.bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if file.size() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: file.size(),
                limit: self.max_bytes,
            });
        }
        if !file.content_type.starts_with("image/") {
            return Err(UploadError::UnsupportedType(file.content_type.clone()));
        }
        Ok(())
    }

    /// Upload `file` to a presigned URL
    pub async fn put(
        &self,
        presigned: &PresignedUpload,
        file: &ImageFile,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        self.validate(file)?;
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let total = file.bytes.len();
        let chunks: Vec<Bytes> = (0..total)
            .step_by(self.chunk_size)
            .map(|start| file.bytes.slice(start..(start + self.chunk_size).min(total)))
            .collect();

        let mut sent = 0usize;
        let body = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len();
            if let Some(ref callback) = progress {
                callback(percent(sent, total));
            }
            Ok::<_, std::io::Error>(chunk)
        });

        tracing::info!(
            key = %presigned.key,
            size = total,
            content_type = %file.content_type,
            "Uploading image"
        );

        let request = self
            .client
            .put(&presigned.upload_url)
            .header(CONTENT_TYPE, &file.content_type)
            .header(CONTENT_LENGTH, total)
            .body(Body::wrap_stream(body))
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(key = %presigned.key, "Upload cancelled");
                return Err(UploadError::Cancelled);
            }
            result = request => result.map_err(|e| UploadError::Transport(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, key = %presigned.key, "Storage rejected upload");
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!(key = %presigned.key, "Image uploaded");
        Ok(())
    }
}
