use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::client::{HttpTransport, SUB_CHUNK_SIZE};
use crate::error::UploadError;
use crate::plan::MIN_PART_SIZE_BYTES;
use crate::profile::UploadConfig;
use crate::progress::{COMPLETE_PROGRESS, ProgressCallback, ProgressTracker, byte_progress};
use crate::transport::{DirectUpload, UploadTransport};

const MEGABYTE: u64 = 1024 * 1024;
/// Payloads below this size go out in a single request.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 4 * MEGABYTE;
pub const DEFAULT_PART_SIZE: u64 = MIN_PART_SIZE_BYTES;

/// Where the integrity token of a written part comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartVerification {
    /// Ask the backend relay, which looks the part up in storage.
    #[default]
    Relay,
    /// Read the `ETag` header of the storage response, falling back to the
    /// relay when the header is not visible.
    StorageEtag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub multipart_threshold: u64,
    pub part_size: u64,
    /// Part transfers allowed in flight at once. 1 keeps them strictly in order.
    pub max_concurrent_parts: usize,
    pub verification: PartVerification,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            max_concurrent_parts: 1,
            verification: PartVerification::Relay,
        }
    }
}

/// Per-call knobs. Nothing here outlives the call.
#[derive(Default)]
pub struct UploadOptions<'a> {
    pub on_progress: Option<ProgressCallback<'a>>,
    /// Extra form fields sent with a direct upload, e.g. a target folder.
    pub fields: BTreeMap<String, String>,
    /// Overrides the content type derived from the filename.
    pub content_type: Option<String>,
}

impl<'a> UploadOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, callback: impl FnMut(u8) + Send + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub(crate) fn resolve_content_type(&mut self, filename: &str) -> String {
        self.content_type
            .take()
            .unwrap_or_else(|| content_type_for(filename).to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub url: String,
    pub s3_key: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
}

/// What an upload call hands back. Exactly one of `file` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub success: bool,
    #[serde(flatten)]
    pub file: Option<UploadedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    pub fn succeeded(file: UploadedFile) -> Self {
        Self {
            success: true,
            file: Some(file),
            error: None,
        }
    }

    pub fn failed(error: impl Display) -> Self {
        Self {
            success: false,
            file: None,
            error: Some(error.to_string()),
        }
    }

    pub fn into_result(self) -> Result<UploadedFile, String> {
        match (self.file, self.error) {
            (Some(file), None) => Ok(file),
            (_, error) => Err(error.unwrap_or_else(|| "Upload failed".to_string())),
        }
    }
}

impl From<Result<UploadedFile, UploadError>> for UploadResult {
    fn from(result: Result<UploadedFile, UploadError>) -> Self {
        match result {
            Ok(file) => UploadResult::succeeded(file),
            Err(e) => UploadResult::failed(e),
        }
    }
}

/// Entry point for uploads: picks the direct or the multipart path by size.
pub struct Uploader<T = HttpTransport> {
    pub(crate) transport: T,
    pub(crate) settings: UploadSettings,
}

impl<T: UploadTransport> Uploader<T> {
    pub fn new(transport: T, settings: UploadSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Uploads `payload` as `filename` through the endpoints in `config`.
    ///
    /// Never fails: every error ends up in [`UploadResult::error`].
    pub async fn upload(
        &self,
        payload: Bytes,
        filename: &str,
        config: &UploadConfig,
        options: UploadOptions<'_>,
    ) -> UploadResult {
        let size = payload.len() as u64;

        let result = if filename.trim().is_empty() {
            Err(UploadError::EmptyFilename)
        } else if size == 0 || size < self.settings.multipart_threshold {
            tracing::debug!(filename, size, "Using direct upload");
            self.upload_direct(payload, filename, &config.direct_upload, options)
                .await
        } else {
            tracing::debug!(filename, size, "Using multipart upload");
            self.upload_multipart(payload, filename, config, options)
                .await
        };

        match &result {
            Ok(file) => tracing::info!(filename, url = %file.url, "Upload finished"),
            Err(e) => tracing::warn!(filename, error = %e, "Upload failed"),
        }

        result.into()
    }

    /// Sends the whole payload to `endpoint` in one request.
    pub async fn upload_direct(
        &self,
        payload: Bytes,
        filename: &str,
        endpoint: &Url,
        mut options: UploadOptions<'_>,
    ) -> Result<UploadedFile, UploadError> {
        let content_type = options.resolve_content_type(filename);
        let mut progress = ProgressTracker::new(options.on_progress.take());
        let total = payload.len() as u64;

        let capacity = payload.len().div_ceil(SUB_CHUNK_SIZE).max(1);
        let (progress_tx, mut progress_rx) = mpsc::channel::<u64>(capacity);

        let upload = DirectUpload {
            payload,
            filename: filename.to_string(),
            content_type: content_type.clone(),
            fields: options.fields,
        };

        let upload_fut = self.transport.upload_direct(endpoint, upload, progress_tx);
        tokio::pin!(upload_fut);

        let mut bytes_sent = 0u64;
        let reply = loop {
            tokio::select! {
                biased;
                Some(bytes) = progress_rx.recv() => {
                    bytes_sent += bytes;
                    progress.report(byte_progress(bytes_sent, total));
                }
                result = &mut upload_fut => {
                    break result?;
                }
            }
        };

        while let Ok(bytes) = progress_rx.try_recv() {
            bytes_sent += bytes;
            progress.report(byte_progress(bytes_sent, total));
        }

        if !reply.status.is_success() {
            let description = reply
                .status
                .canonical_reason()
                .unwrap_or(reply.status.as_str());
            return Err(UploadError::DirectRejected(description.to_string()));
        }

        let body = reply.body.ok_or(UploadError::MalformedResponse)?;
        if !body.success {
            let reason = body
                .error
                .unwrap_or_else(|| "server rejected the upload".to_string());
            return Err(UploadError::DirectRejected(reason));
        }

        let url = body
            .public_url()
            .ok_or(UploadError::MalformedResponse)?
            .to_string();

        progress.report(COMPLETE_PROGRESS);

        Ok(UploadedFile {
            url,
            s3_key: body.s3_key.unwrap_or_default(),
            filename: body.filename.unwrap_or_else(|| filename.to_string()),
            file_type: body.file_type.unwrap_or(content_type),
            file_size: body.file_size.unwrap_or(total),
        })
    }
}

/// Content type for a filename, by extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
