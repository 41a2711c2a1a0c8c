use thiserror::Error;

/// Everything that can end an upload call early.
///
/// The `Display` text of each variant is what callers see in
/// [`UploadResult::error`](crate::UploadResult), so keep it readable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("Filename must not be empty")]
    EmptyFilename,

    #[error("Upload failed: {0}")]
    DirectRejected(String),

    #[error("Network error during upload: {0}")]
    Network(String),

    #[error("Invalid response from server")]
    MalformedResponse,

    #[error("Cannot plan upload: {0}")]
    Planning(String),

    #[error("Failed to initiate multipart upload: {0}")]
    Initiate(String),

    #[error("No presigned URL returned for part {0}")]
    MissingPartUrl(u32),

    #[error("Failed to upload part {part_number} to S3: {reason}")]
    PartTransfer { part_number: u32, reason: String },

    #[error("Failed to verify part {part_number}: {reason}")]
    Verify { part_number: u32, reason: String },

    #[error("Failed to complete multipart upload: {0}")]
    Complete(String),

    #[error("Multipart session is inconsistent: {0}")]
    Protocol(String),

    #[error("Failed to abort multipart upload: {0}")]
    Abort(String),
}
