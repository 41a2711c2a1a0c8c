//! Client side of a chunked upload protocol.
//!
//! Small payloads go to a direct upload endpoint in one request. Larger ones
//! are split into parts written straight to object storage through presigned
//! URLs, with a backend relay initiating, verifying and completing the
//! upload. See [`Uploader::upload`].

mod client;
mod error;
mod multipart;
mod plan;
mod profile;
mod progress;
pub mod rest_types;
mod serde_utils;
mod transport;
mod upload;

#[cfg(test)]
mod testing;

pub use client::HttpTransport;
pub use error::UploadError;
pub use multipart::SessionIds;
pub use plan::{MIN_PART_SIZE_BYTES, PartPlan, choose_part_size};
pub use profile::{ProfileRoutes, UploadConfig, builtin_profile, builtin_profiles};
pub use progress::{ProgressCallback, transfer_progress};
pub use transport::{DirectUpload, UploadTransport};
pub use upload::{
    DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, PartVerification, UploadOptions,
    UploadResult, UploadSettings, UploadedFile, Uploader, content_type_for,
};
