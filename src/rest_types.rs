use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::serde_utils::deserialize_lenient_u64;

/// Common envelope of every backend response body.
pub trait ApiResponse {
    fn success(&self) -> bool;
    fn error(&self) -> Option<&str>;
}

macro_rules! api_response {
    ($($ty:ty),* $(,)?) => {
        $(impl ApiResponse for $ty {
            fn success(&self) -> bool {
                self.success
            }

            fn error(&self) -> Option<&str> {
                self.error.as_deref()
            }
        })*
    };
}

/// Status and decoded body of one backend call. `body` is `None` when the
/// response could not be decoded.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub status: StatusCode,
    pub body: Option<T>,
}

impl<T: ApiResponse> Reply<T> {
    /// The body, if the call succeeded at both the HTTP and application level.
    /// Otherwise the most specific reason available.
    pub fn accepted(self) -> Result<T, String> {
        match self.body {
            Some(body) if self.status.is_success() && body.success() => Ok(body),
            Some(body) => Err(body
                .error()
                .map(str::to_string)
                .unwrap_or_else(|| self.status.to_string())),
            None if self.status.is_success() => Err("invalid response from server".to_string()),
            None => Err(self.status.to_string()),
        }
    }
}

/// Outcome of writing one part straight to storage.
#[derive(Debug, Clone)]
pub struct PartReply {
    pub status: StatusCode,
    /// The `ETag` response header, when the transport could see it.
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DirectUploadResponse {
    pub success: bool,
    pub url: Option<String>,
    pub cloud_front_url: Option<String>,
    pub s3_url: Option<String>,
    pub s3_key: Option<String>,
    pub filename: Option<String>,
    pub file_type: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_u64")]
    pub file_size: Option<u64>,
    pub error: Option<String>,
}

impl DirectUploadResponse {
    pub fn public_url(&self) -> Option<&str> {
        first_url([&self.url, &self.cloud_front_url, &self.s3_url])
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateMultipartRequest {
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    pub part_size: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPartUrl {
    #[serde(deserialize_with = "deserialize_part_number")]
    pub part_number: u32,
    pub signed_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InitiateMultipartResponse {
    pub success: bool,
    pub upload_id: Option<String>,
    pub s3_key: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_u64")]
    pub total_parts: Option<u64>,
    #[serde(deserialize_with = "deserialize_lenient_u64")]
    pub part_size: Option<u64>,
    pub filename: Option<String>,
    pub original_filename: Option<String>,
    pub file_type: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub urls: Vec<PresignedPartUrl>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPartRequest {
    pub upload_id: String,
    pub s3_key: String,
    pub part_number: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VerifyPartResponse {
    pub success: bool,
    #[serde(deserialize_with = "deserialize_lenient_u64")]
    pub part_number: Option<u64>,
    pub etag: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub upload_id: String,
    pub s3_key: String,
    pub parts: Vec<CompletedPart>,
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub file_size: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompleteMultipartResponse {
    pub success: bool,
    pub url: Option<String>,
    pub cloud_front_url: Option<String>,
    pub s3_url: Option<String>,
    pub s3_key: Option<String>,
    pub filename: Option<String>,
    pub file_type: Option<String>,
    pub error: Option<String>,
}

impl CompleteMultipartResponse {
    pub fn public_url(&self) -> Option<&str> {
        first_url([&self.url, &self.cloud_front_url, &self.s3_url])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortMultipartRequest {
    pub upload_id: String,
    pub s3_key: String,
}

api_response!(
    DirectUploadResponse,
    InitiateMultipartResponse,
    VerifyPartResponse,
    CompleteMultipartResponse,
);

fn first_url<const N: usize>(candidates: [&Option<String>; N]) -> Option<&str> {
    candidates
        .into_iter()
        .filter_map(|url| url.as_deref())
        .find(|url| !url.is_empty())
}

fn deserialize_part_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let number = deserialize_lenient_u64(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("missing part number"))?;
    u32::try_from(number).map_err(serde::de::Error::custom)
}
