use std::collections::BTreeMap;
use std::future::Future;

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use url::Url;

use crate::error::UploadError;
use crate::rest_types::{
    AbortMultipartRequest, CompleteMultipartRequest, CompleteMultipartResponse,
    DirectUploadResponse, InitiateMultipartRequest, InitiateMultipartResponse, PartReply, Reply,
    VerifyPartRequest, VerifyPartResponse,
};

/// A whole payload sent to the direct upload endpoint.
#[derive(Debug, Clone)]
pub struct DirectUpload {
    pub payload: Bytes,
    pub filename: String,
    pub content_type: String,
    pub fields: BTreeMap<String, String>,
}

/// The remote calls an upload is made of.
///
/// Implementations only move bytes: they report what came back and leave
/// interpreting status codes and bodies to the caller. An `Err` means no
/// response was received at all.
pub trait UploadTransport: Send + Sync {
    /// Sends `upload` in one request. The number of bytes handed to the
    /// network is pushed to `progress_tx` as the body streams out.
    fn upload_direct(
        &self,
        endpoint: &Url,
        upload: DirectUpload,
        progress_tx: mpsc::Sender<u64>,
    ) -> impl Future<Output = Result<Reply<DirectUploadResponse>, UploadError>> + Send;

    fn initiate(
        &self,
        endpoint: &Url,
        request: &InitiateMultipartRequest,
    ) -> impl Future<Output = Result<Reply<InitiateMultipartResponse>, UploadError>> + Send;

    /// Writes one part to its presigned URL.
    fn upload_part(
        &self,
        signed_url: &Url,
        body: Bytes,
    ) -> impl Future<Output = Result<PartReply, UploadError>> + Send;

    fn verify_part(
        &self,
        endpoint: &Url,
        request: &VerifyPartRequest,
    ) -> impl Future<Output = Result<Reply<VerifyPartResponse>, UploadError>> + Send;

    fn complete(
        &self,
        endpoint: &Url,
        request: &CompleteMultipartRequest,
    ) -> impl Future<Output = Result<Reply<CompleteMultipartResponse>, UploadError>> + Send;

    /// Releases a storage-side session. Only the status is reported back.
    fn abort(
        &self,
        endpoint: &Url,
        request: &AbortMultipartRequest,
    ) -> impl Future<Output = Result<StatusCode, UploadError>> + Send;
}
