//! The multipart path: initiate a session, write every part to its
//! presigned URL, confirm each part's entity tag, then complete.
//!
//! Once the backend has handed out a session, any failure releases it with
//! a best-effort abort before the original error is returned.

use std::collections::HashMap;

use bytes::Bytes;
use futures::StreamExt;
use url::Url;

use crate::error::UploadError;
use crate::plan::{PartPlan, choose_part_size};
use crate::profile::UploadConfig;
use crate::progress::{COMPLETE_PROGRESS, ProgressTracker, transfer_progress};
use crate::rest_types::{
    AbortMultipartRequest, CompleteMultipartRequest, CompletedPart, InitiateMultipartRequest,
    InitiateMultipartResponse, VerifyPartRequest,
};
use crate::serde_utils::strip_etag_quotes;
use crate::transport::UploadTransport;
use crate::upload::{PartVerification, UploadOptions, UploadedFile, Uploader};

/// Identifiers tying every call of one multipart upload together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIds {
    pub upload_id: String,
    pub s3_key: String,
}

impl From<&SessionIds> for AbortMultipartRequest {
    fn from(ids: &SessionIds) -> Self {
        AbortMultipartRequest {
            upload_id: ids.upload_id.clone(),
            s3_key: ids.s3_key.clone(),
        }
    }
}

struct Session {
    ids: SessionIds,
    plan: PartPlan,
    urls: HashMap<u32, String>,
    filename: String,
    original_filename: String,
    file_type: String,
    media_type: Option<String>,
}

impl Session {
    fn open(
        ids: SessionIds,
        response: InitiateMultipartResponse,
        size: u64,
        requested_part_size: u64,
        original_filename: &str,
        content_type: &str,
    ) -> Result<Self, UploadError> {
        let part_size = response.part_size.unwrap_or(requested_part_size);
        let plan = PartPlan::new(size, part_size).map_err(|e| UploadError::Protocol(e.to_string()))?;

        if let Some(total_parts) = response.total_parts
            && total_parts != u64::from(plan.total_parts())
        {
            return Err(UploadError::Protocol(format!(
                "backend expects {} parts but {} bytes split into {} parts of {} bytes",
                total_parts,
                size,
                plan.total_parts(),
                part_size
            )));
        }

        let urls = response
            .urls
            .into_iter()
            .map(|url| (url.part_number, url.signed_url))
            .collect();

        Ok(Self {
            ids,
            plan,
            urls,
            filename: response
                .filename
                .unwrap_or_else(|| original_filename.to_string()),
            original_filename: response
                .original_filename
                .unwrap_or_else(|| original_filename.to_string()),
            file_type: response
                .file_type
                .unwrap_or_else(|| content_type.to_string()),
            media_type: response.media_type,
        })
    }

    fn signed_url(&self, part_number: u32) -> Result<Url, UploadError> {
        let url = self
            .urls
            .get(&part_number)
            .ok_or(UploadError::MissingPartUrl(part_number))?;

        Url::parse(url).map_err(|e| {
            UploadError::Protocol(format!("presigned URL for part {part_number} is invalid: {e}"))
        })
    }
}

impl<T: UploadTransport> Uploader<T> {
    /// Uploads `payload` through the multipart endpoints in `config`,
    /// regardless of its size.
    pub async fn upload_multipart(
        &self,
        payload: Bytes,
        filename: &str,
        config: &UploadConfig,
        mut options: UploadOptions<'_>,
    ) -> Result<UploadedFile, UploadError> {
        let content_type = options.resolve_content_type(filename);
        let mut progress = ProgressTracker::new(options.on_progress.take());
        let size = payload.len() as u64;
        let part_size = choose_part_size(size, self.settings.part_size)?;

        let (ids, response) = self
            .initiate(&config.initiate_multipart, filename, &content_type, size, part_size)
            .await?;

        tracing::debug!(
            upload_id = %ids.upload_id,
            s3_key = %ids.s3_key,
            total_parts = ?response.total_parts,
            "Multipart upload initiated"
        );

        let result = async {
            let session = Session::open(ids.clone(), response, size, part_size, filename, &content_type)?;
            let parts = self
                .transfer_parts(&session, &payload, &config.verify_part, &mut progress)
                .await?;
            let file = self
                .complete(&session, parts, size, &config.complete_multipart)
                .await?;
            progress.report(COMPLETE_PROGRESS);
            Ok::<_, UploadError>(file)
        }
        .await;

        if let Err(e) = &result {
            tracing::debug!(upload_id = %ids.upload_id, error = %e, "Aborting multipart upload");
            if let Err(abort_error) = self.abort(&config.complete_multipart, &ids).await {
                tracing::warn!(upload_id = %ids.upload_id, error = %abort_error, "Abort after failure did not succeed");
            }
        }

        result
    }

    async fn initiate(
        &self,
        endpoint: &Url,
        filename: &str,
        content_type: &str,
        size: u64,
        part_size: u64,
    ) -> Result<(SessionIds, InitiateMultipartResponse), UploadError> {
        let request = InitiateMultipartRequest {
            filename: filename.to_string(),
            file_type: content_type.to_string(),
            file_size: size,
            part_size,
        };

        let mut response = self
            .transport
            .initiate(endpoint, &request)
            .await
            .map_err(|e| UploadError::Initiate(e.to_string()))?
            .accepted()
            .map_err(UploadError::Initiate)?;

        let upload_id = response.upload_id.take().filter(|id| !id.is_empty());
        let s3_key = response.s3_key.take().filter(|key| !key.is_empty());

        match (upload_id, s3_key) {
            (Some(upload_id), Some(s3_key)) => Ok((SessionIds { upload_id, s3_key }, response)),
            _ => Err(UploadError::Initiate(
                "response is missing the upload id or storage key".to_string(),
            )),
        }
    }

    async fn transfer_parts(
        &self,
        session: &Session,
        payload: &Bytes,
        verify_endpoint: &Url,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let total_parts = session.plan.total_parts();
        let concurrency = self.settings.max_concurrent_parts.max(1);

        let mut transfers = futures::stream::iter(session.plan.parts())
            .map(|(part_number, range)| {
                let body = payload.slice(range.start as usize..range.end as usize);
                self.transfer_part(session, verify_endpoint, part_number, body)
            })
            .buffer_unordered(concurrency);

        let mut parts = Vec::with_capacity(total_parts as usize);
        while let Some(part) = transfers.next().await {
            parts.push(part?);
            progress.report(transfer_progress(parts.len() as u32, total_parts));
        }

        parts.sort_by_key(|part| part.part_number);

        let complete = parts.len() == total_parts as usize
            && parts
                .iter()
                .zip(1..)
                .all(|(part, expected)| part.part_number == expected && !part.etag.is_empty());
        if !complete {
            return Err(UploadError::Protocol(
                "confirmed parts do not cover the whole payload".to_string(),
            ));
        }

        Ok(parts)
    }

    async fn transfer_part(
        &self,
        session: &Session,
        verify_endpoint: &Url,
        part_number: u32,
        body: Bytes,
    ) -> Result<CompletedPart, UploadError> {
        let signed_url = session.signed_url(part_number)?;
        let bytes = body.len();

        let reply = self
            .transport
            .upload_part(&signed_url, body)
            .await
            .map_err(|e| UploadError::PartTransfer {
                part_number,
                reason: e.to_string(),
            })?;

        if !reply.status.is_success() {
            return Err(UploadError::PartTransfer {
                part_number,
                reason: reply.status.as_u16().to_string(),
            });
        }

        tracing::debug!(part_number, bytes, "Part written to storage");

        if self.settings.verification == PartVerification::StorageEtag {
            match reply.etag.as_deref().map(strip_etag_quotes) {
                Some(etag) if !etag.is_empty() => {
                    return Ok(CompletedPart {
                        part_number,
                        etag: etag.to_string(),
                    });
                }
                _ => tracing::debug!(part_number, "No ETag header visible, asking the relay"),
            }
        }

        self.verify_part(session, verify_endpoint, part_number)
            .await
    }

    async fn verify_part(
        &self,
        session: &Session,
        endpoint: &Url,
        part_number: u32,
    ) -> Result<CompletedPart, UploadError> {
        let verify_error = |reason: String| UploadError::Verify {
            part_number,
            reason,
        };

        let request = VerifyPartRequest {
            upload_id: session.ids.upload_id.clone(),
            s3_key: session.ids.s3_key.clone(),
            part_number,
        };

        let response = self
            .transport
            .verify_part(endpoint, &request)
            .await
            .map_err(|e| verify_error(e.to_string()))?
            .accepted()
            .map_err(verify_error)?;

        if let Some(confirmed) = response.part_number
            && confirmed != u64::from(part_number)
        {
            return Err(verify_error(format!("relay confirmed part {confirmed} instead")));
        }

        let etag = response
            .etag
            .as_deref()
            .map(strip_etag_quotes)
            .filter(|etag| !etag.is_empty())
            .ok_or_else(|| verify_error("no ETag returned".to_string()))?;

        Ok(CompletedPart {
            part_number,
            etag: etag.to_string(),
        })
    }

    async fn complete(
        &self,
        session: &Session,
        parts: Vec<CompletedPart>,
        size: u64,
        endpoint: &Url,
    ) -> Result<UploadedFile, UploadError> {
        let request = CompleteMultipartRequest {
            upload_id: session.ids.upload_id.clone(),
            s3_key: session.ids.s3_key.clone(),
            parts,
            filename: session.filename.clone(),
            original_filename: session.original_filename.clone(),
            file_type: session.file_type.clone(),
            media_type: session.media_type.clone(),
            file_size: size,
        };

        let response = self
            .transport
            .complete(endpoint, &request)
            .await
            .map_err(|e| UploadError::Complete(e.to_string()))?
            .accepted()
            .map_err(UploadError::Complete)?;

        let url = match response.public_url() {
            Some(url) => url.to_string(),
            None => {
                tracing::warn!(upload_id = %session.ids.upload_id, "Completed upload has no public URL");
                String::new()
            }
        };

        Ok(UploadedFile {
            url,
            s3_key: response
                .s3_key
                .unwrap_or_else(|| session.ids.s3_key.clone()),
            filename: response
                .filename
                .unwrap_or_else(|| session.filename.clone()),
            file_type: response
                .file_type
                .unwrap_or_else(|| session.file_type.clone()),
            file_size: size,
        })
    }

    /// Releases a multipart session on the storage side.
    pub async fn abort(&self, endpoint: &Url, ids: &SessionIds) -> Result<(), UploadError> {
        let request = AbortMultipartRequest::from(ids);

        let status = self
            .transport
            .abort(endpoint, &request)
            .await
            .map_err(|e| UploadError::Abort(e.to_string()))?;

        if !status.is_success() {
            return Err(UploadError::Abort(status.to_string()));
        }

        tracing::info!(upload_id = %ids.upload_id, "Multipart upload aborted");
        Ok(())
    }
}
