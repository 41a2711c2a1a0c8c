//! An in-memory backend that records every call made against it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use url::Url;

use crate::client::SUB_CHUNK_SIZE;
use crate::error::UploadError;
use crate::profile::UploadConfig;
use crate::rest_types::{
    AbortMultipartRequest, CompleteMultipartRequest, CompleteMultipartResponse, CompletedPart,
    DirectUploadResponse, InitiateMultipartRequest, InitiateMultipartResponse, PartReply,
    PresignedPartUrl, Reply, VerifyPartRequest, VerifyPartResponse,
};
use crate::transport::{DirectUpload, UploadTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Direct {
        filename: String,
        content_type: String,
        fields: BTreeMap<String, String>,
        bytes: usize,
    },
    Initiate {
        file_size: u64,
        part_size: u64,
    },
    Part {
        part_number: u32,
        bytes: usize,
    },
    Verify(u32),
    Complete(Vec<CompletedPart>),
    Abort(AbortMultipartRequest),
}

pub fn config() -> UploadConfig {
    let url = |path: &str| Url::parse(&format!("https://campaign.test/api/{path}")).unwrap();
    UploadConfig {
        direct_upload: url("upload"),
        initiate_multipart: url("multipart/initiate"),
        verify_part: url("multipart/verify-part"),
        complete_multipart: url("multipart/complete"),
    }
}

fn signed_url(part_number: u32) -> String {
    format!("https://storage.test/bucket/part/{part_number}?X-Amz-Signature=sig")
}

fn etag_for(part_number: u32) -> String {
    format!("\"etag-{part_number}\"")
}

pub struct FakeTransport {
    pub calls: Mutex<Vec<Call>>,
    pub direct_reply: Option<Reply<DirectUploadResponse>>,
    pub direct_unreachable: bool,
    pub initiate_reply: Option<Reply<InitiateMultipartResponse>>,
    /// Drop these parts from the presigned URL list.
    pub missing_urls: HashSet<u32>,
    /// Status of individual part writes; anything absent gets 200.
    pub part_status: HashMap<u32, StatusCode>,
    pub part_etag_header: bool,
    pub verify_replies: HashMap<u32, Reply<VerifyPartResponse>>,
    pub complete_reply: Option<Reply<CompleteMultipartResponse>>,
    pub abort_unreachable: bool,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            direct_reply: None,
            direct_unreachable: false,
            initiate_reply: None,
            missing_urls: HashSet::new(),
            part_status: HashMap::new(),
            part_etag_header: false,
            verify_replies: HashMap::new(),
            complete_reply: None,
            abort_unreachable: false,
        }
    }
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn verified_parts(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Verify(n) => Some(n),
                _ => None,
            })
            .collect()
    }
}

fn ok<T>(body: T) -> Reply<T> {
    Reply {
        status: StatusCode::OK,
        body: Some(body),
    }
}

impl UploadTransport for FakeTransport {
    async fn upload_direct(
        &self,
        _endpoint: &Url,
        upload: DirectUpload,
        progress_tx: mpsc::Sender<u64>,
    ) -> Result<Reply<DirectUploadResponse>, UploadError> {
        self.record(Call::Direct {
            filename: upload.filename.clone(),
            content_type: upload.content_type.clone(),
            fields: upload.fields.clone(),
            bytes: upload.payload.len(),
        });

        if self.direct_unreachable {
            return Err(UploadError::Network("connection refused".to_string()));
        }

        for chunk in upload.payload.chunks(SUB_CHUNK_SIZE) {
            let _ = progress_tx.try_send(chunk.len() as u64);
        }

        Ok(self.direct_reply.clone().unwrap_or_else(|| {
            ok(DirectUploadResponse {
                success: true,
                cloud_front_url: Some(format!("https://cdn.test/media/{}", upload.filename)),
                s3_key: Some(format!("media/{}", upload.filename)),
                filename: Some(upload.filename.clone()),
                file_type: Some(upload.content_type.clone()),
                file_size: Some(upload.payload.len() as u64),
                ..Default::default()
            })
        }))
    }

    async fn initiate(
        &self,
        _endpoint: &Url,
        request: &InitiateMultipartRequest,
    ) -> Result<Reply<InitiateMultipartResponse>, UploadError> {
        self.record(Call::Initiate {
            file_size: request.file_size,
            part_size: request.part_size,
        });

        if let Some(reply) = &self.initiate_reply {
            return Ok(reply.clone());
        }

        let total_parts = request.file_size.div_ceil(request.part_size) as u32;
        let urls = (1..=total_parts)
            .filter(|n| !self.missing_urls.contains(n))
            .map(|part_number| PresignedPartUrl {
                part_number,
                signed_url: signed_url(part_number),
            })
            .collect();

        Ok(ok(InitiateMultipartResponse {
            success: true,
            upload_id: Some("upload-1".to_string()),
            s3_key: Some(format!("media/1700000000-{}", request.filename)),
            total_parts: Some(u64::from(total_parts)),
            part_size: Some(request.part_size),
            filename: Some(format!("1700000000-{}", request.filename)),
            original_filename: Some(request.filename.clone()),
            file_type: Some(request.file_type.clone()),
            media_type: Some("video".to_string()),
            urls,
            error: None,
        }))
    }

    async fn upload_part(&self, signed_url: &Url, body: Bytes) -> Result<PartReply, UploadError> {
        let part_number: u32 = signed_url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|n| n.parse().ok())
            .expect("fake presigned URL ends in a part number");

        self.record(Call::Part {
            part_number,
            bytes: body.len(),
        });

        Ok(PartReply {
            status: self
                .part_status
                .get(&part_number)
                .copied()
                .unwrap_or(StatusCode::OK),
            etag: self.part_etag_header.then(|| etag_for(part_number)),
        })
    }

    async fn verify_part(
        &self,
        _endpoint: &Url,
        request: &VerifyPartRequest,
    ) -> Result<Reply<VerifyPartResponse>, UploadError> {
        self.record(Call::Verify(request.part_number));

        if let Some(reply) = self.verify_replies.get(&request.part_number) {
            return Ok(reply.clone());
        }

        Ok(ok(VerifyPartResponse {
            success: true,
            part_number: Some(u64::from(request.part_number)),
            etag: Some(etag_for(request.part_number)),
            error: None,
        }))
    }

    async fn complete(
        &self,
        _endpoint: &Url,
        request: &CompleteMultipartRequest,
    ) -> Result<Reply<CompleteMultipartResponse>, UploadError> {
        self.record(Call::Complete(request.parts.clone()));

        if let Some(reply) = &self.complete_reply {
            return Ok(reply.clone());
        }

        Ok(ok(CompleteMultipartResponse {
            success: true,
            cloud_front_url: Some(format!("https://cdn.test/{}", request.s3_key)),
            s3_key: Some(request.s3_key.clone()),
            filename: Some(request.filename.clone()),
            file_type: Some(request.file_type.clone()),
            ..Default::default()
        }))
    }

    async fn abort(
        &self,
        _endpoint: &Url,
        request: &AbortMultipartRequest,
    ) -> Result<StatusCode, UploadError> {
        self.record(Call::Abort(request.clone()));

        if self.abort_unreachable {
            return Err(UploadError::Network("connection reset".to_string()));
        }
        Ok(StatusCode::OK)
    }
}
