use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::ETAG;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;
use url::Url;

use crate::error::UploadError;
use crate::rest_types::{
    AbortMultipartRequest, CompleteMultipartRequest, CompleteMultipartResponse,
    DirectUploadResponse, InitiateMultipartRequest, InitiateMultipartResponse, PartReply, Reply,
    VerifyPartRequest, VerifyPartResponse,
};
use crate::transport::{DirectUpload, UploadTransport};

/// Size of the slices a direct upload body is streamed in. Progress is
/// reported once per slice.
pub const SUB_CHUNK_SIZE: usize = 64 * 1024;

/// [`UploadTransport`] over HTTP.
///
/// Backend calls carry the bearer token when one is configured. Part writes
/// go to presigned URLs and never do.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn with_timeout(auth_token: Option<String>, timeout: Duration) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("upld/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(network_error)?;

        Ok(Self { client, auth_token })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_json<Req, Res>(&self, request: RequestBuilder, body: &Req) -> Result<Reply<Res>, UploadError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let response = self
            .authorized(request)
            .json(body)
            .send()
            .await
            .map_err(network_error)?;

        Ok(read_reply(response).await)
    }
}

fn network_error(err: reqwest::Error) -> UploadError {
    UploadError::Network(err.to_string())
}

async fn read_reply<T: DeserializeOwned>(response: Response) -> Reply<T> {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = match serde_json::from_str(&text) {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::debug!(%status, error = %e, "Undecodable response body");
            None
        }
    };

    Reply { status, body }
}

impl UploadTransport for HttpTransport {
    async fn upload_direct(
        &self,
        endpoint: &Url,
        upload: DirectUpload,
        progress_tx: mpsc::Sender<u64>,
    ) -> Result<Reply<DirectUploadResponse>, UploadError> {
        let payload = upload.payload;
        let total = payload.len() as u64;

        let chunks: Vec<Bytes> = (0..payload.len())
            .step_by(SUB_CHUNK_SIZE)
            .map(|start| payload.slice(start..(start + SUB_CHUNK_SIZE).min(payload.len())))
            .collect();

        let stream = futures::stream::iter(chunks).map(move |chunk| {
            let _ = progress_tx.try_send(chunk.len() as u64);
            Ok::<_, std::io::Error>(chunk)
        });

        let file = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(upload.filename)
            .mime_str(&upload.content_type)
            .map_err(|e| UploadError::DirectRejected(format!("invalid content type: {e}")))?;

        let form = upload
            .fields
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value))
            .part("file", file);

        let response = self
            .authorized(self.client.post(endpoint.clone()))
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        Ok(read_reply(response).await)
    }

    async fn initiate(
        &self,
        endpoint: &Url,
        request: &InitiateMultipartRequest,
    ) -> Result<Reply<InitiateMultipartResponse>, UploadError> {
        self.send_json(self.client.post(endpoint.clone()), request)
            .await
    }

    async fn upload_part(&self, signed_url: &Url, body: Bytes) -> Result<PartReply, UploadError> {
        let response = self
            .client
            .put(signed_url.clone())
            .body(body)
            .send()
            .await
            .map_err(network_error)?;

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(PartReply {
            status: response.status(),
            etag,
        })
    }

    async fn verify_part(
        &self,
        endpoint: &Url,
        request: &VerifyPartRequest,
    ) -> Result<Reply<VerifyPartResponse>, UploadError> {
        self.send_json(self.client.post(endpoint.clone()), request)
            .await
    }

    async fn complete(
        &self,
        endpoint: &Url,
        request: &CompleteMultipartRequest,
    ) -> Result<Reply<CompleteMultipartResponse>, UploadError> {
        self.send_json(self.client.post(endpoint.clone()), request)
            .await
    }

    async fn abort(
        &self,
        endpoint: &Url,
        request: &AbortMultipartRequest,
    ) -> Result<StatusCode, UploadError> {
        let response = self
            .authorized(self.client.delete(endpoint.clone()))
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    /// A request as the server saw it.
    struct Received {
        method: String,
        target: String,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    fn transport(token: Option<&str>) -> HttpTransport {
        HttpTransport::with_timeout(token.map(str::to_string), TIMEOUT).unwrap()
    }

    fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!(
            "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    /// Answers exactly one request with `reply` and hands back what it received.
    async fn serve_once(reply: String) -> (Url, JoinHandle<Received>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let received = read_request(&mut socket).await;
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            received
        });

        (base, handle)
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    async fn read_more(socket: &mut TcpStream, buf: &mut Vec<u8>) {
        let mut chunk = [0u8; 16 * 1024];
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed the connection early");
        buf.extend_from_slice(&chunk[..n]);
    }

    fn dechunk(mut raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let line_end = find(raw, b"\r\n").unwrap();
            let size = std::str::from_utf8(&raw[..line_end]).unwrap();
            let size = usize::from_str_radix(size.trim(), 16).unwrap();
            raw = &raw[line_end + 2..];
            if size == 0 {
                return out;
            }
            out.extend_from_slice(&raw[..size]);
            raw = &raw[size + 2..];
        }
    }

    async fn read_request(socket: &mut TcpStream) -> Received {
        let mut buf = Vec::new();
        let head_end = loop {
            if let Some(pos) = find(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
            read_more(socket, &mut buf).await;
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap().split_whitespace();
        let method = request_line.next().unwrap().to_string();
        let target = request_line.next().unwrap().to_string();
        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let mut body = buf.split_off(head_end);
        if let Some(length) = headers.get("content-length") {
            let length: usize = length.parse().unwrap();
            while body.len() < length {
                read_more(socket, &mut body).await;
            }
        } else if headers
            .get("transfer-encoding")
            .is_some_and(|te| te.contains("chunked"))
        {
            while !body.ends_with(b"0\r\n\r\n") {
                read_more(socket, &mut body).await;
            }
            body = dechunk(&body);
        }

        Received {
            method,
            target,
            headers,
            body,
        }
    }

    #[tokio::test]
    async fn direct_upload_posts_form_with_token_and_reports_bytes() {
        let (base, server) = serve_once(response(
            "200 OK",
            &[("content-type", "application/json")],
            r#"{"success":true,"cloudFrontUrl":"https://cdn.test/media/notes.txt","s3Key":"media/notes.txt","fileSize":"200000"}"#,
        ))
        .await;

        let payload = Bytes::from(vec![b'x'; 200_000]);
        let upload = DirectUpload {
            payload,
            filename: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            fields: BTreeMap::from([("folder".to_string(), "complaints".to_string())]),
        };
        let (progress_tx, mut progress_rx) = mpsc::channel(16);

        let reply = transport(Some("tok"))
            .upload_direct(&base.join("api/upload").unwrap(), upload, progress_tx)
            .await
            .unwrap();
        let received = server.await.unwrap();

        assert_eq!(received.method, "POST");
        assert_eq!(received.target, "/api/upload");
        assert_eq!(received.headers["authorization"], "Bearer tok");
        assert!(received.headers["content-type"].starts_with("multipart/form-data; boundary="));

        let form = String::from_utf8_lossy(&received.body).to_ascii_lowercase();
        assert!(form.contains(r#"name="folder""#));
        assert!(form.contains("complaints"));
        assert!(form.contains(r#"name="file"; filename="notes.txt""#));
        assert!(form.contains("content-type: text/plain"));

        let mut sent = 0;
        while let Ok(bytes) = progress_rx.try_recv() {
            sent += bytes;
        }
        assert_eq!(sent, 200_000);

        assert_eq!(reply.status, StatusCode::OK);
        let body = reply.body.unwrap();
        assert_eq!(body.public_url(), Some("https://cdn.test/media/notes.txt"));
        assert_eq!(body.file_size, Some(200_000));
    }

    #[tokio::test]
    async fn part_writes_skip_the_token_and_expose_etag() {
        let (base, server) = serve_once(response("200 OK", &[("etag", "\"abc123\"")], "")).await;
        let signed_url = base.join("bucket/part/2?X-Amz-Signature=sig").unwrap();

        let reply = transport(Some("tok"))
            .upload_part(&signed_url, Bytes::from_static(b"part two"))
            .await
            .unwrap();
        let received = server.await.unwrap();

        assert_eq!(received.method, "PUT");
        assert_eq!(received.target, "/bucket/part/2?X-Amz-Signature=sig");
        assert!(!received.headers.contains_key("authorization"));
        assert_eq!(received.body, b"part two");

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.etag.as_deref(), Some("\"abc123\""));
    }

    #[tokio::test]
    async fn abort_deletes_session_on_complete_endpoint() {
        let (base, server) = serve_once(response("204 No Content", &[], "")).await;
        let request = AbortMultipartRequest {
            upload_id: "u1".to_string(),
            s3_key: "media/x".to_string(),
        };

        let status = transport(Some("tok"))
            .abort(&base.join("api/multipart/complete").unwrap(), &request)
            .await
            .unwrap();
        let received = server.await.unwrap();

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(received.method, "DELETE");
        assert_eq!(received.target, "/api/multipart/complete");
        assert_eq!(received.headers["authorization"], "Bearer tok");
        let body: serde_json::Value = serde_json::from_slice(&received.body).unwrap();
        assert_eq!(body, serde_json::json!({"uploadId": "u1", "s3Key": "media/x"}));
    }

    #[tokio::test]
    async fn backend_calls_without_token_are_anonymous() {
        let (base, server) = serve_once(response(
            "200 OK",
            &[],
            r#"{"success":true,"partNumber":"3","etag":"\"e3\""}"#,
        ))
        .await;
        let request = VerifyPartRequest {
            upload_id: "u1".to_string(),
            s3_key: "media/x".to_string(),
            part_number: 3,
        };

        let reply = transport(None)
            .verify_part(&base.join("api/multipart/verify-part").unwrap(), &request)
            .await
            .unwrap();
        let received = server.await.unwrap();

        assert_eq!(received.method, "POST");
        assert!(!received.headers.contains_key("authorization"));
        let body: serde_json::Value = serde_json::from_slice(&received.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"uploadId": "u1", "s3Key": "media/x", "partNumber": 3})
        );

        let body = reply.body.unwrap();
        assert_eq!(body.part_number, Some(3));
        assert_eq!(body.etag.as_deref(), Some("\"e3\""));
    }

    #[tokio::test]
    async fn undecodable_body_keeps_status() {
        let (base, server) = serve_once(response("502 Bad Gateway", &[], "<html>bad gateway</html>")).await;
        let request = InitiateMultipartRequest {
            filename: "rally.mp4".to_string(),
            file_type: "video/mp4".to_string(),
            file_size: 12,
            part_size: 5,
        };

        let reply = transport(None)
            .initiate(&base.join("api/multipart/initiate").unwrap(), &request)
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
        assert!(reply.body.is_none());
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Url::parse(&format!("http://{}/api/abort", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let request = AbortMultipartRequest {
            upload_id: "u1".to_string(),
            s3_key: "media/x".to_string(),
        };
        let err = transport(None).abort(&endpoint, &request).await.unwrap_err();

        assert!(matches!(err, UploadError::Network(_)));
    }
}
