//! Request/response upload store
//!
//! ```text
//! POST  {base}/upload        body = sealed metadata   → session id (text)
//! PATCH {base}/upload/{id}   body = one ciphertext chunk
//! PATCH {base}/upload/{id}   empty body               → finalize
//! ```

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Method, Url};
use sealdrop_core::{SealError, SealResult, SessionId};
use tracing::debug;

/// The three operations of the remote store
pub trait UploadStore {
    /// Register a new upload carrying `metadata`.
    fn create_upload(&self, metadata: Bytes) -> impl Future<Output = SealResult<SessionId>> + Send;

    /// Append one ciphertext chunk to `session`.
    fn append_chunk(
        &self,
        session: &SessionId,
        chunk: Bytes,
    ) -> impl Future<Output = SealResult<()>> + Send;

    /// Seal `session`; no further chunks are accepted.
    fn finalize_upload(&self, session: &SessionId) -> impl Future<Output = SealResult<()>> + Send;
}

impl<T: UploadStore> UploadStore for &T {
    fn create_upload(
        &self,
        metadata: Bytes,
    ) -> impl Future<Output = SealResult<SessionId>> + Send {
        (**self).create_upload(metadata)
    }

    fn append_chunk(
        &self,
        session: &SessionId,
        chunk: Bytes,
    ) -> impl Future<Output = SealResult<()>> + Send {
        (**self).append_chunk(session, chunk)
    }

    fn finalize_upload(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = SealResult<()>> + Send {
        (**self).finalize_upload(session)
    }
}

pub(crate) fn transport_error(context: &str, e: impl std::fmt::Display) -> SealError {
    SealError::Transport(format!("{context}: {e}"))
}

/// [`UploadStore`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base: Url,
}

impl HttpStore {
    /// `base` is the API root, e.g. `http://localhost:8008/api`.
    pub fn new(base: &str, timeout: Duration) -> SealResult<Self> {
        let base = Url::parse(base)
            .map_err(|e| SealError::Config(format!("invalid server URL {base:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SealError::Config(format!(
                "server URL {base} cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| transport_error("building HTTP client", e))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `{base}/upload` or `{base}/upload/{id}`
    fn endpoint(&self, session: Option<&SessionId>) -> SealResult<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SealError::Config(format!("server URL {} cannot carry a path", self.base)))?;
            segments.pop_if_empty().push("upload");
            if let Some(session) = session {
                segments.push(session.as_str());
            }
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Bytes) -> SealResult<reqwest::Response> {
        let response = self
            .client
            .request(method.clone(), url.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(&format!("{method} {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SealError::Transport(format!(
                "{method} {url} returned {status}: {}",
                detail.trim()
            )));
        }
        Ok(response)
    }
}

impl UploadStore for HttpStore {
    async fn create_upload(&self, metadata: Bytes) -> SealResult<SessionId> {
        let url = self.endpoint(None)?;
        let response = self.send(Method::POST, url, metadata).await?;
        let id = response
            .text()
            .await
            .map_err(|e| transport_error("reading session id", e))?;

        let id = id.trim();
        if id.is_empty() {
            return Err(SealError::Protocol("store returned an empty session id".into()));
        }
        debug!(session = %id, "upload created");
        Ok(SessionId::new(id))
    }

    async fn append_chunk(&self, session: &SessionId, chunk: Bytes) -> SealResult<()> {
        let url = self.endpoint(Some(session))?;
        self.send(Method::PATCH, url, chunk).await?;
        Ok(())
    }

    async fn finalize_upload(&self, session: &SessionId) -> SealResult<()> {
        let url = self.endpoint(Some(session))?;
        self.send(Method::PATCH, url, Bytes::new()).await?;
        debug!(session = %session, "upload finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn store(base: &str) -> HttpStore {
        HttpStore::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoints() {
        let store = store("http://localhost:8008/api");
        assert_eq!(
            store.endpoint(None).unwrap().as_str(),
            "http://localhost:8008/api/upload"
        );
        assert_eq!(
            store
                .endpoint(Some(&SessionId::new("abc-123")))
                .unwrap()
                .as_str(),
            "http://localhost:8008/api/upload/abc-123"
        );
    }

    #[test]
    fn test_trailing_slash_base() {
        let store = store("https://drop.example.com/api/");
        assert_eq!(
            store.endpoint(None).unwrap().as_str(),
            "https://drop.example.com/api/upload"
        );
    }

    #[test]
    fn test_session_id_is_escaped() {
        let store = store("http://localhost/api");
        let url = store.endpoint(Some(&SessionId::new("a/b"))).unwrap();
        assert_eq!(url.as_str(), "http://localhost/api/upload/a%2Fb");
    }

    #[test]
    fn test_invalid_base_rejected() {
        assert!(matches!(
            HttpStore::new("not a url", Duration::from_secs(1)),
            Err(SealError::Config(_))
        ));
        assert!(HttpStore::new("mailto:someone@example.com", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // port 9 (discard) on localhost is closed in test environments
        let store = store("http://127.0.0.1:9/api");
        let err = store.create_upload(Bytes::from_static(b"meta")).await.unwrap_err();
        assert!(matches!(err, SealError::Transport(_)));
    }

    /// Read one request (head and `content-length` body); returns the head.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a full request");
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let body_len = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < end + 4 + body_len {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed mid-body");
                buf.extend_from_slice(&chunk[..n]);
            }
            return head;
        }
    }

    /// Answer exactly one request with `status` and `body`.
    async fn respond_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/api", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let head = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            head
        });
        (base, handle)
    }

    #[tokio::test]
    async fn test_create_upload_reads_session_id() {
        let (base, server) = respond_once("200 OK", "  sess-42\n").await;
        let session = store(&base)
            .create_upload(Bytes::from_static(b"meta"))
            .await
            .unwrap();
        assert_eq!(session.as_str(), "sess-42");

        let head = server.await.unwrap();
        assert!(head.starts_with("POST /api/upload HTTP/1.1"), "{head}");
    }

    #[tokio::test]
    async fn test_error_status_is_transport_error() {
        let (base, server) = respond_once("404 Not Found", "no such upload").await;
        let err = store(&base)
            .append_chunk(&SessionId::new("gone"), Bytes::from_static(b"chunk"))
            .await
            .unwrap_err();

        match err {
            SealError::Transport(msg) => {
                assert!(msg.contains("404"), "{msg}");
                assert!(msg.contains("no such upload"), "{msg}");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        let head = server.await.unwrap();
        assert!(head.starts_with("PATCH /api/upload/gone HTTP/1.1"), "{head}");
    }

    #[tokio::test]
    async fn test_server_error_on_finalize() {
        let (base, _server) = respond_once("500 Internal Server Error", "").await;
        let err = store(&base)
            .finalize_upload(&SessionId::new("s"))
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::Transport(_)));
    }

    #[tokio::test]
    async fn test_empty_session_id_is_protocol_error() {
        let (base, _server) = respond_once("201 Created", " \n").await;
        let err = store(&base)
            .create_upload(Bytes::from_static(b"meta"))
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::Protocol(_)));
    }
}
