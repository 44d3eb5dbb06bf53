use crate::credentials::Credentials;
use crate::error::TransferError;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_REDIRECTS: usize = 10;

/// An opened transfer.
pub struct Download {
    /// Length of `body`, which is the remaining length when resumed
    pub content_length: Option<u64>,
    /// True when the server honoured the requested offset
    pub resumed: bool,
    pub body: BoxStream<'static, Result<Bytes, TransferError>>,
}

/// Source of file payloads.
pub trait Transport {
    /// Size of the remote payload, if the server reports one.
    async fn content_length(
        &self,
        locator: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Option<u64>, TransferError>;

    /// Start streaming the payload from byte `offset`. Servers may ignore the
    /// offset, in which case `Download::resumed` is false and the body starts at zero.
    async fn open(
        &self,
        locator: &Url,
        credentials: Option<&Credentials>,
        offset: u64,
    ) -> Result<Download, TransferError>;
}

/// Downloads over HTTPS.
///
/// Redirects are followed by hand so the bearer token is sent on every hop.
/// The download endpoint redirects to a different host, and reqwest drops
/// `Authorization` on cross-host redirects.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransferError> {
        Self::with_read_timeout(READ_TIMEOUT)
    }

    /// `read_timeout` bounds the wait for each read, so a stalled body fails
    /// instead of holding its worker forever.
    pub fn with_read_timeout(read_timeout: Duration) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .redirect(Policy::none())
            .build()?;
        Ok(Self { http })
    }

    /// Use a preconfigured client. It should not follow redirects itself,
    /// otherwise credentials are lost on cross-host hops.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn request(
        &self,
        method: Method,
        locator: &Url,
        credentials: Option<&Credentials>,
    ) -> RequestBuilder {
        let request = self.http.request(method, locator.clone());
        match credentials {
            Some(c) => request.bearer_auth(c.token()),
            None => request,
        }
    }

    async fn send(
        &self,
        method: Method,
        locator: &Url,
        credentials: Option<&Credentials>,
        offset: u64,
    ) -> Result<Response, TransferError> {
        let mut url = locator.clone();
        for _ in 0..MAX_REDIRECTS {
            let mut request = self.request(method.clone(), &url, credentials);
            if offset > 0 {
                request = request.header(RANGE, format!("bytes={offset}-"));
            }
            let response = request.send().await?;

            let status = response.status();
            if !status.is_redirection() || status == StatusCode::NOT_MODIFIED {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    TransferError::Redirect(format!("HTTP {status} without Location from {url}"))
                })?;
            let next = url
                .join(location)
                .map_err(|e| TransferError::Redirect(format!("{location}: {e}")))?;
            debug!(from = %url, to = %next, "Following redirect");
            url = next;
        }
        Err(TransferError::Redirect(format!(
            "more than {MAX_REDIRECTS} redirects from {locator}"
        )))
    }
}

impl Transport for HttpTransport {
    async fn content_length(
        &self,
        locator: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Option<u64>, TransferError> {
        let response = self.send(Method::HEAD, locator, credentials, 0).await?;

        let status = response.status();
        // Not every download endpoint answers HEAD
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransferError::Status(status.as_u16()));
        }

        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        Ok(length)
    }

    async fn open(
        &self,
        locator: &Url,
        credentials: Option<&Credentials>,
        offset: u64,
    ) -> Result<Download, TransferError> {
        let response = self.send(Method::GET, locator, credentials, offset).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status.as_u16()));
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(TransferError::from).boxed();

        Ok(Download {
            content_length,
            resumed,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(download: Download) -> Vec<u8> {
        let chunks: Vec<Bytes> = download.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_open_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/abc"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/download/abc", server.uri())).unwrap();
        let credentials = Credentials::new("tok");
        let download = transport.open(&url, Some(&credentials), 0).await.unwrap();

        assert!(!download.resumed);
        assert_eq!(download.content_length, Some(7));
        assert_eq!(collect(download).await, b"payload");
    }

    #[tokio::test]
    async fn test_open_resumes_with_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/abc"))
            .and(header("range", "bytes=3-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"load".to_vec()))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/download/abc", server.uri())).unwrap();
        let download = transport.open(&url, None, 3).await.unwrap();

        assert!(download.resumed);
        assert_eq!(collect(download).await, b"load");
    }

    #[tokio::test]
    async fn test_open_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/download/abc", server.uri())).unwrap();
        let result = transport.open(&url, None, 0).await;
        assert!(matches!(result, Err(TransferError::Status(401))));
    }

    #[tokio::test]
    async fn test_token_survives_cross_host_redirect() {
        let origin = MockServer::start().await;
        let storage = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/abc"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("{}/files/abc", storage.uri())),
            )
            .expect(1)
            .mount(&origin)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/abc"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .expect(1)
            .mount(&storage)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/download/abc", origin.uri())).unwrap();
        let credentials = Credentials::new("tok");
        let download = transport.open(&url, Some(&credentials), 0).await.unwrap();
        assert_eq!(collect(download).await, b"payload");
    }

    #[tokio::test]
    async fn test_redirect_keeps_range() {
        let origin = MockServer::start().await;
        let storage = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/abc"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", format!("{}/files/abc", storage.uri())),
            )
            .mount(&origin)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/abc"))
            .and(header("range", "bytes=3-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"load".to_vec()))
            .mount(&storage)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/download/abc", origin.uri())).unwrap();
        let download = transport.open(&url, None, 3).await.unwrap();
        assert!(download.resumed);
        assert_eq!(collect(download).await, b"load");
    }

    #[tokio::test]
    async fn test_redirect_loop_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/abc"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/download/abc"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/download/abc", server.uri())).unwrap();
        let result = transport.open(&url, None, 0).await;
        assert!(matches!(result, Err(TransferError::Redirect(_))));
    }

    #[tokio::test]
    async fn test_stalled_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::with_read_timeout(Duration::from_millis(200)).unwrap();
        let url = Url::parse(&format!("{}/download/abc", server.uri())).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(3), transport.open(&url, None, 0))
            .await
            .expect("read timeout should fire before the test deadline");
        assert!(matches!(result, Err(TransferError::Http(_))));
    }

    #[tokio::test]
    async fn test_content_length_from_head() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/download/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0_u8; 1234]))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/download/nohead"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/download/abc", server.uri())).unwrap();
        assert_eq!(transport.content_length(&url, None).await.unwrap(), Some(1234));

        let url = Url::parse(&format!("{}/download/nohead", server.uri())).unwrap();
        assert_eq!(transport.content_length(&url, None).await.unwrap(), None);
    }
}
