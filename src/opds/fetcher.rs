use crate::config::{AuthKind, ServerProfile};
use futures::StreamExt;
use reqwest::header;
use reqwest::redirect::Policy;
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Per-attempt timeout. There is no overall deadline across retries.
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Total attempts for transient failures, including the first.
const FETCH_ATTEMPTS: u32 = 3;
/// Fixed delay between attempts.
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Feed responses larger than this are rejected. Downloads are streamed
/// to disk and not subject to this cap.
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
/// Bytes of body decoded into the `UnexpectedContentType` preview.
const PREVIEW_LEN: usize = 200;

const USER_AGENT: &str = concat!("folio/", env!("CARGO_PKG_VERSION"));
const ACCEPT_FEEDS: &str = "application/atom+xml, application/xml, text/xml, */*";

/// Errors that can occur while fetching a feed or a download payload.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// A single attempt exceeded the fixed timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Server answered with an HTML page instead of a feed, usually a
    /// wrong URL or an authentication wall. Carries the first bytes of the
    /// body so the server's own diagnostic is visible verbatim.
    #[error(
        "Server returned HTML instead of XML (Content-Type: {content_type}).\n\
         Check the URL and authentication settings.\n\n\
         Response preview:\n{preview}"
    )]
    UnexpectedContentType { content_type: String, preview: String },
    /// Feed response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// The request URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Writing a download to disk failed
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Transient failures are retried; everything else surfaces immediately.
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::Network(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Limit redirect chains and reject loops. OPDS servers occasionally
/// misconfigure their reverse proxy into a self-redirect.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("too many redirects (max 5)");
        }
        if attempt.previous().iter().any(|u| u == attempt.url()) {
            return attempt.error("redirect loop detected");
        }
        attempt.follow()
    })
}

/// HTTP client for OPDS servers.
///
/// Sends a fixed identifying user agent and a feed-oriented `Accept`
/// header on every request, attaches Basic credentials when the profile
/// asks for them, and absorbs transient failures (connection errors,
/// timeouts) in a fixed retry loop. From the caller's perspective a fetch
/// either eventually succeeds or fails once.
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    retry_delay: Duration,
}

impl Fetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy())
            .build()?;
        Ok(Self {
            client,
            timeout: FETCH_TIMEOUT,
            retry_delay: FETCH_RETRY_DELAY,
        })
    }

    /// Short timings for tests that exercise the retry loop.
    #[cfg(test)]
    fn with_timing(timeout: Duration, retry_delay: Duration) -> Result<Self, FetchError> {
        let mut fetcher = Self::new()?;
        fetcher.timeout = timeout;
        fetcher.retry_delay = retry_delay;
        Ok(fetcher)
    }

    /// Fetches a feed document and returns its raw bytes.
    ///
    /// `url` must be absolute; relative hrefs are resolved by the caller
    /// against the feed they came from. An HTML content type fails with
    /// [`FetchError::UnexpectedContentType`] and is not retried.
    pub async fn fetch(&self, url: &str, profile: &ServerProfile) -> Result<Vec<u8>, FetchError> {
        let url = Url::parse(url)?;
        let response = self.send_with_retry(&url, profile).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;

        if content_type.contains("text/html") {
            let preview = String::from_utf8_lossy(&bytes[..bytes.len().min(PREVIEW_LEN)])
                .trim()
                .to_string();
            return Err(FetchError::UnexpectedContentType {
                content_type,
                preview,
            });
        }

        Ok(bytes)
    }

    /// Streams a download payload to `path`, returning the bytes written.
    ///
    /// The caller owns the file; on failure a partial file may remain and
    /// the caller is expected to remove it.
    pub async fn fetch_to_path(
        &self,
        url: &str,
        profile: &ServerProfile,
        path: &Path,
    ) -> Result<u64, FetchError> {
        let url = Url::parse(url)?;
        let response = self.send_with_retry(&url, profile).await?;

        let io_err = |source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FetchError::Network)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;

        tracing::debug!(url = %url, bytes = written, "Download stream complete");
        Ok(written)
    }

    async fn send_with_retry(
        &self,
        url: &Url,
        profile: &ServerProfile,
    ) -> Result<reqwest::Response, FetchError> {
        let mut attempt: u32 = 1;
        loop {
            match self.send(url, profile).await {
                Err(e) if e.is_transient() && attempt < FETCH_ATTEMPTS => {
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        error = %e,
                        "Transient fetch failure, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    async fn send(
        &self,
        url: &Url,
        profile: &ServerProfile,
    ) -> Result<reqwest::Response, FetchError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, ACCEPT_FEEDS);

        if profile.auth == AuthKind::Basic {
            request = request.basic_auth(
                profile.username.as_deref().unwrap_or(""),
                profile.password.as_ref().map(|p| p.expose_secret().to_string()),
            );
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }
        Ok(response)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: trust a declared Content-Length that is already over budget
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
