//! Minimal HTTP(S) client used by OTA: GET to memory or to a streaming
//! write callback, plus the small option surface and cookie jar OTA needs.
//!
//! Grounded in `sdk_apps/why2025_ota/ota_update.h`'s `http_data_t`/
//! `http_file_t`/`do_http`. Built on `ureq`, a blocking client matching
//! the original's synchronous "easy handle" semantics, rather than
//! `reqwest`+`tokio` which would force an async runtime nothing else here
//! needs.

mod cookies;

use std::io::Read;

use thiserror::Error;

pub use cookies::CookieJar;

use crate::error::ErrorKind;

/// Failure modes for the HTTP client.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server responded with a status outside 2xx.
    #[error("HTTP status {0}")]
    Status(u16),
    /// Transport-level failure (DNS, connect, TLS, truncated body).
    #[error("transport error: {0}")]
    Transport(String),
    /// Recognized option this client deliberately doesn't implement
    /// (proxies).
    #[error("unsupported option")]
    Unsupported,
    /// Underlying filesystem error (cookie jar, write callback target).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HttpError {
    /// Classifies this error into the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::Status(_) => ErrorKind::Protocol,
            HttpError::Transport(_) => ErrorKind::Io,
            HttpError::Unsupported => ErrorKind::Unsupported,
            HttpError::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<ureq::Error> for HttpError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, _) => HttpError::Status(code),
            ureq::Error::Transport(t) => HttpError::Transport(t.to_string()),
        }
    }
}

/// Per-request options, analogous to a curl easy handle's setopt calls.
#[derive(Debug, Default, Clone)]
pub struct Request {
    /// Request URL.
    pub url: String,
    /// Extra headers to send.
    pub headers: Vec<(String, String)>,
    /// Overrides the default user agent.
    pub user_agent: Option<String>,
    /// If set, performs a POST with this body instead of a GET.
    pub post_fields: Option<Vec<u8>>,
    /// Recognized but always rejected with [`HttpError::Unsupported`].
    pub proxy: Option<String>,
}

impl Request {
    /// Starts building a GET request to `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response metadata, populated after [`HttpClient::perform`] succeeds.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    /// HTTP status code.
    pub response_code: u16,
    /// `Content-Length`, if present.
    pub content_length: Option<u64>,
    /// `Content-Type`, if present.
    pub content_type: Option<String>,
    /// The URL the response was actually served from, after redirects.
    pub effective_url: String,
}

/// A small, OTA-scoped HTTP(S) client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    default_user_agent: String,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            default_user_agent: "badgevms-ota/1".to_string(),
        }
    }

    /// Executes `request` synchronously, returning the body in memory.
    pub fn perform(&self, request: &Request) -> Result<(ResponseMeta, Vec<u8>), HttpError> {
        if request.proxy.is_some() {
            return Err(HttpError::Unsupported);
        }

        let (meta, mut reader) = self.perform_streaming(request)?;
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok((meta, body))
    }

    /// Executes `request` synchronously, returning the metadata and a
    /// reader the caller streams the body from (used by OTA's
    /// write-as-you-download path so a whole firmware image is never held
    /// in memory at once).
    pub fn perform_streaming(
        &self,
        request: &Request,
    ) -> Result<(ResponseMeta, Box<dyn Read + Send + 'static>), HttpError> {
        if request.proxy.is_some() {
            return Err(HttpError::Unsupported);
        }

        let method = if request.post_fields.is_some() { "POST" } else { "GET" };
        let mut call = self.agent.request(method, &request.url);
        let user_agent = request.user_agent.as_deref().unwrap_or(&self.default_user_agent);
        call = call.set("User-Agent", user_agent);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let response = match &request.post_fields {
            Some(body) => call.send_bytes(body)?,
            None => call.call()?,
        };

        let meta = ResponseMeta {
            response_code: response.status(),
            content_length: response.header("Content-Length").and_then(|v| v.parse().ok()),
            content_type: response.header("Content-Type").map(str::to_string),
            effective_url: request.url.clone(),
        };
        Ok((meta, Box::new(response.into_reader())))
    }

    /// Fetches `url` as UTF-8 text, e.g. for `version.txt`.
    pub fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let (_, bytes) = self.perform(&Request::get(url))?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    /// Fetches `url` as JSON.
    pub fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let (_, bytes) = self.perform(&Request::get(url))?;
        serde_json::from_slice(&bytes).map_err(|e| HttpError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_option_is_unsupported() {
        let client = HttpClient::new();
        let mut req = Request::get("http://example.invalid/");
        req.proxy = Some("http://proxy.invalid/".to_string());
        assert!(matches!(client.perform(&req), Err(HttpError::Unsupported)));
    }

    #[test]
    fn request_builder_accumulates_headers() {
        let req = Request::get("http://example.invalid/").header("X-Test", "1");
        assert_eq!(req.headers, vec![("X-Test".to_string(), "1".to_string())]);
    }
}
