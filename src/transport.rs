//! Contract with the blocking transport this engine sits on.
//!
//! A [`Transport`] owns process-wide state (initialization, TLS trust anchor,
//! proxy, DNS, pool settings). Calls go through a [`TransportHandle`], which is
//! not safe to share: the client opens a fresh handle for every attempt.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Headers, HttpRequest, TransportError};

pub type TransportResult = std::result::Result<RawResponse, TransportError>;

/// Body and metadata returned by a transport call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub status_message: String,
    pub headers: Headers,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_message: String::new(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// A `200 OK` response carrying `body`.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status_message: "OK".to_owned(),
            ..Self::new(200, body)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        crate::types::insert_header(&mut self.headers, name, value);
        self
    }
}

/// Per-call settings forwarded to the transport. Timeouts are enforced by the
/// transport, not by the client.
#[derive(Clone, Copy, Debug)]
pub struct CallOptions<'a> {
    pub headers: &'a Headers,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: Option<&'a str>,
    pub cookies: Option<&'a str>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub certificate_path: Option<&'a Path>,
    pub ignore_ssl: bool,
}

impl<'a> From<&'a HttpRequest> for CallOptions<'a> {
    fn from(request: &'a HttpRequest) -> Self {
        Self {
            headers: &request.headers,
            timeout: Duration::from_secs(request.timeout_secs),
            connect_timeout: Duration::from_secs(request.connect_timeout_secs),
            user_agent: request.user_agent.as_deref(),
            cookies: request.cookies.as_deref(),
            follow_redirects: request.follow_redirects,
            max_redirects: request.max_redirects,
            certificate_path: request.certificate_path.as_deref(),
            ignore_ssl: request.ignore_ssl,
        }
    }
}

/// Blocking per-verb call primitives. Each call blocks until a body is
/// obtained or the transport fails. There is no abort.
pub trait TransportHandle: Send {
    fn get(&mut self, url: &str, options: CallOptions<'_>) -> TransportResult;
    fn post(&mut self, url: &str, body: &str, options: CallOptions<'_>) -> TransportResult;
    fn put(&mut self, url: &str, body: &str, options: CallOptions<'_>) -> TransportResult;
    fn delete(&mut self, url: &str, options: CallOptions<'_>) -> TransportResult;
    fn head(&mut self, url: &str, options: CallOptions<'_>) -> TransportResult;
    fn patch(&mut self, url: &str, body: &str, options: CallOptions<'_>) -> TransportResult;
    fn options(&mut self, url: &str, options: CallOptions<'_>) -> TransportResult;
    fn post_json(&mut self, url: &str, json: &str, options: CallOptions<'_>) -> TransportResult;
    fn put_json(&mut self, url: &str, json: &str, options: CallOptions<'_>) -> TransportResult;
    fn patch_json(&mut self, url: &str, json: &str, options: CallOptions<'_>) -> TransportResult;

    /// GETs `url` and streams a successful body into `path`, replacing any
    /// existing file. The returned body is empty; a failed status carries the
    /// server's body and leaves `path` untouched.
    fn download_file(&mut self, url: &str, path: &Path, options: CallOptions<'_>) -> TransportResult;

    /// POSTs the file at `path` as a `multipart/form-data` part named `field_name`.
    fn upload_file(
        &mut self,
        url: &str,
        path: &Path,
        field_name: &str,
        options: CallOptions<'_>,
    ) -> TransportResult;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProxyKind {
    #[default]
    Http,
    Https,
    Socks5,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxySettings {
    pub url: String,
    pub kind: ProxyKind,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Process-wide settings applied to every handle opened after they change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSettings {
    pub certificate_path: Option<PathBuf>,
    pub proxy: Option<ProxySettings>,
    /// Static host to address overrides used instead of system DNS.
    pub dns_overrides: HashMap<String, SocketAddr>,
    pub max_connections_per_host: usize,
    pub keep_alive: bool,
    pub pool_idle_timeout: Option<Duration>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            certificate_path: None,
            proxy: None,
            dns_overrides: HashMap::new(),
            max_connections_per_host: 8,
            keep_alive: true,
            pool_idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

/// Process-wide transport lifecycle and handle factory.
///
/// `init` runs once before any traffic and `cleanup` once at shutdown.
pub trait Transport: Send + Sync {
    fn init(&self) -> std::result::Result<(), TransportError> {
        Ok(())
    }

    fn cleanup(&self) {}

    fn version(&self) -> String {
        "unknown".to_owned()
    }

    fn settings(&self) -> TransportSettings;

    /// Replaces the process-wide settings. Handles opened earlier keep theirs.
    fn configure(&self, settings: TransportSettings);

    /// Opens a handle owned by a single caller.
    fn open(&self) -> std::result::Result<Box<dyn TransportHandle>, TransportError>;
}
