//! Blocking transport backed by `reqwest::blocking`.
//!
//! `reqwest::blocking` must not be driven from inside an async task. Call the
//! client synchronously from plain threads, or use
//! [`crate::CurlClient::execute_async`] which moves the call onto a blocking
//! worker.
//!
//! Clients are built lazily and shared by every handle of the same settings
//! generation, one per connection profile (connect timeout, redirect policy,
//! certificate verification). Handles stay single-owner; the pooled
//! connections behind them are shared.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use reqwest::blocking::{multipart::Form, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::{redirect, Certificate, Method, Proxy};

use crate::transport::{CallOptions, TransportHandle, TransportResult};
use crate::{
    Headers, ProxyKind, RawResponse, Transport, TransportError, TransportErrorKind,
    TransportSettings,
};

const JSON_UTF8: &str = "application/json;charset=UTF-8";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Process-wide state for [`ReqwestHandle`]s.
#[derive(Debug, Default)]
pub struct ReqwestTransport {
    pool: ArcSwap<ClientPool>,
    initialized: AtomicBool,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: TransportSettings) -> Self {
        Self {
            pool: ArcSwap::from_pointee(ClientPool::new(settings)),
            initialized: AtomicBool::new(false),
        }
    }
}

impl Transport for ReqwestTransport {
    fn init(&self) -> Result<(), TransportError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.pool.load().clients.lock().clear();
    }

    fn version(&self) -> String {
        format!("{}/{} (reqwest blocking)", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    fn settings(&self) -> TransportSettings {
        self.pool.load().settings.clone()
    }

    /// Starts a new settings generation. Connections pooled under the previous
    /// settings are released once the handles still using them are dropped.
    fn configure(&self, settings: TransportSettings) {
        self.pool.store(Arc::new(ClientPool::new(settings)));
    }

    fn open(&self) -> Result<Box<dyn TransportHandle>, TransportError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                "transport is not initialized",
            ));
        }
        Ok(Box::new(ReqwestHandle {
            pool: self.pool.load_full(),
        }))
    }
}

/// Client-level options that cannot be set per request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ClientProfile {
    connect_timeout: Duration,
    follow_redirects: bool,
    max_redirects: u32,
    ignore_ssl: bool,
    certificate_path: Option<PathBuf>,
}

impl ClientProfile {
    fn new(options: &CallOptions<'_>, settings: &TransportSettings) -> Self {
        Self {
            connect_timeout: options.connect_timeout,
            follow_redirects: options.follow_redirects,
            max_redirects: options.max_redirects,
            ignore_ssl: options.ignore_ssl,
            certificate_path: options
                .certificate_path
                .map(Path::to_path_buf)
                .or_else(|| settings.certificate_path.clone()),
        }
    }
}

/// Clients built for one settings generation.
#[derive(Debug, Default)]
struct ClientPool {
    settings: TransportSettings,
    clients: Mutex<HashMap<ClientProfile, Client>>,
}

impl ClientPool {
    fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, profile: &ClientProfile) -> Result<Client, TransportError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(profile) {
            return Ok(client.clone());
        }
        let client = self.build(profile)?;
        clients.insert(profile.clone(), client.clone());
        Ok(client)
    }

    fn build(&self, profile: &ClientProfile) -> Result<Client, TransportError> {
        let settings = &self.settings;
        let redirects = if profile.follow_redirects {
            redirect::Policy::limited(profile.max_redirects as usize)
        } else {
            redirect::Policy::none()
        };
        let idle_per_host = if settings.keep_alive {
            settings.max_connections_per_host
        } else {
            0
        };

        let mut builder = Client::builder()
            .connect_timeout(profile.connect_timeout)
            .redirect(redirects)
            .danger_accept_invalid_certs(profile.ignore_ssl)
            .pool_max_idle_per_host(idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .tcp_keepalive(settings.keep_alive.then_some(KEEP_ALIVE_INTERVAL));

        if let Some(path) = &profile.certificate_path {
            let pem = fs::read(path).map_err(|err| {
                TransportError::new(
                    TransportErrorKind::Tls,
                    format!("cannot read certificate {}: {err}", path.display()),
                )
            })?;
            let certificate = Certificate::from_pem(&pem)
                .map_err(|err| TransportError::new(TransportErrorKind::Tls, err.to_string()))?;
            builder = builder.add_root_certificate(certificate);
        }

        if let Some(proxy) = &settings.proxy {
            let url = if proxy.url.contains("://") {
                proxy.url.clone()
            } else {
                let scheme = match proxy.kind {
                    ProxyKind::Http => "http",
                    ProxyKind::Https => "https",
                    ProxyKind::Socks5 => "socks5",
                };
                format!("{scheme}://{}", proxy.url)
            };
            let mut configured = Proxy::all(url.as_str()).map_err(map_error)?;
            if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
                configured = configured.basic_auth(username, password);
            }
            builder = builder.proxy(configured);
        }

        for (host, address) in &settings.dns_overrides {
            builder = builder.resolve(host, *address);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(?profile, "building reqwest client");
        builder.build().map_err(map_error)
    }
}

/// Single-owner handle bound to the settings generation current when it was opened.
#[derive(Debug)]
pub struct ReqwestHandle {
    pool: Arc<ClientPool>,
}

impl ReqwestHandle {
    fn request(
        &self,
        method: Method,
        url: &str,
        json: bool,
        options: &CallOptions<'_>,
    ) -> Result<RequestBuilder, TransportError> {
        let client = self
            .pool
            .client(&ClientProfile::new(options, &self.pool.settings))?;

        let mut headers = to_header_map(options.headers)?;
        if let Some(user_agent) = options.user_agent {
            headers.insert(USER_AGENT, header_value(user_agent)?);
        }
        if let Some(cookies) = options.cookies {
            headers.insert(COOKIE, header_value(cookies)?);
        }
        if json {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8));
        }

        Ok(client
            .request(method, url)
            .headers(headers)
            .timeout(options.timeout))
    }

    fn call(
        &mut self,
        method: Method,
        url: &str,
        body: Option<&str>,
        json: bool,
        options: CallOptions<'_>,
    ) -> TransportResult {
        let mut request = self.request(method, url, json, &options)?;
        if let Some(body) = body {
            request = request.body(body.to_owned());
        }
        let response = request.send().map_err(map_error)?;
        read_response(response)
    }
}

impl TransportHandle for ReqwestHandle {
    fn get(&mut self, url: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::GET, url, None, false, options)
    }

    fn post(&mut self, url: &str, body: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::POST, url, Some(body), false, options)
    }

    fn put(&mut self, url: &str, body: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::PUT, url, Some(body), false, options)
    }

    fn delete(&mut self, url: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::DELETE, url, None, false, options)
    }

    fn head(&mut self, url: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::HEAD, url, None, false, options)
    }

    fn patch(&mut self, url: &str, body: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::PATCH, url, Some(body), false, options)
    }

    fn options(&mut self, url: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::OPTIONS, url, None, false, options)
    }

    fn post_json(&mut self, url: &str, json: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::POST, url, Some(json), true, options)
    }

    fn put_json(&mut self, url: &str, json: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::PUT, url, Some(json), true, options)
    }

    fn patch_json(&mut self, url: &str, json: &str, options: CallOptions<'_>) -> TransportResult {
        self.call(Method::PATCH, url, Some(json), true, options)
    }

    fn download_file(&mut self, url: &str, path: &Path, options: CallOptions<'_>) -> TransportResult {
        let mut response = self
            .request(Method::GET, url, false, &options)?
            .send()
            .map_err(map_error)?;
        if !response.status().is_success() {
            return read_response(response);
        }

        let (status, status_message, headers) = response_head(&response);
        let mut file = File::create(path).map_err(|err| file_error(path, &err))?;
        if let Err(err) = response.copy_to(&mut file) {
            drop(file);
            let _ = fs::remove_file(path);
            return Err(map_error(err));
        }

        Ok(RawResponse {
            status,
            status_message,
            headers,
            body: String::new(),
        })
    }

    fn upload_file(
        &mut self,
        url: &str,
        path: &Path,
        field_name: &str,
        options: CallOptions<'_>,
    ) -> TransportResult {
        let form = Form::new()
            .file(field_name.to_owned(), path)
            .map_err(|err| file_error(path, &err))?;
        let response = self
            .request(Method::POST, url, false, &options)?
            .multipart(form)
            .send()
            .map_err(map_error)?;
        read_response(response)
    }
}

fn response_head(response: &Response) -> (u16, String, Headers) {
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect();
    (
        status.as_u16(),
        status.canonical_reason().unwrap_or_default().to_owned(),
        headers,
    )
}

fn read_response(response: Response) -> TransportResult {
    let (status, status_message, headers) = response_head(&response);
    let body = response.text().map_err(map_error)?;
    Ok(RawResponse {
        status,
        status_message,
        headers,
        body,
    })
}

fn file_error(path: &Path, err: &io::Error) -> TransportError {
    TransportError::new(
        TransportErrorKind::InvalidRequest,
        format!("cannot access {}: {err}", path.display()),
    )
}

fn to_header_map(headers: &Headers) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
            TransportError::new(
                TransportErrorKind::InvalidRequest,
                format!("invalid header name '{name}': {err}"),
            )
        })?;
        map.insert(name, header_value(value)?);
    }
    Ok(map)
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|err| {
        TransportError::new(
            TransportErrorKind::InvalidRequest,
            format!("invalid header value: {err}"),
        )
    })
}

fn map_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        if is_tls_failure(&err) {
            TransportErrorKind::Tls
        } else {
            TransportErrorKind::Connect
        }
    } else if err.is_builder() {
        TransportErrorKind::InvalidRequest
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, err.to_string())
}

// rustls reports handshake and certificate failures as `InvalidData` I/O errors.
fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::InvalidData {
                return true;
            }
        }
        let message = err.to_string().to_ascii_lowercase();
        if message.contains("certificate") || message.contains("handshake") {
            return true;
        }
        current = err.source();
    }
    false
}
