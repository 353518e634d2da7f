use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::{
    cache::ResponseCache,
    fingerprint::fingerprint,
    interceptor::InterceptorChain,
    retry::execute_with_retry,
    stats::{RequestStats, StatsSnapshot},
    transport::{CallOptions, TransportHandle, TransportResult},
    CacheConfig, CancelToken, ClientOptions, CurlError, HttpMethod, HttpRequest, HttpResponse,
    InterceptorId, PendingResponse, ProxyKind, ProxySettings, RawResponse, ReqwestTransport,
    RequestInterceptor, ResponseInterceptor, Result, RetryConfig, Transport, TransportError,
    TransportErrorKind, TransportSettings,
};

/// HTTP client composing interceptors, the response cache and retry over a
/// blocking [`Transport`].
///
/// Clones share configuration, interceptors, cache and counters.
#[derive(Clone)]
pub struct CurlClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    options: ArcSwap<ClientOptions>,
    interceptors: InterceptorChain,
    cache: ResponseCache,
    stats: RequestStats,
    shut_down: AtomicBool,
}

impl fmt::Debug for CurlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurlClient")
            .field("transport", &self.inner.transport.version())
            .field("options", &self.options())
            .field("request_interceptors", &self.inner.interceptors.request_count())
            .field("response_interceptors", &self.inner.interceptors.response_count())
            .field("cached_entries", &self.inner.cache.len())
            .finish()
    }
}

impl CurlClient {
    /// Creates a client over `transport` and runs its `init`.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        transport.init()?;
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                options: ArcSwap::from_pointee(ClientOptions::default()),
                interceptors: InterceptorChain::new(),
                cache: ResponseCache::new(),
                stats: RequestStats::new(),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Creates a client over the bundled `reqwest` transport.
    pub fn reqwest() -> Result<Self> {
        Self::new(Arc::new(ReqwestTransport::new()))
    }

    /// Applies client options such as timeout, cache and retry behavior.
    ///
    /// Options live in the shared client state, so existing clones see the
    /// new options as well. Build a separate client for independent settings.
    pub fn with_options(self, opts: ClientOptions) -> Self {
        self.inner.options.store(Arc::new(opts));
        self
    }

    pub fn options(&self) -> ClientOptions {
        ClientOptions::clone(&self.inner.options.load())
    }

    fn update_options(&self, update: impl Fn(&mut ClientOptions)) {
        self.inner.options.rcu(|current| {
            let mut next = ClientOptions::clone(current);
            update(&mut next);
            next
        });
    }

    pub fn set_retry_config(&self, retry: RetryConfig) {
        self.update_options(|opts| opts.retry = retry.clone());
    }

    pub fn set_cache_config(&self, cache: CacheConfig) {
        self.update_options(|opts| opts.cache = cache.clone());
    }

    /// Sets the timeouts used by requests built through the verb helpers.
    pub fn set_default_timeout(&self, timeout_secs: u64, connect_timeout_secs: u64) {
        self.update_options(|opts| {
            opts.timeout_secs = timeout_secs;
            opts.connect_timeout_secs = connect_timeout_secs;
        });
    }

    pub fn set_user_agent(&self, user_agent: Option<String>) {
        self.update_options(|opts| opts.user_agent = user_agent.clone());
    }

    // ── Transport configuration ───────────────────────────────────────────────

    pub fn transport_version(&self) -> String {
        self.inner.transport.version()
    }

    fn configure_transport(&self, update: impl FnOnce(&mut TransportSettings)) {
        let mut settings = self.inner.transport.settings();
        update(&mut settings);
        self.inner.transport.configure(settings);
    }

    /// Sets the PEM bundle used as TLS trust anchor by later requests.
    pub fn set_certificate(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TransportError::new(
                TransportErrorKind::Tls,
                format!("certificate file not found: {}", path.display()),
            )
            .into());
        }
        self.configure_transport(|settings| settings.certificate_path = Some(path.to_path_buf()));
        Ok(())
    }

    pub fn set_proxy(&self, url: impl Into<String>, kind: ProxyKind) {
        let url = url.into();
        self.configure_transport(|settings| {
            let (username, password) = settings
                .proxy
                .take()
                .map(|proxy| (proxy.username, proxy.password))
                .unwrap_or_default();
            settings.proxy = Some(ProxySettings {
                url,
                kind,
                username,
                password,
            });
        });
    }

    /// Sets proxy credentials. Has no effect until a proxy is configured.
    pub fn set_proxy_auth(&self, username: impl Into<String>, password: impl Into<String>) {
        let (username, password) = (username.into(), password.into());
        self.configure_transport(|settings| {
            if let Some(proxy) = settings.proxy.as_mut() {
                proxy.username = Some(username);
                proxy.password = Some(password);
            }
        });
    }

    pub fn clear_proxy(&self) {
        self.configure_transport(|settings| settings.proxy = None);
    }

    /// Resolves the given hosts to fixed addresses instead of using system DNS.
    pub fn set_dns_overrides(&self, overrides: HashMap<String, SocketAddr>) {
        self.configure_transport(|settings| settings.dns_overrides = overrides);
    }

    pub fn set_max_connections(&self, max_per_host: usize) {
        self.configure_transport(|settings| settings.max_connections_per_host = max_per_host);
    }

    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.configure_transport(|settings| settings.keep_alive = keep_alive);
    }

    pub fn set_connection_pool_timeout(&self, timeout: Option<Duration>) {
        self.configure_transport(|settings| settings.pool_idle_timeout = timeout);
    }

    // ── Interceptors ──────────────────────────────────────────────────────────

    pub fn add_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) -> InterceptorId {
        self.inner.interceptors.add_request(interceptor)
    }

    pub fn add_response_interceptor(
        &self,
        interceptor: Arc<dyn ResponseInterceptor>,
    ) -> InterceptorId {
        self.inner.interceptors.add_response(interceptor)
    }

    /// Removes the registration identified by `id`.
    ///
    /// Requests started after this returns never observe the interceptor.
    pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
        self.inner.interceptors.remove(id)
    }

    /// Removes every registration of this exact instance (pointer identity).
    pub fn remove_request_interceptor(&self, interceptor: &Arc<dyn RequestInterceptor>) -> bool {
        self.inner.interceptors.remove_request_instance(interceptor)
    }

    pub fn remove_response_interceptor(&self, interceptor: &Arc<dyn ResponseInterceptor>) -> bool {
        self.inner.interceptors.remove_response_instance(interceptor)
    }

    pub fn clear_interceptors(&self) {
        self.inner.interceptors.clear();
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    /// Runs the full pipeline on the calling thread.
    ///
    /// Retry backoff sleeps on this thread.
    pub fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.run(request, Transfer::Exchange, &CancelToken::new())
    }

    /// Runs the pipeline on a blocking worker of the current Tokio runtime.
    ///
    /// Cancelling the returned handle stops delivery and prevents further
    /// transport attempts, but a call already issued runs to completion in the
    /// background and its result is discarded.
    pub fn execute_async(&self, request: HttpRequest) -> PendingResponse {
        let client = self.clone();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        PendingResponse::spawn(cancel, move || {
            client.run(request, Transfer::Exchange, &worker_cancel)
        })
    }

    pub fn get_async(&self, url: impl Into<String>) -> PendingResponse {
        self.execute_async(self.request(HttpMethod::Get, url))
    }

    /// Runs a batch concurrently on at most one worker thread per available
    /// core. Results are returned in input order.
    pub fn execute_all(&self, requests: Vec<HttpRequest>) -> Vec<Result<HttpResponse>> {
        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(DEFAULT_BATCH_WORKERS);
        self.execute_all_with_limit(requests, workers)
    }

    /// Runs a batch on at most `max_concurrency` worker threads, each request
    /// with its own transport handles. Results are returned in input order.
    pub fn execute_all_with_limit(
        &self,
        requests: Vec<HttpRequest>,
        max_concurrency: usize,
    ) -> Vec<Result<HttpResponse>> {
        let total = requests.len();
        let workers = max_concurrency.clamp(1, total.max(1));
        let queue = Mutex::new(requests.into_iter().enumerate());
        let queue = &queue;
        let mut results: Vec<Option<Result<HttpResponse>>> = (0..total).map(|_| None).collect();

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut finished = Vec::new();
                        loop {
                            let next = queue.lock().next();
                            let Some((index, request)) = next else {
                                break;
                            };
                            finished.push((index, self.execute(request)));
                        }
                        finished
                    })
                })
                .collect();

            for handle in handles {
                if let Ok(finished) = handle.join() {
                    for (index, result) in finished {
                        results[index] = Some(result);
                    }
                }
            }
        });

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(CurlError::Worker("request thread panicked".to_owned())))
            })
            .collect()
    }

    fn run(
        &self,
        request: HttpRequest,
        transfer: Transfer<'_>,
        cancel: &CancelToken,
    ) -> Result<HttpResponse> {
        if self.is_shut_down() {
            return Err(CurlError::ShutDown);
        }
        self.inner.stats.record_request();

        let result = self.run_pipeline(request, transfer, cancel);
        if result.is_err() {
            self.inner.stats.record_failure();
        }
        result
    }

    fn run_pipeline(
        &self,
        request: HttpRequest,
        transfer: Transfer<'_>,
        cancel: &CancelToken,
    ) -> Result<HttpResponse> {
        let options = self.inner.options.load_full();
        let request = self.inner.interceptors.apply_request(request)?;

        let cacheable = matches!(transfer, Transfer::Exchange) && request.method == HttpMethod::Get;
        let cache_key = cacheable.then(|| fingerprint(&request));
        if let Some(key) = &cache_key {
            if options.cache.strategy.reads_cache() {
                if let Some(hit) = self.inner.cache.lookup(key, &options.cache) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(key = %key, "cache hit");
                    self.inner.stats.record_cache_hit();
                    return Ok(hit);
                }
                self.inner.stats.record_cache_miss();
            }
        }

        let response = execute_with_retry(&options.retry, cancel, |attempt| {
            let mut handle = self.inner.transport.open()?;
            self.inner.stats.record_network_call(attempt);
            send(handle.as_mut(), &request, transfer)
        })?;

        let response = self.inner.interceptors.apply_response(response)?;

        if let Some(key) = &cache_key {
            if response.is_success() {
                self.inner.cache.store(key, &response, &options.cache);
            }
        }
        Ok(response)
    }

    // ── Verb helpers ──────────────────────────────────────────────────────────

    /// Builds a request carrying the client's default timeouts and user agent.
    pub fn request(&self, method: HttpMethod, url: impl Into<String>) -> HttpRequest {
        let options = self.inner.options.load();
        let request = HttpRequest::new(method, url)
            .with_timeout(options.timeout_secs, options.connect_timeout_secs);
        match &options.user_agent {
            Some(user_agent) => request.with_user_agent(user_agent.clone()),
            None => request,
        }
    }

    pub fn get(&self, url: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Get, url))
    }

    pub fn get_with_headers<I, K, V>(&self, url: impl Into<String>, headers: I) -> Result<HttpResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.execute(self.request(HttpMethod::Get, url).with_headers(headers))
    }

    pub fn post(&self, url: impl Into<String>, body: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Post, url).with_body(body))
    }

    /// Sends `json` with `Content-Type: application/json` through the
    /// transport's JSON POST entry point.
    pub fn post_json(&self, url: impl Into<String>, json: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Post, url).with_json(json))
    }

    pub fn put(&self, url: impl Into<String>, body: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Put, url).with_body(body))
    }

    pub fn put_json(&self, url: impl Into<String>, json: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Put, url).with_json(json))
    }

    pub fn patch(&self, url: impl Into<String>, body: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Patch, url).with_body(body))
    }

    pub fn patch_json(&self, url: impl Into<String>, json: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Patch, url).with_json(json))
    }

    pub fn delete(&self, url: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Delete, url))
    }

    pub fn head(&self, url: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Head, url))
    }

    pub fn options_request(&self, url: impl Into<String>) -> Result<HttpResponse> {
        self.execute(self.request(HttpMethod::Options, url))
    }

    /// Downloads `url` into the file at `path`, replacing it.
    ///
    /// Runs the interceptors and retry policy but never the cache. The returned
    /// response has an empty body and `content_length` set to the file size.
    pub fn download_file(
        &self,
        url: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<HttpResponse> {
        let request = self.request(HttpMethod::Get, url);
        self.run(request, Transfer::Download(path.as_ref()), &CancelToken::new())
    }

    /// Uploads the file at `path` as the multipart field `field_name` and
    /// returns the server's response.
    pub fn upload_file(
        &self,
        url: impl Into<String>,
        path: impl AsRef<Path>,
        field_name: &str,
    ) -> Result<HttpResponse> {
        let request = self.request(HttpMethod::Post, url);
        let transfer = Transfer::Upload {
            path: path.as_ref(),
            field_name,
        };
        self.run(request, transfer, &CancelToken::new())
    }

    // ── Diagnostics and lifecycle ─────────────────────────────────────────────

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    /// Human-readable cache and request counters. Not a stable format.
    pub fn cache_stats(&self) -> String {
        let stats = self.stats();
        format!(
            "Cache size: {}/{}\nTotal requests: {}\nCache hits: {}\nCache misses: {}\nHit rate: {:.1}%\nNetwork calls: {}\nRetries: {}\nFailures: {}",
            self.inner.cache.len(),
            self.inner.cache.capacity(),
            stats.total_requests,
            stats.cache_hits,
            stats.cache_misses,
            stats.hit_rate() * 100.0,
            stats.network_calls,
            stats.retries,
            stats.failures,
        )
    }

    /// Runs the transport `cleanup` once. Later calls fail with [`CurlError::ShutDown`].
    pub fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::SeqCst) {
            self.inner.transport.cleanup();
            self.inner.cache.clear();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

const DEFAULT_BATCH_WORKERS: usize = 4;

/// What a pipeline run moves besides the request itself.
#[derive(Clone, Copy, Debug)]
enum Transfer<'a> {
    Exchange,
    Download(&'a Path),
    Upload { path: &'a Path, field_name: &'a str },
}

/// Routes `request` to the matching transport entry point and times the call.
fn send(
    handle: &mut dyn TransportHandle,
    request: &HttpRequest,
    transfer: Transfer<'_>,
) -> Result<HttpResponse> {
    let started = Instant::now();
    let raw = dispatch(handle, request, transfer)?;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let mut response = into_response(raw, elapsed_ms)?;
    if let Transfer::Download(path) = transfer {
        if let Ok(metadata) = fs::metadata(path) {
            response.content_length = metadata.len();
        }
    }
    Ok(response)
}

fn dispatch(
    handle: &mut dyn TransportHandle,
    request: &HttpRequest,
    transfer: Transfer<'_>,
) -> TransportResult {
    let url = request.url.as_str();
    let body = request.body.as_deref().unwrap_or_default();
    let options = CallOptions::from(request);
    let json = request.is_json();

    match transfer {
        Transfer::Exchange => {}
        Transfer::Download(path) => return handle.download_file(url, path, options),
        Transfer::Upload { path, field_name } => {
            return handle.upload_file(url, path, field_name, options)
        }
    }

    match request.method {
        HttpMethod::Get => handle.get(url, options),
        HttpMethod::Post if json => handle.post_json(url, body, options),
        HttpMethod::Post => handle.post(url, body, options),
        HttpMethod::Put if json => handle.put_json(url, body, options),
        HttpMethod::Put => handle.put(url, body, options),
        HttpMethod::Patch if json => handle.patch_json(url, body, options),
        HttpMethod::Patch => handle.patch(url, body, options),
        HttpMethod::Delete => handle.delete(url, options),
        HttpMethod::Head => handle.head(url, options),
        HttpMethod::Options => handle.options(url, options),
    }
}

fn into_response(raw: RawResponse, response_time_ms: u64) -> Result<HttpResponse> {
    if !(200..=299).contains(&raw.status) {
        return Err(CurlError::Http {
            status: raw.status,
            status_message: raw.status_message,
            body: raw.body,
        });
    }

    let content_type = crate::types::header_value(&raw.headers, "Content-Type").map(str::to_owned);
    let content_length = crate::types::header_value(&raw.headers, "Content-Length")
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(raw.body.len() as u64);

    Ok(HttpResponse {
        status_code: raw.status,
        status_message: raw.status_message,
        headers: raw.headers,
        body: raw.body,
        content_length,
        content_type,
        response_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::into_response;
    use crate::{CurlError, RawResponse};

    #[test]
    fn non_success_status_becomes_http_error() {
        let err = into_response(RawResponse::new(503, "busy"), 5).expect_err("503 is an error");
        assert!(matches!(err, CurlError::Http { status: 503, ref body, .. } if body == "busy"));
    }

    #[test]
    fn content_metadata_is_taken_from_headers() {
        let raw = RawResponse::ok("{}")
            .with_header("content-type", "application/json")
            .with_header("Content-Length", "2");
        let response = into_response(raw, 12).expect("200 is success");
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.content_length, 2);
        assert_eq!(response.response_time_ms, 12);
        assert!(response.is_success());
    }

    #[test]
    fn content_length_defaults_to_body_size() {
        let response = into_response(RawResponse::ok("hello"), 0).expect("200 is success");
        assert_eq!(response.content_length, 5);
        assert_eq!(response.status_message, "OK");
    }
}
