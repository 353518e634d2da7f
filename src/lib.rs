//! `curlkit-http` is an HTTP client engine layered over a blocking,
//! non-thread-safe transport.
//!
//! [`CurlClient`] runs every request through the same pipeline:
//! request interceptors, a cache lookup for GETs, the transport call wrapped in
//! exponential-backoff retry, response interceptors, and a cache store for
//! successful GETs.
//! - [`CurlClient::execute`] runs it on the calling thread.
//! - [`CurlClient::execute_async`] runs it on a blocking worker and returns a
//!   cancellable [`PendingResponse`].
//!
//! The transport is injected through the [`Transport`] trait; [`ReqwestTransport`]
//! is the bundled implementation.

mod cache;
mod client;
mod error;
mod fingerprint;
mod interceptor;
mod options;
mod pending;
mod reqwest_transport;
mod retry;
mod stats;
mod transport;
mod types;

pub use cache::{ResponseCache, DEFAULT_CACHE_CAPACITY};
pub use client::CurlClient;
pub use error::{CurlError, TransportError, TransportErrorKind};
pub use fingerprint::{fingerprint, normalize_url};
pub use interceptor::{InterceptorChain, InterceptorId, RequestInterceptor, ResponseInterceptor};
pub use options::{CacheConfig, CacheStrategy, ClientOptions, RetryConfig};
pub use pending::{CancelToken, PendingResponse};
pub use reqwest_transport::{ReqwestHandle, ReqwestTransport};
pub use retry::{execute_with_retry, is_retryable, Backoff};
pub use stats::StatsSnapshot;
pub use transport::{
    CallOptions, ProxyKind, ProxySettings, RawResponse, Transport, TransportHandle,
    TransportResult, TransportSettings,
};
pub use types::{Headers, HttpMethod, HttpRequest, HttpResponse};

pub type Result<T> = std::result::Result<T, CurlError>;
