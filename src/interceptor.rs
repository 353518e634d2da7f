//! Ordered request and response transform pipelines.
//!
//! Registries are copy-on-write: every pipeline run folds over the snapshot
//! taken when it started, and `remove` publishes a new snapshot before it
//! returns, so a run that starts afterwards never sees the removed entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{HttpRequest, HttpResponse, Result};

/// Transforms a request before it is sent.
///
/// Interceptors run inline on the thread driving the pipeline and must not block.
/// Returning an error skips the remaining interceptors and fails the call.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: HttpRequest) -> Result<HttpRequest>;
}

/// Transforms a response after it is received.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept(&self, response: HttpResponse) -> Result<HttpResponse>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(HttpRequest) -> Result<HttpRequest> + Send + Sync,
{
    fn intercept(&self, request: HttpRequest) -> Result<HttpRequest> {
        self(request)
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(HttpResponse) -> Result<HttpResponse> + Send + Sync,
{
    fn intercept(&self, response: HttpResponse) -> Result<HttpResponse> {
        self(response)
    }
}

/// Handle returned on registration; identifies exactly one registered interceptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

type Entries<T> = Vec<(InterceptorId, Arc<T>)>;

struct Registry<T: ?Sized> {
    entries: ArcSwap<Entries<T>>,
}

impl<T: ?Sized> Registry<T> {
    fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn add(&self, id: InterceptorId, interceptor: Arc<T>) {
        self.entries.rcu(|current| {
            let mut next: Entries<T> = current.iter().cloned().collect();
            next.push((id, Arc::clone(&interceptor)));
            next
        });
    }

    fn remove_where(&self, matches: impl Fn(&InterceptorId, &Arc<T>) -> bool) -> bool {
        let mut removed = false;
        self.entries.rcu(|current| {
            let next: Entries<T> = current
                .iter()
                .filter(|(id, interceptor)| !matches(id, interceptor))
                .cloned()
                .collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    fn snapshot(&self) -> Arc<Entries<T>> {
        self.entries.load_full()
    }

    fn len(&self) -> usize {
        self.entries.load().len()
    }

    fn clear(&self) {
        self.entries.store(Arc::new(Vec::new()));
    }
}

/// Request and response interceptors, each applied in registration order.
pub struct InterceptorChain {
    requests: Registry<dyn RequestInterceptor>,
    responses: Registry<dyn ResponseInterceptor>,
    next_id: AtomicU64,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self {
            requests: Registry::new(),
            responses: Registry::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> InterceptorId {
        InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_request(&self, interceptor: Arc<dyn RequestInterceptor>) -> InterceptorId {
        let id = self.next_id();
        self.requests.add(id, interceptor);
        #[cfg(feature = "tracing")]
        tracing::debug!(?id, "registered request interceptor");
        id
    }

    pub fn add_response(&self, interceptor: Arc<dyn ResponseInterceptor>) -> InterceptorId {
        let id = self.next_id();
        self.responses.add(id, interceptor);
        #[cfg(feature = "tracing")]
        tracing::debug!(?id, "registered response interceptor");
        id
    }

    /// Removes the interceptor registered under `id`. Returns `false` if none was.
    pub fn remove(&self, id: InterceptorId) -> bool {
        self.requests.remove_where(|entry, _| *entry == id)
            || self.responses.remove_where(|entry, _| *entry == id)
    }

    /// Removes every registration of this exact request interceptor instance.
    pub fn remove_request_instance(&self, interceptor: &Arc<dyn RequestInterceptor>) -> bool {
        self.requests
            .remove_where(|_, entry| Arc::ptr_eq(entry, interceptor))
    }

    /// Removes every registration of this exact response interceptor instance.
    pub fn remove_response_instance(&self, interceptor: &Arc<dyn ResponseInterceptor>) -> bool {
        self.responses
            .remove_where(|_, entry| Arc::ptr_eq(entry, interceptor))
    }

    pub fn apply_request(&self, request: HttpRequest) -> Result<HttpRequest> {
        self.requests
            .snapshot()
            .iter()
            .try_fold(request, |request, (_, interceptor)| {
                interceptor.intercept(request)
            })
    }

    /// Folds in registration order, the same order as requests (not reversed).
    pub fn apply_response(&self, response: HttpResponse) -> Result<HttpResponse> {
        self.responses
            .snapshot()
            .iter()
            .try_fold(response, |response, (_, interceptor)| {
                interceptor.intercept(response)
            })
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    pub fn clear(&self) {
        self.requests.clear();
        self.responses.clear();
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new()
    }
}
