//! Handle for a request running on a blocking worker thread.
//!
//! Cancellation is cooperative. The flag is checked before every transport
//! attempt and a pending retry backoff wakes up on cancel, so cancelling
//! before the call is issued prevents it. Once a call is in flight it runs to
//! completion in the background because the transport has no abort primitive;
//! its result is discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::task::JoinHandle;

use crate::{CurlError, HttpResponse, Result};

/// Shared cancellation flag. Cancelling also wakes any thread blocked in
/// [`CancelToken::wait_for`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<Signal>);

#[derive(Debug, Default)]
struct Signal {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.0.lock.lock();
        self.0.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks for `delay` unless cancelled first. Returns whether the token is
    /// cancelled.
    pub fn wait_for(&self, delay: Duration) -> bool {
        let deadline = Instant::now().checked_add(delay);
        let mut guard = self.0.lock.lock();
        while !self.is_cancelled() {
            match deadline {
                Some(deadline) => {
                    if self.0.wake.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.0.wake.wait(&mut guard),
            }
        }
        self.is_cancelled()
    }
}

/// Future returned by [`crate::CurlClient::execute_async`].
///
/// Dropping it cancels the request.
#[derive(Debug)]
pub struct PendingResponse {
    state: State,
    cancel: CancelToken,
}

#[derive(Debug)]
enum State {
    Running(JoinHandle<Result<HttpResponse>>),
    Failed(Option<CurlError>),
    Done,
}

impl PendingResponse {
    pub(crate) fn spawn<F>(cancel: CancelToken, work: F) -> Self
    where
        F: FnOnce() -> Result<HttpResponse> + Send + 'static,
    {
        let state = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => State::Running(runtime.spawn_blocking(work)),
            Err(err) => State::Failed(Some(CurlError::Worker(format!(
                "execute_async requires a Tokio runtime: {err}"
            )))),
        };
        Self { state, cancel }
    }

    /// Stops delivery to the caller and prevents any further transport attempt.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Future for PendingResponse {
    type Output = Result<HttpResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.cancel.is_cancelled() {
            self.state = State::Done;
            return Poll::Ready(Err(CurlError::Cancelled));
        }

        let output = match &mut self.state {
            State::Running(handle) => match Pin::new(handle).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(result)) => result,
                Poll::Ready(Err(err)) => Err(CurlError::Worker(err.to_string())),
            },
            State::Failed(err) => Err(err
                .take()
                .unwrap_or_else(|| CurlError::Worker("polled after completion".to_owned()))),
            State::Done => Err(CurlError::Worker("polled after completion".to_owned())),
        };
        self.state = State::Done;
        Poll::Ready(output)
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if matches!(self.state, State::Running(_)) {
            self.cancel.cancel();
        }
    }
}
