//! Tower middleware that gates requests through a [`RateLimiter`].

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

use crate::limiter::RateLimiter;
use crate::store::CounterStore;
use crate::window::WindowHasher;

/// Error type produced by [`ThrottleService`].
///
/// `E` is the wrapped service's error. Limiter infrastructure failures are
/// carried as text: the middleware cannot know the store's error type and the
/// caller's recourse (shed or fail open) is the same either way.
#[derive(Debug, Clone)]
pub enum ThrottleError<E> {
    /// The window budget is spent; retry after roughly `retry_after`.
    Limited { retry_after: Duration },
    /// The limiter could not decide (store unreachable, counter corrupt).
    /// The request was not forwarded and not counted.
    Infrastructure(String),
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ThrottleError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited { retry_after } => {
                write!(f, "rate limited, retry in {:?}", retry_after)
            }
            Self::Infrastructure(msg) => write!(f, "rate limiter unavailable: {}", msg),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ThrottleError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ThrottleError<E> {
    /// Check if this error is a rate-limit rejection.
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }
    /// Access the retry estimate if this is a rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Limited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
    /// Get the wrapped service's error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// A layer that gates requests through a shared [`RateLimiter`].
///
/// `key_fn` extracts the identifier to count from each request, typically a
/// client address (see [`crate::addr`]) or an API key.
pub struct ThrottleLayer<S, H, F> {
    limiter: Arc<RateLimiter<S, H>>,
    key_fn: Arc<F>,
}

impl<S, H, F> ThrottleLayer<S, H, F> {
    /// Create a new throttle layer.
    pub fn new(limiter: RateLimiter<S, H>, key_fn: F) -> Self {
        Self { limiter: Arc::new(limiter), key_fn: Arc::new(key_fn) }
    }
}

impl<S, H, F> Clone for ThrottleLayer<S, H, F> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), key_fn: self.key_fn.clone() }
    }
}

impl<Svc, S, H, F> Layer<Svc> for ThrottleLayer<S, H, F> {
    type Service = ThrottleService<Svc, S, H, F>;

    fn layer(&self, service: Svc) -> Self::Service {
        ThrottleService {
            inner: service,
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Middleware service produced by [`ThrottleLayer`].
pub struct ThrottleService<Svc, S, H, F> {
    inner: Svc,
    limiter: Arc<RateLimiter<S, H>>,
    key_fn: Arc<F>,
}

impl<Svc: Clone, S, H, F> Clone for ThrottleService<Svc, S, H, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<Svc, S, H, F, Req> Service<Req> for ThrottleService<Svc, S, H, F>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Error: std::error::Error + Send + Sync + 'static,
    S: CounterStore + 'static,
    H: WindowHasher + 'static,
    F: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = Svc::Response;
    type Error = ThrottleError<Svc::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ThrottleError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let id = (self.key_fn)(&req);
        let limiter = self.limiter.clone();
        let retry_after = limiter.period();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match limiter.attempt(&id).await {
                Ok(true) => inner.call(req).await.map_err(ThrottleError::Inner),
                Ok(false) => Err(ThrottleError::Limited { retry_after }),
                Err(e) => {
                    // Limiter failed (e.g. store down); the request is shed
                    // rather than silently admitted.
                    Err(ThrottleError::Infrastructure(e.to_string()))
                }
            }
        })
    }
}
