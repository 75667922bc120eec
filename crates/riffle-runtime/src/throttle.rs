use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use riffle_stream::RiffleError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission control shared by every call that uses it.
#[async_trait]
pub trait Throttle: Send + Sync {
    async fn acquire(&self) -> ThrottlePermit;

    fn name(&self) -> &'static str;
}

pub type ThrottleRef = Arc<dyn Throttle>;

/// Held for the duration of an admitted operation; dropping it releases the
/// slot.
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ThrottlePermit {
    pub fn unrestricted() -> Self {
        Self { _permit: None }
    }

    fn from_semaphore(permit: OwnedSemaphorePermit) -> Self {
        Self {
            _permit: Some(permit),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Unthrottled;

#[async_trait]
impl Throttle for Unthrottled {
    async fn acquire(&self) -> ThrottlePermit {
        ThrottlePermit::unrestricted()
    }

    fn name(&self) -> &'static str {
        "unthrottled"
    }
}

/// Admits at most `limit` concurrent operations.
#[derive(Debug, Clone)]
pub struct MaxConcurrency {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl MaxConcurrency {
    pub fn new(limit: usize) -> Result<Self, RiffleError> {
        if limit == 0 {
            return Err(RiffleError::invalid_config(
                "max_concurrency must be at least 1",
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl Throttle for MaxConcurrency {
    async fn acquire(&self) -> ThrottlePermit {
        match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => ThrottlePermit::from_semaphore(permit),
            // The semaphore is never closed.
            Err(_) => ThrottlePermit::unrestricted(),
        }
    }

    fn name(&self) -> &'static str {
        "max-concurrency"
    }
}

/// Token bucket admitting `per_second` operations each second.
pub struct RateLimit {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    per_second: u32,
}

impl RateLimit {
    pub fn per_second(per_second: u32) -> Result<Self, RiffleError> {
        let Some(rate) = NonZeroU32::new(per_second) else {
            return Err(RiffleError::invalid_config(
                "requests_per_second must be at least 1",
            ));
        };
        Ok(Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            per_second,
        })
    }

    pub fn rate(&self) -> u32 {
        self.per_second
    }
}

#[async_trait]
impl Throttle for RateLimit {
    async fn acquire(&self) -> ThrottlePermit {
        self.limiter.until_ready().await;
        ThrottlePermit::unrestricted()
    }

    fn name(&self) -> &'static str {
        "rate-limit"
    }
}
