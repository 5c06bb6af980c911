use async_trait::async_trait;
use std::num::NonZeroU32;

use governor::{
    clock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota,
};

use super::RateLimiter;

pub struct GovernorRateLimiter {
    ratelimiter: governor::RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock, NoOpMiddleware>,
}

impl GovernorRateLimiter {
    /// A `per_minute` of zero is treated as one request per minute.
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            ratelimiter: governor::RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }
}

#[async_trait]
impl RateLimiter for GovernorRateLimiter {
    async fn wait(&self) {
        self.ratelimiter.until_ready().await;
    }
}
