mod governor_ratelimiter;
pub use governor_ratelimiter::GovernorRateLimiter;

use async_trait::async_trait;

/// Gate in front of every outbound Discord request.
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    async fn wait(&self);
}
