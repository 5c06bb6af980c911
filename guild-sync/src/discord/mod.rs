mod fetcher;
pub mod ratelimiter;

pub use fetcher::{FetcherOptions, GuildMemberFetcher, MAX_PAGE_SIZE};
