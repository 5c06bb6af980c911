use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Error while performing HTTP operation: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Error requesting Discord. Status: {0}")]
    DiscordError(reqwest::StatusCode),

    #[error("Still rate limited by Discord after retrying")]
    RateLimited,

    #[error("Error while operating on JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Error while parsing URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Error while operating on Redis: {0}")]
    RedisError(#[from] deadpool_redis::redis::RedisError),

    #[error("Error while operating on connection pool: {0}")]
    PoolError(#[from] deadpool_redis::PoolError),

    #[error("Error while building connection pool: {0}")]
    CreatePoolError(#[from] deadpool_redis::CreatePoolError),

    #[error("Gave up after fetching {0} pages without reaching the end of the member list")]
    PageLimitExceeded(usize),

    #[error("Member refresh did not complete before the deadline")]
    DeadlineExceeded,

    #[error("Error occurred during parsing address: {0}")]
    AddrParseError(#[from] std::net::AddrParseError),
}

impl Error {
    /// Whether a request that failed with this error is worth sending again.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ReqwestError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::DiscordError(status) => status.is_server_error(),
            Error::RateLimited => true,
            _ => false,
        }
    }
}

impl<T> From<Error> for Result<T> {
    fn from(e: Error) -> Self {
        Err(e)
    }
}
