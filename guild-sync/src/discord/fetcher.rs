use super::ratelimiter::RateLimiter;
use crate::{Config, Error, Result};

use model::guild::{GuildMember, MemberSnapshot};
use model::Snowflake;

use backoff::ExponentialBackoff;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

/// Largest `limit` the list guild members endpoint accepts.
pub const MAX_PAGE_SIZE: u16 = 1000;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub api_base: String,
    pub token: String,
    pub guild_id: Snowflake,
    pub page_size: u16,
    pub max_pages: usize,
    pub request_timeout: Duration,
    pub retry_initial_interval: Duration,
    pub retry_max_elapsed: Duration,
}

impl From<&Config> for FetcherOptions {
    fn from(config: &Config) -> Self {
        FetcherOptions {
            api_base: config.discord_api_base.clone(),
            token: config.discord_token.clone(),
            guild_id: config.guild_id,
            page_size: config.page_size,
            max_pages: config.max_pages,
            request_timeout: config.request_timeout(),
            retry_initial_interval: Duration::from_millis(config.retry_initial_interval_ms),
            retry_max_elapsed: Duration::from_secs(config.retry_max_elapsed_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    retry_after: f64,
}

struct Page {
    members: Vec<GuildMember>,
    // Only set when the bucket is exhausted.
    reset_after: Option<Duration>,
}

pub struct GuildMemberFetcher<T: RateLimiter> {
    options: FetcherOptions,
    client: reqwest::Client,
    ratelimiter: Arc<T>,
}

impl<T: RateLimiter> GuildMemberFetcher<T> {
    pub fn new(options: FetcherOptions, ratelimiter: Arc<T>) -> Result<GuildMemberFetcher<T>> {
        let client = reqwest::ClientBuilder::new()
            .use_rustls_tls()
            .timeout(options.request_timeout)
            .build()?;

        Ok(GuildMemberFetcher {
            options,
            client,
            ratelimiter,
        })
    }

    pub fn guild_id(&self) -> Snowflake {
        self.options.guild_id
    }

    fn page_size(&self) -> u16 {
        self.options.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub async fn fetch_all_guild_members(&self) -> Result<MemberSnapshot> {
        self.fetch_all_from(Vec::new(), None).await
    }

    /// Continues a listing from `last_cursor`, appending every further page onto `accumulated`.
    ///
    /// Stops at the first empty page, or at a page shorter than the page size since Discord
    /// has nothing after it. Any failed page aborts the whole listing and what has been
    /// accumulated so far is dropped.
    #[tracing::instrument(name = "fetch_members", skip(self, accumulated), fields(guild_id = %self.options.guild_id))]
    pub async fn fetch_all_from(
        &self,
        mut accumulated: Vec<GuildMember>,
        mut last_cursor: Option<Snowflake>,
    ) -> Result<MemberSnapshot> {
        let page_size = usize::from(self.page_size());
        let mut pages = 0usize;

        loop {
            if pages >= self.options.max_pages {
                error!(pages, count = accumulated.len(), "Member list did not end within page limit");
                return Error::PageLimitExceeded(pages).into();
            }

            let page = self.fetch_page_with_retry(last_cursor).await?;
            pages += 1;

            let page_len = page.members.len();
            debug!(page = pages, page_len, cursor = ?last_cursor, "Retrieved members page");

            if page_len == 0 {
                break;
            }

            accumulated.extend(page.members);
            last_cursor = accumulated.last().map(GuildMember::user_id);

            if page_len < page_size {
                break;
            }

            if let Some(reset_after) = page.reset_after {
                debug!(?reset_after, "Bucket exhausted, waiting for reset");
                sleep(reset_after).await;
            }
        }

        info!(pages, count = accumulated.len(), "Retrieved all guild members");
        Ok(MemberSnapshot::new(accumulated))
    }

    async fn fetch_page_with_retry(&self, after: Option<Snowflake>) -> Result<Page> {
        let url = self.build_url(after)?;

        let backoff = ExponentialBackoff {
            current_interval: self.options.retry_initial_interval,
            initial_interval: self.options.retry_initial_interval,
            max_elapsed_time: Some(self.options.retry_max_elapsed),
            ..Default::default()
        };

        backoff::future::retry(backoff, || {
            let url = url.clone();

            async move {
                self.fetch_page(&url).await.map_err(|e| {
                    if e.is_transient() {
                        warn!(error = %e, %url, "Failed to fetch members page, retrying");
                        backoff::Error::Transient(e)
                    } else {
                        backoff::Error::Permanent(e)
                    }
                })
            }
        })
        .await
    }

    async fn fetch_page(&self, url: &Url) -> Result<Page> {
        self.ratelimiter.wait().await;

        debug!(%url, "Polling");

        let res = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, format!("Bot {}", self.options.token))
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = match header_duration(res.headers(), "retry-after") {
                Some(d) => d,
                None => res
                    .json::<RateLimitResponse>()
                    .await
                    .ok()
                    .and_then(|body| Duration::try_from_secs_f64(body.retry_after).ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER),
            };

            warn!(?retry_after, "Rate limited by Discord");
            sleep(retry_after).await;
            return Error::RateLimited.into();
        }

        if !status.is_success() {
            return Error::DiscordError(status).into();
        }

        let reset_after = match res
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
        {
            Some("0") => header_duration(res.headers(), "x-ratelimit-reset-after"),
            _ => None,
        };

        let body = res.bytes().await?;

        let members = match serde_json::from_slice::<Vec<GuildMember>>(&body[..]) {
            Ok(v) => v,
            Err(e) => {
                error!(
                    error = %e,
                    body = ?std::str::from_utf8(&body[..]),
                    "Error deserialising members"
                );
                return Err(e.into());
            }
        };

        Ok(Page {
            members,
            reset_after,
        })
    }

    fn build_url(&self, after: Option<Snowflake>) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/guilds/{}/members",
            self.options.api_base.trim_end_matches('/'),
            self.options.guild_id
        ))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_size().to_string());

            if let Some(after) = after {
                query.append_pair("after", &after.to_string());
            }
        }

        Ok(url)
    }
}

// Discord sends rate limit timings as fractional seconds.
fn header_duration(headers: &HeaderMap, name: &str) -> Option<Duration> {
    let secs: f64 = headers.get(name)?.to_str().ok()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::header::HeaderValue;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GUILD_ID: u64 = 197038439483310086;
    const MEMBERS_PATH: &str = "/guilds/197038439483310086/members";

    struct Unlimited;

    #[async_trait]
    impl RateLimiter for Unlimited {
        async fn wait(&self) {}
    }

    fn options(api_base: String, page_size: u16) -> FetcherOptions {
        FetcherOptions {
            api_base,
            token: "test-token".to_owned(),
            guild_id: Snowflake(GUILD_ID),
            page_size,
            max_pages: 100,
            request_timeout: Duration::from_secs(5),
            retry_initial_interval: Duration::from_millis(10),
            retry_max_elapsed: Duration::from_secs(2),
        }
    }

    fn fetcher(options: FetcherOptions) -> GuildMemberFetcher<Unlimited> {
        GuildMemberFetcher::new(options, Arc::new(Unlimited)).unwrap()
    }

    fn members(ids: std::ops::RangeInclusive<u64>) -> Value {
        Value::Array(
            ids.map(|id| {
                json!({
                    "user": { "id": id.to_string(), "username": format!("user{}", id) },
                    "roles": [],
                    "joined_at": "2021-06-01T12:00:00.000000+00:00",
                    "deaf": false,
                    "mute": false
                })
            })
            .collect(),
        )
    }

    #[tokio::test]
    async fn test_paginates_until_short_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(header("Authorization", "Bot test-token"))
            .and(query_param("limit", "1000"))
            .and(query_param_is_missing("after"))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(1..=1000)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("after", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(1001..=2000)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("after", "2000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(2001..=2500)))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = fetcher(options(server.uri(), 1000))
            .fetch_all_guild_members()
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 2500);

        let ids: Vec<u64> = snapshot.members().iter().map(|m| m.user_id().0).collect();
        assert_eq!(ids, (1..=2500).collect::<Vec<_>>());
        assert!(snapshot.contains_user(Snowflake(2500)));
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_trailing_empty_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param_is_missing("after"))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(1..=2)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("after", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(3..=4)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("after", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = fetcher(options(server.uri(), 2))
            .fetch_all_guild_members()
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_guild() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = fetcher(options(server.uri(), 1000))
            .fetch_all_guild_members()
            .await
            .unwrap();

        assert!(snapshot.is_empty());
        assert_eq!(snapshot.to_json().unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_resumes_from_cursor() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("after", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(3..=3)))
            .expect(1)
            .mount(&server)
            .await;

        let accumulated: Vec<GuildMember> = serde_json::from_value(members(1..=2)).unwrap();
        let snapshot = fetcher(options(server.uri(), 2))
            .fetch_all_from(accumulated, Some(Snowflake(2)))
            .await
            .unwrap();

        let ids: Vec<u64> = snapshot.members().iter().map(|m| m.user_id().0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_without_retry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param_is_missing("after"))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(1..=2)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("after", "2"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "message": "Missing Access",
                "code": 50001
            })))
            .expect(1)
            .mount(&server)
            .await;

        let res = fetcher(options(server.uri(), 2))
            .fetch_all_guild_members()
            .await;

        assert!(matches!(res, Err(Error::DiscordError(StatusCode::FORBIDDEN))));
    }

    #[tokio::test]
    async fn test_retries_after_rate_limit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "0.01")
                    .set_body_json(json!({
                        "message": "You are being rate limited.",
                        "retry_after": 0.01,
                        "global": false
                    })),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(1..=1)))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = fetcher(options(server.uri(), 1000))
            .fetch_all_guild_members()
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = fetcher(options(server.uri(), 1000))
            .fetch_all_guild_members()
            .await
            .unwrap();

        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "members": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let res = fetcher(options(server.uri(), 1000))
            .fetch_all_guild_members()
            .await;

        assert!(matches!(res, Err(Error::JsonError(_))));
    }

    #[tokio::test]
    async fn test_page_limit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(1..=1)))
            .expect(3)
            .mount(&server)
            .await;

        let mut options = options(server.uri(), 1);
        options.max_pages = 3;

        let res = fetcher(options).fetch_all_guild_members().await;
        assert!(matches!(res, Err(Error::PageLimitExceeded(3))));
    }

    #[tokio::test]
    async fn test_waits_for_exhausted_bucket_reset() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param_is_missing("after"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-RateLimit-Remaining", "0")
                    .insert_header("X-RateLimit-Reset-After", "0.3")
                    .set_body_json(members(1..=1)),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("after", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let started = tokio::time::Instant::now();
        let snapshot = fetcher(options(server.uri(), 1))
            .fetch_all_guild_members()
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_rate_limit_delay_from_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "message": "You are being rate limited.",
                "retry_after": 0.2,
                "global": false
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(1..=1)))
            .expect(1)
            .mount(&server)
            .await;

        let started = tokio::time::Instant::now();
        let snapshot = fetcher(options(server.uri(), 1000))
            .fetch_all_guild_members()
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_gives_up_when_always_rate_limited() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "0.01")
                    .set_body_json(json!({ "retry_after": 0.01, "global": false })),
            )
            .mount(&server)
            .await;

        let mut options = options(server.uri(), 1000);
        options.retry_max_elapsed = Duration::from_millis(100);

        let res = fetcher(options).fetch_all_guild_members().await;
        assert!(matches!(res, Err(Error::RateLimited)));
    }

    #[tokio::test]
    async fn test_retries_request_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(members(1..=1))
                    .set_delay(Duration::from_secs(2)),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(members(1..=1)))
            .expect(1)
            .mount(&server)
            .await;

        let mut options = options(server.uri(), 1000);
        options.request_timeout = Duration::from_millis(200);

        let snapshot = fetcher(options).fetch_all_guild_members().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_page_size_is_clamped() {
        let f = fetcher(options("https://discord.com/api/v10/".to_owned(), 5000));

        let url = f.build_url(Some(Snowflake(42))).unwrap();
        assert_eq!(
            url.as_str(),
            "https://discord.com/api/v10/guilds/197038439483310086/members?limit=1000&after=42"
        );
    }

    #[test]
    fn test_header_duration() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset-after", HeaderValue::from_static("1.5"));
        headers.insert("retry-after", HeaderValue::from_static("-3"));

        assert_eq!(
            header_duration(&headers, "x-ratelimit-reset-after"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(header_duration(&headers, "retry-after"), None);
        assert_eq!(header_duration(&headers, "missing"), None);
    }
}
