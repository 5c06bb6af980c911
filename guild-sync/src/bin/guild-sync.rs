use std::str::FromStr;
use std::sync::Arc;

use guild_sync::discord::ratelimiter::GovernorRateLimiter;
use guild_sync::discord::{FetcherOptions, GuildMemberFetcher};
use guild_sync::membership::MembershipCache;
use guild_sync::store::{KeyValueStore, MemoryStore, RedisStore};
use guild_sync::sync::RosterSync;
use guild_sync::{http, Config, Result, StoreBackend};
use sentry::types::Dsn;
use sentry_tracing::EventFilter;
use tokio::time::sleep;

use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> Result<()> {
    let config = Arc::new(Config::from_envvar());

    let _guard = configure_observability(&config);

    let reachable_pages = config.pages_within_deadline();
    if reachable_pages < config.max_pages as u64 {
        warn!(
            reachable_pages,
            max_members = reachable_pages * u64::from(config.page_size),
            "Refresh deadline is shorter than the request rate allows for MAX_PAGES; larger guilds will never finish a refresh"
        );
    }

    match config.store_backend {
        StoreBackend::Redis => {
            info!("Connecting to Redis");
            let store = RedisStore::connect(config.get_redis_uri(), config.snapshot_expiry_seconds)?;
            run(config, Arc::new(store)).await
        }
        StoreBackend::Memory => run(config, Arc::new(MemoryStore::new())).await,
    }
}

async fn run<S: KeyValueStore>(config: Arc<Config>, store: Arc<S>) -> Result<()> {
    let ratelimiter = Arc::new(GovernorRateLimiter::new(config.requests_per_minute));
    let fetcher = GuildMemberFetcher::new(FetcherOptions::from(config.as_ref()), ratelimiter)?;

    let roster_sync = RosterSync::new(
        fetcher,
        Arc::clone(&store),
        config.snapshot_key.as_str(),
        config.refresh_deadline(),
    );

    let cache = Arc::new(MembershipCache::new(store, config.snapshot_key.as_str()));
    start_server(&config, cache, &roster_sync);

    loop {
        info!("Refreshing guild members");
        match roster_sync.refresh().await {
            Ok(count) => info!(count, "Refresh successful"),
            // The previous snapshot stays in place, so lookups keep working off stale data.
            Err(e) => error!(error = %e, "An error occurred whilst refreshing guild members"),
        };

        sleep(config.refresh_interval()).await;
    }
}

fn configure_observability(config: &Config) -> sentry::ClientInitGuard {
    let _guard = sentry::init(sentry::ClientOptions {
        dsn: config
            .sentry_dsn
            .clone()
            .map(|dsn| Dsn::from_str(dsn.as_str()).expect("Invalid DSN")),
        debug: config.debug_mode,
        release: sentry::release_name!(),
        ..Default::default()
    });

    let sentry_layer = sentry_tracing::layer().event_filter(|meta| match meta.level() {
        &tracing::Level::ERROR | &tracing::Level::WARN => EventFilter::Exception,
        _ => EventFilter::Ignore,
    });

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(sentry_layer);

    if config.json_log {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    _guard
}

fn start_server<T, S>(config: &Config, cache: Arc<MembershipCache<S>>, roster_sync: &RosterSync<T, S>)
where
    T: guild_sync::discord::ratelimiter::RateLimiter,
    S: KeyValueStore,
{
    let server_addr = config.server_addr.clone();
    let status = roster_sync.status_handle();

    tokio::spawn(async move {
        info!(%server_addr, "Starting server...");

        if let Err(e) = http::listen(server_addr.as_str(), cache, status).await {
            error!(error = %e, "Server stopped");
        }
    });
}
