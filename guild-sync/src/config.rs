use model::Snowflake;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    // Required
    pub discord_token: String,
    pub guild_id: Snowflake,
    pub server_addr: String,

    #[serde(default = "default_api_base")]
    pub discord_api_base: String,

    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,
    #[serde(default = "default_redis_addr")]
    pub redis_addr: String,
    pub redis_password: Option<String>,
    #[serde(default = "default_snapshot_key")]
    pub snapshot_key: String,
    pub snapshot_expiry_seconds: Option<usize>,

    #[serde(default = "default_page_size")]
    pub page_size: u16,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_refresh_deadline_secs")]
    pub refresh_deadline_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_retry_initial_interval_ms")]
    pub retry_initial_interval_ms: u64,
    #[serde(default = "default_retry_max_elapsed_secs")]
    pub retry_max_elapsed_secs: u64,

    pub sentry_dsn: Option<String>,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub json_log: bool,
}

impl Config {
    pub fn from_envvar() -> Config {
        envy::from_env::<Config>().expect("Parsing config failed")
    }

    pub fn get_redis_uri(&self) -> String {
        match &self.redis_password {
            Some(pwd) => format!("redis://:{}@{}/", pwd, self.redis_addr),
            None => format!("redis://{}/", self.redis_addr),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_deadline(&self) -> Duration {
        Duration::from_secs(self.refresh_deadline_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Upper bound on pages one refresh can fetch before `refresh_deadline` runs out, given
    /// `requests_per_minute`. Rosters larger than this times `page_size` never finish a refresh.
    pub fn pages_within_deadline(&self) -> u64 {
        self.refresh_deadline_secs * u64::from(self.requests_per_minute) / 60
    }
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_owned()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_redis_addr() -> String {
    "127.0.0.1:6379".to_owned()
}

fn default_snapshot_key() -> String {
    "guild_members".to_owned()
}

fn default_page_size() -> u16 {
    1000
}

fn default_max_pages() -> usize {
    1000
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_refresh_deadline_secs() -> u64 {
    1200
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_requests_per_minute() -> u32 {
    50
}

fn default_retry_initial_interval_ms() -> u64 {
    500
}

fn default_retry_max_elapsed_secs() -> u64 {
    60
}
