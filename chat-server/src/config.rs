use std::time::Duration;

pub const DEFAULT_GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Only used by debug builds when `JWT_SECRET` is unset.
const DEV_JWT_SECRET: &str = "dev-only-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the server listens on
    pub port: u16,
    /// SQLite database URL, e.g. `sqlite:./data/chat.db`
    pub database_url: String,
    /// Upper bound on pooled database connections.
    pub database_max_connections: u32,
    /// Redis URL for the chatroom listing cache. In-process cache when unset.
    pub redis_url: Option<String>,
    /// How long a cached chatroom listing stays valid
    pub chatroom_cache_ttl: Duration,
    /// HS256 signing secret for access tokens
    pub jwt_secret: String,
    /// Lifetime of an issued access token
    pub jwt_ttl: Duration,
    /// Lifetime of a one-time password
    pub otp_ttl: Duration,
    /// API key for the generative-text provider
    pub gemini_api_key: String,
    /// Provider endpoint
    pub gemini_api_url: String,
    /// Bound on a single remote completion call
    pub completion_timeout: Duration,
    /// Max concurrent dispatches.
    pub dispatch_workers: usize,
    /// Capacity of the hand-off queue between submission and dispatch.
    pub dispatch_queue_capacity: usize,
    /// Browser origins allowed by CORS
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let dispatch_workers: usize = env_parse("DISPATCH_WORKERS", 4)?;
        let dispatch_queue_capacity: usize = env_parse("DISPATCH_QUEUE_CAPACITY", 256)?;
        if dispatch_workers == 0 {
            anyhow::bail!("DISPATCH_WORKERS must be at least 1");
        }
        if dispatch_queue_capacity == 0 {
            anyhow::bail!("DISPATCH_QUEUE_CAPACITY must be at least 1");
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable is not set"))?;

        Ok(Self {
            port: env_parse("CHAT_SERVER_PORT", 8000)?,
            database_url: env_str("DATABASE_URL", "sqlite:./data/chat.db"),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 8)?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            chatroom_cache_ttl: Duration::from_secs(env_parse("CHATROOM_CACHE_TTL_SECS", 300)?),
            jwt_secret: jwt_secret_from_env()?,
            jwt_ttl: Duration::from_secs(env_parse("JWT_TTL_SECS", 86_400)?),
            otp_ttl: Duration::from_secs(env_parse("OTP_TTL_SECS", 300)?),
            gemini_api_key,
            gemini_api_url: env_str("GEMINI_API_URL", DEFAULT_GEMINI_API_URL),
            completion_timeout: Duration::from_secs(env_parse("COMPLETION_TIMEOUT_SECS", 60)?),
            dispatch_workers,
            dispatch_queue_capacity,
            cors_allowed_origins: env_csv(
                "CORS_ALLOWED_ORIGINS",
                &["http://localhost:3000", "http://127.0.0.1:3000"],
            ),
        })
    }

    /// Pool size actually used: every dispatch worker holds one connection for
    /// the length of a dispatch, and request handlers need a couple more.
    pub fn effective_pool_size(&self) -> u32 {
        let floor = u32::try_from(self.dispatch_workers)
            .unwrap_or(u32::MAX)
            .saturating_add(2);
        self.database_max_connections.max(floor)
    }
}

fn jwt_secret_from_env() -> anyhow::Result<String> {
    match std::env::var("JWT_SECRET") {
        Ok(v) if !v.is_empty() => Ok(v),
        _ if cfg!(debug_assertions) => {
            tracing::warn!("JWT_SECRET not set, using the development secret");
            Ok(DEV_JWT_SECRET.to_string())
        }
        _ => Err(anyhow::anyhow!("JWT_SECRET environment variable is not set")),
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}
