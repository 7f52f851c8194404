use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Argon2id cost parameters, fixed for the lifetime of the process.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetConfig {
    pub token_ttl_minutes: i64,
    pub purge_interval_secs: u64,
    /// Base URL the reset link is built on.
    pub app_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub dispatch_timeout_secs: u64,
    pub smtp: Option<SmtpConfig>,
}

/// Shared secret the OAuth front end presents on provider callbacks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    pub callback_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub hashing: HashingConfig,
    pub reset: ResetConfig,
    pub email: EmailConfig,
    pub oauth: OAuthConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

impl SmtpConfig {
    /// `None` unless host, username, password and sender are all set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            host: non_empty_env("SMTP_HOST")?,
            port: env_or("SMTP_PORT", 465),
            username: non_empty_env("SMTP_USERNAME")?,
            password: non_empty_env("SMTP_PASSWORD")?,
            from_email: non_empty_env("SMTP_FROM_EMAIL")?,
            from_name: non_empty_env("SMTP_FROM_NAME"),
        })
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "booking-auth".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "booking-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            memory_kib: env_or("HASH_MEMORY_KIB", defaults.memory_kib),
            iterations: env_or("HASH_ITERATIONS", defaults.iterations),
            parallelism: env_or("HASH_PARALLELISM", defaults.parallelism),
        };
        let reset = ResetConfig {
            token_ttl_minutes: env_or("RESET_TOKEN_TTL_MINUTES", 60),
            purge_interval_secs: env_or("RESET_PURGE_INTERVAL_SECS", 600),
            app_url: std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
        };
        let email = EmailConfig {
            dispatch_timeout_secs: env_or("EMAIL_DISPATCH_TIMEOUT_SECS", 30),
            smtp: SmtpConfig::from_env(),
        };
        Ok(Self {
            database_url,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            jwt,
            hashing,
            reset,
            email,
            oauth: OAuthConfig {
                callback_secret: non_empty_env("OAUTH_CALLBACK_SECRET"),
            },
        })
    }

    /// Whether the in-process store was requested instead of Postgres.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with("memory://")
    }
}
