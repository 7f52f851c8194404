use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::password::PasswordHashing;
use crate::config::AppConfig;
use crate::mail::{ConsoleMailer, ResetMailer, SmtpMailer};
use crate::store::{CredentialStore, MemoryStore, PgStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub passwords: Arc<PasswordHashing>,
    pub mailer: Arc<dyn ResetMailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn CredentialStore> = if config.uses_memory_store() {
            warn!("using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        } else {
            let pg = PgStore::connect(&config.database_url, config.database_max_connections).await?;
            sqlx::migrate!("./migrations").run(pg.pool()).await?;
            Arc::new(pg)
        };

        let mailer: Arc<dyn ResetMailer> = match &config.email.smtp {
            Some(smtp) => {
                info!(host = %smtp.host, "smtp mailer configured");
                Arc::new(SmtpMailer::new(smtp)?)
            }
            None => {
                warn!("SMTP not configured; reset links are written to the log");
                Arc::new(ConsoleMailer::new())
            }
        };

        if config.oauth.callback_secret.is_none() {
            warn!("OAUTH_CALLBACK_SECRET not set; OAuth callback routes reject every request");
        }

        let passwords = Arc::new(PasswordHashing::new(&config.hashing)?);

        Ok(Self::from_parts(config, store, passwords, mailer))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
        passwords: Arc<PasswordHashing>,
        mailer: Arc<dyn ResetMailer>,
    ) -> Self {
        Self {
            config,
            store,
            passwords,
            mailer,
        }
    }
}

#[cfg(test)]
pub(crate) const TEST_CALLBACK_SECRET: &str = "test-callback-secret";

#[cfg(test)]
impl AppState {
    /// State over a memory store and a recording mailer, both handed back
    /// so tests can inspect them.
    pub(crate) fn fake_parts() -> (Self, MemoryStore, crate::mail::testing::RecordingMailer) {
        use crate::config::{EmailConfig, HashingConfig, JwtConfig, OAuthConfig, ResetConfig};

        let config = Arc::new(AppConfig {
            database_url: "memory://".into(),
            database_max_connections: 1,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            hashing: HashingConfig {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
            reset: ResetConfig {
                token_ttl_minutes: 60,
                purge_interval_secs: 600,
                app_url: "http://app.test".into(),
            },
            email: EmailConfig {
                dispatch_timeout_secs: 1,
                smtp: None,
            },
            oauth: OAuthConfig {
                callback_secret: Some(TEST_CALLBACK_SECRET.into()),
            },
        });
        let store = MemoryStore::new();
        let mailer = crate::mail::testing::RecordingMailer::new();
        let state = Self::from_parts(
            config,
            Arc::new(store.clone()),
            Arc::new(crate::auth::password::fast_hashing()),
            Arc::new(mailer.clone()),
        );
        (state, store, mailer)
    }
}
