use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::auth::session::SessionManager;
use crate::config::{AppConfig, StoreBackend};
use crate::store::{EntityStore, PgBackend};

#[derive(Clone)]
pub struct AppState {
    pub store: EntityStore,
    pub sessions: SessionManager,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let store = match config.backend {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL is not set")?;
                let backend =
                    PgBackend::connect(url, config.db_max_connections, config.request_timeout)
                        .await?;

                sqlx::migrate!("./migrations")
                    .run(backend.pool())
                    .await
                    .context("run migrations")?;
                info!(max_connections = config.db_max_connections, "connected to postgres");
                EntityStore::new(Arc::new(backend))
            }
            StoreBackend::Memory => {
                warn!("using the in-memory store; data does not survive a restart");
                EntityStore::in_memory()
            }
        };

        let codec = config.password.codec().context("argon2 parameters")?;
        let sessions = SessionManager::new(store.clone(), codec, config.session.clone())
            .context("init session manager")?;

        Ok(Self {
            store,
            sessions,
            config: Arc::new(config),
        })
    }

    /// In-memory state with cheap password hashing, for handler tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{PasswordConfig, SessionConfig};
        use std::time::Duration;

        let config = Arc::new(AppConfig {
            backend: StoreBackend::Memory,
            database_url: None,
            db_max_connections: 1,
            request_timeout: Duration::from_secs(5),
            session: SessionConfig {
                cookie_secure: false,
                sweep_every: None,
                ..SessionConfig::default()
            },
            password: PasswordConfig::default(),
        });
        let store = EntityStore::in_memory();
        let sessions = SessionManager::new(
            store.clone(),
            crate::auth::password::test_codec(),
            config.session.clone(),
        )
        .expect("session manager");

        Self {
            store,
            sessions,
            config,
        }
    }
}
