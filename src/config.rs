use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use argon2::Params;
use serde::Deserialize;

use crate::auth::password::{CredentialError, PasswordCodec};
use crate::auth::token::MAX_TOKEN_BYTES;

/// Tokens shorter than this are refused at startup.
const MIN_SESSION_TOKEN_BYTES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown store backend `{other}` (expected postgres or memory)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: time::Duration,
    pub token_bytes: usize,
    /// Interval of the expired-session sweep; `None` disables it.
    pub sweep_every: Option<Duration>,
    pub cookie_secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: time::Duration::hours(72),
            token_bytes: 32,
            sweep_every: Some(Duration::from_secs(3600)),
            cookie_secure: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PasswordConfig {
    pub memory_kib: Option<u32>,
    pub iterations: Option<u32>,
}

impl PasswordConfig {
    pub fn codec(&self) -> Result<PasswordCodec, CredentialError> {
        match (self.memory_kib, self.iterations) {
            (None, None) => Ok(PasswordCodec::default()),
            (memory, iterations) => PasswordCodec::new(
                memory.unwrap_or(Params::DEFAULT_M_COST),
                iterations.unwrap_or(Params::DEFAULT_T_COST),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub request_timeout: Duration,
    pub session: SessionConfig,
    pub password: PasswordConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("STORE_BACKEND") {
            Some(v) => v.parse::<StoreBackend>()?,
            None => StoreBackend::Postgres,
        };
        let database_url = get("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORE_BACKEND=postgres");
        }

        let ttl_hours: i64 = parse_or(&get, "SESSION_TTL_HOURS", 72)?;
        if ttl_hours <= 0 {
            bail!("SESSION_TTL_HOURS must be positive");
        }
        let token_bytes: usize = parse_or(&get, "SESSION_TOKEN_BYTES", 32)?;
        if !(MIN_SESSION_TOKEN_BYTES..=MAX_TOKEN_BYTES).contains(&token_bytes) {
            bail!(
                "SESSION_TOKEN_BYTES must be between {MIN_SESSION_TOKEN_BYTES} and {MAX_TOKEN_BYTES}"
            );
        }
        let sweep_secs: u64 = parse_or(&get, "SESSION_SWEEP_SECS", 3600)?;

        let session = SessionConfig {
            ttl: time::Duration::hours(ttl_hours),
            token_bytes,
            sweep_every: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            cookie_secure: parse_or(&get, "COOKIE_SECURE", true)?,
        };
        let password = PasswordConfig {
            memory_kib: parse_opt(&get, "ARGON2_MEMORY_KIB")?,
            iterations: parse_opt(&get, "ARGON2_ITERATIONS")?,
        };

        Ok(Self {
            backend,
            database_url,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 30)?),
            session,
            password,
        })
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("invalid {key}")))
        .transpose()
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/resumed")]).unwrap();
        assert_eq!(cfg.backend, StoreBackend::Postgres);
        assert_eq!(cfg.db_max_connections, 10);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.session.ttl, time::Duration::days(3));
        assert_eq!(cfg.session.token_bytes, 32);
        assert_eq!(cfg.session.sweep_every, Some(Duration::from_secs(3600)));
        assert!(cfg.session.cookie_secure);
        assert!(cfg.password.memory_kib.is_none());
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
        assert!(config(&[("STORE_BACKEND", "memory")]).is_ok());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("STORE_BACKEND", "Memory"),
            ("SESSION_TTL_HOURS", "1"),
            ("SESSION_SWEEP_SECS", "0"),
            ("COOKIE_SECURE", "false"),
            ("ARGON2_MEMORY_KIB", "4096"),
        ])
        .unwrap();
        assert_eq!(cfg.backend, StoreBackend::Memory);
        assert_eq!(cfg.session.ttl, time::Duration::hours(1));
        assert_eq!(cfg.session.sweep_every, None);
        assert!(!cfg.session.cookie_secure);
        assert_eq!(cfg.password.memory_kib, Some(4096));
        assert!(cfg.password.codec().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let base = ("STORE_BACKEND", "memory");
        assert!(config(&[base, ("SESSION_TOKEN_BYTES", "16")]).is_err());
        assert!(config(&[base, ("SESSION_TTL_HOURS", "0")]).is_err());
        assert!(config(&[base, ("DB_MAX_CONNECTIONS", "many")]).is_err());
        assert!(config(&[("STORE_BACKEND", "sqlite")]).is_err());
    }

    #[test]
    fn token_bytes_must_fit_the_cookie_limit() {
        let base = ("STORE_BACKEND", "memory");
        let largest = MAX_TOKEN_BYTES.to_string();
        let cfg = config(&[base, ("SESSION_TOKEN_BYTES", &largest)]).unwrap();
        assert_eq!(cfg.session.token_bytes, MAX_TOKEN_BYTES);

        let err = config(&[base, ("SESSION_TOKEN_BYTES", "100")]).unwrap_err();
        assert!(err.to_string().contains("SESSION_TOKEN_BYTES"));
    }
}
