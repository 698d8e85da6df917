//! Session lifecycle: signup, login, logout and cookie-based authentication.
//!
//! A user holds at most one session row. Login replaces it, logout and lazy
//! expiry flag it `expired`, and the background sweep deletes rows that can no
//! longer authenticate.

use std::sync::Arc;

use axum::http::HeaderMap;
use lazy_static::lazy_static;
use regex::Regex;
use time::{macros::format_description, Date, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::cookie;
use super::dto::Registration;
use super::errors::AuthError;
use super::password::PasswordCodec;
use super::token::{is_well_formed, new_token};
use crate::config::SessionConfig;
use crate::store::repo_types::work_duration_years;
use crate::store::{EntityStore, NewUser, Session, User, UserFilter};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn parse_start_date(raw: &str) -> Result<Date, AuthError> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| AuthError::Invalid("start date must be YYYY-MM-DD".into()))
}

#[derive(Clone)]
pub struct SessionManager {
    store: EntityStore,
    codec: PasswordCodec,
    config: SessionConfig,
    // verified against for unknown usernames so both paths cost one Argon2 run
    dummy_digest: Arc<str>,
}

impl SessionManager {
    pub fn new(
        store: EntityStore,
        codec: PasswordCodec,
        config: SessionConfig,
    ) -> Result<Self, AuthError> {
        // a size the cookie check would refuse fails here, not at the first login
        new_token(config.token_bytes)?;
        let dummy_digest = codec.hash("not-a-real-password")?.into();
        Ok(Self {
            store,
            codec,
            config,
            dummy_digest,
        })
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Validates a signup, hashes the password and creates the user.
    #[instrument(skip(self, form), fields(username = %form.username))]
    pub async fn register(&self, form: Registration) -> Result<User, AuthError> {
        let username = form.username.trim().to_string();
        let email = form.email.trim().to_lowercase();

        if username.is_empty() {
            return Err(AuthError::Invalid("username is required".into()));
        }
        if !is_valid_email(&email) {
            warn!(%email, "invalid email");
            return Err(AuthError::Invalid("invalid email".into()));
        }
        if form.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Invalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if form.password != form.confirm_password {
            return Err(AuthError::Invalid("passwords do not match".into()));
        }
        if form.country.trim().is_empty() {
            return Err(AuthError::Invalid("country is required".into()));
        }
        let start_date = parse_start_date(&form.start_date)?;
        let today = OffsetDateTime::now_utc().date();
        if start_date > today {
            return Err(AuthError::Invalid("start date is in the future".into()));
        }

        let password_hash = self.codec.hash(&form.password)?;
        let user = self
            .store
            .create_user(NewUser {
                username,
                email,
                password_hash,
                firstname: form.firstname.trim().to_string(),
                lastname: form.lastname.trim().to_string(),
                bio: form.bio,
                phone: form.phone,
                country: form.country.trim().to_string(),
                start_date,
                years_of_work: work_duration_years(start_date, today),
            })
            .await?;

        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Checks credentials, starts a fresh session and appends its cookie to
    /// `response`. Nothing is written to `response` on failure.
    #[instrument(skip(self, password, response))]
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        response: &mut HeaderMap,
    ) -> Result<User, AuthError> {
        let Some(mut user) = self.store.find_user(&UserFilter::by_username(username)).await? else {
            let _ = self.codec.verify(&self.dummy_digest, password);
            warn!("login unknown username");
            return Err(AuthError::InvalidCredentials);
        };
        if !self.codec.verify(&user.password_hash, password) {
            warn!(user_id = user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let token = new_token(self.config.token_bytes)?;
        let now = OffsetDateTime::now_utc();
        let cookie = cookie::session_cookie(
            &token,
            self.config.ttl.whole_seconds(),
            self.config.cookie_secure,
        );
        self.store.record_sign_in(user.id, now).await?;
        self.store
            .create_session(user.id, token, now + self.config.ttl)
            .await?;
        user.last_sign_in = Some(now);

        cookie::append(response, &cookie).map_err(|e| {
            error!(error = %e, "session cookie is not a valid header value");
            AuthError::Invalid("session cookie".into())
        })?;
        info!(user_id = user.id, "user logged in");
        Ok(user)
    }

    /// Cancels the caller's session and clears the cookie.
    #[instrument(skip_all)]
    pub async fn logout(&self, request: &HeaderMap, response: &mut HeaderMap) -> Result<(), AuthError> {
        let session = self.active_session(request).await?;
        self.store.cancel_session(&session.key).await?;
        cookie::append(response, &cookie::clearing_cookie(self.config.cookie_secure))
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        info!(user_id = session.user_id, "user logged out");
        Ok(())
    }

    /// Resolves the request's session cookie to its user.
    pub async fn is_authenticated(&self, request: &HeaderMap) -> Result<User, AuthError> {
        let session = self.active_session(request).await?;
        self.store
            .find_user(&UserFilter::by_id(session.user_id))
            .await?
            .ok_or(AuthError::NoSession)
    }

    async fn active_session(&self, request: &HeaderMap) -> Result<Session, AuthError> {
        let key = cookie::read_session_cookie(request)
            .filter(|k| is_well_formed(k))
            .ok_or(AuthError::NoSession)?;
        let session = self
            .store
            .get_session(key)
            .await?
            .ok_or(AuthError::NoSession)?;

        if session.expired {
            debug!(user_id = session.user_id, "session already cancelled");
            return Err(AuthError::SessionExpired);
        }
        if !session.is_valid_at(OffsetDateTime::now_utc()) {
            self.store.cancel_session(&session.key).await?;
            debug!(user_id = session.user_id, "session expired, cancelled");
            return Err(AuthError::SessionExpired);
        }
        Ok(session)
    }

    /// Deletes every session that can no longer authenticate.
    pub async fn purge_expired_sessions(&self) -> Result<u64, AuthError> {
        let purged = self
            .store
            .purge_expired_sessions(OffsetDateTime::now_utc())
            .await?;
        Ok(purged)
    }

    /// Runs [`Self::purge_expired_sessions`] every `sweep_every`, if configured.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let every = self.config.sweep_every?;
        let manager = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.purge_expired_sessions().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "expired sessions purged"),
                    Err(e) => error!(error = %e, "session sweep failed"),
                }
            }
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::cookie::SESSION_COOKIE;
    use crate::auth::password::test_codec;
    use crate::auth::token::{TokenError, MAX_TOKEN_BYTES};
    use crate::store::StoreError;
    use axum::http::{
        header::{COOKIE, SET_COOKIE},
        HeaderValue,
    };

    pub(crate) fn manager() -> SessionManager {
        SessionManager::new(EntityStore::in_memory(), test_codec(), SessionConfig::default())
            .expect("manager")
    }

    pub(crate) fn registration(username: &str, password: &str) -> Registration {
        Registration {
            username: username.into(),
            email: format!("{username}@example.com"),
            password: password.into(),
            confirm_password: password.into(),
            firstname: "Alice".into(),
            lastname: "Doe".into(),
            bio: None,
            phone: None,
            country: "Nigeria".into(),
            start_date: "2019-01-01".into(),
        }
    }

    /// Turns the Set-Cookie of a login response into a request Cookie header.
    pub(crate) fn cookie_from(response: &HeaderMap) -> HeaderMap {
        let set = response
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .expect("set-cookie");
        let pair = set.split(';').next().unwrap();
        let mut request = HeaderMap::new();
        request.insert(COOKIE, HeaderValue::from_str(pair).unwrap());
        request
    }

    fn cookie_header(token: &str) -> HeaderMap {
        let mut request = HeaderMap::new();
        request.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}")).unwrap(),
        );
        request
    }

    #[tokio::test]
    async fn signup_login_authenticate_roundtrip() {
        let m = manager();
        let alice = m.register(registration("alice", "secret123")).await.unwrap();
        assert!(alice.years_of_work >= 7);
        assert_ne!(alice.password_hash, "secret123");

        let mut response = HeaderMap::new();
        let logged_in = m.login("alice", "secret123", &mut response).await.unwrap();
        assert_eq!(logged_in.id, alice.id);
        assert!(logged_in.last_sign_in.is_some());

        let set = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set.starts_with("session_key="));
        assert!(set.contains("Max-Age=259200"));
        assert!(set.contains("HttpOnly"));

        let user = m.is_authenticated(&cookie_from(&response)).await.unwrap();
        assert_eq!(user.id, alice.id);
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn wrong_password_sets_no_cookie() {
        let m = manager();
        m.register(registration("alice", "secret123")).await.unwrap();

        let mut response = HeaderMap::new();
        let err = m.login("alice", "wrong", &mut response).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(response.get(SET_COOKIE).is_none());

        let err = m.login("nobody", "secret123", &mut response).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn second_login_supersedes_first() {
        let m = manager();
        let alice = m.register(registration("alice", "secret123")).await.unwrap();

        let mut first = HeaderMap::new();
        m.login("alice", "secret123", &mut first).await.unwrap();
        let mut second = HeaderMap::new();
        m.login("alice", "secret123", &mut second).await.unwrap();

        assert_eq!(m.store().user_sessions(alice.id).await.unwrap().len(), 1);
        assert!(matches!(
            m.is_authenticated(&cookie_from(&first)).await,
            Err(AuthError::NoSession)
        ));
        assert!(m.is_authenticated(&cookie_from(&second)).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_logins_leave_one_session() {
        let m = manager();
        let alice = m.register(registration("alice", "secret123")).await.unwrap();

        let (mut a, mut b) = (HeaderMap::new(), HeaderMap::new());
        let (first, second) = tokio::join!(
            m.login("alice", "secret123", &mut a),
            m.login("alice", "secret123", &mut b),
        );
        first.unwrap();
        second.unwrap();

        let sessions = m.store().user_sessions(alice.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        let live = [
            m.is_authenticated(&cookie_from(&a)).await.is_ok(),
            m.is_authenticated(&cookie_from(&b)).await.is_ok(),
        ];
        assert_eq!(live.iter().filter(|ok| **ok).count(), 1);
    }

    #[tokio::test]
    async fn oversized_tokens_are_refused_up_front() {
        let config = SessionConfig {
            token_bytes: 100,
            ..SessionConfig::default()
        };
        let err = SessionManager::new(EntityStore::in_memory(), test_codec(), config)
            .err()
            .expect("oversized token config");
        assert!(matches!(
            err,
            AuthError::Token(TokenError::TooLong { requested: 100 })
        ));
    }

    #[tokio::test]
    async fn largest_token_survives_the_roundtrip() {
        let config = SessionConfig {
            token_bytes: MAX_TOKEN_BYTES,
            ..SessionConfig::default()
        };
        let m = SessionManager::new(EntityStore::in_memory(), test_codec(), config).unwrap();
        let alice = m.register(registration("alice", "secret123")).await.unwrap();

        let mut response = HeaderMap::new();
        m.login("alice", "secret123", &mut response).await.unwrap();
        let user = m.is_authenticated(&cookie_from(&response)).await.unwrap();
        assert_eq!(user.id, alice.id);
    }

    #[tokio::test]
    async fn past_deadline_expires_and_flags_row() {
        let m = manager();
        let alice = m.register(registration("alice", "secret123")).await.unwrap();
        let past = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        m.store()
            .create_session(alice.id, "stale-token".into(), past)
            .await
            .unwrap();

        let err = m.is_authenticated(&cookie_header("stale-token")).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));
        let row = m.store().get_session("stale-token").await.unwrap().unwrap();
        assert!(row.expired);

        // stays expired on the next read
        let err = m.is_authenticated(&cookie_header("stale-token")).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));
    }

    #[tokio::test]
    async fn session_expiring_now_is_expired() {
        let m = manager();
        let alice = m.register(registration("alice", "secret123")).await.unwrap();
        m.store()
            .create_session(alice.id, "edge-token".into(), OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(matches!(
            m.is_authenticated(&cookie_header("edge-token")).await,
            Err(AuthError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn missing_or_malformed_cookie_is_no_session() {
        let m = manager();
        assert!(matches!(
            m.is_authenticated(&HeaderMap::new()).await,
            Err(AuthError::NoSession)
        ));
        assert!(matches!(
            m.is_authenticated(&cookie_header("not a token!")).await,
            Err(AuthError::NoSession)
        ));
        assert!(matches!(
            m.is_authenticated(&cookie_header("unknownTokenValue")).await,
            Err(AuthError::NoSession)
        ));
    }

    #[tokio::test]
    async fn logout_cancels_and_clears() {
        let m = manager();
        m.register(registration("alice", "secret123")).await.unwrap();
        let mut login = HeaderMap::new();
        m.login("alice", "secret123", &mut login).await.unwrap();
        let request = cookie_from(&login);

        let mut response = HeaderMap::new();
        m.logout(&request, &mut response).await.unwrap();
        let cleared = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"));

        assert!(matches!(
            m.is_authenticated(&request).await,
            Err(AuthError::SessionExpired)
        ));
        let mut again = HeaderMap::new();
        assert!(m.logout(&request, &mut again).await.is_err());
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn registration_is_validated() {
        let m = manager();
        let mut bad_email = registration("alice", "secret123");
        bad_email.email = "not-an-email".into();
        assert!(matches!(m.register(bad_email).await, Err(AuthError::Invalid(_))));

        assert!(matches!(
            m.register(registration("alice", "short")).await,
            Err(AuthError::Invalid(_))
        ));

        let mut mismatch = registration("alice", "secret123");
        mismatch.confirm_password = "secret124".into();
        assert!(matches!(m.register(mismatch).await, Err(AuthError::Invalid(_))));

        let mut bad_date = registration("alice", "secret123");
        bad_date.start_date = "01/02/2019".into();
        assert!(matches!(m.register(bad_date).await, Err(AuthError::Invalid(_))));

        let mut future = registration("alice", "secret123");
        future.start_date = "2999-01-01".into();
        assert!(matches!(m.register(future).await, Err(AuthError::Invalid(_))));
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let m = manager();
        m.register(registration("alice", "secret123")).await.unwrap();
        let mut again = registration("alice", "secret123");
        again.email = "other@example.com".into();
        let err = m.register(again).await.unwrap_err();
        assert!(matches!(err, AuthError::StorageFailure(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn purge_drops_only_dead_sessions() {
        let m = manager();
        let alice = m.register(registration("alice", "secret123")).await.unwrap();
        let bob = m.register(registration("bob", "secret123")).await.unwrap();
        let mut live = HeaderMap::new();
        m.login("alice", "secret123", &mut live).await.unwrap();
        m.store()
            .create_session(bob.id, "dead".into(), OffsetDateTime::now_utc() - time::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(m.purge_expired_sessions().await.unwrap(), 1);
        assert_eq!(m.store().user_sessions(alice.id).await.unwrap().len(), 1);
        assert!(m.store().user_sessions(bob.id).await.unwrap().is_empty());
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
    }
}
