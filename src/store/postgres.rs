use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    FromRow, PgPool, Postgres, QueryBuilder,
};
use time::OffsetDateTime;
use tracing::debug;

use super::backend::{Backend, Junction, Page, Table};
use super::errors::{StoreError, StoreResult};
use super::filter::{Predicate, Value};
use super::repo_types::{
    Employment, Hobby, NewEmployment, NewNamed, NewProfile, NewProject, NewSession, NewUser,
    Profile, Project, Session, Socials, TechStack, User, DEFAULT_EMPLOYMENT_STATUS,
    DEFAULT_PROJECT_STATUS,
};

const USER_COLUMNS: &str = "id, username, email, password_hash, firstname, lastname, bio, \
    phone, country, portfolio, github, linkedin, twitter, start_date, years_of_work, \
    email_verified, created_on, updated_on, last_sign_in";
const SESSION_COLUMNS: &str = "id, user_id, key, expires_on, expired";
const PROFILE_COLUMNS: &str = "id, user_id, role, about, views";
const PROJECT_COLUMNS: &str = "id, user_id, name, duration, start_date, end_date, status, \
    github, prod_link, description, created_on, updated_on";
const EMPLOYMENT_COLUMNS: &str = "id, user_id, name, employee, duration, start_date, end_date, \
    status, prod_link, description, created_on, updated_on";
const NAMED_COLUMNS: &str = "id, user_id, name";

/// PostgreSQL storage. Every value is bound as a parameter; column names come
/// only from the fixed lists in [`super::filter`].
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .context("connect to database")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select<T>(
        &self,
        table: Table,
        columns: &str,
        preds: &[Predicate],
        page: Option<Page>,
    ) -> StoreResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {columns} FROM {}",
            table.name()
        ));
        push_predicates(&mut qb, preds);
        qb.push(" ORDER BY id");
        if let Some(page) = page {
            qb.push(" LIMIT ").push_bind(page.limit);
            qb.push(" OFFSET ").push_bind(page.offset);
        }
        debug!(sql = qb.sql(), "select");
        let rows = qb.build_query_as::<T>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn insert_named<T>(&self, table: Table, row: &NewNamed) -> StoreResult<T>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let sql = format!(
            "INSERT INTO {} (user_id, name) VALUES ($1, $2) RETURNING {NAMED_COLUMNS}",
            table.name()
        );
        let created = sqlx::query_as::<_, T>(&sql)
            .bind(row.user_id)
            .bind(&row.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }
}

fn push_predicates(qb: &mut QueryBuilder<'_, Postgres>, preds: &[Predicate]) {
    for (i, pred) in preds.iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        qb.push(pred.column);
        match &pred.value {
            Value::Int(v) => {
                qb.push(" = ").push_bind(*v);
            }
            Value::Text(v) => {
                qb.push(" = ").push_bind(v.clone());
            }
            Value::Bool(v) => {
                qb.push(" = ").push_bind(*v);
            }
            Value::AnyOf(ids) => {
                qb.push(" = ANY(").push_bind(ids.clone()).push(")");
            }
        }
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn user_id(&self, username: &str) -> StoreResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_user(&self, user: &NewUser) -> StoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, firstname, lastname, bio,
                               phone, country, start_date, years_of_work)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.firstname)
            .bind(&user.lastname)
            .bind(&user.bio)
            .bind(&user.phone)
            .bind(&user.country)
            .bind(user.start_date)
            .bind(user.years_of_work)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn select_users(&self, preds: &[Predicate], page: Option<Page>) -> StoreResult<Vec<User>> {
        self.select(Table::Users, USER_COLUMNS, preds, page).await
    }

    async fn update_socials(&self, user_id: i64, socials: &Socials) -> StoreResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE users
               SET portfolio = $1, github = $2, linkedin = $3, twitter = $4, updated_on = now()
             WHERE id = $5
            "#,
        )
        .bind(&socials.portfolio)
        .bind(&socials.github)
        .bind(&socials.linkedin)
        .bind(&socials.twitter)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()> {
        let done = sqlx::query(
            "UPDATE users SET email_verified = TRUE, updated_on = now() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        Ok(())
    }

    async fn record_sign_in(&self, user_id: i64, at: OffsetDateTime) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_sign_in = $1 WHERE id = $2")
            .bind(at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> StoreResult<Profile> {
        let sql = format!(
            "INSERT INTO profiles (user_id, role, about) VALUES ($1, $2, $3) RETURNING {PROFILE_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Profile>(&sql)
            .bind(profile.user_id)
            .bind(&profile.role)
            .bind(&profile.about)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn select_profiles(&self, preds: &[Predicate]) -> StoreResult<Vec<Profile>> {
        self.select(Table::Profiles, PROFILE_COLUMNS, preds, None).await
    }

    async fn insert_project(&self, project: &NewProject, duration: i32) -> StoreResult<Project> {
        let sql = format!(
            r#"
            INSERT INTO projects (user_id, name, duration, start_date, end_date, status,
                                  github, prod_link, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {PROJECT_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, Project>(&sql)
            .bind(project.user_id)
            .bind(&project.name)
            .bind(duration)
            .bind(project.start_date)
            .bind(project.end_date)
            .bind(project.status.as_deref().unwrap_or(DEFAULT_PROJECT_STATUS))
            .bind(&project.github)
            .bind(&project.prod_link)
            .bind(&project.description)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn select_projects(&self, preds: &[Predicate]) -> StoreResult<Vec<Project>> {
        self.select(Table::Projects, PROJECT_COLUMNS, preds, None).await
    }

    async fn insert_employment(
        &self,
        employment: &NewEmployment,
        duration: i32,
    ) -> StoreResult<Employment> {
        let sql = format!(
            r#"
            INSERT INTO employments (user_id, name, employee, duration, start_date, end_date,
                                     status, prod_link, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {EMPLOYMENT_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, Employment>(&sql)
            .bind(employment.user_id)
            .bind(&employment.name)
            .bind(&employment.employee)
            .bind(duration)
            .bind(employment.start_date)
            .bind(employment.end_date)
            .bind(employment.status.as_deref().unwrap_or(DEFAULT_EMPLOYMENT_STATUS))
            .bind(&employment.prod_link)
            .bind(&employment.description)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn select_employments(&self, preds: &[Predicate]) -> StoreResult<Vec<Employment>> {
        self.select(Table::Employments, EMPLOYMENT_COLUMNS, preds, None).await
    }

    async fn insert_hobby(&self, hobby: &NewNamed) -> StoreResult<Hobby> {
        self.insert_named(Table::Hobbies, hobby).await
    }

    async fn select_hobbies(&self, preds: &[Predicate]) -> StoreResult<Vec<Hobby>> {
        self.select(Table::Hobbies, NAMED_COLUMNS, preds, None).await
    }

    async fn insert_tech_stack(&self, stack: &NewNamed) -> StoreResult<TechStack> {
        self.insert_named(Table::TechStacks, stack).await
    }

    async fn select_tech_stacks(&self, preds: &[Predicate]) -> StoreResult<Vec<TechStack>> {
        self.select(Table::TechStacks, NAMED_COLUMNS, preds, None).await
    }

    async fn tech_stack_ids(&self, name: &str) -> StoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM tech_stacks WHERE name = $1 ORDER BY id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn link(&self, junction: Junction, tech_stack_id: i64, target_id: i64) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (techstack_id, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            junction.table(),
            junction.target_column()
        );
        sqlx::query(&sql)
            .bind(tech_stack_id)
            .bind(target_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn linked_targets(
        &self,
        junction: Junction,
        tech_stack_ids: &[i64],
        target_id: Option<i64>,
    ) -> StoreResult<Vec<i64>> {
        let column = junction.target_column();
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT DISTINCT {column} FROM {} WHERE techstack_id = ANY(",
            junction.table()
        ));
        qb.push_bind(tech_stack_ids.to_vec()).push(")");
        if let Some(target_id) = target_id {
            qb.push(format!(" AND {column} = ")).push_bind(target_id);
        }
        qb.push(format!(" ORDER BY {column}"));
        let ids = qb
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn linked_stacks(&self, junction: Junction, target_id: i64) -> StoreResult<Vec<TechStack>> {
        let sql = format!(
            r#"
            SELECT t.id, t.user_id, t.name
              FROM tech_stacks t
              JOIN {} j ON j.techstack_id = t.id
             WHERE j.{} = $1
             ORDER BY t.id
            "#,
            junction.table(),
            junction.target_column()
        );
        let stacks = sqlx::query_as::<_, TechStack>(&sql)
            .bind(target_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(stacks)
    }

    async fn delete(&self, table: Table, id: i64) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", table.name());
        let done = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn replace_session(&self, session: &NewSession) -> StoreResult<Session> {
        let sql = format!(
            r#"
            INSERT INTO sessions (user_id, key, expires_on, expired)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (user_id) DO UPDATE
               SET key = EXCLUDED.key,
                   expires_on = EXCLUDED.expires_on,
                   expired = FALSE
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, Session>(&sql)
            .bind(session.user_id)
            .bind(&session.key)
            .bind(session.expires_on)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn session_by_key(&self, key: &str) -> StoreResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE key = $1");
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn expire_session(&self, key: &str) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET expired = TRUE WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sessions_for_user(&self, user_id: i64) -> StoreResult<Vec<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 ORDER BY id");
        let sessions = sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    async fn purge_sessions(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let done = sqlx::query("DELETE FROM sessions WHERE expired OR expires_on <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}
