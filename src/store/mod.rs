//! Entity persistence.
//!
//! [`EntityStore`] is the only entry point the rest of the crate uses. It owns
//! the lookup semantics (owner resolution by username, tech-stack junction
//! merging, empty-filter handling) and delegates raw reads and writes to a
//! [`Backend`].

pub mod backend;
pub mod errors;
pub mod filter;
pub mod memory;
pub mod postgres;
pub mod repo_types;

use std::sync::Arc;

use time::{Date, OffsetDateTime};
use tracing::{debug, instrument};

pub use backend::{Backend, Junction, Page, Table};
pub use errors::{StoreError, StoreResult};
pub use filter::{
    EmploymentFilter, EntityFilter, HobbyFilter, OwnedFilter, Predicate, ProfileFilter,
    ProjectFilter, TechStackFilter, UserFilter,
};
pub use memory::MemoryBackend;
pub use postgres::PgBackend;
pub use repo_types::{
    Employment, Hobby, NewEmployment, NewNamed, NewProfile, NewProject, NewSession, NewUser,
    Profile, Project, Session, Socials, TechStack, User,
};

use filter::merge_by_id;
use repo_types::work_duration_years;

/// Page size for an unfiltered user listing.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Predicates for the two halves of a lookup. `None` means the half does not run.
#[derive(Debug, Default)]
struct Plan {
    direct: Option<Vec<Predicate>>,
    tagged: Option<Vec<Predicate>>,
}

#[derive(Clone)]
pub struct EntityStore {
    backend: Arc<dyn Backend>,
}

impl EntityStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Resolves a username to its id, `NotFound` when no such user exists.
    pub async fn user_id(&self, username: &str) -> StoreResult<i64> {
        self.backend
            .user_id(username)
            .await?
            .ok_or_else(|| StoreError::not_found("user", username))
    }

    async fn resolve_owner(&self, username: Option<&str>) -> StoreResult<Option<i64>> {
        let Some(username) = username else {
            return Ok(None);
        };
        let owner = self.backend.user_id(username).await?;
        if owner.is_none() {
            debug!(username, "unknown username in filter, predicate skipped");
        }
        Ok(owner)
    }

    async fn plan<F: OwnedFilter>(&self, filter: &F, junction: Option<Junction>) -> StoreResult<Plan> {
        if filter.is_empty() {
            return Err(StoreError::EmptyFilter);
        }
        let owner = self.resolve_owner(filter.username()).await?;
        let columns = filter.column_predicates();

        let mut direct = Vec::new();
        if let Some(id) = filter.id() {
            direct.push(Predicate::int("id", id));
        }
        if let Some(owner) = owner {
            direct.push(Predicate::int("user_id", owner));
        }

        let (stack, junction) = match (filter.stack(), junction) {
            (Some(stack), Some(junction)) => (stack, junction),
            _ => {
                direct.extend(columns);
                return Ok(Plan {
                    direct: (!direct.is_empty()).then_some(direct),
                    tagged: None,
                });
            }
        };

        let stack_ids = self.backend.tech_stack_ids(stack).await?;
        if stack_ids.is_empty() {
            return Err(StoreError::not_found("tech stack", stack));
        }
        let targets = self
            .backend
            .linked_targets(junction, &stack_ids, filter.id())
            .await?;
        debug!(stack, tagged = targets.len(), "resolved stack filter");

        let tagged = (!targets.is_empty()).then(|| {
            let mut preds = vec![Predicate::any_of("id", targets)];
            if let Some(owner) = owner {
                preds.push(Predicate::int("user_id", owner));
            }
            preds
        });
        let direct = (!columns.is_empty()).then(|| {
            direct.extend(columns);
            direct
        });
        Ok(Plan { direct, tagged })
    }

    // ---- users ----

    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.backend.insert_user(&user).await
    }

    /// Conjunctive lookup; an empty filter lists the first page by id.
    pub async fn get_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        if filter.is_empty() {
            return self.get_users_page(DEFAULT_PAGE_SIZE, 0).await;
        }
        self.backend.select_users(&filter.predicates(), None).await
    }

    pub async fn get_users_page(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
        self.backend
            .select_users(&[], Some(Page { limit, offset }))
            .await
    }

    pub async fn find_user(&self, filter: &UserFilter) -> StoreResult<Option<User>> {
        if filter.is_empty() {
            return Err(StoreError::EmptyFilter);
        }
        Ok(self.get_users(filter).await?.into_iter().next())
    }

    pub async fn set_user_socials(&self, user_id: i64, socials: &Socials) -> StoreResult<()> {
        self.backend.update_socials(user_id, socials).await
    }

    pub async fn verify_user_email(&self, user_id: i64) -> StoreResult<()> {
        self.backend.mark_email_verified(user_id).await
    }

    pub async fn record_sign_in(&self, user_id: i64, at: OffsetDateTime) -> StoreResult<()> {
        self.backend.record_sign_in(user_id, at).await
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: i64) -> StoreResult<()> {
        self.delete(Table::Users, "user", id).await
    }

    async fn delete(&self, table: Table, entity: &'static str, id: i64) -> StoreResult<()> {
        if self.backend.delete(table, id).await? {
            Ok(())
        } else {
            Err(StoreError::not_found(entity, id))
        }
    }

    // ---- profiles ----

    pub async fn create_profile(&self, profile: NewProfile) -> StoreResult<Profile> {
        self.backend.insert_profile(&profile).await
    }

    pub async fn get_profiles(&self, filter: &ProfileFilter) -> StoreResult<Vec<Profile>> {
        match self.plan(filter, None).await?.direct {
            Some(preds) => self.backend.select_profiles(&preds).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn delete_profile(&self, id: i64) -> StoreResult<()> {
        self.delete(Table::Profiles, "profile", id).await
    }

    // ---- projects ----

    pub async fn create_project(&self, project: NewProject) -> StoreResult<Project> {
        let duration = duration_until(project.start_date, project.end_date);
        self.backend.insert_project(&project, duration).await
    }

    #[instrument(skip(self))]
    pub async fn get_projects(&self, filter: &ProjectFilter) -> StoreResult<Vec<Project>> {
        let plan = self.plan(filter, Some(Junction::Project)).await?;
        let direct = match plan.direct {
            Some(preds) => self.backend.select_projects(&preds).await?,
            None => Vec::new(),
        };
        let tagged = match plan.tagged {
            Some(preds) => self.backend.select_projects(&preds).await?,
            None => Vec::new(),
        };
        Ok(merge_by_id(direct, tagged))
    }

    pub async fn delete_project(&self, id: i64) -> StoreResult<()> {
        self.delete(Table::Projects, "project", id).await
    }

    pub async fn add_tech_stack_to_project(&self, tech_stack_id: i64, project_id: i64) -> StoreResult<()> {
        self.backend
            .link(Junction::Project, tech_stack_id, project_id)
            .await
    }

    pub async fn project_tech_stacks(&self, project_id: i64) -> StoreResult<Vec<TechStack>> {
        self.backend.linked_stacks(Junction::Project, project_id).await
    }

    // ---- employments ----

    pub async fn create_employment(&self, employment: NewEmployment) -> StoreResult<Employment> {
        let duration = duration_until(employment.start_date, employment.end_date);
        self.backend.insert_employment(&employment, duration).await
    }

    #[instrument(skip(self))]
    pub async fn get_employments(&self, filter: &EmploymentFilter) -> StoreResult<Vec<Employment>> {
        let plan = self.plan(filter, Some(Junction::Employment)).await?;
        let direct = match plan.direct {
            Some(preds) => self.backend.select_employments(&preds).await?,
            None => Vec::new(),
        };
        let tagged = match plan.tagged {
            Some(preds) => self.backend.select_employments(&preds).await?,
            None => Vec::new(),
        };
        Ok(merge_by_id(direct, tagged))
    }

    pub async fn delete_employment(&self, id: i64) -> StoreResult<()> {
        self.delete(Table::Employments, "employment", id).await
    }

    pub async fn add_tech_stack_to_employment(
        &self,
        tech_stack_id: i64,
        employment_id: i64,
    ) -> StoreResult<()> {
        self.backend
            .link(Junction::Employment, tech_stack_id, employment_id)
            .await
    }

    pub async fn employment_tech_stacks(&self, employment_id: i64) -> StoreResult<Vec<TechStack>> {
        self.backend
            .linked_stacks(Junction::Employment, employment_id)
            .await
    }

    // ---- hobbies & tech stacks ----

    pub async fn create_hobby(&self, hobby: NewNamed) -> StoreResult<Hobby> {
        self.backend.insert_hobby(&hobby).await
    }

    pub async fn get_hobbies(&self, filter: &HobbyFilter) -> StoreResult<Vec<Hobby>> {
        match self.plan(filter, None).await?.direct {
            Some(preds) => self.backend.select_hobbies(&preds).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn delete_hobby(&self, id: i64) -> StoreResult<()> {
        self.delete(Table::Hobbies, "hobby", id).await
    }

    pub async fn create_tech_stack(&self, stack: NewNamed) -> StoreResult<TechStack> {
        self.backend.insert_tech_stack(&stack).await
    }

    pub async fn get_tech_stacks(&self, filter: &TechStackFilter) -> StoreResult<Vec<TechStack>> {
        match self.plan(filter, None).await?.direct {
            Some(preds) => self.backend.select_tech_stacks(&preds).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn delete_tech_stack(&self, id: i64) -> StoreResult<()> {
        self.delete(Table::TechStacks, "tech stack", id).await
    }

    // ---- sessions ----

    /// Makes `key` the user's only session.
    #[instrument(skip(self, key))]
    pub async fn create_session(
        &self,
        user_id: i64,
        key: String,
        expires_on: OffsetDateTime,
    ) -> StoreResult<Session> {
        self.backend
            .replace_session(&NewSession {
                user_id,
                key,
                expires_on,
            })
            .await
    }

    pub async fn get_session(&self, key: &str) -> StoreResult<Option<Session>> {
        self.backend.session_by_key(key).await
    }

    pub async fn cancel_session(&self, key: &str) -> StoreResult<()> {
        self.backend.expire_session(key).await
    }

    pub async fn user_sessions(&self, user_id: i64) -> StoreResult<Vec<Session>> {
        self.backend.sessions_for_user(user_id).await
    }

    pub async fn purge_expired_sessions(&self, now: OffsetDateTime) -> StoreResult<u64> {
        self.backend.purge_sessions(now).await
    }
}

fn duration_until(start: Date, end: Option<Date>) -> i32 {
    let end = end.unwrap_or_else(|| OffsetDateTime::now_utc().date());
    work_duration_years(start, end)
}
