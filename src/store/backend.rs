use async_trait::async_trait;
use time::OffsetDateTime;

use super::errors::StoreResult;
use super::filter::Predicate;
use super::repo_types::{
    Employment, Hobby, NewEmployment, NewNamed, NewProfile, NewProject, NewSession, NewUser,
    Profile, Project, Session, Socials, TechStack, User,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Profiles,
    Projects,
    Employments,
    Hobbies,
    TechStacks,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Profiles => "profiles",
            Table::Projects => "projects",
            Table::Employments => "employments",
            Table::Hobbies => "hobbies",
            Table::TechStacks => "tech_stacks",
        }
    }
}

/// Many-to-many relations between tech stacks and the rows they tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Junction {
    Project,
    Employment,
}

impl Junction {
    pub fn table(self) -> &'static str {
        match self {
            Junction::Project => "project_tech_stacks",
            Junction::Employment => "employment_tech_stacks",
        }
    }

    pub fn target_column(self) -> &'static str {
        match self {
            Junction::Project => "project_id",
            Junction::Employment => "employment_id",
        }
    }

    pub fn target(self) -> Table {
        match self {
            Junction::Project => Table::Projects,
            Junction::Employment => Table::Employments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

/// Storage primitives. Filter semantics (owner resolution, stack merging) live
/// in [`super::EntityStore`]; implementations only evaluate conjunctions of
/// predicates and keep the relational invariants.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn user_id(&self, username: &str) -> StoreResult<Option<i64>>;
    async fn insert_user(&self, user: &NewUser) -> StoreResult<User>;
    async fn select_users(&self, preds: &[Predicate], page: Option<Page>) -> StoreResult<Vec<User>>;
    async fn update_socials(&self, user_id: i64, socials: &Socials) -> StoreResult<()>;
    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()>;
    async fn record_sign_in(&self, user_id: i64, at: OffsetDateTime) -> StoreResult<()>;

    async fn insert_profile(&self, profile: &NewProfile) -> StoreResult<Profile>;
    async fn select_profiles(&self, preds: &[Predicate]) -> StoreResult<Vec<Profile>>;

    async fn insert_project(&self, project: &NewProject, duration: i32) -> StoreResult<Project>;
    async fn select_projects(&self, preds: &[Predicate]) -> StoreResult<Vec<Project>>;

    async fn insert_employment(&self, employment: &NewEmployment, duration: i32) -> StoreResult<Employment>;
    async fn select_employments(&self, preds: &[Predicate]) -> StoreResult<Vec<Employment>>;

    async fn insert_hobby(&self, hobby: &NewNamed) -> StoreResult<Hobby>;
    async fn select_hobbies(&self, preds: &[Predicate]) -> StoreResult<Vec<Hobby>>;

    async fn insert_tech_stack(&self, stack: &NewNamed) -> StoreResult<TechStack>;
    async fn select_tech_stacks(&self, preds: &[Predicate]) -> StoreResult<Vec<TechStack>>;
    async fn tech_stack_ids(&self, name: &str) -> StoreResult<Vec<i64>>;

    async fn link(&self, junction: Junction, tech_stack_id: i64, target_id: i64) -> StoreResult<()>;
    /// Ids of rows tagged with any of `tech_stack_ids`, optionally narrowed to one target.
    async fn linked_targets(
        &self,
        junction: Junction,
        tech_stack_ids: &[i64],
        target_id: Option<i64>,
    ) -> StoreResult<Vec<i64>>;
    async fn linked_stacks(&self, junction: Junction, target_id: i64) -> StoreResult<Vec<TechStack>>;

    /// Deletes by primary key, cascading to dependents. Returns whether a row existed.
    async fn delete(&self, table: Table, id: i64) -> StoreResult<bool>;

    /// Stores `session` as the user's only session, replacing any previous one
    /// in a single atomic step.
    async fn replace_session(&self, session: &NewSession) -> StoreResult<Session>;
    async fn session_by_key(&self, key: &str) -> StoreResult<Option<Session>>;
    async fn expire_session(&self, key: &str) -> StoreResult<()>;
    async fn sessions_for_user(&self, user_id: i64) -> StoreResult<Vec<Session>>;
    /// Deletes sessions that are flagged expired or whose deadline has passed.
    async fn purge_sessions(&self, now: OffsetDateTime) -> StoreResult<u64>;
}
