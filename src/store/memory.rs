use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::backend::{Backend, Junction, Page, Table};
use super::errors::{StoreError, StoreResult};
use super::filter::{Predicate, Value};
use super::repo_types::{
    Employment, Hobby, NewEmployment, NewNamed, NewProfile, NewProject, NewSession, NewUser,
    Profile, Project, Session, Socials, TechStack, User, DEFAULT_EMPLOYMENT_STATUS,
    DEFAULT_PROJECT_STATUS,
};

/// Row types the in-memory backend can match predicates against.
trait Record: Clone {
    fn field(&self, column: &str) -> Option<Value>;
}

fn text(v: &str) -> Option<Value> {
    Some(Value::Text(v.to_string()))
}

impl Record for User {
    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::Int(self.id)),
            "username" => text(&self.username),
            "email" => text(&self.email),
            "firstname" => text(&self.firstname),
            "lastname" => text(&self.lastname),
            "country" => text(&self.country),
            "email_verified" => Some(Value::Bool(self.email_verified)),
            _ => None,
        }
    }
}

impl Record for Profile {
    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::Int(self.id)),
            "user_id" => Some(Value::Int(self.user_id)),
            "role" => text(&self.role),
            _ => None,
        }
    }
}

impl Record for Project {
    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::Int(self.id)),
            "user_id" => Some(Value::Int(self.user_id)),
            "name" => text(&self.name),
            "status" => text(&self.status),
            _ => None,
        }
    }
}

impl Record for Employment {
    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::Int(self.id)),
            "user_id" => Some(Value::Int(self.user_id)),
            "name" => text(&self.name),
            "employee" => text(&self.employee),
            "status" => text(&self.status),
            _ => None,
        }
    }
}

macro_rules! named_record {
    ($($t:ty),*) => {
        $(impl Record for $t {
            fn field(&self, column: &str) -> Option<Value> {
                match column {
                    "id" => Some(Value::Int(self.id)),
                    "user_id" => Some(Value::Int(self.user_id)),
                    "name" => text(&self.name),
                    _ => None,
                }
            }
        })*
    };
}

named_record!(Hobby, TechStack);

fn select_rows<T: Record>(rows: &BTreeMap<i64, T>, preds: &[Predicate]) -> Vec<T> {
    rows.values()
        .filter(|row| {
            preds
                .iter()
                .all(|p| row.field(p.column).is_some_and(|v| p.matches(&v)))
        })
        .cloned()
        .collect()
}

#[derive(Default)]
struct Tables {
    sequences: HashMap<&'static str, i64>,
    users: BTreeMap<i64, User>,
    sessions: BTreeMap<i64, Session>,
    profiles: BTreeMap<i64, Profile>,
    projects: BTreeMap<i64, Project>,
    employments: BTreeMap<i64, Employment>,
    hobbies: BTreeMap<i64, Hobby>,
    tech_stacks: BTreeMap<i64, TechStack>,
    // (tech stack id, target id)
    project_stacks: BTreeSet<(i64, i64)>,
    employment_stacks: BTreeSet<(i64, i64)>,
}

impl Tables {
    fn next_id(&mut self, table: &'static str) -> i64 {
        let seq = self.sequences.entry(table).or_insert(0);
        *seq += 1;
        *seq
    }

    fn require_user(&self, user_id: i64) -> StoreResult<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(StoreError::not_found("user", user_id))
        }
    }

    fn links(&self, junction: Junction) -> &BTreeSet<(i64, i64)> {
        match junction {
            Junction::Project => &self.project_stacks,
            Junction::Employment => &self.employment_stacks,
        }
    }

    fn links_mut(&mut self, junction: Junction) -> &mut BTreeSet<(i64, i64)> {
        match junction {
            Junction::Project => &mut self.project_stacks,
            Junction::Employment => &mut self.employment_stacks,
        }
    }

    fn target_exists(&self, junction: Junction, id: i64) -> bool {
        match junction {
            Junction::Project => self.projects.contains_key(&id),
            Junction::Employment => self.employments.contains_key(&id),
        }
    }

    fn delete_project(&mut self, id: i64) -> bool {
        self.project_stacks.retain(|&(_, target)| target != id);
        self.projects.remove(&id).is_some()
    }

    fn delete_employment(&mut self, id: i64) -> bool {
        self.employment_stacks.retain(|&(_, target)| target != id);
        self.employments.remove(&id).is_some()
    }

    fn delete_tech_stack(&mut self, id: i64) -> bool {
        self.project_stacks.retain(|&(stack, _)| stack != id);
        self.employment_stacks.retain(|&(stack, _)| stack != id);
        self.tech_stacks.remove(&id).is_some()
    }

    fn delete_user(&mut self, id: i64) -> bool {
        let projects: Vec<i64> = self
            .projects
            .values()
            .filter(|r| r.user_id == id)
            .map(|r| r.id)
            .collect();
        let employments: Vec<i64> = self
            .employments
            .values()
            .filter(|r| r.user_id == id)
            .map(|r| r.id)
            .collect();
        let stacks: Vec<i64> = self
            .tech_stacks
            .values()
            .filter(|r| r.user_id == id)
            .map(|r| r.id)
            .collect();
        for project in projects {
            self.delete_project(project);
        }
        for employment in employments {
            self.delete_employment(employment);
        }
        for stack in stacks {
            self.delete_tech_stack(stack);
        }
        self.sessions.retain(|_, s| s.user_id != id);
        self.profiles.retain(|_, p| p.user_id != id);
        self.hobbies.retain(|_, h| h.user_id != id);
        self.users.remove(&id).is_some()
    }
}

/// Process-local storage with the same relational rules as the PostgreSQL
/// schema: unique usernames, emails and session keys, one session per user,
/// owner references checked on insert and cascaded on delete.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn user_id(&self, username: &str) -> StoreResult<Option<i64>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .map(|u| u.id))
    }

    async fn insert_user(&self, user: &NewUser) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict("username already taken".into()));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already taken".into()));
        }
        let now = OffsetDateTime::now_utc();
        let id = tables.next_id("users");
        let created = User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            firstname: user.firstname.clone(),
            lastname: user.lastname.clone(),
            bio: user.bio.clone(),
            phone: user.phone.clone(),
            country: user.country.clone(),
            portfolio: None,
            github: None,
            linkedin: None,
            twitter: None,
            start_date: user.start_date,
            years_of_work: user.years_of_work,
            email_verified: false,
            created_on: now,
            updated_on: now,
            last_sign_in: None,
        };
        tables.users.insert(id, created.clone());
        Ok(created)
    }

    async fn select_users(&self, preds: &[Predicate], page: Option<Page>) -> StoreResult<Vec<User>> {
        let tables = self.tables.lock().await;
        let rows = select_rows(&tables.users, preds);
        Ok(match page {
            Some(page) => rows
                .into_iter()
                .skip(page.offset.max(0) as usize)
                .take(page.limit.max(0) as usize)
                .collect(),
            None => rows,
        })
    }

    async fn update_socials(&self, user_id: i64, socials: &Socials) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        user.portfolio = socials.portfolio.clone();
        user.github = socials.github.clone();
        user.linkedin = socials.linkedin.clone();
        user.twitter = socials.twitter.clone();
        user.updated_on = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        user.email_verified = true;
        user.updated_on = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn record_sign_in(&self, user_id: i64, at: OffsetDateTime) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.last_sign_in = Some(at);
        }
        Ok(())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> StoreResult<Profile> {
        let mut tables = self.tables.lock().await;
        tables.require_user(profile.user_id)?;
        let id = tables.next_id("profiles");
        let created = Profile {
            id,
            user_id: profile.user_id,
            role: profile.role.clone(),
            about: profile.about.clone(),
            views: 0,
        };
        tables.profiles.insert(id, created.clone());
        Ok(created)
    }

    async fn select_profiles(&self, preds: &[Predicate]) -> StoreResult<Vec<Profile>> {
        let tables = self.tables.lock().await;
        Ok(select_rows(&tables.profiles, preds))
    }

    async fn insert_project(&self, project: &NewProject, duration: i32) -> StoreResult<Project> {
        let mut tables = self.tables.lock().await;
        tables.require_user(project.user_id)?;
        let now = OffsetDateTime::now_utc();
        let id = tables.next_id("projects");
        let created = Project {
            id,
            user_id: project.user_id,
            name: project.name.clone(),
            duration,
            start_date: project.start_date,
            end_date: project.end_date,
            status: project
                .status
                .clone()
                .unwrap_or_else(|| DEFAULT_PROJECT_STATUS.to_string()),
            github: project.github.clone(),
            prod_link: project.prod_link.clone(),
            description: project.description.clone(),
            created_on: now,
            updated_on: now,
        };
        tables.projects.insert(id, created.clone());
        Ok(created)
    }

    async fn select_projects(&self, preds: &[Predicate]) -> StoreResult<Vec<Project>> {
        let tables = self.tables.lock().await;
        Ok(select_rows(&tables.projects, preds))
    }

    async fn insert_employment(
        &self,
        employment: &NewEmployment,
        duration: i32,
    ) -> StoreResult<Employment> {
        let mut tables = self.tables.lock().await;
        tables.require_user(employment.user_id)?;
        let now = OffsetDateTime::now_utc();
        let id = tables.next_id("employments");
        let created = Employment {
            id,
            user_id: employment.user_id,
            name: employment.name.clone(),
            employee: employment.employee.clone(),
            duration,
            start_date: employment.start_date,
            end_date: employment.end_date,
            status: employment
                .status
                .clone()
                .unwrap_or_else(|| DEFAULT_EMPLOYMENT_STATUS.to_string()),
            prod_link: employment.prod_link.clone(),
            description: employment.description.clone(),
            created_on: now,
            updated_on: now,
        };
        tables.employments.insert(id, created.clone());
        Ok(created)
    }

    async fn select_employments(&self, preds: &[Predicate]) -> StoreResult<Vec<Employment>> {
        let tables = self.tables.lock().await;
        Ok(select_rows(&tables.employments, preds))
    }

    async fn insert_hobby(&self, hobby: &NewNamed) -> StoreResult<Hobby> {
        let mut tables = self.tables.lock().await;
        tables.require_user(hobby.user_id)?;
        let id = tables.next_id("hobbies");
        let created = Hobby {
            id,
            user_id: hobby.user_id,
            name: hobby.name.clone(),
        };
        tables.hobbies.insert(id, created.clone());
        Ok(created)
    }

    async fn select_hobbies(&self, preds: &[Predicate]) -> StoreResult<Vec<Hobby>> {
        let tables = self.tables.lock().await;
        Ok(select_rows(&tables.hobbies, preds))
    }

    async fn insert_tech_stack(&self, stack: &NewNamed) -> StoreResult<TechStack> {
        let mut tables = self.tables.lock().await;
        tables.require_user(stack.user_id)?;
        let id = tables.next_id("tech_stacks");
        let created = TechStack {
            id,
            user_id: stack.user_id,
            name: stack.name.clone(),
        };
        tables.tech_stacks.insert(id, created.clone());
        Ok(created)
    }

    async fn select_tech_stacks(&self, preds: &[Predicate]) -> StoreResult<Vec<TechStack>> {
        let tables = self.tables.lock().await;
        Ok(select_rows(&tables.tech_stacks, preds))
    }

    async fn tech_stack_ids(&self, name: &str) -> StoreResult<Vec<i64>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tech_stacks
            .values()
            .filter(|t| t.name == name)
            .map(|t| t.id)
            .collect())
    }

    async fn link(&self, junction: Junction, tech_stack_id: i64, target_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.tech_stacks.contains_key(&tech_stack_id) {
            return Err(StoreError::not_found("tech stack", tech_stack_id));
        }
        if !tables.target_exists(junction, target_id) {
            return Err(StoreError::not_found(junction.target().name(), target_id));
        }
        tables.links_mut(junction).insert((tech_stack_id, target_id));
        Ok(())
    }

    async fn linked_targets(
        &self,
        junction: Junction,
        tech_stack_ids: &[i64],
        target_id: Option<i64>,
    ) -> StoreResult<Vec<i64>> {
        let tables = self.tables.lock().await;
        let targets: BTreeSet<i64> = tables
            .links(junction)
            .iter()
            .filter(|(stack, target)| {
                tech_stack_ids.contains(stack) && target_id.map_or(true, |t| t == *target)
            })
            .map(|&(_, target)| target)
            .collect();
        Ok(targets.into_iter().collect())
    }

    async fn linked_stacks(&self, junction: Junction, target_id: i64) -> StoreResult<Vec<TechStack>> {
        let tables = self.tables.lock().await;
        let ids: BTreeSet<i64> = tables
            .links(junction)
            .iter()
            .filter(|&&(_, target)| target == target_id)
            .map(|&(stack, _)| stack)
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| tables.tech_stacks.get(id).cloned())
            .collect())
    }

    async fn delete(&self, table: Table, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(match table {
            Table::Users => tables.delete_user(id),
            Table::Profiles => tables.profiles.remove(&id).is_some(),
            Table::Projects => tables.delete_project(id),
            Table::Employments => tables.delete_employment(id),
            Table::Hobbies => tables.hobbies.remove(&id).is_some(),
            Table::TechStacks => tables.delete_tech_stack(id),
        })
    }

    async fn replace_session(&self, session: &NewSession) -> StoreResult<Session> {
        let mut tables = self.tables.lock().await;
        tables.require_user(session.user_id)?;
        if tables
            .sessions
            .values()
            .any(|s| s.key == session.key && s.user_id != session.user_id)
        {
            return Err(StoreError::Conflict("session key already taken".into()));
        }
        let existing = tables
            .sessions
            .values()
            .find(|s| s.user_id == session.user_id)
            .map(|s| s.id);
        let id = match existing {
            Some(id) => id,
            None => tables.next_id("sessions"),
        };
        let stored = Session {
            id,
            user_id: session.user_id,
            key: session.key.clone(),
            expires_on: session.expires_on,
            expired: false,
        };
        tables.sessions.insert(id, stored.clone());
        Ok(stored)
    }

    async fn session_by_key(&self, key: &str) -> StoreResult<Option<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables.sessions.values().find(|s| s.key == key).cloned())
    }

    async fn expire_session(&self, key: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(session) = tables.sessions.values_mut().find(|s| s.key == key) {
            session.expired = true;
        }
        Ok(())
    }

    async fn sessions_for_user(&self, user_id: i64) -> StoreResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn purge_sessions(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.is_valid_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            password_hash: "hash".into(),
            firstname: "First".into(),
            lastname: "Last".into(),
            bio: None,
            phone: None,
            country: "Kenya".into(),
            start_date: date!(2020 - 01 - 01),
            years_of_work: 6,
        }
    }

    fn new_project(user_id: i64, name: &str) -> NewProject {
        NewProject {
            user_id,
            name: name.into(),
            start_date: date!(2023 - 01 - 01),
            end_date: None,
            status: None,
            github: None,
            prod_link: None,
            description: "d".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_username_or_email_conflicts() {
        let backend = MemoryBackend::new();
        backend.insert_user(&new_user("alice")).await.unwrap();

        let err = backend.insert_user(&new_user("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let mut other = new_user("bob");
        other.email = "alice@example.com".into();
        let err = backend.insert_user(&other).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn insert_requires_existing_owner() {
        let backend = MemoryBackend::new();
        let err = backend
            .insert_hobby(&NewNamed { user_id: 99, name: "chess".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "user", .. }));
    }

    #[tokio::test]
    async fn project_defaults_status() {
        let backend = MemoryBackend::new();
        let user = backend.insert_user(&new_user("alice")).await.unwrap();
        let project = backend.insert_project(&new_project(user.id, "P1"), 0).await.unwrap();
        assert_eq!(project.status, DEFAULT_PROJECT_STATUS);
    }

    #[tokio::test]
    async fn link_requires_both_ends() {
        let backend = MemoryBackend::new();
        let user = backend.insert_user(&new_user("alice")).await.unwrap();
        let stack = backend
            .insert_tech_stack(&NewNamed { user_id: user.id, name: "Go".into() })
            .await
            .unwrap();

        let err = backend.link(Junction::Project, stack.id, 42).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "projects", .. }));

        let project = backend.insert_project(&new_project(user.id, "P1"), 0).await.unwrap();
        let err = backend.link(Junction::Project, 42, project.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "tech stack", .. }));

        backend.link(Junction::Project, stack.id, project.id).await.unwrap();
        // relinking is a no-op
        backend.link(Junction::Project, stack.id, project.id).await.unwrap();
        assert_eq!(
            backend.linked_targets(Junction::Project, &[stack.id], None).await.unwrap(),
            vec![project.id]
        );
    }

    #[tokio::test]
    async fn deleting_user_cascades() {
        let backend = MemoryBackend::new();
        let alice = backend.insert_user(&new_user("alice")).await.unwrap();
        let bob = backend.insert_user(&new_user("bob")).await.unwrap();
        let project = backend.insert_project(&new_project(alice.id, "P1"), 0).await.unwrap();
        let bobs_stack = backend
            .insert_tech_stack(&NewNamed { user_id: bob.id, name: "Go".into() })
            .await
            .unwrap();
        backend.link(Junction::Project, bobs_stack.id, project.id).await.unwrap();
        backend
            .replace_session(&NewSession {
                user_id: alice.id,
                key: "k".into(),
                expires_on: OffsetDateTime::now_utc() + time::Duration::hours(1),
            })
            .await
            .unwrap();

        assert!(backend.delete(Table::Users, alice.id).await.unwrap());
        assert!(!backend.delete(Table::Users, alice.id).await.unwrap());

        assert!(backend.select_projects(&[]).await.unwrap().is_empty());
        assert!(backend.session_by_key("k").await.unwrap().is_none());
        assert!(backend
            .linked_targets(Junction::Project, &[bobs_stack.id], None)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(backend.select_tech_stacks(&[]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_session_keeps_one_row() {
        let backend = MemoryBackend::new();
        let user = backend.insert_user(&new_user("alice")).await.unwrap();
        let expires_on = OffsetDateTime::now_utc() + time::Duration::hours(1);

        let first = backend
            .replace_session(&NewSession { user_id: user.id, key: "a".into(), expires_on })
            .await
            .unwrap();
        backend.expire_session("a").await.unwrap();
        let second = backend
            .replace_session(&NewSession { user_id: user.id, key: "b".into(), expires_on })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(!second.expired);
        assert_eq!(backend.sessions_for_user(user.id).await.unwrap(), vec![second]);
        assert!(backend.session_by_key("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_invalid_sessions() {
        let backend = MemoryBackend::new();
        let alice = backend.insert_user(&new_user("alice")).await.unwrap();
        let bob = backend.insert_user(&new_user("bob")).await.unwrap();
        let carol = backend.insert_user(&new_user("carol")).await.unwrap();
        let now = OffsetDateTime::now_utc();

        for (user, key, expires_on) in [
            (alice.id, "live", now + time::Duration::hours(1)),
            (bob.id, "stale", now - time::Duration::seconds(1)),
            (carol.id, "cancelled", now + time::Duration::hours(1)),
        ] {
            backend
                .replace_session(&NewSession { user_id: user, key: key.into(), expires_on })
                .await
                .unwrap();
        }
        backend.expire_session("cancelled").await.unwrap();

        assert_eq!(backend.purge_sessions(now).await.unwrap(), 2);
        assert!(backend.session_by_key("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn select_users_pages_in_id_order() {
        let backend = MemoryBackend::new();
        for name in ["a", "b", "c"] {
            backend.insert_user(&new_user(name)).await.unwrap();
        }
        let page = backend
            .select_users(&[], Some(Page { limit: 2, offset: 1 }))
            .await
            .unwrap();
        let names: Vec<_> = page.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
    }
}
