//! Typed search filters.
//!
//! Each entity kind has a struct of optional attributes. Set attributes are
//! combined with AND; every one becomes an equality [`Predicate`] against a
//! fixed column name, so values only ever reach the database as bound
//! parameters. `from_params` adapts the string map used at the HTTP boundary.

use std::collections::{HashMap, HashSet};

use super::errors::{StoreError, StoreResult};
use super::repo_types::{Employment, Hobby, Profile, Project, TechStack, User};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
    /// Internal only: membership in a resolved id set.
    AnyOf(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: &'static str,
    pub value: Value,
}

impl Predicate {
    pub fn int(column: &'static str, v: i64) -> Self {
        Self { column, value: Value::Int(v) }
    }

    pub fn text(column: &'static str, v: &str) -> Self {
        Self { column, value: Value::Text(v.to_string()) }
    }

    pub fn bool(column: &'static str, v: bool) -> Self {
        Self { column, value: Value::Bool(v) }
    }

    pub fn any_of(column: &'static str, ids: Vec<i64>) -> Self {
        Self { column, value: Value::AnyOf(ids) }
    }

    /// Evaluates the predicate against a row's field value.
    pub fn matches(&self, field: &Value) -> bool {
        match (&self.value, field) {
            (Value::AnyOf(ids), Value::Int(v)) => ids.contains(v),
            (expected, actual) => expected == actual,
        }
    }
}

pub trait EntityFilter: Default + Sized {
    const ENTITY: &'static str;

    fn set(&mut self, attribute: &str, raw: &str) -> StoreResult<()>;

    fn is_empty(&self) -> bool;

    fn from_params(params: &HashMap<String, String>) -> StoreResult<Self> {
        let mut filter = Self::default();
        for (attribute, raw) in params {
            filter.set(attribute, raw)?;
        }
        Ok(filter)
    }
}

/// Filters over rows owned by a user. `username` is resolved to the owner id
/// by the store; `stack` is only meaningful for projects and employments.
pub trait OwnedFilter: EntityFilter {
    fn id(&self) -> Option<i64>;
    fn username(&self) -> Option<&str>;
    /// Predicates on the entity's own columns, excluding `id` and the owner.
    fn column_predicates(&self) -> Vec<Predicate>;
    fn stack(&self) -> Option<&str> {
        None
    }
}

fn parse_id(attribute: &str, raw: &str) -> StoreResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| StoreError::invalid(attribute, "expected an integer"))
}

fn parse_bool(attribute: &str, raw: &str) -> StoreResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(StoreError::invalid(attribute, "expected a boolean")),
    }
}

fn unknown(entity: &str, attribute: &str) -> StoreError {
    StoreError::invalid(attribute, format!("not a searchable {entity} attribute"))
}

fn push_text(preds: &mut Vec<Predicate>, column: &'static str, v: &Option<String>) {
    if let Some(v) = v {
        preds.push(Predicate::text(column, v));
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub country: Option<String>,
    pub email_verified: Option<bool>,
}

impl UserFilter {
    pub fn by_username(username: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            ..Self::default()
        }
    }

    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn predicates(&self) -> Vec<Predicate> {
        let mut preds = Vec::new();
        if let Some(id) = self.id {
            preds.push(Predicate::int("id", id));
        }
        push_text(&mut preds, "username", &self.username);
        push_text(&mut preds, "email", &self.email);
        push_text(&mut preds, "firstname", &self.firstname);
        push_text(&mut preds, "lastname", &self.lastname);
        push_text(&mut preds, "country", &self.country);
        if let Some(v) = self.email_verified {
            preds.push(Predicate::bool("email_verified", v));
        }
        preds
    }
}

impl EntityFilter for UserFilter {
    const ENTITY: &'static str = "user";

    fn set(&mut self, attribute: &str, raw: &str) -> StoreResult<()> {
        match attribute {
            "id" => self.id = Some(parse_id(attribute, raw)?),
            "username" => self.username = Some(raw.to_string()),
            "email" => self.email = Some(raw.trim().to_lowercase()),
            "firstname" => self.firstname = Some(raw.to_string()),
            "lastname" => self.lastname = Some(raw.to_string()),
            "country" => self.country = Some(raw.to_string()),
            "email_verified" => self.email_verified = Some(parse_bool(attribute, raw)?),
            _ => return Err(unknown(Self::ENTITY, attribute)),
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.predicates().is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfileFilter {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub role: Option<String>,
}

impl EntityFilter for ProfileFilter {
    const ENTITY: &'static str = "profile";

    fn set(&mut self, attribute: &str, raw: &str) -> StoreResult<()> {
        match attribute {
            "id" => self.id = Some(parse_id(attribute, raw)?),
            "username" => self.username = Some(raw.to_string()),
            "role" => self.role = Some(raw.to_string()),
            _ => return Err(unknown(Self::ENTITY, attribute)),
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.id.is_none() && self.username.is_none() && self.role.is_none()
    }
}

impl OwnedFilter for ProfileFilter {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn column_predicates(&self) -> Vec<Predicate> {
        let mut preds = Vec::new();
        push_text(&mut preds, "role", &self.role);
        preds
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub stack: Option<String>,
}

impl EntityFilter for ProjectFilter {
    const ENTITY: &'static str = "project";

    fn set(&mut self, attribute: &str, raw: &str) -> StoreResult<()> {
        match attribute {
            "id" => self.id = Some(parse_id(attribute, raw)?),
            "username" => self.username = Some(raw.to_string()),
            "name" => self.name = Some(raw.to_string()),
            "status" => self.status = Some(raw.to_string()),
            "stack" => self.stack = Some(raw.to_string()),
            _ => return Err(unknown(Self::ENTITY, attribute)),
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.username.is_none()
            && self.name.is_none()
            && self.status.is_none()
            && self.stack.is_none()
    }
}

impl OwnedFilter for ProjectFilter {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn column_predicates(&self) -> Vec<Predicate> {
        let mut preds = Vec::new();
        push_text(&mut preds, "name", &self.name);
        push_text(&mut preds, "status", &self.status);
        preds
    }

    fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmploymentFilter {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub employee: Option<String>,
    pub status: Option<String>,
    pub stack: Option<String>,
}

impl EntityFilter for EmploymentFilter {
    const ENTITY: &'static str = "employment";

    fn set(&mut self, attribute: &str, raw: &str) -> StoreResult<()> {
        match attribute {
            "id" => self.id = Some(parse_id(attribute, raw)?),
            "username" => self.username = Some(raw.to_string()),
            "name" => self.name = Some(raw.to_string()),
            "employee" => self.employee = Some(raw.to_string()),
            "status" => self.status = Some(raw.to_string()),
            "stack" => self.stack = Some(raw.to_string()),
            _ => return Err(unknown(Self::ENTITY, attribute)),
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.username.is_none()
            && self.name.is_none()
            && self.employee.is_none()
            && self.status.is_none()
            && self.stack.is_none()
    }
}

impl OwnedFilter for EmploymentFilter {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn column_predicates(&self) -> Vec<Predicate> {
        let mut preds = Vec::new();
        push_text(&mut preds, "name", &self.name);
        push_text(&mut preds, "employee", &self.employee);
        push_text(&mut preds, "status", &self.status);
        preds
    }

    fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

/// Hobbies and tech stacks share the same searchable shape.
#[derive(Debug, Clone, Default)]
pub struct NamedFilter<const KIND: u8> {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub name: Option<String>,
}

pub type HobbyFilter = NamedFilter<0>;
pub type TechStackFilter = NamedFilter<1>;

impl<const KIND: u8> EntityFilter for NamedFilter<KIND> {
    const ENTITY: &'static str = if KIND == 0 { "hobby" } else { "tech stack" };

    fn set(&mut self, attribute: &str, raw: &str) -> StoreResult<()> {
        match attribute {
            "id" => self.id = Some(parse_id(attribute, raw)?),
            "username" => self.username = Some(raw.to_string()),
            "name" => self.name = Some(raw.to_string()),
            _ => return Err(unknown(Self::ENTITY, attribute)),
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.id.is_none() && self.username.is_none() && self.name.is_none()
    }
}

impl<const KIND: u8> OwnedFilter for NamedFilter<KIND> {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn column_predicates(&self) -> Vec<Predicate> {
        let mut preds = Vec::new();
        push_text(&mut preds, "name", &self.name);
        preds
    }
}

pub trait Identified {
    fn id(&self) -> i64;
}

macro_rules! identified {
    ($($t:ty),*) => {
        $(impl Identified for $t {
            fn id(&self) -> i64 {
                self.id
            }
        })*
    };
}

identified!(User, Profile, Project, Employment, Hobby, TechStack);

/// Appends rows from `extra` whose id is not already present. Rows already in
/// `primary` win.
pub fn merge_by_id<T: Identified>(mut primary: Vec<T>, extra: Vec<T>) -> Vec<T> {
    let mut seen: HashSet<i64> = primary.iter().map(Identified::id).collect();
    for row in extra {
        if seen.insert(row.id()) {
            primary.push(row);
        }
    }
    primary
}
