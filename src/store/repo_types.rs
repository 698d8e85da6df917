use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, never exposed in JSON
    pub firstname: String,
    pub lastname: String,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub country: String,
    pub portfolio: Option<String>,
    pub github: Option<String>,
    pub linkedin: Option<String>,
    pub twitter: Option<String>,
    pub start_date: Date,
    pub years_of_work: i32,
    pub email_verified: bool,
    pub created_on: OffsetDateTime,
    pub updated_on: OffsetDateTime,
    pub last_sign_in: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub firstname: String,
    pub lastname: String,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub country: String,
    pub start_date: Date,
    pub years_of_work: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Socials {
    pub portfolio: Option<String>,
    pub github: Option<String>,
    pub linkedin: Option<String>,
    pub twitter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing)]
    pub key: String,
    pub expires_on: OffsetDateTime,
    pub expired: bool,
}

impl Session {
    /// A session is valid strictly before `expires_on`; the boundary instant
    /// already counts as expired.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        !self.expired && now < self.expires_on
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub key: String,
    pub expires_on: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub role: String,
    pub about: String,
    pub views: i32,
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub user_id: i64,
    pub role: String,
    pub about: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub duration: i32,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub status: String,
    pub github: Option<String>,
    pub prod_link: Option<String>,
    pub description: String,
    pub created_on: OffsetDateTime,
    pub updated_on: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub user_id: i64,
    pub name: String,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub status: Option<String>,
    pub github: Option<String>,
    pub prod_link: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Employment {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub employee: String,
    pub duration: i32,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub status: String,
    pub prod_link: Option<String>,
    pub description: String,
    pub created_on: OffsetDateTime,
    pub updated_on: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewEmployment {
    pub user_id: i64,
    pub name: String,
    pub employee: String,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub status: Option<String>,
    pub prod_link: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Hobby {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TechStack {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

/// Owner plus name; shared by hobbies and tech stacks.
#[derive(Debug, Clone)]
pub struct NewNamed {
    pub user_id: i64,
    pub name: String,
}

pub const DEFAULT_PROJECT_STATUS: &str = "COMPLETED";
pub const DEFAULT_EMPLOYMENT_STATUS: &str = "Current";

/// Whole years between `start` and `end`.
pub fn work_duration_years(start: Date, end: Date) -> i32 {
    if end <= start {
        return 0;
    }
    let mut years = end.year() - start.year();
    if (end.month() as u8, end.day()) < (start.month() as u8, start.day()) {
        years -= 1;
    }
    years
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn work_duration_counts_whole_years() {
        assert_eq!(work_duration_years(date!(2019 - 01 - 01), date!(2024 - 01 - 01)), 5);
        assert_eq!(work_duration_years(date!(2019 - 06 - 15), date!(2024 - 06 - 14)), 4);
        assert_eq!(work_duration_years(date!(2019 - 06 - 15), date!(2024 - 06 - 15)), 5);
        assert_eq!(work_duration_years(date!(2024 - 06 - 15), date!(2020 - 01 - 01)), 0);
    }

    #[test]
    fn session_boundary_instant_is_expired() {
        let expires_on = datetime!(2026-01-01 12:00 UTC);
        let session = Session {
            id: 1,
            user_id: 1,
            key: "k".into(),
            expires_on,
            expired: false,
        };
        assert!(session.is_valid_at(expires_on - time::Duration::seconds(1)));
        assert!(!session.is_valid_at(expires_on));
        assert!(!session.is_valid_at(expires_on + time::Duration::seconds(1)));

        let cancelled = Session {
            expired: true,
            ..session
        };
        assert!(!cancelled.is_valid_at(expires_on - time::Duration::days(1)));
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let now = datetime!(2026-01-01 0:00 UTC);
        let user = User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            firstname: "Alice".into(),
            lastname: "Doe".into(),
            bio: None,
            phone: None,
            country: "Uganda".into(),
            portfolio: None,
            github: None,
            linkedin: None,
            twitter: None,
            start_date: date!(2019 - 01 - 01),
            years_of_work: 7,
            email_verified: false,
            created_on: now,
            updated_on: now,
            last_sign_in: None,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("alice@example.com"));
        assert!(!json.contains("argon2id"));
    }
}
