use serde::{Deserialize, Serialize};
use time::Date;

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub role: String,
    #[serde(default)]
    pub about: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub status: Option<String>, // defaults to COMPLETED
    pub github: Option<String>,
    pub prod_link: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEmploymentRequest {
    pub name: String,
    pub employee: String,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub status: Option<String>, // defaults to Current
    pub prod_link: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Body for hobbies and tech stacks.
#[derive(Debug, Deserialize)]
pub struct CreateNamedRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AttachStackRequest {
    pub tech_stack_id: i64,
}

#[derive(Debug, Serialize)]
pub struct Attached {
    pub tech_stack_id: i64,
    pub target_id: i64,
}
