use serde::{Deserialize, Serialize};

/// Request body for signup.
#[derive(Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub country: String,
    /// `YYYY-MM-DD`, when the user started programming.
    pub start_date: String,
}

/// Request body for login.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}
