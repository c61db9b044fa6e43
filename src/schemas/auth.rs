use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Student,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub user: User,
}

/// Login form. The server reads the email from the OAuth2 `username` field.
#[derive(Debug, Clone, Validate)]
pub struct LoginForm {
    #[validate(email(message = "enter a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "password must not be empty"))]
    pub password: String,
}

impl LoginForm {
    pub(crate) fn as_fields(&self) -> [(&'static str, &str); 2] {
        [("username", self.email.as_str()), ("password", self.password.as_str())]
    }
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "enter a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "full_name must not be empty"))]
    pub full_name: String,
    pub role: UserRole,
    #[validate(length(min = 8, message = "password must be at least 8 characters long"))]
    pub password: String,
}
