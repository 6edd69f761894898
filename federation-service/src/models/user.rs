//! Local user model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LocalUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl LocalUser {
    /// Create a new user. Emails are stored lower-cased.
    pub fn new(email: &str, name: Option<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            name,
            created_utc: Utc::now(),
        }
    }
}
