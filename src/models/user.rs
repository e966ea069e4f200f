//! User model
//!
//! Users carry one of three roles. The role decides which courses and
//! sessions a user may manage or attend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Username (unique, 3-50 chars)
    pub username: String,
    /// Email address (unique)
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// User role
    pub role: UserRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Inactive users cannot log in
    pub is_active: bool,
    pub is_verified: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: Option<DateTime<Utc>>,
    /// Last successful login
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new User with the given parameters.
    ///
    /// Note: The password should already be hashed before calling this function.
    /// Use `services::password::hash_password()` to hash the password.
    pub fn new(username: String, email: String, password_hash: String, role: UserRole) -> Self {
        Self {
            id: 0, // Will be set by the database
            username,
            email,
            password_hash,
            role,
            first_name: None,
            last_name: None,
            avatar_url: None,
            is_active: true,
            is_verified: false,
            created_at: Utc::now(),
            updated_at: None,
            last_login: None,
        }
    }

    /// First and last name joined, falling back to the username
    pub fn full_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.to_string(),
            (None, Some(last)) => last.to_string(),
            (None, None) => self.username.clone(),
        }
    }

    /// Check if the user is an administrator
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Check if the user may author courses and sessions
    pub fn is_instructor_or_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::Instructor)
    }

    /// Check if the user is a student
    pub fn is_student(&self) -> bool {
        self.role == UserRole::Student
    }
}

/// User role for authorization.
///
/// - Admin: full access
/// - Instructor: manages own courses and sessions
/// - Student: attends sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Instructor,
    #[default]
    Student,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Instructor => write!(f, "instructor"),
            UserRole::Student => write!(f, "student"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "instructor" => Ok(UserRole::Instructor),
            "student" => Ok(UserRole::Student),
            _ => Err(anyhow::anyhow!("Invalid user role: {}", s)),
        }
    }
}

/// Input for creating a new user (before password hashing)
#[derive(Debug, Clone, Default)]
pub struct CreateUserInput {
    pub username: String,
    pub email: String,
    /// Plaintext password (will be hashed)
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Requested role; `None` means student
    pub role: Option<UserRole>,
}

/// Input for updating a user
#[derive(Debug, Clone, Default)]
pub struct UpdateUserInput {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
}

/// Filters for listing users
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    /// Restrict to students plus this user id (instructor view)
    pub students_and_self: Option<i64>,
}

/// Aggregate counts over all users
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub total_users: i64,
    pub total_students: i64,
    pub total_instructors: i64,
    pub total_admins: i64,
    pub active_users: i64,
    pub verified_users: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole) -> User {
        User::new("someone".to_string(), "someone@test.com".to_string(), "hash".to_string(), role)
    }

    #[test]
    fn test_user_new() {
        let user = user(UserRole::Student);

        assert_eq!(user.id, 0);
        assert_eq!(user.username, "someone");
        assert!(user.is_active);
        assert!(!user.is_verified);
        assert!(user.last_login.is_none());
    }

    #[test]
    fn test_role_helpers() {
        assert!(user(UserRole::Admin).is_admin());
        assert!(user(UserRole::Admin).is_instructor_or_admin());
        assert!(user(UserRole::Instructor).is_instructor_or_admin());
        assert!(!user(UserRole::Instructor).is_admin());
        assert!(!user(UserRole::Student).is_instructor_or_admin());
        assert!(user(UserRole::Student).is_student());
    }

    #[test]
    fn test_full_name() {
        let mut u = user(UserRole::Student);
        assert_eq!(u.full_name(), "someone");

        u.first_name = Some("Ada".to_string());
        assert_eq!(u.full_name(), "Ada");

        u.last_name = Some("Lovelace".to_string());
        assert_eq!(u.full_name(), "Ada Lovelace");
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(user(UserRole::Student)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "student");
    }

    #[test]
    fn test_user_role_from_str() {
        assert_eq!(UserRole::from_str("admin").unwrap(), UserRole::Admin);
        assert_eq!(UserRole::from_str("INSTRUCTOR").unwrap(), UserRole::Instructor);
        assert_eq!(UserRole::from_str("Student").unwrap(), UserRole::Student);
        assert!(UserRole::from_str("author").is_err());
    }

    #[test]
    fn test_user_role_default() {
        assert_eq!(UserRole::default(), UserRole::Student);
    }
}
