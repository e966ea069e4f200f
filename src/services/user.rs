//! User service
//!
//! Registration, login and account administration:
//! - the very first account becomes admin
//! - later self-registrations pick student or instructor, never admin
//! - login accepts a username or an email address
//! - tokens are delegated to [`TokenService`]

use crate::db::repositories::UserRepository;
use crate::models::{
    CreateUserInput, ListParams, PagedResult, UpdateUserInput, User, UserFilter, UserRole,
    UserStats,
};
use crate::services::password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
use crate::services::token::TokenService;
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Bad credentials or an unusable token
    #[error("{0}")]
    AuthenticationError(String),

    #[error("{0}")]
    ValidationError(String),

    /// Username or email already taken
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Inactive user")]
    InactiveUser,

    #[error("User not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Successful login or refresh
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub access_token: String,
    pub token_type: &'static str,
    /// Seconds until the token expires
    pub expires_in: i64,
    pub user: User,
}

/// Input for self-registration
#[derive(Debug, Clone, Default)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<UserRole>,
}

impl RegisterInput {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// Input for login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

/// User service for accounts and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    tokens: TokenService,
}

impl UserService {
    pub fn new(user_repo: Arc<dyn UserRepository>, tokens: TokenService) -> Self {
        Self { user_repo, tokens }
    }

    /// Register a new account.
    ///
    /// The first account in an empty database is always admin, whatever
    /// role was asked for.
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        validate_username(&input.username)?;
        validate_email(&input.email)?;
        validate_password(&input.password)?;
        validate_name(input.first_name.as_deref())?;
        validate_name(input.last_name.as_deref())?;

        self.ensure_unique(&input.username, &input.email).await?;

        let role = if self.is_first_user().await? {
            UserRole::Admin
        } else {
            match input.role.unwrap_or_default() {
                UserRole::Admin => {
                    return Err(UserServiceError::Forbidden(
                        "Cannot self-register as admin".to_string(),
                    ))
                }
                role => role,
            }
        };

        let mut user = User::new(
            input.username,
            input.email,
            hash_password(&input.password)?,
            role,
        );
        user.first_name = input.first_name;
        user.last_name = input.last_name;

        let created = self
            .user_repo
            .create(&user)
            .await
            .context("Failed to create user")?;

        tracing::info!(user_id = created.id, role = %created.role, "User registered");
        Ok(created)
    }

    /// Verify credentials and issue a token
    pub async fn login(&self, input: LoginInput) -> Result<LoginOutcome, UserServiceError> {
        let invalid = || UserServiceError::AuthenticationError("Incorrect username or password".to_string());

        let mut user = self
            .find_by_username_or_email(&input.username_or_email)
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&input.password, &user.password_hash)? {
            return Err(invalid());
        }
        if !user.is_active {
            return Err(UserServiceError::InactiveUser);
        }

        user.last_login = Some(Utc::now());
        let user = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to record login")?;

        self.issue_for(user).await
    }

    /// Swap a live token for a new one
    pub async fn refresh(&self, token: &str, user: User) -> Result<LoginOutcome, UserServiceError> {
        self.tokens.revoke(token).await?;
        self.issue_for(user).await
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.tokens.revoke(token).await?;
        Ok(())
    }

    /// Resolve a token to an active user.
    ///
    /// Unknown, expired and inactive-owner tokens all yield `None`.
    pub async fn validate_token(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let Some(user_id) = self.tokens.resolve(token).await? else {
            return Ok(None);
        };

        let user = self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to load token owner")?;
        Ok(user.filter(|u| u.is_active))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self.user_repo.get_by_id(id).await.context("Failed to get user")?)
    }

    /// Whether no account exists yet
    pub async fn is_first_user(&self) -> Result<bool, UserServiceError> {
        let count = self.user_repo.count().await.context("Failed to count users")?;
        Ok(count == 0)
    }

    /// List users visible to `actor`. Instructors only see students and themselves.
    pub async fn list(
        &self,
        actor: &User,
        role: Option<UserRole>,
        is_active: Option<bool>,
        params: &ListParams,
    ) -> Result<PagedResult<User>, UserServiceError> {
        if !actor.is_instructor_or_admin() {
            return Err(UserServiceError::Forbidden("Not enough permissions".to_string()));
        }

        let filter = UserFilter {
            role,
            is_active,
            students_and_self: (!actor.is_admin()).then_some(actor.id),
        };
        let (items, total) = self
            .user_repo
            .list(&filter, params)
            .await
            .context("Failed to list users")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Fetch a user as seen by `actor`
    pub async fn get_visible(&self, actor: &User, id: i64) -> Result<User, UserServiceError> {
        let user = self.get_by_id(id).await?.ok_or(UserServiceError::NotFound)?;

        let allowed = match actor.role {
            UserRole::Admin => true,
            UserRole::Instructor => user.is_student() || user.id == actor.id,
            UserRole::Student => user.id == actor.id,
        };
        if !allowed {
            return Err(UserServiceError::Forbidden("Not enough permissions".to_string()));
        }
        Ok(user)
    }

    /// Admin account creation; any role, pre-verified
    pub async fn create_user(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        validate_username(&input.username)?;
        validate_email(&input.email)?;
        validate_password(&input.password)?;
        validate_name(input.first_name.as_deref())?;
        validate_name(input.last_name.as_deref())?;

        self.ensure_unique(&input.username, &input.email).await?;

        let mut user = User::new(
            input.username,
            input.email,
            hash_password(&input.password)?,
            input.role.unwrap_or_default(),
        );
        user.first_name = input.first_name;
        user.last_name = input.last_name;
        user.is_verified = true;

        Ok(self.user_repo.create(&user).await.context("Failed to create user")?)
    }

    /// Admin update of any account field
    pub async fn update_user(&self, id: i64, input: UpdateUserInput) -> Result<User, UserServiceError> {
        let mut user = self.get_by_id(id).await?.ok_or(UserServiceError::NotFound)?;

        self.apply_profile(&mut user, &input).await?;
        if let Some(role) = input.role {
            user.role = role;
        }
        if let Some(is_active) = input.is_active {
            user.is_active = is_active;
        }
        if let Some(is_verified) = input.is_verified {
            user.is_verified = is_verified;
        }

        let updated = self.user_repo.update(&user).await.context("Failed to update user")?;
        if !updated.is_active {
            self.tokens.revoke_all(updated.id).await?;
        }
        Ok(updated)
    }

    /// Self-service profile update; role and flags are ignored
    pub async fn update_me(&self, actor: &User, input: UpdateUserInput) -> Result<User, UserServiceError> {
        let mut user = actor.clone();
        self.apply_profile(&mut user, &input).await?;
        Ok(self.user_repo.update(&user).await.context("Failed to update user")?)
    }

    pub async fn delete_user(&self, actor: &User, id: i64) -> Result<(), UserServiceError> {
        if actor.id == id {
            return Err(UserServiceError::ValidationError(
                "Cannot delete your own account".to_string(),
            ));
        }
        self.get_by_id(id).await?.ok_or(UserServiceError::NotFound)?;

        // Courses keep a hard reference to their instructor
        let owned = self
            .user_repo
            .owned_course_count(id)
            .await
            .context("Failed to count owned courses")?;
        if owned > 0 {
            return Err(UserServiceError::ValidationError(
                "Cannot delete user with courses".to_string(),
            ));
        }

        self.user_repo.delete(id).await.context("Failed to delete user")?;
        tracing::info!(user_id = id, deleted_by = actor.id, "User deleted");
        Ok(())
    }

    pub async fn stats(&self) -> Result<UserStats, UserServiceError> {
        Ok(self.user_repo.stats().await.context("Failed to compute user stats")?)
    }

    /// Remove expired tokens; called from the maintenance task
    pub async fn cleanup_expired_tokens(&self) -> Result<u64, UserServiceError> {
        Ok(self.tokens.purge_expired().await?)
    }

    // ========================================================================
    // Private helper methods
    // ========================================================================

    async fn issue_for(&self, user: User) -> Result<LoginOutcome, UserServiceError> {
        let issued = self.tokens.issue(user.id).await?;
        Ok(LoginOutcome {
            access_token: issued.token,
            token_type: "bearer",
            expires_in: issued.expires_in,
            user,
        })
    }

    async fn ensure_unique(&self, username: &str, email: &str) -> Result<(), UserServiceError> {
        if self
            .user_repo
            .get_by_username(username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::Conflict("Username already registered".to_string()));
        }
        if self
            .user_repo
            .get_by_email(email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::Conflict("Email already registered".to_string()));
        }
        Ok(())
    }

    /// Copy email and name fields, checking the email stays unique
    async fn apply_profile(&self, user: &mut User, input: &UpdateUserInput) -> Result<(), UserServiceError> {
        if let Some(email) = &input.email {
            validate_email(email)?;
            if *email != user.email {
                let taken = self
                    .user_repo
                    .get_by_email(email)
                    .await
                    .context("Failed to check email")?
                    .is_some_and(|other| other.id != user.id);
                if taken {
                    return Err(UserServiceError::Conflict("Email already registered".to_string()));
                }
                user.email = email.clone();
            }
        }
        if input.first_name.is_some() {
            validate_name(input.first_name.as_deref())?;
            user.first_name = input.first_name.clone();
        }
        if input.last_name.is_some() {
            validate_name(input.last_name.as_deref())?;
            user.last_name = input.last_name.clone();
        }
        if input.avatar_url.is_some() {
            user.avatar_url = input.avatar_url.clone();
        }
        Ok(())
    }

    async fn find_by_username_or_email(&self, value: &str) -> Result<Option<User>, UserServiceError> {
        if let Some(user) = self
            .user_repo
            .get_by_username(value)
            .await
            .context("Failed to get user by username")?
        {
            return Ok(Some(user));
        }
        Ok(self
            .user_repo
            .get_by_email(value)
            .await
            .context("Failed to get user by email")?)
    }
}

fn validate_username(username: &str) -> Result<(), UserServiceError> {
    let len = username.trim().chars().count();
    if !(3..=50).contains(&len) {
        return Err(UserServiceError::ValidationError(
            "Username must be between 3 and 50 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), UserServiceError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(UserServiceError::ValidationError("Invalid email format".to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), UserServiceError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

fn validate_name(name: Option<&str>) -> Result<(), UserServiceError> {
    if name.is_some_and(|n| n.chars().count() > 50) {
        return Err(UserServiceError::ValidationError(
            "Names must be at most 50 characters".to_string(),
        ));
    }
    Ok(())
}
