use anyhow::Context;
use tracing::{info, warn};

use crate::{
    auth::{
        jwt::JwtKeys,
        password,
        repo::UserRepo,
        repo_types::{NewUser, User, UserChanges},
    },
    error::ApiError,
};

const BAD_CREDENTIALS: &str = "Unable to authenticate with provided credentials";

/// Account flags applied on creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Privileges {
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl Privileges {
    pub const SUPERUSER: Privileges = Privileges {
        is_staff: true,
        is_superuser: true,
    };
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn create_user(
    users: &dyn UserRepo,
    email: &str,
    plain_password: &str,
    name: &str,
    privileges: Privileges,
) -> Result<User, ApiError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(ApiError::field("email", "required", "Users must have an email address."));
    }

    if users.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(ApiError::field("email", "unique", "user with this email already exists."));
    }

    let password_hash = password::hash(plain_password).context("hash password")?;
    let user = users
        .insert(NewUser {
            email,
            name: name.trim().to_string(),
            password_hash,
            is_staff: privileges.is_staff,
            is_superuser: privileges.is_superuser,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, superuser = user.is_superuser, "user created");
    Ok(user)
}

pub async fn create_superuser(
    users: &dyn UserRepo,
    email: &str,
    plain_password: &str,
    name: &str,
) -> Result<User, ApiError> {
    create_user(users, email, plain_password, name, Privileges::SUPERUSER).await
}

/// Exchanges credentials for a bearer token. Every failure carries the same message.
pub async fn obtain_token(
    users: &dyn UserRepo,
    keys: &JwtKeys,
    email: &str,
    plain_password: &str,
) -> Result<(String, User), ApiError> {
    let email = normalize_email(email);
    if email.is_empty() || plain_password.is_empty() {
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.into()));
    }

    let Some(user) = users.find_by_email(&email).await? else {
        password::verify_dummy(plain_password);
        warn!("token requested for unknown email");
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.into()));
    };

    if !password::verify(plain_password, &user.password_hash) || !user.is_active {
        warn!(user_id = %user.id, "token request rejected");
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.into()));
    }

    let token = keys.sign(user.id).context("sign token")?;
    info!(user_id = %user.id, "token issued");
    Ok((token, user))
}

/// Resolves a bearer token to an active user.
pub async fn resolve_token(users: &dyn UserRepo, keys: &JwtKeys, token: &str) -> Result<User, ApiError> {
    let claims = keys.verify(token).map_err(|e| {
        warn!(error = %e, "invalid or expired token");
        ApiError::Unauthorized("Invalid or expired token".into())
    })?;

    match users.find_by_id(claims.sub).await? {
        Some(user) if user.is_active => Ok(user),
        _ => {
            warn!(user_id = %claims.sub, "token for unknown or inactive user");
            Err(ApiError::Unauthorized("Invalid or expired token".into()))
        }
    }
}

pub async fn update_profile(
    users: &dyn UserRepo,
    user: &User,
    name: Option<String>,
    plain_password: Option<String>,
) -> Result<User, ApiError> {
    let password_hash = match plain_password {
        Some(p) => Some(password::hash(&p).context("hash password")?),
        None => None,
    };
    let changes = UserChanges {
        name: name.map(|n| n.trim().to_string()),
        password_hash,
    };
    users
        .update(user.id, changes)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".into()))
}
