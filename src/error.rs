use std::{borrow::Cow, collections::BTreeMap};

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

/// Failure surfaced by a repository implementation.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Referenced ids do not exist or belong to another user.
    #[error("{field}: unknown ids {ids:?}")]
    InvalidReference { field: &'static str, ids: Vec<i64> },

    #[error("duplicate value for {0}")]
    Duplicate(&'static str),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl RepoError {
    /// Maps a unique violation to `Duplicate(field)`, everything else to `Database`.
    pub fn from_unique(field: &'static str) -> impl Fn(sqlx::Error) -> Self {
        move |e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return RepoError::Duplicate(field);
                }
            }
            RepoError::Database(e)
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{resource} not found")]
    NotFound { resource: &'static str },

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(resource: &'static str) -> Self {
        ApiError::NotFound { resource }
    }

    /// Single-field validation failure.
    pub fn field(field: &'static str, code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, ValidationError::new(code).with_message(message.into()));
        ApiError::Validation(errors)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn field_messages(errors: &ValidationErrors) -> BTreeMap<String, Vec<String>> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid value ({})", e.code))
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::InvalidReference { field, ids } => {
                let listed = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ");
                ApiError::field(
                    field,
                    "does_not_exist",
                    format!("Invalid pk [{listed}] - object does not exist."),
                )
            }
            RepoError::Duplicate(field) => {
                ApiError::field(field, "unique", format!("user with this {field} already exists."))
            }
            RepoError::Database(e) => ApiError::Internal(anyhow::Error::new(e).context("database query")),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(
            "body",
            ValidationError::new("malformed").with_message(Cow::Owned(rejection.body_text())),
        );
        ApiError::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(e) => tracing::error!(error = format!("{e:#}"), "internal error"),
            ApiError::Unauthorized(_) => tracing::info!("authorization error: {}", self),
            _ => tracing::debug!("client error: {}", self),
        }

        let status = self.status_code();
        let body = match &self {
            ApiError::Validation(errors) => json!({
                "error": "validation failed",
                "fields": field_messages(errors),
            }),
            ApiError::Internal(_) => json!({ "error": "internal server error" }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
