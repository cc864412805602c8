// error.rs
use std::collections::BTreeMap;

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Field name to the messages reported against it.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} not found.")]
    NotFound(&'static str),

    #[error("Invalid input.")]
    InvalidInput(FieldErrors),

    #[error("This poll is no longer accepting votes.")]
    PollClosed,

    #[error("You have already voted in this poll.")]
    DuplicateVote,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Single-field `InvalidInput`.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![message.into()]);
        Error::InvalidInput(fields)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) | Error::PollClosed | Error::DuplicateVote => {
                StatusCode::BAD_REQUEST
            }
            Error::Database(_) | Error::Cache(_) | Error::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::PollClosed => "poll_closed",
            Error::DuplicateVote => "duplicate_vote",
            Error::Database(_) | Error::Cache(_) | Error::Serialization(_) => "internal",
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        collect_field_errors(&errors, "", &mut fields);
        Error::InvalidInput(fields)
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::invalid("body", rejection.body_text())
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Error::invalid("id", rejection.body_text())
    }
}

/// Flattens nested validator output into `options[1].text` style keys.
pub(crate) fn collect_field_errors(errors: &ValidationErrors, prefix: &str, out: &mut FieldErrors) {
    for (field, kind) in errors.errors() {
        let path = format!("{prefix}{field}");
        match kind {
            ValidationErrorsKind::Field(list) => {
                let messages = out.entry(path).or_default();
                for err in list {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({}).", err.code));
                    messages.push(message);
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                collect_field_errors(inner, &format!("{path}."), out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(inner, &format!("{path}[{index}]."), out);
                }
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<FieldErrors>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status.is_server_error() {
            error!(error = %self, "request failed");
            "Internal server error.".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: self.kind(),
            detail,
            fields: match self {
                Error::InvalidInput(fields) => Some(fields),
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}
