//! Error type shared by every backend module.
//!
//! `FormError` carries the failure kinds of the form lifecycle plus the
//! infrastructure errors (SQLite, IO, JSON) that can interrupt it. Handlers
//! return it directly: the `ResponseError` impl maps each kind to a status
//! code, and anything unclassified becomes a generic internal error stamped
//! with the time it happened so it can be found in the log.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use common::model::form_spec::SpecError;
use common::model::ledger::LedgerError;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("invalid form key {key}")]
    FormNotFound { key: String },
    #[error("form {key}: {source}")]
    Ledger {
        key: String,
        #[source]
        source: LedgerError,
    },
    #[error("cannot store under existing name {key}")]
    NameConflict { key: String },
    #[error("form key must not be empty")]
    InvalidKey,
    #[error("unknown form type {0}")]
    UnknownFormType(String),
    #[error("form {key} has type {stored}, not {requested}")]
    FormTypeMismatch {
        key: String,
        stored: String,
        requested: String,
    },
    #[error("errors interpreting form data: {}", .0.join("\n"))]
    MalformedUpload(Vec<String>),
    #[error("invalid field values: {}", .0.join("\n"))]
    InvalidFieldValue(Vec<String>),
    #[error("unprocessable mime type {mime}")]
    UnsupportedMediaType { mime: String },
    #[error("attachment {hash} is missing from storage")]
    MissingBlob { hash: String },
    #[error("compilation failed ({})", describe_exit(.exit_code))]
    CompilationFailed { exit_code: Option<i32> },
    #[error("compiler finished but produced no {}", .path.display())]
    MissingOutput { path: PathBuf },
    #[error("template error: {0}")]
    Template(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl FormError {
    pub fn ledger(key: &str, source: LedgerError) -> Self {
        FormError::Ledger {
            key: key.to_string(),
            source,
        }
    }

    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FormError::FormNotFound { .. } => "not_found",
            FormError::Ledger { source, .. } => match source {
                LedgerError::NotFound { .. } => "not_found",
                LedgerError::AlreadyFinal { .. } => "already_final",
                LedgerError::MissingDocument { .. } => "missing_document",
                LedgerError::CannotDeleteFinal { .. } => "cannot_delete_final",
                LedgerError::SourceNotFinal { .. } => "source_not_final",
                LedgerError::DraftAlreadyExists { .. } => "draft_already_exists",
                LedgerError::Corrupt(_) => "internal",
            },
            FormError::NameConflict { .. } => "name_conflict",
            FormError::InvalidKey => "invalid_key",
            FormError::UnknownFormType(_) => "unknown_form_type",
            FormError::FormTypeMismatch { .. } => "form_type_mismatch",
            FormError::MalformedUpload(_) => "malformed_upload",
            FormError::InvalidFieldValue(_) => "invalid_field_value",
            FormError::UnsupportedMediaType { .. } => "unsupported_media_type",
            FormError::MissingBlob { .. } => "missing_blob",
            FormError::CompilationFailed { .. } => "compilation_failed",
            FormError::MissingOutput { .. } => "missing_output",
            FormError::Template(_) => "template",
            FormError::Config(_)
            | FormError::Spec(_)
            | FormError::Storage(_)
            | FormError::Json(_)
            | FormError::Io(_)
            | FormError::Internal(_) => "internal",
        }
    }

    fn is_internal(&self) -> bool {
        self.kind() == "internal"
    }
}

impl ResponseError for FormError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            "not_found" | "unknown_form_type" => StatusCode::NOT_FOUND,
            "name_conflict" | "already_final" | "missing_document" | "cannot_delete_final"
            | "source_not_final" | "draft_already_exists" | "form_type_mismatch" => {
                StatusCode::CONFLICT
            }
            "malformed_upload" | "invalid_field_value" | "invalid_key" => StatusCode::BAD_REQUEST,
            "unsupported_media_type" => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "compilation_failed" | "missing_output" | "template" => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = if self.is_internal() {
            let msg = format!("internal error at {}", chrono::Utc::now().to_rfc3339());
            log::error!("{}: {}", msg, self);
            msg
        } else {
            log::warn!("request failed: {}", self);
            self.to_string()
        };
        HttpResponse::build(self.status_code()).json(json!({
            "kind": self.kind(),
            "message": message,
        }))
    }
}
