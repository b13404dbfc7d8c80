//! # Forms Service Module
//!
//! HTTP surface of the lifecycle manager. Handlers only translate between
//! requests and manager calls; every rule lives in `crate::lifecycle`.
//!
//! ## Sub-modules:
//! - `list`: every stored form with its versions, plus the known form types.
//! - `create`: a new form holding the block defaults.
//! - `edit`: the projected blocks of one version.
//! - `pdf`: download of a version's compiled document.
//! - `action`: the multipart edit form and its four submit buttons.

mod action;
mod create;
mod edit;
mod list;
mod pdf;

use crate::assembler::compiler::Compiler;
use actix_web::web::{get, post, scope};
use actix_web::Scope;

/// Configures the `Scope` of all form routes below `prefix`.
///
/// # Registered Routes:
///
/// *   **`GET /forms`**: `list::process`.
/// *   **`POST /forms/{formtype}/create?name=`**: `create::process`.
/// *   **`GET /forms/{formtype}/{formkey}/{version}/edit`**: `edit::process`;
///     a `version` that is not a number addresses the latest version.
/// *   **`GET /forms/{formtype}/{formkey}/{version}/pdf`**: `pdf::process`.
/// *   **`POST /forms/{formkey}/{version}/action`**: `action::process`, a
///     multipart body naming one of `save_and_assemble`, `finalize_version`,
///     `delete_draft` or `draft_from_this`.
pub fn configure_routes<C: Compiler + 'static>(prefix: &str) -> Scope {
    scope(&format!("{}/forms", prefix.trim_end_matches('/')))
        .route("", get().to(list::process::<C>))
        .route("/{formtype}/create", post().to(create::process::<C>))
        .route("/{formtype}/{formkey}/{version}/edit", get().to(edit::process::<C>))
        .route("/{formtype}/{formkey}/{version}/pdf", get().to(pdf::process::<C>))
        .route("/{formkey}/{version}/action", post().to(action::process::<C>))
}
