//! # Edit Form Action Service
//!
//! `POST /forms/{formkey}/{version}/action` receives the whole edit page as
//! `multipart/form-data`. The submit button that was pressed decides what
//! happens to the posted data.
//!
//! ## Workflow
//!
//! 1.  **Reading the body**: text parts become submission fields. File parts
//!     are streamed into temp files in the upload directory; their MIME type
//!     comes from the part header, or from the file name when the browser
//!     sent none. Empty file inputs (no file name, no bytes) are skipped.
//!
//! 2.  **Dispatch**: `save_and_assemble` hands the submission to the lifecycle
//!     manager together with the `formtype` and an optional rename target
//!     `formkey`. The other buttons only need the path parameters.
//!
//! Whenever the submission is not handed over, its temp files are removed
//! here, so a rejected request never leaves uploads behind.

use crate::assembler::compiler::Compiler;
use crate::config::AppConfig;
use crate::error::FormError;
use crate::lifecycle::submission::{RawSubmission, UploadedFile};
use crate::lifecycle::LifecycleManager;
use crate::storage::attachments::AttachmentStore;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use common::requests::FormAction;
use futures_util::StreamExt;
use std::io::Write;

pub(crate) async fn process<C: Compiler + 'static>(
    path: web::Path<(String, u32)>,
    payload: Multipart,
    manager: web::Data<LifecycleManager<C>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, FormError> {
    let (form_key, version) = path.into_inner();
    let submission = read_submission(payload, &config).await?;

    let Some(action) = FormAction::detect(|name| submission.has(name)) else {
        AttachmentStore::discard(&submission.all_files());
        return Err(FormError::MalformedUpload(vec![format!(
            "no action given, expected one of {}",
            FormAction::ALL.map(FormAction::field_name).join(", ")
        )]));
    };
    log::debug!("{:?} on {} version {}", action, form_key, version);

    if action != FormAction::SaveAndAssemble {
        AttachmentStore::discard(&submission.all_files());
    }
    match action {
        FormAction::SaveAndAssemble => {
            let Some(form_type) = submission.first("formtype").map(str::to_string) else {
                AttachmentStore::discard(&submission.all_files());
                return Err(FormError::MalformedUpload(vec![
                    "missing field formtype".to_string(),
                ]));
            };
            let target = submission.first("formkey").map(str::to_string);
            let outcome = manager
                .create_or_update_draft(&form_key, &form_type, target.as_deref(), submission)
                .await?;
            Ok(HttpResponse::Ok().json(outcome))
        }
        FormAction::FinalizeVersion => {
            Ok(HttpResponse::Ok().json(manager.finalize(&form_key, version).await?))
        }
        FormAction::DeleteDraft => {
            Ok(HttpResponse::Ok().json(manager.delete_draft(&form_key, version).await?))
        }
        FormAction::DraftFromThis => {
            Ok(HttpResponse::Ok().json(manager.branch_draft_from(&form_key, version).await?))
        }
    }
}

/// Reads every part of the body; on error the files stored so far are removed.
async fn read_submission(
    mut payload: Multipart,
    config: &AppConfig,
) -> Result<RawSubmission, FormError> {
    let mut submission = RawSubmission::default();
    if let Err(e) = read_parts(&mut payload, config, &mut submission).await {
        AttachmentStore::discard(&submission.all_files());
        return Err(e);
    }
    Ok(submission)
}

async fn read_parts(
    payload: &mut Multipart,
    config: &AppConfig,
    submission: &mut RawSubmission,
) -> Result<(), FormError> {
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(malformed)?;
        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().map(str::to_string),
                cd.get_filename().map(str::to_string),
            ),
            None => (None, None),
        };
        let Some(name) = name else {
            drain(&mut field).await?;
            continue;
        };

        match filename {
            Some(filename) => {
                let count = submission.files.get(&name).map_or(0, Vec::len);
                if count >= config.max_upload_per_field {
                    return Err(FormError::MalformedUpload(vec![format!(
                        "field {}: more than {} files",
                        name, config.max_upload_per_field
                    )]));
                }
                if let Some(upload) = store_upload(&mut field, &filename, config).await? {
                    submission.add_file(name, upload);
                }
            }
            None => {
                let bytes = drain(&mut field).await?;
                let value = String::from_utf8(bytes).map_err(|_| {
                    FormError::MalformedUpload(vec![format!("field {} is not valid UTF-8", name)])
                })?;
                submission.add_field(name, value);
            }
        }
    }
    Ok(())
}

fn malformed(e: impl std::fmt::Display) -> FormError {
    FormError::MalformedUpload(vec![e.to_string()])
}

async fn drain(field: &mut Field) -> Result<Vec<u8>, FormError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        bytes.extend_from_slice(&chunk.map_err(malformed)?);
    }
    Ok(bytes)
}

/// Streams one file part into the upload directory.
///
/// Returns `None` for an empty file input.
async fn store_upload(
    field: &mut Field,
    filename: &str,
    config: &AppConfig,
) -> Result<Option<UploadedFile>, FormError> {
    let mime_type = field
        .content_type()
        .map(|m| m.essence_str().to_string())
        .filter(|m| m != "application/octet-stream")
        .unwrap_or_else(|| {
            mime_guess::from_path(filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

    let mut temp = tempfile::Builder::new()
        .prefix("upload")
        .tempfile_in(&config.upload_directory)?;
    let mut size = 0usize;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(malformed)?;
        size += chunk.len();
        temp.write_all(&chunk)?;
    }
    if filename.is_empty() && size == 0 {
        return Ok(None);
    }
    temp.flush()?;
    let (_, stored_path) = temp.keep().map_err(|e| FormError::Io(e.error))?;
    Ok(Some(UploadedFile {
        original_name: filename.to_string(),
        mime_type,
        stored_path,
    }))
}
