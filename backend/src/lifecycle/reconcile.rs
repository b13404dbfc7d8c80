//! Interpretation of a posted edit form against its form specification.
//!
//! Text and table-row blocks are normalized and shaped (scalar or list).
//! Image blocks arrive as one marker per slot, in display order:
//!
//! - `existing_file`: a file kept from the previous snapshot; its hash,
//!   filename and mimetype come from the `<NAME>_HASH`, `<NAME>_FILENAME` and
//!   `<NAME>_MIMETYPE` fields, consumed in order.
//! - `new_file`: a fresh upload, taken in order from the `<NAME>_FILE` files.
//!
//! Problems are collected across all blocks instead of stopping at the first,
//! so a rejected submission reports everything that is wrong with it at once.
//! Nothing here touches storage: uploads are only inspected, and ingesting them
//! is left to the caller once the whole submission has been accepted.

use crate::error::FormError;
use crate::lifecycle::submission::{RawSubmission, UploadedFile};
use common::model::attachment::{AttachmentRef, SupportedMedia};
use common::model::field_value::{FieldValue, FieldValues};
use common::model::form_spec::{BlockKind, FieldBlock, FormSpec, ValidationPolicy};
use std::collections::HashSet;
use std::path::Path;

const EXISTING_FILE: &str = "existing_file";
const NEW_FILE: &str = "new_file";

/// One image slot of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSlot {
    Existing(AttachmentRef),
    New(UploadedFile),
}

/// An accepted submission, ready to be turned into a snapshot.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub values: FieldValues,
    pub images: Vec<(String, Vec<ImageSlot>)>,
}

impl Reconciled {
    pub fn new_uploads(&self) -> impl Iterator<Item = &UploadedFile> {
        self.images.iter().flat_map(|(_, slots)| {
            slots.iter().filter_map(|s| match s {
                ImageSlot::New(u) => Some(u),
                ImageSlot::Existing(_) => None,
            })
        })
    }

    /// Posted files that no `new_file` slot took: surplus uploads, uploads of
    /// a block that sent no markers and files under undeclared names.
    pub fn unclaimed_uploads(&self, submission: &RawSubmission) -> Vec<UploadedFile> {
        let claimed: HashSet<&Path> = self
            .new_uploads()
            .map(|u| u.stored_path.as_path())
            .collect();
        submission
            .all_files()
            .into_iter()
            .filter(|u| !claimed.contains(u.stored_path.as_path()))
            .collect()
    }
}

/// CRLF to LF, runs of LF collapsed into one, surrounding whitespace trimmed.
pub fn normalize_newlines(value: &str) -> String {
    let unified = value.replace("\r\n", "\n");
    let mut out = String::with_capacity(unified.len());
    let mut after_lf = false;
    for c in unified.chars() {
        if c == '\n' {
            if after_lf {
                continue;
            }
            after_lf = true;
        } else {
            after_lf = false;
        }
        out.push(c);
    }
    out.trim().to_string()
}

pub fn reconcile(spec: &FormSpec, submission: &RawSubmission) -> Result<Reconciled, FormError> {
    let mut upload_errors = Vec::new();
    let mut value_errors = Vec::new();
    let mut out = Reconciled::default();

    for block in &spec.blocks {
        if !submission.has(&block.name) {
            continue;
        }
        match block.kind {
            BlockKind::Text | BlockKind::TableRow => {
                let value = interpret_text(block, submission.values(&block.name));
                if let Some(policy) = &block.validation {
                    check_policy(block, policy, &value, &mut value_errors);
                }
                out.values.insert(block.name.clone(), value);
            }
            BlockKind::Image => {
                let slots = interpret_images(block, submission, &mut upload_errors);
                out.images.push((block.name.clone(), slots));
            }
        }
    }

    if !upload_errors.is_empty() {
        return Err(FormError::MalformedUpload(upload_errors));
    }
    if !value_errors.is_empty() {
        return Err(FormError::InvalidFieldValue(value_errors));
    }
    Ok(out)
}

fn interpret_text(block: &FieldBlock, posted: &[String]) -> FieldValue {
    let normalized: Vec<String> = posted.iter().map(|v| normalize_newlines(v)).collect();
    if block.is_repeated() {
        FieldValue::List(normalized)
    } else {
        FieldValue::Text(normalized.into_iter().next().unwrap_or_default())
    }
}

/// Number of column separators, not counting escaped `\&`.
fn count_ampersands(value: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for c in value.chars() {
        if c == '&' && !escaped {
            count += 1;
        }
        escaped = c == '\\' && !escaped;
    }
    count
}

fn check_policy(
    block: &FieldBlock,
    policy: &ValidationPolicy,
    value: &FieldValue,
    errors: &mut Vec<String>,
) {
    let items: Vec<&str> = match value {
        FieldValue::Text(s) => vec![s.as_str()],
        FieldValue::List(list) => list.iter().map(String::as_str).collect(),
        FieldValue::Attachments(_) => Vec::new(),
    };
    for (idx, item) in items.into_iter().enumerate() {
        if let Some(allowed) = &policy.allowed_chars {
            let bad: String = item
                .chars()
                .filter(|c| *c != '\n' && !allowed.contains(*c))
                .collect();
            if !bad.is_empty() {
                errors.push(format!(
                    "field {} entry {}: characters {:?} are not allowed",
                    block.name,
                    idx + 1,
                    bad
                ));
            }
        }
        if let Some(expected) = policy.ampersands {
            let found = count_ampersands(item);
            if found != expected {
                errors.push(format!(
                    "field {} row {}: expected {} '&' separators, found {}",
                    block.name,
                    idx + 1,
                    expected,
                    found
                ));
            }
        }
    }
}

fn interpret_images(
    block: &FieldBlock,
    submission: &RawSubmission,
    errors: &mut Vec<String>,
) -> Vec<ImageSlot> {
    let name = &block.name;
    let hashes = submission.values(&format!("{name}_HASH"));
    let filenames = submission.values(&format!("{name}_FILENAME"));
    let mimetypes = submission.values(&format!("{name}_MIMETYPE"));
    let files: &[UploadedFile] = submission
        .files
        .get(&format!("{name}_FILE"))
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut slots = Vec::new();
    let (mut existing_idx, mut new_idx) = (0, 0);
    for marker in submission.values(name) {
        match marker.as_str() {
            EXISTING_FILE => {
                match (
                    hashes.get(existing_idx),
                    filenames.get(existing_idx),
                    mimetypes.get(existing_idx),
                ) {
                    (Some(hash), Some(filename), Some(mimetype)) => {
                        slots.push(ImageSlot::Existing(AttachmentRef {
                            hash: hash.clone(),
                            display_name: filename.clone(),
                            mime_type: mimetype.clone(),
                        }))
                    }
                    _ => errors.push(format!(
                        "field {}: retained file {} lacks its hash, filename or mimetype",
                        name,
                        existing_idx + 1
                    )),
                }
                existing_idx += 1;
            }
            NEW_FILE => {
                match files.get(new_idx) {
                    Some(file) if SupportedMedia::from_mime(&file.mime_type).is_some() => {
                        slots.push(ImageSlot::New(file.clone()))
                    }
                    Some(file) => {
                        let unsupported = FormError::UnsupportedMediaType {
                            mime: file.mime_type.clone(),
                        };
                        errors.push(format!(
                            "field {}: received file {} with {} (can handle {{{}}})",
                            name,
                            file.original_name,
                            unsupported,
                            SupportedMedia::describe_all()
                        ));
                    }
                    // an empty upload slot: the user added a row but picked no file
                    None => log::debug!("field {}: new_file slot without upload", name),
                }
                new_idx += 1;
            }
            other => errors.push(format!(
                "field {}: invalid slot marker {:?} (expected {} or {})",
                name, other, EXISTING_FILE, NEW_FILE
            )),
        }
    }

    if !block.is_repeated() && slots.len() > 1 {
        errors.push(format!(
            "field {}: takes a single file, got {}",
            name,
            slots.len()
        ));
    }

    slots
}
