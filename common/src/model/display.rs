//! Projection of a block and its stored value into what the edit view shows.

use crate::model::attachment::AttachmentRef;
use crate::model::field_value::FieldValue;
use crate::model::form_spec::{BlockKind, FieldBlock};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayModel {
    pub name: String,
    pub kind: BlockKind,
    pub repeat: bool,
    pub rows: Option<u32>,
    pub cols: Option<u32>,
    pub comment: Option<String>,
    pub value: DisplayValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DisplayValue {
    Text(String),
    Rows(Vec<String>),
    Attachments(Vec<AttachmentRef>),
}

/// Builds the display model of `block` from its stored value.
///
/// A stored value that does not fit the block's shape (for example after the
/// form specification changed) is ignored in favour of the block default.
pub fn project(block: &FieldBlock, stored: Option<&FieldValue>) -> DisplayModel {
    let value = stored
        .filter(|v| v.fits(block))
        .cloned()
        .unwrap_or_else(|| block.default_field_value());

    let value = match value {
        FieldValue::Text(s) => DisplayValue::Text(s),
        FieldValue::List(mut rows) => {
            // the row editor needs at least one line to attach "+" to
            if block.kind == BlockKind::TableRow && rows.is_empty() {
                rows.push(String::new());
            }
            DisplayValue::Rows(rows)
        }
        FieldValue::Attachments(refs) => DisplayValue::Attachments(refs),
    };

    DisplayModel {
        name: block.name.clone(),
        kind: block.kind,
        repeat: block.is_repeated(),
        rows: block.rows,
        cols: block.cols,
        comment: block.comment.clone(),
        value,
    }
}
