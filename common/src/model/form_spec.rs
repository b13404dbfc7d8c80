use crate::model::field_value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Declaration of one form type, as read from the forms specification file.
///
/// The registry file keys each `FormSpec` by its form type, so `formtype` is
/// not part of the serialized body and gets filled in by the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSpec {
    #[serde(skip_deserializing, default)]
    pub formtype: String,
    /// Path of the LaTeX template rendered for every version of this form.
    #[serde(rename = "tex_template")]
    pub template_path: PathBuf,
    /// Basename (without `.pdf`) of the document the compiler produces.
    #[serde(rename = "tex_targetbase")]
    pub output_basename: String,
    #[serde(rename = "htmlcomment", default)]
    pub comment: Option<String>,
    #[serde(rename = "form_blocks")]
    pub blocks: Vec<FieldBlock>,
}

/// A single declared field of a form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldBlock {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub repeat: Repeat,
    #[serde(rename = "defaultvalue", default)]
    pub default_value: Option<DefaultValue>,
    #[serde(default)]
    pub validation: Option<ValidationPolicy>,
    #[serde(default)]
    pub rows: Option<u32>,
    #[serde(default)]
    pub cols: Option<u32>,
    #[serde(rename = "htmlcomment", default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "TABLE_ROW", alias = "TABLEROW")]
    TableRow,
    #[serde(rename = "IMAGE")]
    Image,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
    #[serde(rename = "yes")]
    Yes,
    #[serde(rename = "no")]
    #[default]
    No,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Text(String),
    List(Vec<String>),
}

/// Optional per-block checks applied to submitted text after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Every character of a value must appear in this string.
    #[serde(default)]
    pub allowed_chars: Option<String>,
    /// Exact number of `&` column separators a table row must contain.
    #[serde(default)]
    pub ampersands: Option<usize>,
}

/// Configuration mistakes found while loading the forms specification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("form type {formtype}: block name {name} is declared twice")]
    DuplicateBlock { formtype: String, name: String },
    #[error("form type {formtype}: image block {name} may only default to an empty list")]
    ImageDefault { formtype: String, name: String },
    #[error("form type {formtype}: block {name} declares an ampersand count but is not a table row")]
    AmpersandPolicy { formtype: String, name: String },
    #[error("form type {formtype}: output basename must not be empty")]
    EmptyOutputBasename { formtype: String },
}

impl FieldBlock {
    pub fn is_repeated(&self) -> bool {
        self.repeat == Repeat::Yes
    }

    /// The value a block takes when nothing has been stored for it yet.
    pub fn default_field_value(&self) -> FieldValue {
        match self.kind {
            BlockKind::Image => FieldValue::Attachments(Vec::new()),
            BlockKind::Text | BlockKind::TableRow => {
                let defaults = match &self.default_value {
                    None => Vec::new(),
                    Some(DefaultValue::Text(s)) => vec![s.clone()],
                    Some(DefaultValue::List(list)) => list.clone(),
                };
                if self.is_repeated() {
                    FieldValue::List(defaults)
                } else {
                    FieldValue::Text(defaults.into_iter().next().unwrap_or_default())
                }
            }
        }
    }
}

impl FormSpec {
    pub fn block(&self, name: &str) -> Option<&FieldBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Checks the invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.output_basename.trim().is_empty() {
            return Err(SpecError::EmptyOutputBasename {
                formtype: self.formtype.clone(),
            });
        }
        let mut seen = HashSet::new();
        for block in &self.blocks {
            if !seen.insert(block.name.as_str()) {
                return Err(SpecError::DuplicateBlock {
                    formtype: self.formtype.clone(),
                    name: block.name.clone(),
                });
            }
            if block.kind == BlockKind::Image {
                let empty = match &block.default_value {
                    None => true,
                    Some(DefaultValue::List(list)) => list.is_empty(),
                    Some(DefaultValue::Text(_)) => false,
                };
                if !empty {
                    return Err(SpecError::ImageDefault {
                        formtype: self.formtype.clone(),
                        name: block.name.clone(),
                    });
                }
            }
            let counts_ampersands = block
                .validation
                .as_ref()
                .is_some_and(|v| v.ampersands.is_some());
            if counts_ampersands && block.kind != BlockKind::TableRow {
                return Err(SpecError::AmpersandPolicy {
                    formtype: self.formtype.clone(),
                    name: block.name.clone(),
                });
            }
        }
        Ok(())
    }
}
