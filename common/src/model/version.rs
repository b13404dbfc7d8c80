use crate::model::field_value::FieldValues;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a successfully compiled PDF of a version was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledDocument {
    pub location: PathBuf,
}

/// One version of a filled form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    /// 1-based position in the owning ledger.
    pub version: u32,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(rename = "blocks")]
    pub field_values: FieldValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub based_on_version: Option<u32>,
    #[serde(rename = "pdf", default, skip_serializing_if = "Option::is_none")]
    pub compiled_document: Option<CompiledDocument>,
}

impl VersionSnapshot {
    pub fn draft(version: u32, field_values: FieldValues, based_on_version: Option<u32>) -> Self {
        Self {
            version,
            is_final: false,
            field_values,
            based_on_version,
            compiled_document: None,
        }
    }

    /// Hashes of every attachment referenced by this version.
    pub fn attachment_hashes(&self) -> impl Iterator<Item = &str> {
        self.field_values
            .values()
            .flat_map(|v| v.attachments())
            .map(|a| a.hash.as_str())
    }
}
