use crate::model::ledger::VersionLedger;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One filled form: a user-chosen key, its form type and its versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormInstance {
    pub key: String,
    pub formtype: String,
    pub versions: VersionLedger,
}

/// Row of the form selection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSummary {
    pub formkey: String,
    pub formtype: String,
    pub versions: Vec<VersionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: u32,
    pub is_draft: bool,
    pub has_document: bool,
}

impl FormInstance {
    pub fn summary(&self) -> FormSummary {
        FormSummary {
            formkey: self.key.clone(),
            formtype: self.formtype.clone(),
            versions: self
                .versions
                .versions()
                .iter()
                .map(|v| VersionSummary {
                    version: v.version,
                    is_draft: !v.is_final,
                    has_document: v.compiled_document.is_some(),
                })
                .collect(),
        }
    }

    /// Number of places in any version that reference attachment `hash`.
    pub fn attachment_references(&self, hash: &str) -> usize {
        self.versions
            .versions()
            .iter()
            .flat_map(|v| v.attachment_hashes())
            .filter(|h| *h == hash)
            .count()
    }

    /// Number of versions whose compiled document lives at `location`.
    pub fn document_references(&self, location: &Path) -> usize {
        self.versions
            .versions()
            .iter()
            .filter_map(|v| v.compiled_document.as_ref())
            .filter(|d| d.location == location)
            .count()
    }
}
