//! The ordered list of versions kept for every filled form.
//!
//! All transitions of the draft/final lifecycle live here as pure operations
//! on `VersionLedger`, so the persistence and orchestration layers only decide
//! *when* to call them. Every operation keeps the ledger invariant:
//!
//! - version numbers equal their 1-based position (no gaps, ascending);
//! - only the last version may be a draft, so there is at most one draft.

use crate::model::field_value::FieldValues;
use crate::model::version::{CompiledDocument, VersionSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("version {version} does not exist")]
    NotFound { version: u32 },
    #[error("version {version} is already final")]
    AlreadyFinal { version: u32 },
    #[error("version {version} has no PDF and cannot be made final")]
    MissingDocument { version: u32 },
    #[error("version {version} is final and cannot be deleted")]
    CannotDeleteFinal { version: u32 },
    #[error("version {version} is not final, cannot create a draft from a draft")]
    SourceNotFinal { version: u32 },
    #[error("version {version} is a draft, cannot create a second draft")]
    DraftAlreadyExists { version: u32 },
    #[error("ledger is inconsistent: {0}")]
    Corrupt(String),
}

/// Result of saving draft content into a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftWrite {
    /// A new draft was appended after a final version (or as version 1).
    Appended { version: u32 },
    /// The trailing draft was overwritten; `previous` is its content before.
    Overwritten {
        version: u32,
        previous: Box<VersionSnapshot>,
    },
}

impl DraftWrite {
    pub fn version(&self) -> u32 {
        match self {
            DraftWrite::Appended { version } | DraftWrite::Overwritten { version, .. } => *version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionLedger {
    versions: Vec<VersionSnapshot>,
}

impl VersionLedger {
    /// A fresh ledger holding version 1 as a draft.
    pub fn with_first_draft(field_values: FieldValues) -> Self {
        Self {
            versions: vec![VersionSnapshot::draft(1, field_values, None)],
        }
    }

    /// Rebuilds a ledger from persisted versions, rejecting broken invariants.
    pub fn from_versions(versions: Vec<VersionSnapshot>) -> Result<Self, LedgerError> {
        let ledger = Self { versions };
        ledger.check_invariants()?;
        Ok(ledger)
    }

    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        if self.versions.is_empty() {
            return Err(LedgerError::Corrupt("ledger has no versions".to_string()));
        }
        let last = self.versions.len() - 1;
        for (idx, v) in self.versions.iter().enumerate() {
            if v.version as usize != idx + 1 {
                return Err(LedgerError::Corrupt(format!(
                    "version {} stored at position {}",
                    v.version,
                    idx + 1
                )));
            }
            if !v.is_final && idx != last {
                return Err(LedgerError::Corrupt(format!(
                    "draft version {} is not the last version",
                    v.version
                )));
            }
        }
        Ok(())
    }

    pub fn versions(&self) -> &[VersionSnapshot] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn latest(&self) -> Option<&VersionSnapshot> {
        self.versions.last()
    }

    /// The outstanding draft, if the ledger ends in one.
    pub fn draft(&self) -> Option<&VersionSnapshot> {
        self.versions.last().filter(|v| !v.is_final)
    }

    pub fn get(&self, version: u32) -> Result<&VersionSnapshot, LedgerError> {
        Self::index(version)
            .and_then(|idx| self.versions.get(idx))
            .ok_or(LedgerError::NotFound { version })
    }

    fn get_mut(&mut self, version: u32) -> Result<&mut VersionSnapshot, LedgerError> {
        Self::index(version)
            .and_then(|idx| self.versions.get_mut(idx))
            .ok_or(LedgerError::NotFound { version })
    }

    fn index(version: u32) -> Option<usize> {
        (version as usize).checked_sub(1)
    }

    fn next_version(&self) -> u32 {
        self.versions.len() as u32 + 1
    }

    /// Stores submitted content: overwrites the trailing draft in place, or
    /// appends a new draft when the ledger ends in a final version.
    ///
    /// An overwritten draft loses its compiled document.
    pub fn save_draft(&mut self, field_values: FieldValues) -> DraftWrite {
        let next = self.next_version();
        match self.versions.last_mut() {
            Some(last) if !last.is_final => {
                let previous = last.clone();
                last.field_values = field_values;
                last.compiled_document = None;
                DraftWrite::Overwritten {
                    version: last.version,
                    previous: Box::new(previous),
                }
            }
            _ => {
                self.versions
                    .push(VersionSnapshot::draft(next, field_values, None));
                DraftWrite::Appended { version: next }
            }
        }
    }

    /// Attaches a compiled document to a draft, returning the one it replaces.
    pub fn set_document(
        &mut self,
        version: u32,
        document: CompiledDocument,
    ) -> Result<Option<CompiledDocument>, LedgerError> {
        let v = self.get_mut(version)?;
        if v.is_final {
            return Err(LedgerError::AlreadyFinal { version });
        }
        Ok(v.compiled_document.replace(document))
    }

    pub fn finalize(&mut self, version: u32) -> Result<(), LedgerError> {
        let v = self.get_mut(version)?;
        if v.compiled_document.is_none() {
            return Err(LedgerError::MissingDocument { version });
        }
        if v.is_final {
            return Err(LedgerError::AlreadyFinal { version });
        }
        v.is_final = true;
        Ok(())
    }

    /// Removes the trailing draft and hands it back to the caller.
    ///
    /// Removing version 1 leaves the ledger empty; the owner is expected to
    /// drop the whole form in that case.
    pub fn remove_draft(&mut self, version: u32) -> Result<VersionSnapshot, LedgerError> {
        let v = self.get(version)?;
        if v.is_final {
            return Err(LedgerError::CannotDeleteFinal { version });
        }
        if version as usize != self.versions.len() {
            return Err(LedgerError::Corrupt(format!(
                "draft version {version} is not the last version"
            )));
        }
        self.versions
            .pop()
            .ok_or(LedgerError::NotFound { version })
    }

    /// Appends a draft whose content is a deep copy of final version `source`.
    pub fn branch_from(&mut self, source: u32) -> Result<u32, LedgerError> {
        if let Some(draft) = self.draft() {
            return Err(LedgerError::DraftAlreadyExists {
                version: draft.version,
            });
        }
        let src = self.get(source)?;
        if !src.is_final {
            return Err(LedgerError::SourceNotFinal { version: source });
        }
        let next = self.next_version();
        let copy = VersionSnapshot::draft(next, src.field_values.clone(), Some(source));
        self.versions.push(copy);
        Ok(next)
    }
}
