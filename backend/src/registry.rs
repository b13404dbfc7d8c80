//! Read-only registry of form specifications.
//!
//! Loaded once at startup from the forms specification file and shared
//! immutably with the lifecycle manager and the assembler.

use crate::error::FormError;
use common::model::form_spec::FormSpec;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct FormSpecRegistry {
    forms: Arc<BTreeMap<String, FormSpec>>,
}

impl FormSpecRegistry {
    pub fn load(path: &Path) -> Result<Self, FormError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FormError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Parses `{ "<formtype>": <FormSpec>, ... }` and checks every spec.
    pub fn from_json(content: &str) -> Result<Self, FormError> {
        let raw: BTreeMap<String, FormSpec> = serde_json::from_str(content)
            .map_err(|e| FormError::Config(format!("forms specification: {}", e)))?;
        Self::from_specs(raw)
    }

    pub fn from_specs(raw: BTreeMap<String, FormSpec>) -> Result<Self, FormError> {
        let mut forms = BTreeMap::new();
        for (formtype, mut spec) in raw {
            spec.formtype = formtype.clone();
            spec.validate()?;
            log::info!(
                "registered form type {} with {} blocks",
                formtype,
                spec.blocks.len()
            );
            forms.insert(formtype, spec);
        }
        Ok(Self {
            forms: Arc::new(forms),
        })
    }

    pub fn get(&self, formtype: &str) -> Result<&FormSpec, FormError> {
        self.forms
            .get(formtype)
            .ok_or_else(|| FormError::UnknownFormType(formtype.to_string()))
    }

    pub fn formtypes(&self) -> impl Iterator<Item = &str> {
        self.forms.keys().map(String::as_str)
    }
}
