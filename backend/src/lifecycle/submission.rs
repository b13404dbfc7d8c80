use std::collections::HashMap;
use std::path::PathBuf;

/// A file received with a submission, already written to the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_type: String,
    pub stored_path: PathBuf,
}

/// The fields and files of one posted edit form, before interpretation.
///
/// Every field may be posted several times (repeated table rows, one marker
/// per image slot), so values are always kept as lists in posting order.
#[derive(Debug, Clone, Default)]
pub struct RawSubmission {
    pub fields: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<UploadedFile>>,
}

impl RawSubmission {
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn add_file(&mut self, name: impl Into<String>, file: UploadedFile) -> &mut Self {
        self.files.entry(name.into()).or_default().push(file);
        self
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Every uploaded file, for cleanup when the submission is rejected.
    pub fn all_files(&self) -> Vec<UploadedFile> {
        self.files.values().flatten().cloned().collect()
    }
}
