//! Service configuration.
//!
//! The configuration is a JSON file whose path is taken from the
//! `FORM2PDF_CONFIG` environment variable (default `config.json`). A missing
//! file is not an error: every field has a default suited to running from the
//! repository root. `PORT` overrides the configured port.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::FormError;

const CONFIG_ENV: &str = "FORM2PDF_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// URL prefix all routes are mounted under, e.g. `/form2pdf`.
    pub prefix: String,
    /// JSON file declaring the form types.
    pub forms_spec: PathBuf,
    /// SQLite database holding every filled form.
    pub ledger_location: PathBuf,
    /// Where multipart uploads land before they are hashed.
    pub upload_directory: PathBuf,
    /// Content-addressed store of uploaded attachments.
    pub attachment_directory: PathBuf,
    /// Parent of the per-assembly scratch directories.
    pub temp_dir_location: PathBuf,
    /// Where successfully built PDFs are kept.
    pub built_pdf_location: PathBuf,
    pub max_upload_per_field: usize,
    pub compiler: CompilerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub executable: PathBuf,
    /// Arguments passed before the rendered document path.
    pub args: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            prefix: String::new(),
            forms_spec: PathBuf::from("forms.json"),
            ledger_location: PathBuf::from("data/filledforms.sqlite"),
            upload_directory: PathBuf::from("data/uploads"),
            attachment_directory: PathBuf::from("data/attachments"),
            temp_dir_location: PathBuf::from("data/tmp"),
            built_pdf_location: PathBuf::from("data/pdfs"),
            max_upload_per_field: 10,
            compiler: CompilerConfig::default(),
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("pdflatex"),
            args: vec!["-interaction=nonstopmode".to_string()],
        }
    }
}

impl AppConfig {
    /// Loads the configuration named by the environment.
    pub fn load() -> Result<Self, FormError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from(Path::new(&path))?;
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, FormError> {
        if !path.exists() {
            log::warn!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| FormError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Creates every directory the service writes into.
    pub fn ensure_directories(&self) -> Result<(), FormError> {
        let ledger_dir = self.ledger_location.parent().filter(|p| !p.as_os_str().is_empty());
        for dir in [
            Some(self.upload_directory.as_path()),
            Some(self.attachment_directory.as_path()),
            Some(self.temp_dir_location.as_path()),
            Some(self.built_pdf_location.as_path()),
            ledger_dir,
        ]
        .into_iter()
        .flatten()
        {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.compiler.executable, PathBuf::from("pdflatex"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "port": 9000, "prefix": "/f2l", "compiler": {{ "executable": "lualatex" }} }}"#
        )
        .unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.prefix, "/f2l");
        assert_eq!(config.compiler.executable, PathBuf::from("lualatex"));
        assert_eq!(config.compiler.args, vec!["-interaction=nonstopmode".to_string()]);
        assert_eq!(config.max_upload_per_field, 10);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(FormError::Config(_))
        ));
    }
}
