//! # Document Assembler
//!
//! Turns one version's field values into a compiled PDF.
//!
//! ## Workflow:
//!
//! 1.  **Scratch directory**: every assembly gets its own temporary directory
//!     under `temp_dir_location`, removed when the assembly finishes whatever
//!     the outcome.
//!
//! 2.  **Substitutions**: field values (or block defaults) are mapped to
//!     template substitutions. Attachments are copied into the scratch
//!     directory as `<hash>.<ext>` and referenced by that file name.
//!
//! 3.  **Rendering**: the form type's template is rendered to
//!     `<output_basename>.tex` in the scratch directory.
//!
//! 4.  **Compilation**: the compiler runs twice so cross references resolve.
//!     A failing first pass stops the assembly without a second pass.
//!
//! 5.  **Publishing**: the resulting `<output_basename>.pdf` is copied to the
//!     built-PDF directory under a fresh `builtpdf-<uuid>.pdf` name.

pub mod compiler;
pub mod substitutions;
pub mod template;

use crate::assembler::compiler::Compiler;
use crate::error::FormError;
use crate::storage::attachments::AttachmentStore;
use common::model::field_value::FieldValues;
use common::model::form_spec::FormSpec;
use common::model::version::CompiledDocument;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const COMPILER_PASSES: usize = 2;

pub struct DocumentAssembler<C> {
    compiler: C,
    attachments: Arc<AttachmentStore>,
    scratch_root: PathBuf,
    output_dir: PathBuf,
}

impl<C: Compiler> DocumentAssembler<C> {
    pub fn new(
        compiler: C,
        attachments: Arc<AttachmentStore>,
        scratch_root: &Path,
        output_dir: &Path,
    ) -> Self {
        Self {
            compiler,
            attachments,
            scratch_root: scratch_root.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    #[cfg(test)]
    pub(crate) fn compiler(&self) -> &C {
        &self.compiler
    }

    pub async fn assemble(
        &self,
        spec: &FormSpec,
        values: &FieldValues,
    ) -> Result<CompiledDocument, FormError> {
        let scratch = tempfile::Builder::new()
            .prefix("assemble")
            .tempdir_in(&self.scratch_root)?;
        let workdir = scratch.path();

        let subs = substitutions::build_substitutions(spec, values, |r| {
            self.attachments.materialize(&r.hash, &r.mime_type, workdir)
        })?;

        let template_text = tokio::fs::read_to_string(&spec.template_path)
            .await
            .map_err(|e| {
                FormError::Template(format!("{}: {}", spec.template_path.display(), e))
            })?;
        let rendered = template::render(&template_text, &subs)?;

        let document = workdir.join(format!("{}.tex", spec.output_basename));
        tokio::fs::write(&document, rendered).await?;

        let built = self.compile_twice(workdir, &document).await?;
        let location = self
            .output_dir
            .join(format!("builtpdf-{}.pdf", Uuid::new_v4()));
        tokio::fs::copy(&built, &location).await?;
        log::info!(
            "assembled {} for form type {} into {}",
            document.display(),
            spec.formtype,
            location.display()
        );
        Ok(CompiledDocument { location })
    }

    /// Runs the compiler passes and returns the path of the produced PDF.
    async fn compile_twice(&self, workdir: &Path, document: &Path) -> Result<PathBuf, FormError> {
        for pass in 1..=COMPILER_PASSES {
            let status = self.compiler.compile(workdir, document).await?;
            if !status.success() {
                log::warn!(
                    "compiler pass {} of {} failed for {}",
                    pass,
                    COMPILER_PASSES,
                    document.display()
                );
                return Err(FormError::CompilationFailed {
                    exit_code: status.code,
                });
            }
        }
        let output = document.with_extension("pdf");
        if !output.is_file() {
            return Err(FormError::MissingOutput { path: output });
        }
        Ok(output)
    }
}
