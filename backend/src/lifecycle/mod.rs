//! # Lifecycle Manager
//!
//! Orchestrates every change to a filled form: saving drafts, finalizing,
//! deleting drafts and branching a new draft from a final version.
//!
//! ## Saving a draft
//!
//! 1.  **Locking**: the form key (and the rename target, if any) is locked for
//!     the whole operation, so concurrent saves of one form are serialized.
//!
//! 2.  **Checks**: form type, key, rename target and the posted data are
//!     checked before anything is stored. A rejected submission leaves no
//!     trace: its uploads are deleted and the ledger is untouched.
//!
//! 3.  **Attachments**: uploads no image slot asked for are deleted. Retained
//!     hashes are verified and new uploads ingested while holding the
//!     collection pin, which is released only after the ledger commit that
//!     references them. Submissions without image slots skip the pin.
//!
//! 4.  **Commit**: the new draft is committed (under the new key on a rename)
//!     before assembly starts.
//!
//! 5.  **Assembly**: the draft is compiled. Success records the document on
//!     the draft; failure leaves the draft persisted without one.
//!
//! Attachments and documents that dropped out of the ledger are garbage
//! collected afterwards; a failed collection only logs.

pub mod reconcile;
pub mod submission;

use crate::assembler::compiler::Compiler;
use crate::assembler::DocumentAssembler;
use crate::error::FormError;
use crate::registry::FormSpecRegistry;
use crate::storage::attachments::AttachmentStore;
use crate::storage::key_locks::KeyLocks;
use crate::storage::ledger_store::LedgerStore;
use common::model::attachment::AttachmentRef;
use common::model::display::project;
use common::model::field_value::{FieldValue, FieldValues};
use common::model::form_instance::{FormInstance, FormSummary};
use common::model::form_spec::{BlockKind, FormSpec};
use common::model::ledger::{DraftWrite, LedgerError, VersionLedger};
use common::responses::{ActionOutcome, EditView, SaveOutcome};
use reconcile::{ImageSlot, Reconciled};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use submission::{RawSubmission, UploadedFile};

/// Key under which the edit view offers a blank form.
pub const NEW_FORM_KEY: &str = "new";

pub struct LifecycleManager<C> {
    registry: FormSpecRegistry,
    ledger: Arc<LedgerStore>,
    attachments: Arc<AttachmentStore>,
    assembler: DocumentAssembler<C>,
    locks: KeyLocks,
    prefix: String,
}

impl<C: Compiler> LifecycleManager<C> {
    pub fn new(
        registry: FormSpecRegistry,
        ledger: Arc<LedgerStore>,
        attachments: Arc<AttachmentStore>,
        assembler: DocumentAssembler<C>,
        prefix: &str,
    ) -> Self {
        Self {
            registry,
            ledger,
            attachments,
            assembler,
            locks: KeyLocks::default(),
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    fn load(&self, key: &str) -> Result<FormInstance, FormError> {
        self.ledger.get(key)?.ok_or_else(|| FormError::FormNotFound {
            key: key.to_string(),
        })
    }

    /// Saves submitted content as the draft of `form_key` and assembles it.
    ///
    /// `target_key` renames the form in the same commit when it differs from
    /// `form_key`.
    pub async fn create_or_update_draft(
        &self,
        form_key: &str,
        form_type: &str,
        target_key: Option<&str>,
        submission: RawSubmission,
    ) -> Result<SaveOutcome, FormError> {
        let new_key = target_key.map(str::trim).unwrap_or(form_key).to_string();
        let _guard = self.locks.lock(&[form_key, new_key.as_str()]).await;

        let (spec, existing, reconciled) =
            match self.check_submission(form_key, form_type, &new_key, &submission) {
                Ok(checked) => checked,
                Err(e) => {
                    log::info!("rejected submission for {}: {}", form_key, e);
                    AttachmentStore::discard(&submission.all_files());
                    return Err(e);
                }
            };

        AttachmentStore::discard(&reconciled.unclaimed_uploads(&submission));

        // text-only saves reference no blobs and never wait for collection
        let pin = if reconciled.images.is_empty() {
            None
        } else {
            Some(self.attachments.pin().await)
        };
        let (values, ingested) = self.store_attachments(reconciled)?;

        let (mut instance, write) = match existing {
            Some(mut instance) => {
                let write = instance.versions.save_draft(values);
                (instance, write)
            }
            None => {
                log::info!("creating form {} of type {}", new_key, form_type);
                let instance = FormInstance {
                    key: new_key.clone(),
                    formtype: form_type.to_string(),
                    versions: VersionLedger::with_first_draft(values),
                };
                (instance, DraftWrite::Appended { version: 1 })
            }
        };
        instance.key = new_key.clone();
        let committed = self.ledger.commit(Some(form_key), &instance);
        drop(pin);
        if let Err(e) = committed {
            self.attachments.collect_quietly(&ingested, &[]).await;
            return Err(e);
        }

        let version = write.version();
        if let DraftWrite::Overwritten { previous, .. } = &write {
            let kept: HashSet<&str> = instance
                .versions
                .get(version)
                .map(|v| v.attachment_hashes().collect())
                .unwrap_or_default();
            let dropped: Vec<String> = previous
                .attachment_hashes()
                .filter(|h| !kept.contains(h))
                .map(str::to_string)
                .collect();
            let superseded: Vec<PathBuf> = previous
                .compiled_document
                .iter()
                .map(|d| d.location.clone())
                .collect();
            self.attachments.collect_quietly(&dropped, &superseded).await;
        }

        let values = instance
            .versions
            .get(version)
            .map_err(|e| FormError::ledger(&new_key, e))?
            .field_values
            .clone();
        match self.assembler.assemble(spec, &values).await {
            Ok(document) => {
                let location = document.location.clone();
                let replaced = instance
                    .versions
                    .set_document(version, document)
                    .map_err(|e| FormError::ledger(&new_key, e))?;
                if let Err(e) = self.ledger.commit(None, &instance) {
                    self.attachments.collect_quietly(&[], &[location]).await;
                    return Err(e);
                }
                if let Some(old) = replaced {
                    self.attachments.collect_quietly(&[], &[old.location]).await;
                }
                Ok(SaveOutcome {
                    formkey: new_key,
                    version,
                    assembled: true,
                    diagnostic: None,
                })
            }
            Err(e) => {
                log::warn!("assembly of {} version {} failed: {}", new_key, version, e);
                Ok(SaveOutcome {
                    formkey: new_key,
                    version,
                    assembled: false,
                    diagnostic: Some(e.to_string()),
                })
            }
        }
    }

    /// Everything that may reject a submission before storage is touched.
    fn check_submission(
        &self,
        form_key: &str,
        form_type: &str,
        new_key: &str,
        submission: &RawSubmission,
    ) -> Result<(&FormSpec, Option<FormInstance>, Reconciled), FormError> {
        let spec = self.registry.get(form_type)?;
        if form_key.trim().is_empty() || new_key.is_empty() {
            return Err(FormError::InvalidKey);
        }
        let existing = self.ledger.get(form_key)?;
        if let Some(instance) = &existing {
            if instance.formtype != form_type {
                return Err(FormError::FormTypeMismatch {
                    key: form_key.to_string(),
                    stored: instance.formtype.clone(),
                    requested: form_type.to_string(),
                });
            }
        }
        if new_key != form_key && self.ledger.exists(new_key)? {
            return Err(FormError::NameConflict {
                key: new_key.to_string(),
            });
        }
        let reconciled = reconcile::reconcile(spec, submission)?;
        Ok((spec, existing, reconciled))
    }

    /// Turns image slots into attachment references.
    ///
    /// Must run under the collection pin whenever there are image slots. Returns the field values and the
    /// hashes of newly ingested uploads.
    fn store_attachments(
        &self,
        reconciled: Reconciled,
    ) -> Result<(FieldValues, Vec<String>), FormError> {
        let uploads: Vec<UploadedFile> = reconciled.new_uploads().cloned().collect();
        let Reconciled { mut values, images } = reconciled;

        let missing: Vec<String> = images
            .iter()
            .flat_map(|(name, slots)| slots.iter().map(move |slot| (name, slot)))
            .filter_map(|(name, slot)| match slot {
                ImageSlot::Existing(r) if !self.attachments.contains(&r.hash) => Some(format!(
                    "field {}: retained file {} ({}) is not in storage",
                    name, r.display_name, r.hash
                )),
                _ => None,
            })
            .collect();
        if !missing.is_empty() {
            AttachmentStore::discard(&uploads);
            return Err(FormError::MalformedUpload(missing));
        }

        let mut ingested = Vec::new();
        for (name, slots) in images {
            let mut refs: Vec<AttachmentRef> = Vec::with_capacity(slots.len());
            for slot in slots {
                match slot {
                    ImageSlot::Existing(r) => refs.push(r),
                    ImageSlot::New(upload) => match self.attachments.ingest(&upload) {
                        Ok(r) => {
                            ingested.push(r.hash.clone());
                            refs.push(r);
                        }
                        Err(e) => {
                            AttachmentStore::discard(&uploads);
                            return Err(e);
                        }
                    },
                }
            }
            values.insert(name, FieldValue::Attachments(refs));
        }
        Ok((values, ingested))
    }

    pub async fn finalize(&self, form_key: &str, version: u32) -> Result<ActionOutcome, FormError> {
        let _guard = self.locks.lock(&[form_key]).await;
        let mut instance = self.load(form_key)?;
        instance
            .versions
            .finalize(version)
            .map_err(|e| FormError::ledger(form_key, e))?;
        self.ledger.commit(None, &instance)?;
        log::info!("finalized {} version {}", form_key, version);
        Ok(ActionOutcome {
            formkey: form_key.to_string(),
            version,
            message: format!("version {} is now final", version),
        })
    }

    /// Removes the trailing draft; removing version 1 removes the whole form.
    pub async fn delete_draft(
        &self,
        form_key: &str,
        version: u32,
    ) -> Result<ActionOutcome, FormError> {
        let _guard = self.locks.lock(&[form_key]).await;
        let mut instance = self.load(form_key)?;
        let removed = instance
            .versions
            .remove_draft(version)
            .map_err(|e| FormError::ledger(form_key, e))?;
        let message = if instance.versions.is_empty() {
            self.ledger.remove(form_key)?;
            log::info!("deleted form {}", form_key);
            format!("form {} deleted", form_key)
        } else {
            self.ledger.commit(None, &instance)?;
            log::info!("deleted draft {} of {}", version, form_key);
            format!("draft version {} deleted", version)
        };

        let hashes: Vec<String> = removed.attachment_hashes().map(str::to_string).collect();
        let documents: Vec<PathBuf> = removed
            .compiled_document
            .into_iter()
            .map(|d| d.location)
            .collect();
        self.attachments.collect_quietly(&hashes, &documents).await;

        Ok(ActionOutcome {
            formkey: form_key.to_string(),
            version,
            message,
        })
    }

    /// Starts a new draft from the content of final version `version`.
    pub async fn branch_draft_from(
        &self,
        form_key: &str,
        version: u32,
    ) -> Result<ActionOutcome, FormError> {
        let _guard = self.locks.lock(&[form_key]).await;
        let mut instance = self.load(form_key)?;
        let new_version = instance
            .versions
            .branch_from(version)
            .map_err(|e| FormError::ledger(form_key, e))?;
        self.ledger.commit(None, &instance)?;
        log::info!(
            "created draft {} of {} from version {}",
            new_version,
            form_key,
            version
        );
        Ok(ActionOutcome {
            formkey: form_key.to_string(),
            version: new_version,
            message: format!("draft version {} created from version {}", new_version, version),
        })
    }

    /// Stores a new form whose first draft holds the block defaults.
    pub async fn create_with_defaults(
        &self,
        form_type: &str,
        form_key: &str,
    ) -> Result<ActionOutcome, FormError> {
        let spec = self.registry.get(form_type)?;
        let key = form_key.trim();
        if key.is_empty() {
            return Err(FormError::InvalidKey);
        }
        let _guard = self.locks.lock(&[key]).await;
        if self.ledger.exists(key)? {
            return Err(FormError::NameConflict {
                key: key.to_string(),
            });
        }
        let values: FieldValues = spec
            .blocks
            .iter()
            .filter(|b| b.kind != BlockKind::Image)
            .map(|b| (b.name.clone(), b.default_field_value()))
            .collect();
        let instance = FormInstance {
            key: key.to_string(),
            formtype: form_type.to_string(),
            versions: VersionLedger::with_first_draft(values),
        };
        self.ledger.commit(None, &instance)?;
        log::info!("created form {} of type {}", key, form_type);
        Ok(ActionOutcome {
            formkey: key.to_string(),
            version: 1,
            message: format!("form {} created", key),
        })
    }

    pub fn list_forms(&self) -> Result<Vec<FormSummary>, FormError> {
        Ok(self
            .ledger
            .snapshot()?
            .iter()
            .map(FormInstance::summary)
            .collect())
    }

    pub fn form_types(&self) -> Vec<String> {
        self.registry.formtypes().map(str::to_string).collect()
    }

    /// What the edit page shows for one version; the latest when `version`
    /// is absent or out of range.
    pub fn edit_view(
        &self,
        form_type: &str,
        form_key: &str,
        version: Option<u32>,
    ) -> Result<EditView, FormError> {
        let spec = self.registry.get(form_type)?;
        let instance = match self.ledger.get(form_key)? {
            Some(instance) => instance,
            None if form_key == NEW_FORM_KEY => {
                return Ok(EditView {
                    formkey: form_key.to_string(),
                    formtype: form_type.to_string(),
                    version: 1,
                    based_on_version: None,
                    is_draft: true,
                    has_document: false,
                    document_link: None,
                    blocks: spec.blocks.iter().map(|b| project(b, None)).collect(),
                })
            }
            None => {
                return Err(FormError::FormNotFound {
                    key: form_key.to_string(),
                })
            }
        };
        if instance.formtype != form_type {
            return Err(FormError::FormTypeMismatch {
                key: form_key.to_string(),
                stored: instance.formtype,
                requested: form_type.to_string(),
            });
        }

        let snapshot = version
            .and_then(|n| instance.versions.get(n).ok())
            .or_else(|| instance.versions.latest())
            .ok_or_else(|| {
                FormError::ledger(form_key, LedgerError::Corrupt("no versions".to_string()))
            })?;
        let has_document = snapshot.compiled_document.is_some();
        Ok(EditView {
            formkey: form_key.to_string(),
            formtype: form_type.to_string(),
            version: snapshot.version,
            based_on_version: snapshot.based_on_version,
            is_draft: !snapshot.is_final,
            has_document,
            document_link: has_document.then(|| {
                format!(
                    "{}/forms/{}/{}/{}/pdf",
                    self.prefix, form_type, form_key, snapshot.version
                )
            }),
            blocks: spec
                .blocks
                .iter()
                .map(|b| project(b, snapshot.field_values.get(&b.name)))
                .collect(),
        })
    }

    /// Location of a version's compiled document and its download name.
    pub fn document(&self, form_key: &str, version: u32) -> Result<(PathBuf, String), FormError> {
        let instance = self.load(form_key)?;
        let snapshot = instance
            .versions
            .get(version)
            .map_err(|e| FormError::ledger(form_key, e))?;
        let document = snapshot
            .compiled_document
            .as_ref()
            .filter(|d| d.location.is_file())
            .ok_or_else(|| FormError::ledger(form_key, LedgerError::MissingDocument { version }))?;
        Ok((
            document.location.clone(),
            format!("{}_v{}.pdf", form_key, version),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::compiler::testing::ScriptedCompiler;
    use crate::registry::tests::SAMPLE_FORMS;
    use common::model::form_spec::FormSpec;
    use std::collections::BTreeMap;
    use std::fs;

    const TEMPLATE: &str =
        "{{TESTTITLE}}\n{{#TESTTABLEROW}}{{VALUE}}\\\\\n{{/TESTTABLEROW}}{{#TESTIMAGE}}{{PATH}}\n{{/TESTIMAGE}}";
    const GIF: &str = "image/gif";

    struct Fixture {
        dir: tempfile::TempDir,
        ledger: Arc<LedgerStore>,
        attachments: Arc<AttachmentStore>,
        manager: LifecycleManager<ScriptedCompiler>,
    }

    fn fixture_with(compiler: ScriptedCompiler) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["scratch", "pdfs", "uploads"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        let template = dir.path().join("form.tex");
        fs::write(&template, TEMPLATE).unwrap();

        let mut specs: BTreeMap<String, FormSpec> = serde_json::from_str(SAMPLE_FORMS).unwrap();
        for spec in specs.values_mut() {
            spec.template_path = template.clone();
        }
        let registry = FormSpecRegistry::from_specs(specs).unwrap();
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let attachments =
            Arc::new(AttachmentStore::open(&dir.path().join("blobs"), ledger.clone()).unwrap());
        let assembler = DocumentAssembler::new(
            compiler,
            attachments.clone(),
            &dir.path().join("scratch"),
            &dir.path().join("pdfs"),
        );
        let manager =
            LifecycleManager::new(registry, ledger.clone(), attachments.clone(), assembler, "/app/");
        Fixture {
            dir,
            ledger,
            attachments,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedCompiler::default())
    }

    impl Fixture {
        fn upload(&self, name: &str, mime: &str, content: &[u8]) -> UploadedFile {
            let path = self.dir.path().join("uploads").join(name);
            fs::write(&path, content).unwrap();
            UploadedFile {
                original_name: name.to_string(),
                mime_type: mime.to_string(),
                stored_path: path,
            }
        }

        fn uploads_left(&self) -> usize {
            fs::read_dir(self.dir.path().join("uploads")).unwrap().count()
        }

        fn form(&self, key: &str) -> FormInstance {
            self.ledger.get(key).unwrap().unwrap()
        }

        async fn save_title(&self, key: &str, title: &str) -> SaveOutcome {
            let mut sub = RawSubmission::default();
            sub.add_field("TESTTITLE", title);
            self.manager
                .create_or_update_draft(key, "FormType1", None, sub)
                .await
                .unwrap()
        }

        /// A form whose version 1 is final.
        async fn final_form(&self, key: &str) {
            self.save_title(key, "first").await;
            self.manager.finalize(key, 1).await.unwrap();
        }
    }

    fn image_submission(f: &Fixture, name: &str, content: &[u8]) -> RawSubmission {
        let mut sub = RawSubmission::default();
        sub.add_field("TESTIMAGE", "new_file")
            .add_file("TESTIMAGE_FILE", f.upload(name, "image/png", content));
        sub
    }

    fn keep_image(sub: &mut RawSubmission, r: &AttachmentRef) {
        sub.add_field("TESTIMAGE", "existing_file")
            .add_field("TESTIMAGE_HASH", r.hash.as_str())
            .add_field("TESTIMAGE_FILENAME", r.display_name.as_str())
            .add_field("TESTIMAGE_MIMETYPE", r.mime_type.as_str());
    }

    fn images_of(instance: &FormInstance, version: u32) -> Vec<AttachmentRef> {
        match instance.versions.get(version).unwrap().field_values.get("TESTIMAGE") {
            Some(FieldValue::Attachments(refs)) => refs.clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[actix_web::test]
    async fn first_save_creates_a_draft_under_the_new_key() {
        let f = fixture();
        let out = f.save_title(NEW_FORM_KEY, "Hello").await;
        assert_eq!(out.formkey, NEW_FORM_KEY);
        assert_eq!(out.version, 1);
        assert!(out.assembled);

        let form = f.form(NEW_FORM_KEY);
        let v1 = form.versions.get(1).unwrap();
        assert!(!v1.is_final);
        assert_eq!(
            v1.field_values.get("TESTTITLE"),
            Some(&FieldValue::Text("Hello".into()))
        );
        assert!(v1.compiled_document.as_ref().unwrap().location.is_file());
    }

    #[actix_web::test]
    async fn first_save_can_rename_away_from_new() {
        let f = fixture();
        let mut sub = RawSubmission::default();
        sub.add_field("TESTTITLE", "Hello");
        let out = f
            .manager
            .create_or_update_draft(NEW_FORM_KEY, "FormType1", Some("report"), sub)
            .await
            .unwrap();
        assert_eq!(out.formkey, "report");
        assert!(f.ledger.exists("report").unwrap());
        assert!(!f.ledger.exists(NEW_FORM_KEY).unwrap());
    }

    #[actix_web::test]
    async fn draft_tail_is_overwritten_in_place() {
        let f = fixture();
        let first = f.save_title("k", "one").await;
        let first_doc = f.form("k").versions.get(1).unwrap().compiled_document.clone().unwrap();
        let second = f.save_title("k", "two").await;
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 1);

        let form = f.form("k");
        assert_eq!(form.versions.len(), 1);
        let v1 = form.versions.get(1).unwrap();
        assert_eq!(v1.field_values.get("TESTTITLE"), Some(&FieldValue::Text("two".into())));
        let doc = v1.compiled_document.clone().unwrap();
        assert_ne!(doc, first_doc);
        // the superseded build is collected
        assert!(!first_doc.location.exists());
        assert!(doc.location.is_file());
    }

    #[actix_web::test]
    async fn final_tail_gets_exactly_one_new_draft() {
        let f = fixture();
        f.final_form("k").await;
        let out = f.save_title("k", "second").await;
        assert_eq!(out.version, 2);
        let form = f.form("k");
        assert_eq!(form.versions.len(), 2);
        assert!(form.versions.get(1).unwrap().is_final);
        let v2 = form.versions.get(2).unwrap();
        assert!(!v2.is_final);
        assert_eq!(v2.based_on_version, None);
    }

    #[actix_web::test]
    async fn failed_assembly_keeps_the_draft_without_document() {
        let f = fixture_with(ScriptedCompiler::with_codes(&[Some(0), Some(0), Some(1)]));
        f.save_title("k", "good").await;
        let out = f.save_title("k", "bad").await;
        assert!(!out.assembled);
        assert!(out.diagnostic.unwrap().contains("exit code 1"));

        let v1 = f.form("k").versions.get(1).unwrap().clone();
        assert_eq!(v1.field_values.get("TESTTITLE"), Some(&FieldValue::Text("bad".into())));
        assert!(v1.compiled_document.is_none());
        // a failing first pass is not followed by a second one
        assert_eq!(f.manager.assembler.compiler().passes(), 3);
        assert!(matches!(
            f.manager.finalize("k", 1).await,
            Err(FormError::Ledger {
                source: LedgerError::MissingDocument { version: 1 },
                ..
            })
        ));
    }

    #[actix_web::test]
    async fn rename_onto_existing_form_is_refused() {
        let f = fixture();
        f.save_title("a", "A").await;
        f.save_title("b", "B").await;
        let mut sub = image_submission(&f, "x.png", b"x");
        sub.add_field("TESTTITLE", "A2");
        let result = f
            .manager
            .create_or_update_draft("a", "FormType1", Some("b"), sub)
            .await;
        assert!(matches!(result, Err(FormError::NameConflict { key }) if key == "b"));
        assert_eq!(f.uploads_left(), 0);
        let a = f.form("a");
        assert_eq!(
            a.versions.get(1).unwrap().field_values.get("TESTTITLE"),
            Some(&FieldValue::Text("A".into()))
        );
    }

    #[actix_web::test]
    async fn rename_moves_the_whole_ledger() {
        let f = fixture();
        f.final_form("old").await;
        let out = f
            .manager
            .create_or_update_draft("old", "FormType1", Some("fresh"), RawSubmission::default())
            .await
            .unwrap();
        assert_eq!(out.formkey, "fresh");
        assert_eq!(out.version, 2);
        assert!(!f.ledger.exists("old").unwrap());
        assert_eq!(f.form("fresh").versions.len(), 2);
    }

    #[actix_web::test]
    async fn wrong_form_type_is_refused() {
        let f = fixture();
        let result = f
            .manager
            .create_or_update_draft("k", "Unknown", None, RawSubmission::default())
            .await;
        assert!(matches!(result, Err(FormError::UnknownFormType(_))));
        assert!(!f.ledger.exists("k").unwrap());
    }

    #[actix_web::test]
    async fn scalar_table_row_is_stored_as_list() {
        let f = fixture();
        let mut sub = RawSubmission::default();
        sub.add_field("TESTTABLEROW", "foo & bar");
        f.manager
            .create_or_update_draft("k", "FormType1", None, sub)
            .await
            .unwrap();
        assert_eq!(
            f.form("k").versions.get(1).unwrap().field_values.get("TESTTABLEROW"),
            Some(&FieldValue::List(vec!["foo & bar".into()]))
        );
    }

    #[actix_web::test]
    async fn unsupported_upload_commits_nothing() {
        let f = fixture();
        let kept = {
            let out = f
                .manager
                .create_or_update_draft("k", "FormType1", None, image_submission(&f, "a.png", b"a"))
                .await
                .unwrap();
            assert_eq!(out.version, 1);
            images_of(&f.form("k"), 1)[0].clone()
        };
        let before = f.form("k");

        let mut sub = RawSubmission::default();
        keep_image(&mut sub, &kept);
        sub.add_field("TESTIMAGE", "new_file")
            .add_file("TESTIMAGE_FILE", f.upload("anim.gif", GIF, b"gif"));
        sub.add_field("TESTTITLE", "changed");
        match f.manager.create_or_update_draft("k", "FormType1", None, sub).await {
            Err(FormError::MalformedUpload(msgs)) => {
                assert_eq!(msgs.len(), 1);
                assert!(msgs[0].contains("anim.gif"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.form("k"), before);
        assert_eq!(f.uploads_left(), 0);
        assert!(f.attachments.contains(&kept.hash));
    }

    #[actix_web::test]
    async fn retained_hash_must_exist_in_storage() {
        let f = fixture();
        let mut sub = RawSubmission::default();
        keep_image(
            &mut sub,
            &AttachmentRef {
                hash: "0123456789abcdef0123456789abcdef".into(),
                display_name: "ghost.png".into(),
                mime_type: "image/png".into(),
            },
        );
        sub.add_field("TESTIMAGE", "new_file")
            .add_file("TESTIMAGE_FILE", f.upload("b.png", "image/png", b"b"));
        let result = f.manager.create_or_update_draft("k", "FormType1", None, sub).await;
        assert!(matches!(result, Err(FormError::MalformedUpload(m)) if m[0].contains("ghost.png")));
        assert!(!f.ledger.exists("k").unwrap());
        assert_eq!(f.uploads_left(), 0);
    }

    #[actix_web::test]
    async fn images_keep_slot_order_and_dropped_ones_are_collected() {
        let f = fixture();
        f.manager
            .create_or_update_draft("k", "FormType1", None, image_submission(&f, "a.png", b"a"))
            .await
            .unwrap();
        let a = images_of(&f.form("k"), 1)[0].clone();

        // add b in front of a
        let mut sub = image_submission(&f, "b.png", b"b");
        keep_image(&mut sub, &a);
        f.manager
            .create_or_update_draft("k", "FormType1", None, sub)
            .await
            .unwrap();
        let refs = images_of(&f.form("k"), 1);
        assert_eq!(
            refs.iter().map(|r| r.display_name.as_str()).collect::<Vec<_>>(),
            vec!["b.png", "a.png"]
        );
        let b = refs[0].clone();

        // drop a
        let mut sub = RawSubmission::default();
        keep_image(&mut sub, &b);
        f.manager
            .create_or_update_draft("k", "FormType1", None, sub)
            .await
            .unwrap();
        assert!(!f.attachments.contains(&a.hash));
        assert!(f.attachments.contains(&b.hash));
    }

    #[actix_web::test]
    async fn blob_shared_with_a_final_version_survives_draft_changes() {
        let f = fixture();
        f.manager
            .create_or_update_draft("k", "FormType1", None, image_submission(&f, "a.png", b"a"))
            .await
            .unwrap();
        let a = images_of(&f.form("k"), 1)[0].clone();
        f.manager.finalize("k", 1).await.unwrap();
        f.manager.branch_draft_from("k", 1).await.unwrap();

        // the branched draft lets go of the image
        let mut sub = RawSubmission::default();
        sub.add_field("TESTIMAGE", "new_file");
        f.manager
            .create_or_update_draft("k", "FormType1", None, sub)
            .await
            .unwrap();
        assert!(images_of(&f.form("k"), 2).is_empty());
        assert!(f.attachments.contains(&a.hash));

        f.manager.delete_draft("k", 2).await.unwrap();
        assert!(f.attachments.contains(&a.hash));
        assert_eq!(f.attachments.reference_count(&a.hash).unwrap(), 1);
    }

    #[actix_web::test]
    async fn finalize_rules() {
        let f = fixture();
        f.save_title("k", "t").await;
        assert!(matches!(
            f.manager.finalize("k", 5).await,
            Err(FormError::Ledger {
                source: LedgerError::NotFound { version: 5 },
                ..
            })
        ));
        f.manager.finalize("k", 1).await.unwrap();
        assert!(f.form("k").versions.get(1).unwrap().is_final);
        assert!(matches!(
            f.manager.finalize("k", 1).await,
            Err(FormError::Ledger {
                source: LedgerError::AlreadyFinal { version: 1 },
                ..
            })
        ));
        assert!(matches!(
            f.manager.finalize("nobody", 1).await,
            Err(FormError::FormNotFound { .. })
        ));
    }

    #[actix_web::test]
    async fn finalize_draft_without_document_is_missing_document() {
        let f = fixture();
        f.final_form("k").await;
        f.manager.branch_draft_from("k", 1).await.unwrap();
        assert!(matches!(
            f.manager.finalize("k", 2).await,
            Err(FormError::Ledger {
                source: LedgerError::MissingDocument { version: 2 },
                ..
            })
        ));
    }

    #[actix_web::test]
    async fn deleting_version_one_removes_the_form_and_its_files() {
        let f = fixture();
        f.manager
            .create_or_update_draft("k", "FormType1", None, image_submission(&f, "a.png", b"a"))
            .await
            .unwrap();
        let form = f.form("k");
        let a = images_of(&form, 1)[0].clone();
        let doc = form.versions.get(1).unwrap().compiled_document.clone().unwrap();

        f.manager.delete_draft("k", 1).await.unwrap();
        assert!(!f.ledger.exists("k").unwrap());
        assert!(!f.attachments.contains(&a.hash));
        assert!(!doc.location.exists());
    }

    #[actix_web::test]
    async fn deleting_a_later_draft_keeps_the_rest() {
        let f = fixture();
        f.final_form("k").await;
        f.save_title("k", "second").await;
        assert!(matches!(
            f.manager.delete_draft("k", 1).await,
            Err(FormError::Ledger {
                source: LedgerError::CannotDeleteFinal { version: 1 },
                ..
            })
        ));
        f.manager.delete_draft("k", 2).await.unwrap();
        let form = f.form("k");
        assert_eq!(form.versions.len(), 1);
        assert!(form.versions.get(1).unwrap().is_final);
        assert!(matches!(
            f.manager.delete_draft("k", 2).await,
            Err(FormError::Ledger {
                source: LedgerError::NotFound { version: 2 },
                ..
            })
        ));
    }

    #[actix_web::test]
    async fn branch_copies_final_content() {
        let f = fixture();
        f.final_form("k").await;
        let out = f.manager.branch_draft_from("k", 1).await.unwrap();
        assert_eq!(out.version, 2);
        let form = f.form("k");
        let (v1, v2) = (form.versions.get(1).unwrap(), form.versions.get(2).unwrap());
        assert!(!v2.is_final);
        assert_eq!(v2.based_on_version, Some(1));
        assert_eq!(v2.field_values, v1.field_values);
        assert!(v2.compiled_document.is_none());
    }

    #[actix_web::test]
    async fn branch_with_draft_tail_is_refused_for_any_source() {
        let f = fixture();
        f.final_form("k").await;
        f.manager.branch_draft_from("k", 1).await.unwrap();
        for source in [1, 2, 9] {
            assert!(matches!(
                f.manager.branch_draft_from("k", source).await,
                Err(FormError::Ledger {
                    source: LedgerError::DraftAlreadyExists { version: 2 },
                    ..
                })
            ));
        }
    }

    #[actix_web::test]
    async fn create_with_defaults_and_listing() {
        let f = fixture();
        f.manager.create_with_defaults("FormType1", "b-form").await.unwrap();
        f.save_title("a-form", "x").await;
        assert!(matches!(
            f.manager.create_with_defaults("FormType1", "b-form").await,
            Err(FormError::NameConflict { .. })
        ));
        assert!(matches!(
            f.manager.create_with_defaults("FormType1", "  ").await,
            Err(FormError::InvalidKey)
        ));

        let v1 = f.form("b-form").versions.get(1).unwrap().clone();
        assert_eq!(v1.field_values.get("TESTTITLE"), Some(&FieldValue::Text("Test Title".into())));
        assert!(v1.compiled_document.is_none());

        let listing = f.manager.list_forms().unwrap();
        let keys: Vec<&str> = listing.iter().map(|s| s.formkey.as_str()).collect();
        assert_eq!(keys, vec!["a-form", "b-form"]);
        assert!(listing[0].versions[0].has_document);
        assert!(listing[1].versions[0].is_draft);
        assert_eq!(f.manager.form_types(), vec!["FormType1".to_string()]);
    }

    #[actix_web::test]
    async fn edit_view_projects_the_addressed_version() {
        let f = fixture();
        let blank = f.manager.edit_view("FormType1", NEW_FORM_KEY, None).unwrap();
        assert_eq!(blank.version, 1);
        assert!(blank.is_draft && !blank.has_document);
        assert_eq!(blank.blocks.len(), 3);

        f.final_form("k").await;
        f.manager.branch_draft_from("k", 1).await.unwrap();

        let latest = f.manager.edit_view("FormType1", "k", None).unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.based_on_version, Some(1));
        assert!(latest.document_link.is_none());

        let first = f.manager.edit_view("FormType1", "k", Some(1)).unwrap();
        assert!(!first.is_draft);
        assert_eq!(first.document_link.as_deref(), Some("/app/forms/FormType1/k/1/pdf"));

        let fallback = f.manager.edit_view("FormType1", "k", Some(42)).unwrap();
        assert_eq!(fallback.version, 2);

        assert!(matches!(
            f.manager.edit_view("FormType1", "nobody", None),
            Err(FormError::FormNotFound { .. })
        ));
    }

    #[actix_web::test]
    async fn document_is_served_under_key_and_version() {
        let f = fixture();
        f.save_title("k", "t").await;
        let (path, name) = f.manager.document("k", 1).unwrap();
        assert!(path.is_file());
        assert_eq!(name, "k_v1.pdf");
        assert!(matches!(
            f.manager.document("k", 2),
            Err(FormError::Ledger {
                source: LedgerError::NotFound { version: 2 },
                ..
            })
        ));
    }

    fn title(form: &FormInstance, version: u32) -> Option<FieldValue> {
        form.versions
            .get(version)
            .ok()
            .and_then(|v| v.field_values.get("TESTTITLE").cloned())
    }

    #[actix_web::test]
    async fn second_save_of_a_form_waits_for_the_first() {
        let f = fixture_with(ScriptedCompiler::holding_first_pass());
        let compiler = f.manager.assembler.compiler();

        let second = async {
            while compiler.passes() == 0 {
                tokio::task::yield_now().await;
            }
            f.save_title("k", "second").await
        };
        let observer = async {
            while compiler.passes() == 0 {
                tokio::task::yield_now().await;
            }
            // the first save is parked inside its compile; give the second a chance
            for _ in 0..50 {
                tokio::task::yield_now().await;
            }
            let seen = (title(&f.form("k"), 1), compiler.passes());
            compiler.release();
            seen
        };
        let (a, b, (seen_title, seen_passes)) =
            futures_util::join!(f.save_title("k", "first"), second, observer);

        assert_eq!(seen_title, Some(FieldValue::Text("first".to_string())));
        assert_eq!(seen_passes, 1);
        assert_eq!(a.version, 1);
        assert_eq!(b.version, 1);
        let form = f.form("k");
        assert_eq!(form.versions.len(), 1);
        assert_eq!(title(&form, 1), Some(FieldValue::Text("second".to_string())));
        form.versions.check_invariants().unwrap();
    }

    #[actix_web::test]
    async fn text_only_save_does_not_wait_for_collection() {
        let f = fixture();
        let gate = f.attachments.hold_collection().await;
        let ledger = f.ledger.clone();
        let observer = async move {
            let mut committed = false;
            for _ in 0..200 {
                if ledger.exists("k").unwrap() {
                    committed = true;
                    break;
                }
                tokio::task::yield_now().await;
            }
            drop(gate);
            committed
        };
        let (saved, committed) = futures_util::join!(f.save_title("k", "t"), observer);
        assert!(committed);
        assert_eq!(saved.version, 1);
    }

    #[actix_web::test]
    async fn uploads_without_a_slot_are_removed_after_save() {
        let f = fixture();
        let mut sub = RawSubmission::default();
        sub.add_field("TESTTITLE", "t")
            .add_file("TESTIMAGE_FILE", f.upload("orphan.png", "image/png", b"png"))
            .add_file("STRAY_FILE", f.upload("stray.png", "image/png", b"stray"));
        let saved = f
            .manager
            .create_or_update_draft("k", "FormType1", None, sub)
            .await
            .unwrap();
        assert_eq!(saved.version, 1);
        assert!(saved.assembled);
        assert_eq!(f.uploads_left(), 0);
        assert!(!f.form("k").versions.get(1).unwrap().field_values.contains_key("TESTIMAGE"));
    }
}
