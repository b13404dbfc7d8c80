//! Content-addressed store of uploaded attachments.
//!
//! ## Workflow
//!
//! 1.  **Ingest**: a multipart upload first lands as a temp file in the upload
//!     directory. `ingest` hashes it with MD5 and moves it to
//!     `<attachment_directory>/<md5>`. Identical uploads collapse into one blob.
//!
//! 2.  **Reference**: field values point at blobs through `AttachmentRef::hash`.
//!     Those references are weak; nothing is deleted when a form lets go of one.
//!
//! 3.  **Collect**: `garbage_collect` deletes a blob only when no version of
//!     any form references it any more, based on one consistent scan of the
//!     ledger store. `garbage_collect_document` does the same for built PDFs.
//!
//! Writers that are about to commit a reference hold a shared `pin` guard from
//! the moment they ingest or accept a hash until their ledger commit is done.
//! Collection takes the exclusive side of the same lock around scan-and-delete,
//! so it can never remove a blob a pending commit is about to reference. The
//! scan itself runs on the blocking pool, off the request executor.

use crate::error::FormError;
use crate::lifecycle::submission::UploadedFile;
use crate::storage::ledger_store::LedgerStore;
use common::model::attachment::{AttachmentRef, SupportedMedia};
use md5::Context;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

pub struct AttachmentStore {
    root: PathBuf,
    ledger: Arc<LedgerStore>,
    gate: RwLock<()>,
}

impl AttachmentStore {
    pub fn open(root: &Path, ledger: Arc<LedgerStore>) -> Result<Self, FormError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            ledger,
            gate: RwLock::new(()),
        })
    }

    /// Blob path of `hash`; anything that is not an MD5 hex digest is unknown.
    fn blob_path(&self, hash: &str) -> Result<PathBuf, FormError> {
        let well_formed = hash.len() == 32 && hash.bytes().all(|b| b.is_ascii_hexdigit());
        if !well_formed {
            return Err(FormError::MissingBlob {
                hash: hash.to_string(),
            });
        }
        Ok(self.root.join(hash))
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.blob_path(hash).is_ok_and(|p| p.is_file())
    }

    /// Holds off collection until the returned guard is dropped.
    pub async fn pin(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Moves an uploaded temp file into the store under its content hash.
    pub fn ingest(&self, upload: &UploadedFile) -> Result<AttachmentRef, FormError> {
        let hash = hash_file(&upload.stored_path)?;
        let target = self.root.join(&hash);
        if target.is_file() {
            log::debug!("blob {} already stored, dropping upload", hash);
            fs::remove_file(&upload.stored_path)?;
        } else if fs::rename(&upload.stored_path, &target).is_err() {
            // upload and attachment directories may live on different devices
            fs::copy(&upload.stored_path, &target)?;
            fs::remove_file(&upload.stored_path)?;
        }
        log::info!(
            "stored upload {} ({}) as {}",
            upload.original_name,
            upload.mime_type,
            hash
        );
        Ok(AttachmentRef {
            hash,
            display_name: upload.original_name.clone(),
            mime_type: upload.mime_type.clone(),
        })
    }

    /// Removes the temp files of uploads that will not be ingested.
    pub fn discard(uploads: &[UploadedFile]) {
        for upload in uploads {
            if let Err(e) = fs::remove_file(&upload.stored_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!(
                        "could not remove upload {}: {}",
                        upload.stored_path.display(),
                        e
                    );
                }
            }
        }
    }

    /// Copies blob `hash` into `dest_dir` as `<hash>.<ext>`.
    pub fn materialize(
        &self,
        hash: &str,
        mime_type: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, FormError> {
        let media = SupportedMedia::from_mime(mime_type).ok_or_else(|| {
            FormError::UnsupportedMediaType {
                mime: mime_type.to_string(),
            }
        })?;
        let source = self.blob_path(hash)?;
        if !source.is_file() {
            return Err(FormError::MissingBlob {
                hash: hash.to_string(),
            });
        }
        let target = dest_dir.join(format!("{}.{}", hash, media.extension()));
        fs::copy(&source, &target)?;
        Ok(target)
    }

    pub fn reference_count(&self, hash: &str) -> Result<usize, FormError> {
        self.ledger.attachment_references(hash)
    }

    #[cfg(test)]
    pub(crate) async fn hold_collection(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    /// Runs a whole-store ledger scan on the blocking pool.
    async fn scan<T, F>(&self, scan: F) -> Result<T, FormError>
    where
        F: FnOnce(&LedgerStore) -> Result<T, FormError> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || scan(&ledger))
            .await
            .map_err(|e| FormError::Internal(format!("reference scan join error: {}", e)))?
    }

    /// Deletes blob `hash` if nothing references it. Returns whether it did.
    pub async fn garbage_collect(&self, hash: &str) -> Result<bool, FormError> {
        let _exclusive = self.gate.write().await;
        let owned = hash.to_string();
        let refs = self
            .scan(move |ledger| ledger.attachment_references(&owned))
            .await?;
        if refs > 0 {
            log::debug!("blob {} still referenced {} times", hash, refs);
            return Ok(false);
        }
        let path = self.blob_path(hash)?;
        remove_if_present(&path)
    }

    /// Deletes the built PDF at `location` if no version points at it.
    pub async fn garbage_collect_document(&self, location: &Path) -> Result<bool, FormError> {
        let _exclusive = self.gate.write().await;
        let owned = location.to_path_buf();
        let refs = self
            .scan(move |ledger| ledger.document_references(&owned))
            .await?;
        if refs > 0 {
            return Ok(false);
        }
        remove_if_present(location)
    }

    /// Collection that only logs failures; an orphan left behind is tolerated.
    pub async fn collect_quietly(&self, hashes: &[String], documents: &[PathBuf]) {
        for hash in hashes {
            if let Err(e) = self.garbage_collect(hash).await {
                log::warn!("garbage collection of blob {} failed: {}", hash, e);
            }
        }
        for doc in documents {
            if let Err(e) = self.garbage_collect_document(doc).await {
                log::warn!(
                    "garbage collection of document {} failed: {}",
                    doc.display(),
                    e
                );
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<bool, FormError> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::info!("removed unreferenced {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn hash_file(path: &Path) -> Result<String, FormError> {
    let mut file = File::open(path)?;
    let mut context = Context::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.finalize()))
}
