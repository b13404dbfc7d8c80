//! SQLite persistence of filled forms.
//!
//! Every form is one row of the `filledforms` table: the key, the form type
//! and the whole version ledger as JSON. A row is always written as a whole
//! inside one transaction, so a version change and its sibling append or
//! removal, or a rename, can never be observed half done.
//!
//! The connection sits behind a mutex. Reads that must agree with each other
//! (the garbage collection scans) run as one query under that lock and so see
//! one consistent snapshot of the store.

use crate::error::FormError;
use common::model::form_instance::FormInstance;
use common::model::ledger::VersionLedger;
use common::model::version::VersionSnapshot;
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct LedgerStore {
    conn: Mutex<Connection>,
}

impl LedgerStore {
    pub fn open(path: &Path) -> Result<Self, FormError> {
        let conn = Connection::open(path)?;
        log::info!("opened ledger store {}", path.display());
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, FormError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, FormError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS filledforms (
                formkey  TEXT PRIMARY KEY,
                formtype TEXT NOT NULL,
                versions TEXT NOT NULL
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, FormError> {
        self.conn
            .lock()
            .map_err(|_| FormError::Internal("ledger store connection poisoned".to_string()))
    }

    fn decode(key: String, formtype: String, versions: &str) -> Result<FormInstance, FormError> {
        let versions: Vec<VersionSnapshot> = serde_json::from_str(versions)?;
        let versions =
            VersionLedger::from_versions(versions).map_err(|e| FormError::ledger(&key, e))?;
        Ok(FormInstance {
            key,
            formtype,
            versions,
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<FormInstance>, FormError> {
        let conn = self.lock_conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT formtype, versions FROM filledforms WHERE formkey = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(formtype, versions)| Self::decode(key.to_string(), formtype, &versions))
            .transpose()
    }

    pub fn exists(&self, key: &str) -> Result<bool, FormError> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM filledforms WHERE formkey = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Writes `instance` under its key in one transaction.
    ///
    /// When `previous_key` names a different key, that row is removed in the
    /// same transaction (a rename). The caller is responsible for having
    /// checked that the new key is free.
    pub fn commit(
        &self,
        previous_key: Option<&str>,
        instance: &FormInstance,
    ) -> Result<(), FormError> {
        instance
            .versions
            .check_invariants()
            .map_err(|e| FormError::ledger(&instance.key, e))?;
        let versions = serde_json::to_string(instance.versions.versions())?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        if let Some(old) = previous_key.filter(|old| *old != instance.key) {
            log::info!("deleting key {} and storing key {}", old, instance.key);
            tx.execute("DELETE FROM filledforms WHERE formkey = ?1", params![old])?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO filledforms (formkey, formtype, versions) VALUES (?1, ?2, ?3)",
            params![instance.key, instance.formtype, versions],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool, FormError> {
        let conn = self.lock_conn()?;
        let n = conn.execute("DELETE FROM filledforms WHERE formkey = ?1", params![key])?;
        Ok(n > 0)
    }

    /// Every stored form, read in one query and sorted by key.
    pub fn snapshot(&self) -> Result<Vec<FormInstance>, FormError> {
        let rows: Vec<(String, String, String)> = {
            let conn = self.lock_conn()?;
            let mut stmt =
                conn.prepare("SELECT formkey, formtype, versions FROM filledforms ORDER BY formkey")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<Result<_, _>>()?;
            rows
        };
        rows.into_iter()
            .map(|(key, formtype, versions)| Self::decode(key, formtype, &versions))
            .collect()
    }

    /// How many field values across all versions of all forms reference `hash`.
    pub fn attachment_references(&self, hash: &str) -> Result<usize, FormError> {
        let forms = self.snapshot()?;
        Ok(forms
            .par_iter()
            .map(|f| f.attachment_references(hash))
            .sum())
    }

    /// How many versions across all forms point at the document at `location`.
    pub fn document_references(&self, location: &Path) -> Result<usize, FormError> {
        let forms = self.snapshot()?;
        Ok(forms
            .par_iter()
            .map(|f| f.document_references(location))
            .sum())
    }
}
