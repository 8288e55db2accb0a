//! Ledger mapping archives back to the faults that produced them.
//!
//! Stored as one JSON document, `{"packages": [...]}`. Every append rewrites
//! the whole file, so appends are serialized through a mutex and land via
//! write-temp-then-rename: readers see either the old or the new document,
//! and concurrent packaging completions cannot drop each other's entries.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IndexError;

/// File name of the index inside the package directory.
pub const INDEX_FILE_NAME: &str = "fault_index.json";

/// One packaged archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Fault id.
    pub id: Uuid,
    /// Archive file name, relative to the package directory.
    pub file: String,
    /// Fault code.
    pub fault: String,
    /// Fault event time.
    pub timestamp: DateTime<Utc>,
    /// Reporting application.
    pub app: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    #[serde(default)]
    packages: Vec<IndexEntry>,
}

/// Append-only package ledger.
pub struct FaultIndex {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FaultIndex {
    /// Index at `<dir>/fault_index.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::at(dir.as_ref().join(INDEX_FILE_NAME))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add one entry. The file is created on first use.
    pub fn append(&self, entry: IndexEntry) -> Result<(), IndexError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut doc = self.read_document()?;
        debug!(
            "index append {} -> {} ({} existing)",
            entry.id,
            entry.file,
            doc.packages.len()
        );
        doc.packages.push(entry);

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(IndexError::io(parent))?;
        }
        let json = serde_json::to_string_pretty(&doc).map_err(|source| IndexError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(IndexError::io(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(IndexError::io(&self.path))?;
        Ok(())
    }

    /// All entries in append order. Missing file reads as empty.
    pub fn load(&self) -> Result<Vec<IndexEntry>, IndexError> {
        Ok(self.read_document()?.packages)
    }

    fn read_document(&self) -> Result<IndexDocument, IndexError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(IndexDocument::default());
            }
            Err(e) => return Err(IndexError::io(&self.path)(e)),
        };
        if raw.trim().is_empty() {
            return Ok(IndexDocument::default());
        }
        serde_json::from_str(&raw).map_err(|source| IndexError::Json {
            path: self.path.clone(),
            source,
        })
    }
}
