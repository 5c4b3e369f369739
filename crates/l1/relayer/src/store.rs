//! Pending commit records.
//!
//! A record is written once the commit is funded and removed once its reveal
//! is accepted. Whatever is left after a crash is work to resume.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use bitcoin::Txid;
use thiserror::Error;
use tracing::*;

use crate::types::CommitRecord;

/// Errors from a [`CommitStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Storage for commits whose reveal has not been accepted yet.
pub trait CommitStore {
    /// Inserts or replaces the record for `record.commit_txid`.
    fn put(&mut self, record: &CommitRecord) -> Result<(), StoreError>;

    /// Removes a record. Removing an unknown txid is not an error.
    fn remove(&mut self, txid: &Txid) -> Result<(), StoreError>;

    /// All pending records, ordered by commit txid.
    fn pending(&self) -> Result<Vec<CommitRecord>, StoreError>;
}

impl<T: CommitStore + ?Sized> CommitStore for Box<T> {
    fn put(&mut self, record: &CommitRecord) -> Result<(), StoreError> {
        (**self).put(record)
    }

    fn remove(&mut self, txid: &Txid) -> Result<(), StoreError> {
        (**self).remove(txid)
    }

    fn pending(&self) -> Result<Vec<CommitRecord>, StoreError> {
        (**self).pending()
    }
}

/// Process-local store. Pending records are lost on exit.
#[derive(Debug, Clone, Default)]
pub struct MemoryCommitStore {
    records: BTreeMap<Txid, CommitRecord>,
}

impl MemoryCommitStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitStore for MemoryCommitStore {
    fn put(&mut self, record: &CommitRecord) -> Result<(), StoreError> {
        self.records.insert(record.commit_txid, record.clone());
        Ok(())
    }

    fn remove(&mut self, txid: &Txid) -> Result<(), StoreError> {
        self.records.remove(txid);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<CommitRecord>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }
}

/// One JSON file per pending commit, named `<txid>.json`.
#[derive(Debug, Clone)]
pub struct FileCommitStore {
    dir: PathBuf,
}

const RECORD_EXT: &str = "json";

impl FileCommitStore {
    /// Opens a store in `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory records are kept in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, txid: &Txid) -> PathBuf {
        self.dir.join(format!("{txid}.{RECORD_EXT}"))
    }
}

impl CommitStore for FileCommitStore {
    fn put(&mut self, record: &CommitRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.commit_txid);
        let tmp = path.with_extension("tmp");

        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut file, record)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, txid: &Txid) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(txid)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn pending(&self) -> Result<Vec<CommitRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            let bytes = fs::read(&path)?;
            match serde_json::from_slice::<CommitRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), %e, "skipping unreadable commit record");
                }
            }
        }
        records.sort_by_key(|r| r.commit_txid);
        Ok(records)
    }
}
