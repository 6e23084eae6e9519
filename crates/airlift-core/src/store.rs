//! Durable storage for the accepted credential.
//!
//! A single JSON record, `{"ssid":"...","password":"..."}`, overwritten on
//! every successful session. Writes go to a fresh sibling temp file first and
//! are renamed into place, so a reader never sees a half-written record.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{CredentialCandidate, PersistedCredential};

/// Errors from reading or writing the credential record.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// Record path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The record could not be written or moved into place.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The parent directory could not be created.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The record on disk is not valid JSON.
    #[error("corrupt credential record {}: {source}", path.display())]
    Parse {
        /// Record path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The credential could not be serialized.
    #[error("failed to serialize credential: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The candidate failed validation and was not written.
    #[error("refusing to persist an invalid credential")]
    Invalid,

    /// No platform data directory could be determined.
    #[error("cannot determine data directory")]
    NoDataDir,
}

/// Where the accepted credential lives.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// File name used under a data directory.
    pub const FILE_NAME: &'static str = "wifi_credentials.json";

    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The default record location.
    ///
    /// On Raspberry Pi: `/etc/wifi_credentials.json`
    /// For development: `~/.local/share/airlift/wifi_credentials.json`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoDataDir`] off Linux when no home directory is
    /// available.
    pub fn default_location() -> Result<Self, StoreError> {
        #[cfg(target_os = "linux")]
        {
            Ok(Self::new(PathBuf::from("/etc").join(Self::FILE_NAME)))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "airlift")
                .ok_or(StoreError::NoDataDir)?;
            Ok(Self::new(dirs.data_dir().join(Self::FILE_NAME)))
        }
    }

    /// Path of the record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a candidate may be persisted.
    #[must_use]
    pub fn validate(&self, candidate: &CredentialCandidate) -> bool {
        candidate.is_valid()
    }

    /// Write `candidate` as the current record, replacing any previous one.
    ///
    /// Persisting the same candidate twice leaves the same bytes on disk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for a candidate that fails
    /// [`validate`](Self::validate), or an I/O variant if the write fails.
    pub fn persist(
        &self,
        candidate: &CredentialCandidate,
    ) -> Result<PersistedCredential, StoreError> {
        if !self.validate(candidate) {
            return Err(StoreError::Invalid);
        }

        let record = PersistedCredential::from(candidate);
        let content = serde_json::to_vec(&record).map_err(StoreError::Serialize)?;

        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
                parent
            }
            None => Path::new("."),
        };

        // One temp file per write. NamedTempFile creates it 0600.
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
        tmp.write_all(&content).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        info!(
            network = %record.network_name,
            path = %self.path.display(),
            "Persisted credential"
        );
        Ok(record)
    }

    /// The current record, if one has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn current(&self) -> Result<Option<PersistedCredential>, StoreError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No credential record yet");
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let record = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(record))
    }
}
