use std::collections::BTreeMap;
use std::fs::{self, File};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{ArtifactState, DECOMPRESSED_EXT, HourSlot};
use crate::error::IngestError;

/// The local artifact directory. File presence is the only idempotency ledger.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: Utf8PathBuf,
}

impl LocalStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), IngestError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("create {}: {err}", self.root)))
    }

    pub fn compressed_path(&self, slot: HourSlot) -> Utf8PathBuf {
        self.root.join(slot.compressed_file_name())
    }

    pub fn decompressed_path(&self, slot: HourSlot) -> Utf8PathBuf {
        self.root.join(slot.decompressed_file_name())
    }

    pub fn state(&self, slot: HourSlot) -> ArtifactState {
        if self.decompressed_path(slot).as_std_path().exists() {
            ArtifactState::Decompressed
        } else if self.compressed_path(slot).as_std_path().exists() {
            ArtifactState::CompressedOnly
        } else {
            ArtifactState::NotDownloaded
        }
    }

    /// Writes `dest` through a temp file in the store root; `dest` only appears on success.
    pub fn write_atomic<F>(&self, dest: &Utf8Path, write: F) -> Result<(), IngestError>
    where
        F: FnOnce(&mut File) -> Result<(), IngestError>,
    {
        self.ensure_root()?;
        let mut temp = Builder::new()
            .prefix(".wiki-pageviews")
            .suffix(".part")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        write(temp.as_file_mut())?;
        temp.as_file()
            .sync_all()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("persist {dest}: {err}")))?;
        Ok(())
    }

    /// Every `.txt` file in the root, sorted by file name.
    pub fn list_decompressed(&self) -> Result<Vec<Utf8PathBuf>, IngestError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in self.read_root()? {
            if entry.is_file() && entry.extension() == Some(DECOMPRESSED_EXT) {
                files.push(entry);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Hours with at least one artifact on disk, oldest first.
    pub fn list_slots(&self) -> Result<Vec<(HourSlot, ArtifactState)>, IngestError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut slots = BTreeMap::new();
        for entry in self.read_root()? {
            let Some(slot) = entry.file_name().and_then(HourSlot::from_file_name) else {
                continue;
            };
            slots.entry(slot).or_insert_with(|| self.state(slot));
        }
        Ok(slots.into_iter().collect())
    }

    fn read_root(&self) -> Result<Vec<Utf8PathBuf>, IngestError> {
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("read {}: {err}", self.root)))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| IngestError::Filesystem(err.to_string()))?;
            match Utf8PathBuf::from_path_buf(entry.path()) {
                Ok(path) => paths.push(path),
                Err(path) => {
                    tracing::debug!(path = %path.display(), "skipping non-utf8 path");
                }
            }
        }
        Ok(paths)
    }
}
