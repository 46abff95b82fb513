use serde::Serialize;
use tracing::{error, info};

use crate::domain::{ArtifactState, HourSlot, RemoteArtifact};
use crate::error::IngestError;
use crate::fs_util;
use crate::source::PageviewSource;
use crate::store::LocalStore;

/// What a successful fetch had to do to get the slot decompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchAction {
    AlreadyPresent,
    Unzipped,
    Downloaded,
}

/// Idempotent download + decompress of one hour.
#[derive(Clone)]
pub struct Fetcher<S: PageviewSource> {
    source: S,
    store: LocalStore,
    base_url: String,
}

impl<S: PageviewSource> Fetcher<S> {
    pub fn new(source: S, store: LocalStore, base_url: impl Into<String>) -> Self {
        Self {
            source,
            store,
            base_url: base_url.into(),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn artifact(&self, slot: HourSlot) -> RemoteArtifact {
        RemoteArtifact::for_slot(slot, &self.base_url)
    }

    /// `true` when the decompressed artifact exists on return. Errors are logged, never raised.
    pub fn process(&self, slot: HourSlot) -> bool {
        match self.try_process(slot) {
            Ok(_) => true,
            Err(err) => {
                error!(slot = %slot, stage = err.stage(), "fetch failed: {err}");
                false
            }
        }
    }

    pub fn try_process(&self, slot: HourSlot) -> Result<FetchAction, IngestError> {
        let artifact = self.artifact(slot);
        let compressed = self.store.compressed_path(slot);

        match self.store.state(slot) {
            ArtifactState::Decompressed => {
                info!(
                    file = %artifact.decompressed_file_name,
                    "skipping, already downloaded and unzipped"
                );
                return Ok(FetchAction::AlreadyPresent);
            }
            ArtifactState::CompressedOnly => {
                info!(
                    file = %artifact.compressed_file_name,
                    "skipping download, already downloaded; proceeding to unzip"
                );
                self.unzip(&artifact, slot)?;
                return Ok(FetchAction::Unzipped);
            }
            ArtifactState::NotDownloaded => {}
        }

        info!(file = %artifact.compressed_file_name, url = %artifact.url, "downloading");
        self.store.write_atomic(&compressed, |file| {
            self.source.download(&artifact.url, file).map(|_| ())
        })?;
        info!(file = %artifact.compressed_file_name, "downloaded");

        self.unzip(&artifact, slot)?;
        Ok(FetchAction::Downloaded)
    }

    fn unzip(&self, artifact: &RemoteArtifact, slot: HourSlot) -> Result<(), IngestError> {
        info!(file = %artifact.compressed_file_name, "unzipping");
        let compressed = self.store.compressed_path(slot);
        let decompressed = self.store.decompressed_path(slot);
        self.store.write_atomic(&decompressed, |file| {
            fs_util::gunzip_into(&compressed, file).map(|_| ())
        })?;
        info!(
            from = %artifact.compressed_file_name,
            to = %artifact.decompressed_file_name,
            "unzipped"
        );
        Ok(())
    }
}
