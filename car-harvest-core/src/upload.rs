//! Delivery of exported artifacts into the dated folder of every root.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::RetryPolicy;
use crate::contract::{RemoteFileId, RemoteStore, RootId};
use crate::export::Artifact;
use crate::folders::{FolderState, RootFolder};
use crate::pacing::Sleeper;
use crate::retry::{retry_store_op, Retried};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded(RemoteFileId),
    /// Destination root or folder does not exist; nothing more was tried.
    SkippedPermanent,
    /// Every allowed attempt failed transiently.
    Exhausted,
}

/// Result of delivering one artifact to one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub category: String,
    pub root: RootId,
    pub outcome: UploadOutcome,
    /// Upload calls actually made (0 when the root was never usable).
    pub attempts: u32,
}

impl UploadRecord {
    pub fn is_uploaded(&self) -> bool {
        matches!(self.outcome, UploadOutcome::Uploaded(_))
    }
}

pub struct RetryingUploader {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryingUploader {
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    /// Uploads every artifact to every root, one call at a time. Roots are
    /// independent: a failure against one never stops the others.
    pub async fn upload_batch(
        &self,
        store: &dyn RemoteStore,
        artifacts: &[Artifact],
        folders: &[RootFolder],
    ) -> Vec<UploadRecord> {
        let mut records = Vec::with_capacity(artifacts.len() * folders.len());
        for artifact in artifacts {
            for folder in folders {
                records.push(self.upload_one(store, artifact, folder).await);
            }
        }

        let uploaded = records.iter().filter(|r| r.is_uploaded()).count();
        info!(
            artifacts = artifacts.len(),
            roots = folders.len(),
            uploaded,
            failed = records.len() - uploaded,
            "[UPLOAD] Batch finished"
        );
        records
    }

    async fn upload_one(
        &self,
        store: &dyn RemoteStore,
        artifact: &Artifact,
        folder: &RootFolder,
    ) -> UploadRecord {
        let record = |outcome, attempts| UploadRecord {
            category: artifact.category.clone(),
            root: folder.root.clone(),
            outcome,
            attempts,
        };

        let folder_id = match &folder.state {
            FolderState::Resolved(id) => id,
            FolderState::PermanentlyMissing => {
                warn!(file = %artifact.path.display(), root = %folder.root, "[UPLOAD] Root missing, skipping upload");
                return record(UploadOutcome::SkippedPermanent, 0);
            }
            FolderState::Unavailable => {
                warn!(file = %artifact.path.display(), root = %folder.root, "[UPLOAD] Dated folder unavailable, upload not attempted");
                return record(UploadOutcome::Exhausted, 0);
            }
        };

        info!(file = %artifact.path.display(), root = %folder.root, "[UPLOAD] Attempting upload");
        let path = artifact.path.as_path();
        let outcome = retry_store_op(self.policy, self.sleeper.as_ref(), "upload", || {
            store.upload(path, folder_id)
        })
        .await;

        match outcome {
            Retried::Succeeded { value, attempts } => {
                info!(
                    file = %artifact.path.display(),
                    root = %folder.root,
                    remote_file_id = %value,
                    attempts,
                    "[UPLOAD] Uploaded"
                );
                record(UploadOutcome::Uploaded(value), attempts)
            }
            Retried::Permanent { error, attempts } => {
                error!(
                    file = %artifact.path.display(),
                    root = %folder.root,
                    error = %error,
                    "[UPLOAD] Destination not found, skipping upload"
                );
                record(UploadOutcome::SkippedPermanent, attempts)
            }
            Retried::Exhausted {
                last_error,
                attempts,
            } => {
                error!(
                    file = %artifact.path.display(),
                    root = %folder.root,
                    attempts,
                    error = %last_error,
                    "[UPLOAD] Max retries reached, could not upload"
                );
                record(UploadOutcome::Exhausted, attempts)
            }
        }
    }
}
