//! # contract: collaborator interfaces and the shared data model
//!
//! The pipeline talks to the outside world through three async traits:
//!
//! - [`Extractor`]: turns one listing page URL into structured [`Record`]s.
//! - [`RemoteAuthenticator`]: establishes an authenticated storage session.
//! - [`RemoteStore`]: the session itself; resolves folders and uploads files.
//!
//! All three are annotated for `mockall` so tests (in this crate and in
//! dependents, through the default `test-export-mocks` feature) can script
//! collaborator behaviour deterministically.
//!
//! Concrete implementations (HTTP extractor, Drive client) live in the
//! `car-harvest` binary crate.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field values of a single listing, in the order the extractor produced them.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// One scraped listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Fields);

impl Record {
    pub fn new() -> Self {
        Self(Fields::new())
    }

    /// Builder-style insert, mostly for fixtures and adapters.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Self(fields)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a configured top-level remote folder.
    RootId
);
string_id!(
    /// Identifier of a remote folder (dated subfolder or any other).
    FolderId
);
string_id!(
    /// Identifier the remote store assigned to an uploaded file.
    RemoteFileId
);

impl From<RootId> for FolderId {
    fn from(root: RootId) -> Self {
        FolderId(root.0)
    }
}

/// Failure to turn one page into records. Scoped to that page only.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("could not parse page {url}: {reason}")]
    Parse { url: String, reason: String },
}

/// Failure reported by the remote store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The destination (parent folder or target folder) does not exist.
    #[error("destination not found: {0}")]
    NotFound(String),

    /// Anything else: network, quota, 5xx, malformed response.
    #[error("transient storage failure: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("authentication with remote store failed: {0}")]
pub struct AuthError(pub String);

/// Fetches one listing page and returns its records.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch(&self, page_url: &str) -> Result<Vec<Record>, ExtractionError>;
}

/// An authenticated storage session.
///
/// Created once per run by a [`RemoteAuthenticator`] and handed to the upload
/// stage explicitly; harvesters never see it.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Return the id of the folder called `name` directly under `parent`,
    /// creating it when absent. `NotFound` when `parent` itself is missing.
    async fn resolve_or_create_folder(
        &self,
        name: &str,
        parent: &FolderId,
    ) -> Result<FolderId, StoreError>;

    /// Upload the file at `local_path` into `folder`, keeping its file name.
    async fn upload(&self, local_path: &Path, folder: &FolderId)
        -> Result<RemoteFileId, StoreError>;
}

/// Produces the authenticated [`RemoteStore`] session for a run.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteAuthenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Arc<dyn RemoteStore>, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_insertion_order() {
        let record = Record::new()
            .with("title", "Camry")
            .with("price", 2500)
            .with("date_published", "2024-01-02 10:00");
        let keys: Vec<&str> = record.fields().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["title", "price", "date_published"]);
    }

    #[test]
    fn only_not_found_is_permanent() {
        assert!(StoreError::NotFound("root".into()).is_permanent());
        assert!(!StoreError::Transient("503".into()).is_permanent());
    }
}
