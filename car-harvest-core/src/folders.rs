//! Dated folder resolution under each configured root.
//!
//! For a target date the resolver looks up (or creates) a folder named
//! `YYYY-MM-DD` under every root. Each `(root, date)` pair is resolved at
//! most once per run; later chunks reuse the cached state, including the
//! terminal failure states.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::config::RetryPolicy;
use crate::contract::{FolderId, RemoteStore, RootId};
use crate::pacing::Sleeper;
use crate::retry::{retry_store_op, Retried};

/// Resolution state of one `(root, date)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderState {
    Resolved(FolderId),
    /// The root itself does not exist. Terminal for the run.
    PermanentlyMissing,
    /// Resolution kept failing transiently. Terminal for the run.
    Unavailable,
}

/// The upload destination for one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFolder {
    pub root: RootId,
    pub state: FolderState,
}

/// Name of the dated folder for `date`.
pub fn dated_folder_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub struct RemoteFolderResolver {
    roots: Vec<RootId>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    cache: HashMap<(RootId, NaiveDate), FolderState>,
}

impl RemoteFolderResolver {
    pub fn new(roots: Vec<RootId>, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            roots,
            retry,
            sleeper,
            cache: HashMap::new(),
        }
    }

    /// Cached state for `(root, date)`, if it was resolved already.
    pub fn cached(&self, root: &RootId, date: NaiveDate) -> Option<&FolderState> {
        self.cache.get(&(root.clone(), date))
    }

    /// Destination per configured root, in configuration order.
    pub async fn resolve(&mut self, store: &dyn RemoteStore, date: NaiveDate) -> Vec<RootFolder> {
        let name = dated_folder_name(date);
        let mut folders = Vec::with_capacity(self.roots.len());

        for root in self.roots.clone() {
            let key = (root.clone(), date);
            let state = match self.cache.get(&key) {
                Some(state) => state.clone(),
                None => {
                    let state = self.resolve_one(store, &root, &name).await;
                    self.cache.insert(key, state.clone());
                    state
                }
            };
            folders.push(RootFolder { root, state });
        }
        folders
    }

    async fn resolve_one(&self, store: &dyn RemoteStore, root: &RootId, name: &str) -> FolderState {
        let parent = FolderId::from(root.clone());
        let parent = &parent;
        let outcome = retry_store_op(self.retry, self.sleeper.as_ref(), "resolve_folder", || {
            store.resolve_or_create_folder(name, parent)
        })
        .await;

        match outcome {
            Retried::Succeeded { value, attempts } => {
                info!(root = %root, folder = name, folder_id = %value, attempts, "[UPLOAD] Resolved dated folder");
                FolderState::Resolved(value)
            }
            Retried::Permanent { error, .. } => {
                error!(root = %root, folder = name, error = %error, "[UPLOAD] Root folder not found, skipping it for this run");
                FolderState::PermanentlyMissing
            }
            Retried::Exhausted { last_error, attempts } => {
                warn!(root = %root, folder = name, attempts, error = %last_error, "[UPLOAD] Could not resolve dated folder, root unavailable for this run");
                FolderState::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockRemoteStore, StoreError};
    use crate::pacing::RecordingSleeper;
    use std::time::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn resolver(roots: &[&str], sleeper: Arc<RecordingSleeper>) -> RemoteFolderResolver {
        RemoteFolderResolver::new(
            roots.iter().map(|r| RootId::from(*r)).collect(),
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_secs(15),
            },
            sleeper,
        )
    }

    #[test]
    fn folder_name_is_iso_date() {
        assert_eq!(dated_folder_name(date()), "2024-01-02");
    }

    #[tokio::test]
    async fn resolves_every_root_once_and_caches() {
        let mut store = MockRemoteStore::new();
        store
            .expect_resolve_or_create_folder()
            .withf(|name, _| name == "2024-01-02")
            .times(2)
            .returning(|_, parent| Ok(FolderId::new(format!("{parent}/2024-01-02"))));

        let mut resolver = resolver(&["root-a", "root-b"], Arc::new(RecordingSleeper::new()));

        let first = resolver.resolve(&store, date()).await;
        let second = resolver.resolve(&store, date()).await;

        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                RootFolder {
                    root: "root-a".into(),
                    state: FolderState::Resolved("root-a/2024-01-02".into()),
                },
                RootFolder {
                    root: "root-b".into(),
                    state: FolderState::Resolved("root-b/2024-01-02".into()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_root_is_isolated_from_the_others() {
        let mut store = MockRemoteStore::new();
        store
            .expect_resolve_or_create_folder()
            .withf(|_, parent| parent.as_str() == "gone")
            .times(1)
            .returning(|_, parent| Err(StoreError::NotFound(parent.to_string())));
        store
            .expect_resolve_or_create_folder()
            .withf(|_, parent| parent.as_str() == "ok")
            .times(1)
            .returning(|_, _| Ok(FolderId::from("dated")));

        let sleeper = Arc::new(RecordingSleeper::new());
        let mut resolver = resolver(&["gone", "ok"], sleeper.clone());
        let folders = resolver.resolve(&store, date()).await;

        assert_eq!(folders[0].state, FolderState::PermanentlyMissing);
        assert_eq!(folders[1].state, FolderState::Resolved("dated".into()));
        assert!(sleeper.delays().is_empty());

        // terminal for the run: no second lookup
        let again = resolver.resolve(&store, date()).await;
        assert_eq!(again[0].state, FolderState::PermanentlyMissing);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_marked_unavailable() {
        let mut store = MockRemoteStore::new();
        store
            .expect_resolve_or_create_folder()
            .times(3)
            .returning(|_, _| Err(StoreError::Transient("500".into())));

        let sleeper = Arc::new(RecordingSleeper::new());
        let mut resolver = resolver(&["flaky"], sleeper.clone());
        let folders = resolver.resolve(&store, date()).await;

        assert_eq!(folders[0].state, FolderState::Unavailable);
        assert_eq!(sleeper.delays().len(), 2);
        assert_eq!(
            resolver.cached(&"flaky".into(), date()),
            Some(&FolderState::Unavailable)
        );
    }
}
