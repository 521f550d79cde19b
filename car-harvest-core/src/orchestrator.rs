//! Top-level pipeline: authenticate, then per chunk harvest → export →
//! upload → clean up → pace.
//!
//! # Containment
//! Page failures stay inside the harvester. Category failures (every page
//! failed, task panicked) are logged and reported but treated as "no
//! records", so siblings and later chunks always run. Export, folder and
//! upload failures are logged and reported per category and root. The only
//! fatal outcomes are an invalid configuration and a failed authentication,
//! both raised before any chunk is processed.
//!
//! # Ordering
//! All tasks of a chunk are dispatched (staggered by `stagger_delay`) before
//! any is awaited. The next chunk starts only after the current chunk's
//! uploads and cleanup have finished, followed by `chunk_delay`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chunk::chunk_categories;
use crate::config::{CategorySpec, ConfigError, RunConfig};
use crate::contract::{AuthError, Extractor, RemoteAuthenticator, RemoteStore};
use crate::export::{Artifact, Exporter};
use crate::filter::DateWindowFilter;
use crate::folders::RemoteFolderResolver;
use crate::harvest::{CategoryHarvester, HarvestResult, HarvestTask};
use crate::limiter::ConcurrencyLimiter;
use crate::pacing::{Pacer, Sleeper, TokioSleeper};
use crate::upload::{RetryingUploader, UploadOutcome, UploadRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("invalid run configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Authentication(#[from] AuthError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestStatus {
    Matched(usize),
    NoMatches,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryOutcome {
    pub name: String,
    pub status: HarvestStatus,
    pub artifact: Option<PathBuf>,
    pub uploads: Vec<UploadRecord>,
    /// Whether the local artifact was deleted after the upload batch.
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    pub index: usize,
    pub categories: Vec<CategoryOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target_date: NaiveDate,
    pub chunks: Vec<ChunkReport>,
}

impl RunReport {
    pub fn categories(&self) -> impl Iterator<Item = &CategoryOutcome> {
        self.chunks.iter().flat_map(|c| c.categories.iter())
    }

    pub fn category(&self, name: &str) -> Option<&CategoryOutcome> {
        self.categories().find(|c| c.name == name)
    }

    pub fn uploaded(&self) -> usize {
        self.categories()
            .flat_map(|c| c.uploads.iter())
            .filter(|u| u.is_uploaded())
            .count()
    }

    pub fn failed_uploads(&self) -> usize {
        self.categories()
            .flat_map(|c| c.uploads.iter())
            .filter(|u| !u.is_uploaded())
            .count()
    }
}

pub struct Orchestrator {
    config: RunConfig,
    extractor: Arc<dyn Extractor>,
    sleeper: Arc<dyn Sleeper>,
}

impl Orchestrator {
    pub fn new(config: RunConfig, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            config,
            extractor,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the delay used between storage retries.
    pub fn with_retry_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Executes one full run.
    pub async fn run(
        &self,
        authenticator: &dyn RemoteAuthenticator,
    ) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id, authenticator)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        authenticator: &dyn RemoteAuthenticator,
    ) -> Result<RunReport, RunError> {
        let config = &self.config;
        if let Err(e) = config.validate() {
            error!(error = %e, "[RUN][ERROR] Invalid configuration");
            return Err(e.into());
        }
        info!(
            categories = config.categories.len(),
            target_date = %config.target_date,
            "[RUN] Starting harvest run"
        );

        let store = match authenticator.authenticate().await {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "[RUN][ERROR] Authentication failed, aborting run");
                return Err(e.into());
            }
        };
        info!("[RUN] Authenticated with remote store");

        let pacer = Pacer::new(config.pacing);
        let harvester = CategoryHarvester::new(
            self.extractor.clone(),
            DateWindowFilter::new(
                config.target_date,
                config.date_field.clone(),
                config.site_offset,
            ),
            pacer,
        );
        let mut stage = UploadStage {
            exporter: Exporter::new(&config.staging_dir),
            resolver: RemoteFolderResolver::new(
                config.root_folders.clone(),
                config.upload_retry,
                self.sleeper.clone(),
            ),
            uploader: RetryingUploader::new(config.upload_retry, self.sleeper.clone()),
            store,
            target_date: config.target_date,
            keep_failed_artifacts: config.keep_failed_artifacts,
        };
        let limiter = ConcurrencyLimiter::new(config.max_concurrent_links);

        let chunks = chunk_categories(&config.categories, config.chunk_size);
        let total = chunks.len();
        let mut reports = Vec::with_capacity(total);

        for (index, chunk) in chunks.into_iter().enumerate() {
            info!(
                chunk = index + 1,
                of = total,
                categories = chunk.len(),
                "[RUN] Processing chunk"
            );
            let harvests = dispatch_and_join(&harvester, &limiter, &pacer, chunk).await;
            let categories = stage.finish_chunk(chunk, harvests).await;
            reports.push(ChunkReport { index, categories });

            if index + 1 < total {
                info!(
                    delay_secs = config.pacing.chunk_delay.as_secs(),
                    "[RUN] Waiting before next chunk"
                );
                pacer.between_chunks().await;
            }
        }

        let report = RunReport {
            run_id,
            target_date: config.target_date,
            chunks: reports,
        };
        info!(
            chunks = report.chunks.len(),
            uploaded = report.uploaded(),
            failed_uploads = report.failed_uploads(),
            "[RUN] Run complete"
        );
        Ok(report)
    }
}

/// Spawns every task of the chunk, then awaits them in dispatch order.
async fn dispatch_and_join(
    harvester: &CategoryHarvester,
    limiter: &ConcurrencyLimiter,
    pacer: &Pacer,
    chunk: &[CategorySpec],
) -> Vec<HarvestResult> {
    let mut tasks = Vec::with_capacity(chunk.len());
    for (i, category) in chunk.iter().enumerate() {
        if i > 0 {
            pacer.between_tasks().await;
        }
        info!(category = %category.name, "[RUN] Dispatching harvest");
        tasks.push(HarvestTask::spawn(
            harvester.clone(),
            category.clone(),
            limiter.clone(),
        ));
    }
    join_all(tasks.into_iter().map(HarvestTask::join)).await
}

/// Everything after harvesting: export, folder resolution, upload, cleanup.
struct UploadStage {
    exporter: Exporter,
    resolver: RemoteFolderResolver,
    uploader: RetryingUploader,
    store: Arc<dyn RemoteStore>,
    target_date: NaiveDate,
    keep_failed_artifacts: bool,
}

impl UploadStage {
    async fn finish_chunk(
        &mut self,
        chunk: &[CategorySpec],
        harvests: Vec<HarvestResult>,
    ) -> Vec<CategoryOutcome> {
        let mut outcomes = Vec::with_capacity(chunk.len());
        let mut artifacts: Vec<Artifact> = Vec::new();

        for (category, harvest) in chunk.iter().zip(harvests) {
            let mut outcome = CategoryOutcome {
                name: category.name.clone(),
                status: HarvestStatus::NoMatches,
                artifact: None,
                uploads: Vec::new(),
                removed: false,
            };
            match harvest {
                Ok(harvested) if harvested.records.is_empty() => {
                    info!(category = %category.name, "[EXPORT] No matching records, nothing to export");
                }
                Ok(harvested) => {
                    outcome.status = HarvestStatus::Matched(harvested.records.len());
                    if let Some(artifact) = self
                        .exporter
                        .export_or_log(&category.name, &harvested.records)
                    {
                        outcome.artifact = Some(artifact.path.clone());
                        artifacts.push(artifact);
                    }
                }
                Err(e) => {
                    error!(category = %category.name, error = %e, "[RUN][ERROR] Category harvest failed, treating as empty");
                    outcome.status = HarvestStatus::Failed(e.to_string());
                }
            }
            outcomes.push(outcome);
        }

        if artifacts.is_empty() {
            info!("[UPLOAD] No artifacts in this chunk, skipping upload");
            return outcomes;
        }

        let folders = self
            .resolver
            .resolve(self.store.as_ref(), self.target_date)
            .await;
        let records = self
            .uploader
            .upload_batch(self.store.as_ref(), &artifacts, &folders)
            .await;

        for artifact in &artifacts {
            let uploads: Vec<UploadRecord> = records
                .iter()
                .filter(|r| r.category == artifact.category)
                .cloned()
                .collect();
            let removed = self.clean_up(artifact, &uploads);
            if let Some(outcome) = outcomes.iter_mut().find(|o| o.name == artifact.category) {
                outcome.uploads = uploads;
                outcome.removed = removed;
            }
        }
        outcomes
    }

    /// Deletes the local artifact. Returns whether the file is gone.
    fn clean_up(&self, artifact: &Artifact, uploads: &[UploadRecord]) -> bool {
        let exhausted = uploads
            .iter()
            .any(|u| u.outcome == UploadOutcome::Exhausted);
        if exhausted && self.keep_failed_artifacts {
            warn!(file = %artifact.path.display(), "[UPLOAD] Keeping artifact that could not be delivered everywhere");
            return false;
        }

        match std::fs::remove_file(&artifact.path) {
            Ok(()) => {
                info!(file = %artifact.path.display(), "[UPLOAD] Deleted local file");
                true
            }
            Err(e) => {
                error!(file = %artifact.path.display(), error = %e, "[UPLOAD][ERROR] Could not delete local file");
                false
            }
        }
    }
}
