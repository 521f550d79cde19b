/// `load_config` module: reads the static YAML run description and turns it
/// into the core crate's [`RunConfig`].
///
/// The YAML file carries no secrets. Values that differ per deployment can be
/// injected from the environment (a `.env` file is honoured):
///
/// - `DRIVE_ROOT_FOLDER_IDS`: comma separated root folder ids, replacing
///   `storage.root_folder_ids` when set.
///
/// The Drive access token is read separately by [`crate::drive::DriveClient`].
///
/// # Errors
/// Everything here returns `anyhow::Error` with enough context for the CLI to
/// print a useful diagnostic.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use car_harvest_core::config::{CategorySpec, PacingConfig, RetryPolicy, RunConfig};
use car_harvest_core::contract::RootId;
use chrono::{FixedOffset, NaiveDate};
use serde::Deserialize;
use tracing::{error, info};

use crate::extract::ExtractorConfig;

pub const ROOT_FOLDERS_ENV: &str = "DRIVE_ROOT_FOLDER_IDS";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub storage: StorageSection,
    pub extractor: ExtractorConfig,
    pub categories: Vec<CategorySpec>,
}

/// Tunables of a run. Every key is optional; defaults are the long-standing
/// production values.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub chunk_size: usize,
    pub max_concurrent_links: usize,
    pub page_delay_secs: f64,
    pub stagger_delay_secs: f64,
    pub chunk_delay_secs: f64,
    pub upload_retries: u32,
    pub upload_retry_delay_secs: f64,
    pub staging_dir: PathBuf,
    pub date_field: String,
    /// Site-local UTC offset such as `+03:00`, applied to RFC 3339 publish
    /// timestamps before their date is compared.
    pub site_utc_offset: String,
    pub target_date: Option<NaiveDate>,
    pub keep_failed_artifacts: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            chunk_size: 2,
            max_concurrent_links: 2,
            page_delay_secs: 3.0,
            stagger_delay_secs: 2.0,
            chunk_delay_secs: 10.0,
            upload_retries: 3,
            upload_retry_delay_secs: 15.0,
            staging_dir: PathBuf::from("temp_files"),
            date_field: "date_published".to_string(),
            site_utc_offset: "+03:00".to_string(),
            target_date: None,
            keep_failed_artifacts: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StorageSection {
    #[serde(default)]
    pub root_folder_ids: Vec<String>,
}

fn seconds(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("run.{field} = {secs} is not a valid delay: {e}"))
}

impl CliConfig {
    /// Builds the validated core [`RunConfig`]. `date_override` (the CLI
    /// `--date` flag) wins over `run.target_date`, which wins over yesterday.
    pub fn run_config(&self, date_override: Option<NaiveDate>) -> Result<RunConfig> {
        let run = &self.run;
        let roots = self
            .storage
            .root_folder_ids
            .iter()
            .map(|id| RootId::from(id.as_str()))
            .collect();

        let mut config = RunConfig::new(self.categories.clone(), roots);
        config.chunk_size = run.chunk_size;
        config.max_concurrent_links = run.max_concurrent_links;
        config.pacing = PacingConfig {
            page_delay: seconds("page_delay_secs", run.page_delay_secs)?,
            stagger_delay: seconds("stagger_delay_secs", run.stagger_delay_secs)?,
            chunk_delay: seconds("chunk_delay_secs", run.chunk_delay_secs)?,
        };
        config.upload_retry = RetryPolicy {
            attempts: run.upload_retries,
            delay: seconds("upload_retry_delay_secs", run.upload_retry_delay_secs)?,
        };
        config.staging_dir = run.staging_dir.clone();
        config.date_field = run.date_field.clone();
        config.site_offset = run
            .site_utc_offset
            .parse::<FixedOffset>()
            .map_err(|e| anyhow!("run.site_utc_offset = {:?} is not a UTC offset: {e}", run.site_utc_offset))?;
        config.keep_failed_artifacts = run.keep_failed_artifacts;
        if let Some(date) = date_override.or(run.target_date) {
            config.target_date = date;
        }

        config.validate().context("invalid configuration")?;
        config.trace_loaded();
        Ok(config)
    }
}

/// Loads the YAML config at `path` and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Ok(raw) = std::env::var(ROOT_FOLDERS_ENV) {
        let ids: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if !ids.is_empty() {
            info!(roots = ids.len(), "Root folder ids taken from {ROOT_FOLDERS_ENV}");
            config.storage.root_folder_ids = ids;
        }
    }

    Ok(config)
}
