use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Local, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::contract::RootId;
use crate::export::artifact_file_name;

/// UTC offset of the source site (Kuwait, no daylight saving).
pub const SITE_UTC_OFFSET_SECS: i32 = 3 * 3600;

/// Placeholder substituted with the page number in every URL template.
pub const PAGE_PLACEHOLDER: &str = "{}";

/// One `(url template, page count)` entry of a category's pagination plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePlan {
    #[serde(rename = "url")]
    pub url_template: String,
    #[serde(rename = "count")]
    pub page_count: u32,
}

impl PagePlan {
    pub fn new(url_template: impl Into<String>, page_count: u32) -> Self {
        Self {
            url_template: url_template.into(),
            page_count,
        }
    }

    /// URL of the given 1-based page.
    pub fn page_url(&self, page: u32) -> String {
        self.url_template
            .replacen(PAGE_PLACEHOLDER, &page.to_string(), 1)
    }
}

/// A named category and its ordered pagination plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub pages: Vec<PagePlan>,
}

impl CategorySpec {
    pub fn new(name: impl Into<String>, pages: Vec<PagePlan>) -> Self {
        Self {
            name: name.into(),
            pages,
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.pages.iter().map(|p| u64::from(p.page_count)).sum()
    }
}

/// Fixed delays used to pace requests against the source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// Between successive page fetches of one category.
    pub page_delay: Duration,
    /// Between successive task launches inside one chunk.
    pub stagger_delay: Duration,
    /// Between the end of one chunk and the start of the next.
    pub chunk_delay: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_secs(3),
            stagger_delay: Duration::from_secs(2),
            chunk_delay: Duration::from_secs(10),
        }
    }
}

impl PacingConfig {
    /// No waiting at all. Handy for tests and dry runs.
    pub fn none() -> Self {
        Self {
            page_delay: Duration::ZERO,
            stagger_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
        }
    }
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(15),
        }
    }
}

/// Everything one harvest run needs, already validated and typed.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub categories: Vec<CategorySpec>,
    pub chunk_size: usize,
    pub max_concurrent_links: usize,
    pub pacing: PacingConfig,
    pub upload_retry: RetryPolicy,
    pub target_date: NaiveDate,
    pub date_field: String,
    /// Publish timestamps are compared in this offset.
    pub site_offset: FixedOffset,
    pub staging_dir: PathBuf,
    pub root_folders: Vec<RootId>,
    /// Keep local artifacts that could not be delivered to every root.
    pub keep_failed_artifacts: bool,
}

impl RunConfig {
    /// A config with the historical defaults: chunks of 2, 2 concurrent
    /// harvesters, yesterday as target date, `date_published` as date field.
    pub fn new(categories: Vec<CategorySpec>, root_folders: Vec<RootId>) -> Self {
        Self {
            categories,
            chunk_size: 2,
            max_concurrent_links: 2,
            pacing: PacingConfig::default(),
            upload_retry: RetryPolicy::default(),
            target_date: default_target_date(),
            date_field: "date_published".to_string(),
            site_offset: default_site_offset(),
            staging_dir: PathBuf::from("temp_files"),
            root_folders,
            keep_failed_artifacts: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.max_concurrent_links == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.upload_retry.attempts == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.root_folders.is_empty() {
            return Err(ConfigError::NoRootFolders);
        }
        if self.date_field.trim().is_empty() {
            return Err(ConfigError::EmptyDateField);
        }

        let mut seen = HashSet::new();
        let mut files: HashMap<String, &str> = HashMap::new();
        for category in &self.categories {
            if !seen.insert(category.name.as_str()) {
                return Err(ConfigError::DuplicateCategory(category.name.clone()));
            }
            let file = artifact_file_name(&category.name);
            if let Some(first) = files.get(&file) {
                return Err(ConfigError::ArtifactNameClash {
                    first: first.to_string(),
                    second: category.name.clone(),
                    file,
                });
            }
            files.insert(file, category.name.as_str());
            for plan in &category.pages {
                let placeholders = plan.url_template.matches(PAGE_PLACEHOLDER).count();
                if placeholders != 1 {
                    return Err(ConfigError::BadUrlTemplate {
                        category: category.name.clone(),
                        template: plan.url_template.clone(),
                        placeholders,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            categories = self.categories.len(),
            chunk_size = self.chunk_size,
            max_concurrent_links = self.max_concurrent_links,
            roots = self.root_folders.len(),
            target_date = %self.target_date,
            site_offset = %self.site_offset,
            staging_dir = %self.staging_dir.display(),
            "Loaded RunConfig"
        );
        debug!(?self, "RunConfig loaded (full debug)");
    }
}

pub fn default_site_offset() -> FixedOffset {
    FixedOffset::east_opt(SITE_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// The day before today, in local time.
pub fn default_target_date() -> NaiveDate {
    let today = Local::now().date_naive();
    today.pred_opt().unwrap_or(today)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_size must be at least 1")]
    ZeroChunkSize,

    #[error("max_concurrent_links must be at least 1")]
    ZeroConcurrency,

    #[error("upload_retries must be at least 1")]
    ZeroRetries,

    #[error("at least one root folder id is required")]
    NoRootFolders,

    #[error("date_field must not be empty")]
    EmptyDateField,

    #[error("category '{0}' is declared more than once")]
    DuplicateCategory(String),

    #[error("categories '{first}' and '{second}' would both be exported to '{file}'")]
    ArtifactNameClash {
        first: String,
        second: String,
        file: String,
    },

    #[error("url template '{template}' of category '{category}' must contain exactly one '{{}}' placeholder, found {placeholders}")]
    BadUrlTemplate {
        category: String,
        template: String,
        placeholders: usize,
    },
}
