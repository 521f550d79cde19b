//! Tabular export of a category's matching records.
//!
//! One CSV file per category, named after the category. The header is the
//! union of every field seen across the records, in first-seen order. The
//! file is written to a temporary sibling and renamed into place, so a failed
//! export never leaves a half-written artifact behind.

use std::io::Write;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::contract::Record;

/// A written export, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub category: String,
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no records to export for '{0}'")]
    Empty(String),

    #[error("I/O error while exporting: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("could not move finished export into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub struct Exporter {
    staging_dir: PathBuf,
}

impl Exporter {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    /// Path the artifact for `category` is written to.
    pub fn artifact_path(&self, category: &str) -> PathBuf {
        self.staging_dir.join(artifact_file_name(category))
    }

    pub fn export(&self, category: &str, records: &[Record]) -> Result<Artifact, ExportError> {
        if records.is_empty() {
            return Err(ExportError::Empty(category.to_string()));
        }

        std::fs::create_dir_all(&self.staging_dir)?;
        let path = self.artifact_path(category);

        let columns = column_union(records);
        let mut staged = tempfile::NamedTempFile::new_in(&self.staging_dir)?;
        {
            let mut writer = csv::WriterBuilder::new().from_writer(staged.as_file_mut());
            writer.write_record(&columns)?;
            for record in records {
                writer.write_record(columns.iter().map(|c| cell(record.get(c))))?;
            }
            writer.flush()?;
        }
        staged.as_file_mut().flush()?;
        staged.persist(&path)?;

        info!(
            category,
            path = %path.display(),
            rows = records.len(),
            columns = columns.len(),
            "[EXPORT] Wrote artifact"
        );
        Ok(Artifact {
            category: category.to_string(),
            path,
            rows: records.len(),
        })
    }

    /// Like [`Exporter::export`], but logs failures and yields `None`.
    pub fn export_or_log(&self, category: &str, records: &[Record]) -> Option<Artifact> {
        match self.export(category, records) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                error!(category, error = %e, "[EXPORT] Export failed, category will not be uploaded");
                None
            }
        }
    }
}

/// File name of a category's artifact. Distinct categories can map to the
/// same name, which [`crate::config::RunConfig::validate`] rejects.
pub fn artifact_file_name(category: &str) -> String {
    let stem: String = category
        .trim()
        .chars()
        .map(|c| if is_unsafe_in_file_name(c) { '_' } else { c })
        .collect();
    let stem = if stem.is_empty() { "category".to_string() } else { stem };
    format!("{stem}.csv")
}

// Illegal or awkward in file names on common platforms.
fn is_unsafe_in_file_name(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

fn column_union(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for (field, _) in record.fields() {
            if !columns.iter().any(|c| c == field) {
                columns.push(field.clone());
            }
        }
    }
    columns
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
