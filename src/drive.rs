//! Google Drive v3 storage over plain REST.
//!
//! [`DriveClient`] is the authenticator: it checks the bearer token against
//! the `about` endpoint and hands out a [`DriveSession`], which implements
//! folder lookup/creation and multipart uploads.
//!
//! HTTP 404 means the parent or target does not exist
//! ([`StoreError::NotFound`]). Everything else, network failures and
//! undecodable responses included, is [`StoreError::Transient`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use car_harvest_core::contract::{
    AuthError, FolderId, RemoteAuthenticator, RemoteFileId, RemoteStore, StoreError,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

pub const ACCESS_TOKEN_ENV: &str = "DRIVE_ACCESS_TOKEN";

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const BOUNDARY: &str = "car_harvest_upload_boundary";

#[derive(Debug, Clone)]
struct Endpoints {
    api: String,
    upload: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api: DRIVE_API.to_string(),
            upload: DRIVE_UPLOAD_API.to_string(),
        }
    }
}

pub struct DriveClient {
    http: reqwest::Client,
    token: String,
    endpoints: Endpoints,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            endpoints: Endpoints::default(),
        }
    }

    /// Reads the access token from `DRIVE_ACCESS_TOKEN`.
    pub fn new_from_env() -> Result<Self> {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .with_context(|| format!("{ACCESS_TOKEN_ENV} missing in environment"))?;
        if token.trim().is_empty() {
            anyhow::bail!("{ACCESS_TOKEN_ENV} is empty");
        }
        info!(token_set = true, "Initialised DriveClient from environment");
        Ok(Self::new(token.trim()))
    }

    /// Points the client at another Drive-compatible server.
    pub fn with_base_urls(mut self, api: impl Into<String>, upload: impl Into<String>) -> Self {
        self.endpoints = Endpoints {
            api: api.into(),
            upload: upload.into(),
        };
        self
    }
}

#[async_trait]
impl RemoteAuthenticator for DriveClient {
    async fn authenticate(&self) -> Result<Arc<dyn RemoteStore>, AuthError> {
        let response = self
            .http
            .get(format!("{}/about", self.endpoints.api))
            .query(&[("fields", "user")])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AuthError(format!("could not reach Drive: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError(format!("Drive rejected credentials ({status}): {body}")));
        }

        info!("[UPLOAD] Drive session established");
        Ok(Arc::new(DriveSession {
            http: self.http.clone(),
            token: self.token.clone(),
            endpoints: self.endpoints.clone(),
        }))
    }
}

pub struct DriveSession {
    http: reqwest::Client,
    token: String,
    endpoints: Endpoints,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

/// Maps a non-success Drive status to a storage error.
pub fn classify_status(status: StatusCode, context: &str) -> StoreError {
    if status == StatusCode::NOT_FOUND {
        StoreError::NotFound(context.to_string())
    } else {
        StoreError::Transient(format!("{context}: HTTP {status}"))
    }
}

/// Quotes a value for use inside a Drive `q` expression.
pub fn quote_query_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// The `files.list` query for a non-trashed folder `name` directly under `parent`.
pub fn folder_query(name: &str, parent: &FolderId) -> String {
    format!(
        "name = {} and {} in parents and mimeType = '{FOLDER_MIME}' and trashed = false",
        quote_query_value(name),
        quote_query_value(parent.as_str()),
    )
}

/// A `multipart/related` body: JSON metadata followed by the file content.
pub fn multipart_related_body(metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{BOUNDARY}\r\nContent-Type: text/csv\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn transient(e: impl std::fmt::Display) -> StoreError {
    StoreError::Transient(e.to_string())
}

impl DriveSession {
    async fn find_folder(&self, name: &str, parent: &FolderId) -> Result<Option<FolderId>, StoreError> {
        let response = self
            .http
            .get(format!("{}/files", self.endpoints.api))
            .query(&[
                ("q", folder_query(name, parent).as_str()),
                ("fields", "files(id, name)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transient)?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), parent.as_str()));
        }
        let list: FileList = response.json().await.map_err(transient)?;
        Ok(list.files.into_iter().next().map(|f| FolderId::new(f.id)))
    }

    async fn create_folder(&self, name: &str, parent: &FolderId) -> Result<FolderId, StoreError> {
        let response = self
            .http
            .post(format!("{}/files", self.endpoints.api))
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .bearer_auth(&self.token)
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent.as_str()],
            }))
            .send()
            .await
            .map_err(transient)?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), parent.as_str()));
        }
        let file: DriveFile = response.json().await.map_err(transient)?;
        Ok(FolderId::new(file.id))
    }
}

#[async_trait]
impl RemoteStore for DriveSession {
    async fn resolve_or_create_folder(
        &self,
        name: &str,
        parent: &FolderId,
    ) -> Result<FolderId, StoreError> {
        if let Some(existing) = self.find_folder(name, parent).await? {
            debug!(folder = name, parent = %parent, id = %existing, "Found existing folder");
            return Ok(existing);
        }
        let created = self.create_folder(name, parent).await?;
        info!(folder = name, parent = %parent, id = %created, "[UPLOAD] Created folder");
        Ok(created)
    }

    async fn upload(&self, local_path: &Path, folder: &FolderId) -> Result<RemoteFileId, StoreError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| transient(format!("{} has no file name", local_path.display())))?;
        let content = tokio::fs::read(local_path).await.map_err(transient)?;
        let metadata = json!({ "name": file_name, "parents": [folder.as_str()] });

        let response = self
            .http
            .post(format!("{}/files", self.endpoints.upload))
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id"),
                ("supportsAllDrives", "true"),
            ])
            .bearer_auth(&self.token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={BOUNDARY}"),
            )
            .body(multipart_related_body(&metadata, &content))
            .send()
            .await
            .map_err(transient)?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), folder.as_str()));
        }
        let file: DriveFile = response.json().await.map_err(transient)?;
        Ok(RemoteFileId::new(file.id))
    }
}
