use std::path::Path;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
    Body, Response,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::error::{Error, Result};

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Remote storage the relay uploads into.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Find a non-trashed folder with the given name, returning its id.
    async fn find_folder(&self, token: &str, name: &str) -> Result<Option<String>>;

    /// Create a folder with the given name, returning its id.
    async fn create_folder(&self, token: &str, name: &str) -> Result<String>;

    /// Upload a local file into the folder, returning the new file's id.
    async fn upload_file(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        path: &Path,
    ) -> Result<String>;
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

/// Google Drive v3 REST client.
#[derive(Debug, Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    base_url: String,
}

impl DriveClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, "https://www.googleapis.com")
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

/// Quote a value for use inside a Drive search query string literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Turn a non-2xx response into a storage error.
async fn check(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::StorageUnavailable(format!(
        "{} failed ({}): {}",
        what, status, body
    )))
}

#[async_trait]
impl Storage for DriveClient {
    async fn find_folder(&self, token: &str, name: &str) -> Result<Option<String>> {
        let query = format!(
            "name={} and mimeType='{}' and trashed=false",
            quote(name),
            FOLDER_MIME_TYPE
        );
        let response = self
            .http
            .get(format!("{}/drive/v3/files", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("spaces", "drive"),
            ])
            .send()
            .await?;
        let list: FileList = check(response, "folder lookup").await?.json().await?;
        debug!("Found {} folders named {}", list.files.len(), name);

        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn create_folder(&self, token: &str, name: &str) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/drive/v3/files", self.base_url))
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME_TYPE }))
            .send()
            .await?;
        let folder: DriveFile = check(response, "folder creation").await?.json().await?;
        info!("Created folder {} ({})", name, folder.id);

        Ok(folder.id)
    }

    async fn upload_file(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        path: &Path,
    ) -> Result<String> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        // Start a resumable session, then send the whole file in one request
        let response = self
            .http
            .post(format!("{}/upload/drive/v3/files", self.base_url))
            .bearer_auth(token)
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", length)
            .json(&json!({ "name": name, "parents": [folder_id] }))
            .send()
            .await?;
        let response = check(response, "upload session").await?;
        let session = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                Error::StorageUnavailable("upload session has no location".to_string())
            })?
            .to_string();

        let response = self
            .http
            .put(session)
            .header(CONTENT_TYPE, mime_type)
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let uploaded: DriveFile = check(response, "upload").await?.json().await?;

        Ok(uploaded.id)
    }
}
