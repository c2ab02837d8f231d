use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{info, warn};
use tempfile::TempDir;

use crate::{
    auth::Authorizer,
    drive::Storage,
    error::{Error, Result},
    session::UserId,
};

/// A document received in chat.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub mime_type: Option<String>,
}

/// A document stored in the destination folder.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    pub size: u64,
}

/// Moves chat documents into the user's storage through a local staging copy.
#[derive(Debug)]
pub struct UploadRelay<S> {
    storage: S,
    auth: Arc<Authorizer>,
    folder_name: String,
    staging_dir: PathBuf,
}

impl<S: Storage> UploadRelay<S> {
    pub fn new(
        storage: S,
        auth: Arc<Authorizer>,
        folder_name: String,
        staging_dir: PathBuf,
    ) -> Self {
        Self {
            storage,
            auth,
            folder_name,
            staging_dir,
        }
    }

    /// Upload a document for the user.
    ///
    /// `download` writes the document to the path it is given. Every upload
    /// stages into its own directory, which is removed whether or not the
    /// upload succeeds.
    pub async fn upload<F, Fut>(
        &self,
        user_id: UserId,
        document: &Document,
        download: F,
    ) -> Result<UploadedFile>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let credentials = self.auth.credentials(user_id).await?;
        let token = credentials.access_token.as_str();

        let folder_id = self.ensure_folder(token).await?;

        // Stage the file locally
        let name = file_name(&document.name);
        let staging = self.staging_dir_for(user_id).await?;
        let path = staging.path().join(name);

        let result = async {
            download(path.clone()).await?;
            let size = tokio::fs::metadata(&path).await?.len();

            let mime_type = document
                .mime_type
                .clone()
                .unwrap_or_else(|| mime_guess::from_path(name).first_or_octet_stream().to_string());
            info!(
                "Uploading {} ({}, {}) for user {}",
                name,
                mime_type,
                bytesize::to_string(size, true),
                user_id
            );
            let id = self
                .storage
                .upload_file(token, &folder_id, name, &mime_type, &path)
                .await?;

            Ok::<_, Error>(UploadedFile {
                id,
                name: name.to_string(),
                size,
            })
        }
        .await;

        // If this future is dropped early, the TempDir destructor cleans up instead
        let dir = staging.path().to_path_buf();
        match tokio::task::spawn_blocking(move || staging.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("Failed to remove staging dir {}: {}", dir.display(), err),
            Err(err) => warn!("Failed to remove staging dir {}: {}", dir.display(), err),
        }

        result
    }

    /// A fresh staging directory for a single upload of the user.
    async fn staging_dir_for(&self, user_id: UserId) -> Result<TempDir> {
        let dir = self.staging_dir.join(user_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(tempfile::Builder::new().prefix("upload-").tempdir_in(dir)?)
    }

    /// Look up the destination folder, creating it if missing.
    async fn ensure_folder(&self, token: &str) -> Result<String> {
        if let Some(id) = self.storage.find_folder(token, &self.folder_name).await? {
            return Ok(id);
        }
        info!("Folder {} not found, creating it", self.folder_name);
        self.storage.create_folder(token, &self.folder_name).await
    }
}

/// Reduce a chat-supplied name to a single path component.
fn file_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("document.bin")
}
