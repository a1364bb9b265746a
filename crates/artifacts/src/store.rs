use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid artifact path: path traversal detected ({path})")]
    PathTraversal { path: String },
    #[error("Invalid file name '{name}'")]
    InvalidName { name: String },
    #[error("Artifact store I/O error: {message}")]
    Io { message: String },
}

/// A file handed to a [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub owner: String,
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    /// Path relative to the store root.
    pub relative_path: String,
    pub size: u64,
}

/// Durable storage for recovered files.
pub trait FileStore: Send + Sync {
    fn store(&self, upload: FileUpload) -> Result<StoredFile, StoreError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar<'a> {
    id: &'a str,
    owner: &'a str,
    name: &'a str,
    content_type: &'a str,
    size: u64,
    metadata: &'a Value,
}

/// Stores files as `<uuid>_<basename>` under one root directory, with a
/// `.meta.json` sidecar holding owner, content type and metadata.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| io_error(&root, err))?;
        let root = fs::canonicalize(&root).map_err(|err| io_error(&root, err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for `relative`, refusing anything that leaves the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StoreError> {
        let traversal = || StoreError::PathTraversal {
            path: relative.to_string(),
        };
        let relative_path = Path::new(relative);
        if relative.is_empty()
            || !relative_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(traversal());
        }

        let path = self.root.join(relative_path);
        if !path.starts_with(&self.root) {
            return Err(traversal());
        }
        if let Ok(real) = fs::canonicalize(&path) {
            if !real.starts_with(&self.root) {
                return Err(traversal());
            }
        }
        Ok(path)
    }

    /// Deletes a stored file and its sidecar. Errors are logged and reported
    /// as `false`.
    pub fn delete(&self, relative: &str) -> bool {
        let path = match self.resolve(relative) {
            Ok(path) => path,
            Err(err) => {
                error!("Error deleting artifact file {}: {}", relative, err);
                return false;
            }
        };
        if !path.exists() {
            return false;
        }
        if let Err(err) = fs::remove_file(&path) {
            error!("Error deleting artifact file {}: {}", relative, err);
            return false;
        }
        let _ = fs::remove_file(sidecar_path(&path));
        info!("Deleted artifact file: {}", relative);
        true
    }
}

impl FileStore for LocalArtifactStore {
    fn store(&self, upload: FileUpload) -> Result<StoredFile, StoreError> {
        let basename = Path::new(&upload.name)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StoreError::InvalidName {
                name: upload.name.clone(),
            })?;

        let id = Uuid::new_v4().to_string();
        let relative_path = format!("{}_{}", id, basename);
        let path = self.resolve(&relative_path)?;

        fs::write(&path, &upload.data).map_err(|err| io_error(&path, err))?;
        let size = upload.data.len() as u64;

        let sidecar = Sidecar {
            id: &id,
            owner: &upload.owner,
            name: &upload.name,
            content_type: &upload.content_type,
            size,
            metadata: &upload.metadata,
        };
        let sidecar = serde_json::to_vec_pretty(&sidecar).map_err(|err| StoreError::Io {
            message: err.to_string(),
        })?;
        let sidecar_file = sidecar_path(&path);
        fs::write(&sidecar_file, sidecar).map_err(|err| io_error(&sidecar_file, err))?;

        info!(
            "Stored artifact {} for user {}: {} ({} bytes)",
            id, upload.owner, upload.name, size
        );
        Ok(StoredFile {
            id,
            relative_path,
            size,
        })
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io {
        message: format!("{}: {}", path.display(), err),
    }
}
