use crate::error::ExecError;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Per-session workspace directories under one host root.
///
/// Layout is `<root>/<owner>/<session>`. Every join is checked: each segment
/// must be a single plain path component and the joined path must stay under
/// the root.
#[derive(Debug, Clone)]
pub struct SessionWorkspaces {
    root: PathBuf,
}

impl SessionWorkspaces {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ExecError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| ExecError::Workspace {
            message: format!(
                "Failed to create workspace root {}: {}",
                root.display(),
                err
            ),
        })?;
        let root = fs::canonicalize(&root).map_err(|err| ExecError::Workspace {
            message: format!(
                "Failed to canonicalize workspace root {}: {}",
                root.display(),
                err
            ),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, owner: &str, session: &str) -> Result<PathBuf, ExecError> {
        let path = self
            .root
            .join(plain_segment(owner, "owner")?)
            .join(plain_segment(session, "session")?);

        if !path.starts_with(&self.root) {
            return Err(ExecError::Workspace {
                message: format!("Workspace path {} escapes the root", path.display()),
            });
        }
        Ok(path)
    }

    pub fn create(&self, owner: &str, session: &str) -> Result<PathBuf, ExecError> {
        let path = self.path_for(owner, session)?;
        fs::create_dir_all(&path).map_err(|err| ExecError::Workspace {
            message: format!("Failed to create workspace {}: {}", path.display(), err),
        })?;
        info!(workspace = %path.display(), "created session workspace");
        Ok(path)
    }

    /// Deletes a session workspace; failures are logged and reported as false.
    pub fn remove(&self, owner: &str, session: &str) -> bool {
        let path = match self.path_for(owner, session) {
            Ok(path) => path,
            Err(err) => {
                warn!("Refusing to remove workspace: {}", err);
                return false;
            }
        };

        if !path.exists() {
            return false;
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(workspace = %path.display(), "deleted session workspace");
                true
            }
            Err(err) => {
                warn!(workspace = %path.display(), "Error deleting workspace directory: {}", err);
                false
            }
        }
    }
}

fn plain_segment<'a>(value: &'a str, what: &str) -> Result<&'a str, ExecError> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == value => Ok(value),
        _ => Err(ExecError::Workspace {
            message: format!("Invalid {} id '{}'", what, value),
        }),
    }
}
