use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::app::Session;
use crate::error::TrendsError;

pub const PROJECT_DIR: &str = ".preprint-trends";
const SESSION_FILE: &str = "session.json";

/// Project-local state under `.preprint-trends/` in the working directory.
#[derive(Debug, Clone)]
pub struct Store {
    project_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, TrendsError> {
        let cwd =
            std::env::current_dir().map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        let project_root = Utf8PathBuf::from_path_buf(cwd.join(PROJECT_DIR))
            .map_err(|_| TrendsError::Filesystem("invalid project path".to_string()))?;
        Ok(Self { project_root })
    }

    pub fn new_with_root(project_root: Utf8PathBuf) -> Self {
        Self { project_root }
    }

    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    pub fn session_path(&self) -> Utf8PathBuf {
        self.project_root.join(SESSION_FILE)
    }

    pub fn ensure_project_root(&self) -> Result<(), TrendsError> {
        fs::create_dir_all(self.project_root.as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))
    }

    pub fn load_session(&self) -> Result<Option<Session>, TrendsError> {
        let path = self.session_path();
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| TrendsError::Filesystem(format!("read {path}: {err}")))?;
        let session = serde_json::from_str(&content)
            .map_err(|err| TrendsError::Filesystem(format!("parse {path}: {err}")))?;
        Ok(Some(session))
    }

    pub fn save_session(&self, session: &Session) -> Result<Utf8PathBuf, TrendsError> {
        let path = self.session_path();
        let content = serde_json::to_vec_pretty(session)
            .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&path, &content)?;
        Ok(path)
    }

    pub fn clear_session(&self) -> Result<bool, TrendsError> {
        let path = self.session_path();
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        Ok(true)
    }

    /// Writes through a temp file in the destination directory, then
    /// persists it over `path`.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TrendsError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("preprint-trends")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content)
            .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| TrendsError::Filesystem(format!("persist {path}: {err}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new().unwrap();
        assert!(store.session_path().ends_with(".preprint-trends/session.json"));
    }

    #[test]
    fn missing_session_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("state")).unwrap();
        let store = Store::new_with_root(root);
        assert!(store.load_session().unwrap().is_none());
        assert!(!store.clear_session().unwrap());
    }
}
