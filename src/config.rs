use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::AppError;

pub const HOME_ENV: &str = "PLANLOOP_HOME";
pub const SESSION_ENV: &str = "PLANLOOP_SESSION_ID";
pub const LOG_ENV: &str = "PLANLOOP_LOG";

const STORE_DIR: &str = ".planloop";
const STORE_FILE: &str = "planloop.db";

/// Where the store and its lock file live for one workspace.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
    store_dir: PathBuf,
}

impl Workspace {
    /// `PLANLOOP_HOME` overrides the workspace store directory; otherwise
    /// the store sits under `<cwd>/.planloop`.
    pub fn resolve(cwd: Option<&Path>) -> Result<Self, AppError> {
        let root = match cwd {
            Some(path) if path.as_os_str().is_empty() => {
                return Err(AppError::invalid("--cwd is empty"));
            }
            Some(path) => absolutize(path)?,
            None => env::current_dir()?,
        };
        let store_dir = match env::var(HOME_ENV) {
            Ok(home) if !home.trim().is_empty() => absolutize(Path::new(home.trim()))?,
            _ => root.join(STORE_DIR),
        };
        Ok(Self { root, store_dir })
    }

    #[cfg(test)]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let store_dir = root.join(STORE_DIR);
        Self { root, store_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_dir.join(STORE_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.store_path().with_extension("lock")
    }

    pub fn prepare(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.store_dir).map_err(|err| {
            AppError::Unavailable(format!(
                "cannot create store directory {}: {err}",
                self.store_dir.display()
            ))
        })
    }

    /// Lock file guarding the whole invocation. Callers hold its write guard
    /// until they exit.
    pub fn open_lock(&self) -> Result<fd_lock::RwLock<File>, AppError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path())?;
        Ok(fd_lock::RwLock::new(file))
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, AppError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

pub fn resolve_session(session_id: Option<String>) -> Result<String, AppError> {
    let session_id =
        session_id.ok_or_else(|| AppError::invalid("--session-id is required"))?;
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid("--session-id is empty"));
    }
    Ok(trimmed.to_string())
}
