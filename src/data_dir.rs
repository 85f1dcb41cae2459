use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "COLSEARCH_DATA_DIR";

const STORE_FILE: &str = "colsearch.redb";

/// Directory holding the record store.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve and create the data directory. Precedence:
    /// `--data-dir`, then `COLSEARCH_DATA_DIR`, then the XDG data home
    /// (`~/.local/share/colsearch/`).
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let env = std::env::var_os(DATA_DIR_ENV_VAR).map(PathBuf::from);
        let root = match pick_root(explicit, env) {
            Some(root) => root,
            None => xdg_data_home()?,
        };
        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        tracing::debug!(root = %root.display(), "resolved data directory");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record store holding documents, chunks, embeddings
    /// and token links.
    pub fn store_db(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }
}

/// Empty overrides count as unset.
fn pick_root(explicit: Option<&Path>, env: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or(env)
        .filter(|path| !path.as_os_str().is_empty())
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("colsearch")
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })
}
