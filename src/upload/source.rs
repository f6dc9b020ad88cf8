use super::schema::FileHandle;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Resolves filesystem paths into file handles, relative to a base directory.
pub struct FileSource {
    base_dir: PathBuf,
}

impl FileSource {
    pub fn new(base_dir: &str) -> Self {
        let expanded = shellexpand::tilde(base_dir).to_string();
        Self {
            base_dir: PathBuf::from(expanded),
        }
    }

    /// Source rooted at the process working directory.
    pub fn current_dir() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        Ok(Self { base_dir: cwd })
    }

    /// Absolute path for `path`, with `~` expanded.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path).to_string();
        self.base_dir.join(expanded)
    }

    /// Name and size of one regular file.
    pub async fn handle(&self, path: &str) -> Result<FileHandle> {
        let abs = self.resolve(path);
        let meta = fs::metadata(&abs)
            .await
            .with_context(|| format!("Failed to stat {}", abs.display()))?;
        if !meta.is_file() {
            bail!("{} is not a regular file", abs.display());
        }
        Ok(FileHandle {
            name: display_name(&abs),
            size_bytes: meta.len(),
            path: Some(abs),
        })
    }

    /// Handles for every path, failing on the first unreadable one.
    pub async fn handles<S: AsRef<str>>(&self, paths: &[S]) -> Result<Vec<FileHandle>> {
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            out.push(self.handle(path.as_ref()).await?);
        }
        Ok(out)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
