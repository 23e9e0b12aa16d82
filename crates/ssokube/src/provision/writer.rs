//! Serialized read-modify-write access to local configuration files.

use std::collections::HashSet;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::aws_profile::{upsert_profile, ProfileSection};
use super::kubeconfig::Kubeconfig;
use crate::error::{Error, Result};

/// Single writer for the kubeconfig and the AWS config file.
///
/// Every update holds one async mutex for the whole read-modify-write. The
/// first time a file is changed during the lifetime of the writer, the
/// previous content is copied to `<file>.<UTC timestamp>.bak`.
#[derive(Debug)]
pub struct ConfigWriter {
    kubeconfig: PathBuf,
    aws_config: PathBuf,
    backed_up: Mutex<HashSet<PathBuf>>,
}

impl ConfigWriter {
    #[must_use]
    pub fn new(kubeconfig: impl Into<PathBuf>, aws_config: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            aws_config: aws_config.into(),
            backed_up: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig
    }

    #[must_use]
    pub fn aws_config_path(&self) -> &Path {
        &self.aws_config
    }

    /// Current kubeconfig. A missing file is an empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn read_kubeconfig(&self) -> Result<Kubeconfig> {
        let _guard = self.backed_up.lock().await;
        Kubeconfig::parse(&read_or_empty(&self.kubeconfig).await?)
    }

    /// Apply `update` to the kubeconfig and write it back if it changed.
    ///
    /// # Errors
    ///
    /// Returns `update`'s error, or an error reading, backing up or writing
    /// the file.
    pub async fn update_kubeconfig<R>(
        &self,
        update: impl FnOnce(&mut Kubeconfig) -> Result<R>,
    ) -> Result<(R, bool)> {
        let mut backed_up = self.backed_up.lock().await;
        let before = read_or_empty(&self.kubeconfig).await?;
        let mut config = Kubeconfig::parse(&before)?;
        let value = update(&mut config)?;
        let after = config.to_yaml()?;
        let changed = after != before;
        if changed {
            write_file(&self.kubeconfig, after, &mut backed_up).await?;
        }
        Ok((value, changed))
    }

    /// Run `update` while holding the writer lock, after backing up the
    /// kubeconfig. For tools that rewrite the kubeconfig themselves.
    ///
    /// # Errors
    ///
    /// Returns the backup failure or `update`'s error.
    pub async fn run_exclusive<R, Fut>(&self, update: impl FnOnce(PathBuf) -> Fut) -> Result<R>
    where
        Fut: Future<Output = Result<R>>,
    {
        let mut backed_up = self.backed_up.lock().await;
        backup_once(&self.kubeconfig, &mut backed_up).await?;
        update(self.kubeconfig.clone()).await
    }

    /// Add or replace `profile` in the AWS config file.
    ///
    /// # Errors
    ///
    /// Returns an error reading, backing up or writing the file.
    pub async fn upsert_profile(&self, profile: &ProfileSection) -> Result<bool> {
        let mut backed_up = self.backed_up.lock().await;
        let before = read_or_empty(&self.aws_config).await?;
        let after = upsert_profile(&before, profile);
        if after == before {
            return Ok(false);
        }
        write_file(&self.aws_config, after, &mut backed_up).await?;
        debug!(profile = %profile.name, path = %self.aws_config.display(), "Wrote AWS profile");
        Ok(true)
    }
}

async fn read_or_empty(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Path of the backup taken for `path` at `stamp`.
#[must_use]
pub fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{stamp}.bak"));
    path.with_file_name(name)
}

async fn backup_once(path: &Path, backed_up: &mut HashSet<PathBuf>) -> Result<()> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    if exists && backed_up.insert(path.to_path_buf()) {
        let backup = backup_path(path, &Utc::now().format("%Y%m%dT%H%M%SZ").to_string());
        tokio::fs::copy(path, &backup)
            .await
            .map_err(|e| Error::io(&backup, e))?;
        info!(path = %path.display(), backup = %backup.display(), "Backed up previous file");
    }
    Ok(())
}

async fn write_file(path: &Path, content: String, backed_up: &mut HashSet<PathBuf>) -> Result<()> {
    backup_once(path, backed_up).await?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || replace_file(&target, &content))
        .await
        .map_err(|e| Error::Internal(format!("write of {} aborted: {e}", path.display())))?
}

/// Write through a temp file in the target directory, then rename into place.
fn replace_file(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
