//! On-disk SSO token cache, one JSON file per (start URL, region).

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::session::FederationToken;
use crate::error::{Error, Result};
use crate::identity::FederationParams;

/// Token files keyed by a SHA-1 of start URL and region.
#[derive(Debug)]
pub struct TokenCache {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TokenCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the token for `params`.
    #[must_use]
    pub fn path_for(&self, params: &FederationParams) -> PathBuf {
        let mut hasher = Sha1::new();
        hasher.update(format!("{}|{}", params.start_url, params.region).as_bytes());
        self.dir
            .join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    /// Load a token that is still valid. Expired, missing or unreadable
    /// entries are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns an error only if an existing file cannot be read.
    pub async fn load(&self, params: &FederationParams) -> Result<Option<FederationToken>> {
        let path = self.path_for(params);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path, e)),
        };

        let token: FederationToken = match serde_json::from_str(&content) {
            Ok(token) => token,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable token cache entry");
                return Ok(None);
            }
        };

        if token.start_url != params.start_url || token.region != params.region {
            warn!(path = %path.display(), "Token cache entry belongs to a different endpoint");
            return Ok(None);
        }

        if !token.is_valid_at(Utc::now()) {
            debug!(start_url = %params.start_url, expired_at = %token.expires_at, "Cached token expired");
            return Ok(None);
        }

        Ok(Some(token))
    }

    /// Persist `token`, replacing any previous entry atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save(&self, token: &FederationToken) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;
        let params = FederationParams {
            start_url: token.start_url.clone(),
            region: token.region.clone(),
        };
        let path = self.path_for(&params);

        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let json = serde_json::to_vec_pretty(token).map_err(|e| Error::Internal(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        tmp.write_all(&json).map_err(|e| Error::io(tmp.path(), e))?;
        restrict_permissions(tmp.path())?;
        tmp.persist(&path).map_err(|e| Error::io(&path, e.error))?;

        debug!(path = %path.display(), expires_at = %token.expires_at, "Saved token to cache");
        Ok(path)
    }

    /// Remove the entry for `params`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn remove(&self, params: &FederationParams) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(params);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(&path, e)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
