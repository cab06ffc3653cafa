//! File-backed token store.
//!
//! The record lives in `<config dir>/token.json`, readable by the owner only.
//! Writes go to a sibling temporary file that is renamed over the target, so a
//! concurrent reader sees either the old or the new record, never half of one.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tomclient_types::{StoredToken, TokenStore, TomError, traits::Result};

/// Name of the credential file inside the config directory.
pub const TOKEN_FILE_NAME: &str = "token.json";

/// A persistent [`TokenStore`] backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    /// Creates a store rooted at `dir`. Nothing is touched on disk until the
    /// first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of the credential file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE_NAME)
    }

    async fn ensure_dir(&self) -> std::io::Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(&self.dir).await
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<StoredToken>> {
        let path = self.path();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TomError::Storage(format!(
                    "failed to read token file {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_slice(&data).map(Some).map_err(|e| {
            TomError::Storage(format!(
                "failed to parse token file {}: {e}",
                path.display()
            ))
        })
    }

    async fn save(&self, token: &StoredToken) -> Result<()> {
        self.ensure_dir().await.map_err(|e| {
            TomError::Storage(format!(
                "failed to create config directory {}: {e}",
                self.dir.display()
            ))
        })?;
        let data = serde_json::to_vec_pretty(token)?;
        let path = self.path();
        write_private(&path, &data).await.map_err(|e| {
            TomError::Storage(format!(
                "failed to write token file {}: {e}",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), "token record written");
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let path = self.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TomError::Storage(format!(
                "failed to delete token file {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Write `bytes` to `path` with mode 0600 via temp file + rename.
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp).await?;
    // `mode` only applies on creation; a stale temp file keeps its old bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}
