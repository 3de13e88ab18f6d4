use crate::error::Result;
use crate::StoreSnapshot;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// JSON snapshot file of the in-memory store.
///
/// Saves go through a sibling `*.tmp` file and a rename, so a reader never
/// sees a half-written snapshot. All saves share the same tmp file, so
/// concurrent saves to one path must be serialised by the caller.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    path: PathBuf,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    pub async fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let body = serde_json::to_vec(snapshot)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &body).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            counters = snapshot.counter.len(),
            gauges = snapshot.gauge.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Reads the snapshot. A missing or empty file is an empty store.
    pub async fn load(&self) -> Result<StoreSnapshot> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No snapshot file, starting empty");
                return Ok(StoreSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(StoreSnapshot::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }
}
