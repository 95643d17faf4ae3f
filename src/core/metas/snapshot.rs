use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use tokio::{io::AsyncWriteExt, sync::Mutex};

use crate::core::{
    error::{DriverError, DriverResult},
    network::DriverState,
};

/// Name of the datastore file inside the datastore directory.
pub const DATASTORE_FILE: &str = "vde_plug_docker.json";

/// Result of reading the datastore at startup.
#[derive(Debug)]
pub enum Snapshot {
    Restored(DriverState),
    /// No datastore yet.
    Absent,
    /// The datastore was empty or malformed and has been replaced by an empty one.
    Repaired,
    /// The datastore exists but reading it failed. It must not be overwritten.
    Unreadable,
}

impl Snapshot {
    pub fn into_state(self) -> DriverState {
        match self {
            Snapshot::Restored(state) => state,
            Snapshot::Absent | Snapshot::Repaired | Snapshot::Unreadable => {
                DriverState::default()
            }
        }
    }

    /// Whether the datastore may be rewritten from the state this yields.
    pub fn is_writable(&self) -> bool {
        !matches!(self, Snapshot::Unreadable)
    }
}

/// Reads and atomically rewrites the JSON datastore.
#[derive(Debug)]
pub struct PersistenceGateway {
    path: PathBuf,
    io: Mutex<()>,
}

impl PersistenceGateway {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PersistenceGateway {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    /// Gateway for `DATASTORE_FILE` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(DATASTORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the datastore directory exists.
    pub async fn init(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                anyhow::anyhow!("Failed to create datastore dir {}: {e}", dir.display())
            })?;
        }

        Ok(())
    }

    pub async fn load(&self) -> Snapshot {
        let _io = self.io.lock().await;

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No datastore at {}, starting empty", self.path.display());
                return Snapshot::Absent;
            }
            Err(e) => {
                warn!(
                    "Failed to read datastore {}: {e}, starting empty and leaving it untouched",
                    self.path.display()
                );
                return Snapshot::Unreadable;
            }
        };

        let reason = if data.iter().all(u8::is_ascii_whitespace) {
            "empty".to_string()
        } else {
            match serde_json::from_slice::<DriverState>(&data) {
                Ok(state) => {
                    debug!(
                        "Loaded {} networks from {}",
                        state.networks.len(),
                        self.path.display()
                    );
                    return Snapshot::Restored(state);
                }
                Err(e) => format!("malformed ({e})"),
            }
        };

        warn!(
            "Datastore {} is {reason}, replacing it with an empty one",
            self.path.display()
        );

        let corrupt = self.sibling("corrupt");
        if let Err(e) = tokio::fs::rename(&self.path, &corrupt).await {
            warn!("Failed to keep a copy at {}: {e}", corrupt.display());
        }
        if let Err(e) = self.write(&DriverState::default()).await {
            warn!("{}", e.report());
        }

        Snapshot::Repaired
    }

    /// Replace the datastore with `state`. Readers see either the old or the
    /// new file, never a partial one.
    pub async fn store(&self, state: &DriverState) -> DriverResult<()> {
        let _io = self.io.lock().await;
        self.write(state).await
    }

    /// Remove the datastore, if any.
    pub async fn clean(&self) -> DriverResult<()> {
        let _io = self.io.lock().await;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed datastore {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DriverError::persistence(
                format!("Failed to remove datastore {}", self.path.display()),
                Some(e.into()),
            )),
        }
    }

    async fn write(&self, state: &DriverState) -> DriverResult<()> {
        let data = serde_json::to_vec_pretty(state).map_err(|e| {
            DriverError::persistence("Failed to encode datastore", Some(e.into()))
        })?;

        let tmp = self.sibling("tmp");
        let fail = |what: &str, e: std::io::Error| {
            DriverError::persistence(format!("Failed to {what} {}", tmp.display()), Some(e.into()))
        };

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&tmp)
            .await
            .map_err(|e| fail("open", e))?;
        file.write_all(&data).await.map_err(|e| fail("write", e))?;
        file.sync_all().await.map_err(|e| fail("sync", e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            DriverError::persistence(
                format!("Failed to move datastore into {}", self.path.display()),
                Some(e.into()),
            )
        })?;

        Ok(())
    }

    fn sibling(&self, ext: &str) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".");
        name.push(ext);
        PathBuf::from(name)
    }
}
