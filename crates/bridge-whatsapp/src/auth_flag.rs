//! Durable authentication marker
//!
//! A file inside the session data directory whose presence means the last
//! known session was authenticated.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

pub const FLAG_FILE: &str = "auth_success.flag";

#[derive(Debug, Clone)]
pub struct AuthFlag {
    path: PathBuf,
}

impl AuthFlag {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(FLAG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Record a successful authentication
    pub fn set(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, "true")?;
        debug!("Authentication flag written to {}", self.path.display());
        Ok(())
    }

    /// Remove the marker; returns whether one was present
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Authentication flag removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
