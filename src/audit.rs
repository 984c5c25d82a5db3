use std::path::PathBuf;

use chrono::Local;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::BackendKind;

/// Writes raw upstream payloads to `<root>/<backend>/<timestamp>_<suffix>.json`.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    root: PathBuf,
}

impl AuditTrail {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn save(&self, backend: BackendKind, payload: &serde_json::Value) -> std::io::Result<PathBuf> {
        let dir = self.root.join(backend.slug());
        std::fs::create_dir_all(&dir)?;
        // Two saves in the same second must not overwrite each other.
        let suffix = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!("{}_{}.json", Local::now().format("%Y%m%d_%H%M%S"), &suffix[..8]));
        let body = serde_json::to_vec_pretty(payload).map_err(std::io::Error::other)?;
        std::fs::write(&path, body)?;
        info!("Saved {} response to {}", backend.slug(), path.display());
        Ok(path)
    }

    /// Like `save`, but a failed write is logged and yields `None`.
    pub fn record(&self, backend: BackendKind, payload: &serde_json::Value) -> Option<PathBuf> {
        match self.save(backend, payload) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to save {} API response: {}", backend.slug(), e);
                None
            }
        }
    }
}
