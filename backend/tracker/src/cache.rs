//! Local durable cache: a JSON snapshot of the store's tracked journeys.
//!
//! Read once at startup and rewritten after every mutation. Writes go to a
//! sibling temp file first and are renamed into place, so a crash mid-write
//! leaves the previous snapshot intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::journey::JourneyRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub saved_at: DateTime<Utc>,
    pub journeys: Vec<JourneyRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    path: Option<PathBuf>,
}

impl LocalCache {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A cache that never reads or writes anything.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the cached journeys; a missing file is an empty cache.
    pub fn load(&self) -> Result<Vec<JourneyRecord>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let snapshot: CacheSnapshot = serde_json::from_slice(&bytes)?;
        debug!(
            "Loaded {} journeys from cache saved at {}",
            snapshot.journeys.len(),
            snapshot.saved_at
        );
        Ok(snapshot.journeys)
    }

    pub fn save(&self, journeys: &[JourneyRecord], now: DateTime<Utc>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = CacheSnapshot {
            saved_at: now,
            journeys: journeys.to_vec(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
