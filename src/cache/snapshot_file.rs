//! Snapshot file - persists the last good snapshot for cold starts.
//!
//! When the upstream is unreachable at startup, the loader falls back to
//! the snapshot written after the most recent successful reload.
//!
//! # File Format
//! ```text
//! Header line (JSON):
//!   {"magic":"AZSN","version":1,"loaded_at":<ms>}
//!
//! Body (JSON):
//!   CacheSnapshot
//! ```

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::cache::CacheSnapshot;
use crate::error::{AuthzError, AuthzResult};

const MAGIC: &str = "AZSN";
const VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    magic: String,
    version: u32,
    loaded_at: u64,
}

/// Snapshot persisted at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the snapshot to a temp file and atomically renames it.
    pub fn save(&self, snapshot: &CacheSnapshot) -> AuthzResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AuthzError::Snapshot(format!("Failed to create directory: {}", e)))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| AuthzError::Snapshot(format!("Create temp failed: {}", e)))?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            magic: MAGIC.to_string(),
            version: VERSION,
            loaded_at: snapshot.loaded_at,
        };
        serde_json::to_writer(&mut writer, &header)
            .map_err(|e| AuthzError::Snapshot(format!("Write header failed: {}", e)))?;
        writer
            .write_all(b"\n")
            .map_err(|e| AuthzError::Snapshot(format!("Write header failed: {}", e)))?;
        serde_json::to_writer(&mut writer, snapshot)
            .map_err(|e| AuthzError::Snapshot(format!("Write snapshot failed: {}", e)))?;

        let file = writer
            .into_inner()
            .map_err(|e| AuthzError::Snapshot(format!("Flush failed: {}", e)))?;
        file.sync_all()
            .map_err(|e| AuthzError::Snapshot(format!("Sync failed: {}", e)))?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| AuthzError::Snapshot(format!("Rename failed: {}", e)))?;
        Ok(())
    }

    /// Reads the persisted snapshot, `Ok(None)` if no file exists yet.
    pub fn load(&self) -> AuthzResult<Option<CacheSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file =
            File::open(&self.path).map_err(|e| AuthzError::Snapshot(format!("Open failed: {}", e)))?;
        let mut reader = BufReader::new(file);

        let mut header_line = String::new();
        reader
            .read_line(&mut header_line)
            .map_err(|e| AuthzError::Snapshot(format!("Read header failed: {}", e)))?;
        let header: Header = serde_json::from_str(header_line.trim())
            .map_err(|e| AuthzError::Snapshot(format!("Parse header failed: {}", e)))?;

        if header.magic != MAGIC {
            return Err(AuthzError::Snapshot("Invalid magic number".to_string()));
        }
        if header.version != VERSION {
            return Err(AuthzError::Snapshot(format!(
                "Unsupported version: {}",
                header.version
            )));
        }

        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| AuthzError::Snapshot(format!("Read snapshot failed: {}", e)))?;
        let snapshot: CacheSnapshot = serde_json::from_slice(&body)
            .map_err(|e| AuthzError::Snapshot(format!("Parse snapshot failed: {}", e)))?;

        Ok(Some(snapshot))
    }
}
