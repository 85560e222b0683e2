//! # Audit Log Writer
//!
//! Rotation-capable JSON-lines writer for audit records.

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::{AuditRecord, AuditSink};
use crate::error::{AuthzError, AuthzResult};
use crate::types::now_ms;

/// Audit log writer configuration
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    /// Directory holding the active and rotated logs
    pub dir: PathBuf,

    /// Name of the active log file
    pub file_name: String,

    /// Rotation policy
    pub rotation: RotationPolicy,

    /// Gzip rotated logs
    pub compress_rotated: bool,

    /// Maximum number of rotated files to keep
    pub max_rotated_files: usize,

    /// Buffer size for writes (bytes)
    pub buffer_size: usize,

    /// Flush after every record
    pub immediate_flush: bool,
}

/// File rotation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Rotate when file exceeds size (bytes)
    BySize(u64),

    /// Rotate every N seconds
    ByTime(u64),

    /// No rotation
    Never,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        AuditLogConfig {
            dir: PathBuf::from("/var/log/authz"),
            file_name: "audit.log".to_string(),
            rotation: RotationPolicy::BySize(100 * 1024 * 1024), // 100 MB
            compress_rotated: true,
            max_rotated_files: 10,
            buffer_size: 8192,
            immediate_flush: false,
        }
    }
}

impl AuditLogConfig {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        AuditLogConfig {
            dir: dir.as_ref().to_path_buf(),
            ..AuditLogConfig::default()
        }
    }
}

/// Thread-safe audit log writer
pub struct AuditLogWriter {
    config: AuditLogConfig,
    current_file: Mutex<Option<AuditLogFile>>,
    rotations: AtomicU64,
}

struct AuditLogFile {
    writer: BufWriter<File>,
    path: PathBuf,
    created_at: SystemTime,
    bytes_written: u64,
    records_written: u64,
}

impl AuditLogWriter {
    /// Creates the directory if needed and opens the active log for append.
    pub fn new(config: AuditLogConfig) -> AuthzResult<Self> {
        fs::create_dir_all(&config.dir)
            .map_err(|e| AuthzError::Audit(format!("Failed to create audit directory: {}", e)))?;

        let writer = AuditLogWriter {
            config,
            current_file: Mutex::new(None),
            rotations: AtomicU64::new(0),
        };

        {
            let mut guard = writer.current_file.lock();
            *guard = Some(writer.open_current()?);
        }

        Ok(writer)
    }

    /// Appends one record as a JSON line.
    pub fn write_record(&self, record: &AuditRecord) -> AuthzResult<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| AuthzError::Audit(format!("Failed to serialize record: {}", e)))?;
        line.push('\n');
        let bytes = line.as_bytes();

        let mut guard = self.current_file.lock();
        if guard.is_none() {
            *guard = Some(self.open_current()?);
        }

        let needs_rotation = match guard.as_mut() {
            Some(file) => {
                file.writer
                    .write_all(bytes)
                    .map_err(|e| AuthzError::Audit(format!("Failed to write audit log: {}", e)))?;

                if self.config.immediate_flush {
                    file.writer
                        .flush()
                        .map_err(|e| AuthzError::Audit(format!("Failed to flush audit log: {}", e)))?;
                }

                file.bytes_written += bytes.len() as u64;
                file.records_written += 1;
                self.should_rotate(file)
            }
            None => false,
        };

        if needs_rotation {
            self.rotate_locked(&mut guard)?;
        }

        Ok(())
    }

    /// Flush pending writes
    pub fn flush(&self) -> AuthzResult<()> {
        let mut guard = self.current_file.lock();
        if let Some(ref mut file) = *guard {
            file.writer
                .flush()
                .map_err(|e| AuthzError::Audit(format!("Failed to flush audit log: {}", e)))?;
        }
        Ok(())
    }

    /// Rotates the active file regardless of policy.
    pub fn rotate(&self) -> AuthzResult<()> {
        let mut guard = self.current_file.lock();
        self.rotate_locked(&mut guard)
    }

    fn should_rotate(&self, file: &AuditLogFile) -> bool {
        match self.config.rotation {
            RotationPolicy::BySize(max_bytes) => file.bytes_written >= max_bytes,
            RotationPolicy::ByTime(seconds) => {
                let elapsed = SystemTime::now()
                    .duration_since(file.created_at)
                    .unwrap_or_default()
                    .as_secs();
                elapsed >= seconds
            }
            RotationPolicy::Never => false,
        }
    }

    fn rotate_locked(&self, guard: &mut Option<AuditLogFile>) -> AuthzResult<()> {
        if let Some(mut old_file) = guard.take() {
            old_file
                .writer
                .flush()
                .map_err(|e| AuthzError::Audit(format!("Failed to flush before rotation: {}", e)))?;

            let rotated_path = self.rotated_path();
            fs::rename(&old_file.path, &rotated_path)
                .map_err(|e| AuthzError::Audit(format!("Failed to rotate audit log: {}", e)))?;

            if self.config.compress_rotated {
                compress_file(&rotated_path)?;
            }

            self.cleanup_old_files()?;
        }

        *guard = Some(self.open_current()?);
        Ok(())
    }

    fn open_current(&self) -> AuthzResult<AuditLogFile> {
        let path = self.current_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AuthzError::Audit(format!("Failed to open audit log: {}", e)))?;
        let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(AuditLogFile {
            writer: BufWriter::with_capacity(self.config.buffer_size, file),
            path,
            created_at: SystemTime::now(),
            bytes_written,
            records_written: 0,
        })
    }

    pub fn current_path(&self) -> PathBuf {
        self.config.dir.join(&self.config.file_name)
    }

    fn rotated_prefix(&self) -> String {
        format!("{}.", self.config.file_name)
    }

    /// `<file>.<ms>.<seq>`; sorts chronologically by name
    fn rotated_path(&self) -> PathBuf {
        let seq = self.rotations.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}{:013}.{:06}", self.rotated_prefix(), now_ms(), seq);
        self.config.dir.join(name)
    }

    /// Rotated files, newest first.
    pub fn rotated_files(&self) -> AuthzResult<Vec<PathBuf>> {
        let prefix = self.rotated_prefix();
        let mut rotated: Vec<PathBuf> = fs::read_dir(&self.config.dir)
            .map_err(|e| AuthzError::Audit(format!("Failed to read audit directory: {}", e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| name.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();

        rotated.sort();
        rotated.reverse();
        Ok(rotated)
    }

    fn cleanup_old_files(&self) -> AuthzResult<()> {
        let rotated = self.rotated_files()?;
        if rotated.len() > self.config.max_rotated_files {
            for path in &rotated[self.config.max_rotated_files..] {
                fs::remove_file(path).ok();
            }
        }
        Ok(())
    }

    /// Get current file stats
    pub fn stats(&self) -> Option<AuditLogStats> {
        let guard = self.current_file.lock();
        guard.as_ref().map(|file| AuditLogStats {
            path: file.path.clone(),
            bytes_written: file.bytes_written,
            records_written: file.records_written,
            created_at: file.created_at,
        })
    }
}

/// Gzips `path` to `<path>.gz` and removes the original.
fn compress_file(path: &Path) -> AuthzResult<()> {
    let input = fs::read(path)
        .map_err(|e| AuthzError::Audit(format!("Failed to read file for compression: {}", e)))?;

    let mut output_name = path.as_os_str().to_os_string();
    output_name.push(".gz");
    let output_file = File::create(PathBuf::from(output_name))
        .map_err(|e| AuthzError::Audit(format!("Failed to create compressed file: {}", e)))?;

    let mut encoder = GzEncoder::new(output_file, Compression::default());
    encoder
        .write_all(&input)
        .map_err(|e| AuthzError::Audit(format!("Failed to compress: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| AuthzError::Audit(format!("Failed to finish compression: {}", e)))?;

    fs::remove_file(path).ok();
    Ok(())
}

impl AuditSink for AuditLogWriter {
    fn write(&self, record: &AuditRecord) -> AuthzResult<()> {
        self.write_record(record)
    }

    fn flush(&self) -> AuthzResult<()> {
        AuditLogWriter::flush(self)
    }
}

/// Statistics for the active audit log
#[derive(Debug, Clone)]
pub struct AuditLogStats {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub records_written: u64,
    pub created_at: SystemTime,
}
