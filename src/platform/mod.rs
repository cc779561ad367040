//! Platform adapter
//!
//! File access, clock and logging services the core needs from its host.
//! [`NativePlatform`] backs them with the standard library; hosts embedding the
//! C ABI get the same defaults through [`ffi::rac_platform_adapter_init_native`].

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use thiserror::Error;

pub mod ffi;

/// Platform operation errors
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Failed to read file: {0}")]
    ReadFailed(String),
    #[error("Failed to write file: {0}")]
    WriteFailed(String),
}

/// Severity accepted by [`PlatformAdapter::log`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Host services used by the core
pub trait PlatformAdapter: Send + Sync {
    fn file_exists(&self, path: &Path) -> bool;

    fn file_read(&self, path: &Path) -> Result<Vec<u8>, PlatformError>;

    fn file_write(&self, path: &Path, data: &[u8]) -> Result<(), PlatformError>;

    /// Removes a file. A missing file is not an error.
    fn file_delete(&self, path: &Path) -> Result<(), PlatformError>;

    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;

    fn log(&self, level: LogLevel, category: &str, message: &str);
}

/// Standard library file I/O, chrono clock and tracing log sink
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePlatform;

impl PlatformAdapter for NativePlatform {
    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_read(&self, path: &Path) -> Result<Vec<u8>, PlatformError> {
        fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PlatformError::FileNotFound(path.display().to_string()),
            _ => PlatformError::ReadFailed(format!("{}: {}", path.display(), e)),
        })
    }

    fn file_write(&self, path: &Path, data: &[u8]) -> Result<(), PlatformError> {
        fs::write(path, data)
            .map_err(|e| PlatformError::WriteFailed(format!("{}: {}", path.display(), e)))
    }

    fn file_delete(&self, path: &Path) -> Result<(), PlatformError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PlatformError::WriteFailed(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn log(&self, level: LogLevel, category: &str, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(category, "{}", message),
            LogLevel::Warning => tracing::warn!(category, "{}", message),
            LogLevel::Info => tracing::info!(category, "{}", message),
            LogLevel::Debug => tracing::debug!(category, "{}", message),
        }
    }
}
