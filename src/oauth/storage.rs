//! Credential persistence backends.
//!
//! Provides the [`TokenStorage`] trait and two implementations:
//! - [`FileTokenStorage`] - a single JSON file, replaced atomically on save
//! - [`MemoryTokenStorage`] - in-memory storage for testing
//!
//! Absence of a stored credential is not an error; it signals that the
//! device authorization flow has to run.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::instrument;

use super::token::Credential;
use crate::error::{Error, Result};

// =============================================================================
// TokenStorage trait
// =============================================================================

/// Trait for credential storage backends.
pub trait TokenStorage: Send + Sync {
    /// Load the stored credential, if any.
    fn load(&self) -> Result<Option<Credential>>;

    /// Persist `credential`, replacing any prior value.
    fn save(&self, credential: &Credential) -> Result<()>;

    /// Remove the stored credential. Removing nothing is not an error.
    fn remove(&self) -> Result<()>;

    /// Get the name of this storage backend.
    fn name(&self) -> &str;
}

impl<T: TokenStorage + ?Sized> TokenStorage for Arc<T> {
    fn load(&self) -> Result<Option<Credential>> {
        (**self).load()
    }
    fn save(&self, credential: &Credential) -> Result<()> {
        (**self).save(credential)
    }
    fn remove(&self) -> Result<()> {
        (**self).remove()
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// FileTokenStorage
// =============================================================================

/// File permissions for private files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// File-based credential storage.
///
/// # Security
/// - File permissions are set to 0600 (owner read/write only) on Unix
/// - Writes go to a sibling temp file that is renamed over the target
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    /// Create a storage backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replace `path` with `content`, readable by the owner only.
///
/// Parent directories are created as needed. The content goes to a sibling
/// temp file first, which is then renamed over `path`.
pub(crate) fn write_private(path: &Path, content: &str) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::local_io(parent, format!("Failed to create: {e}")))?;
        }
        _ => {}
    }

    let temp_path = temp_path(path);
    write_temp(&temp_path, content)?;

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::local_io(path, format!("Failed to replace file: {e}")));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_temp(temp_path: &Path, content: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(temp_path)
            .map_err(|e| Error::local_io(temp_path, format!("Failed to create: {e}")))?;
        file.write_all(content.as_bytes())
            .map_err(|e| Error::local_io(temp_path, format!("Failed to write: {e}")))?;
        file.sync_all()
            .map_err(|e| Error::local_io(temp_path, format!("Failed to sync: {e}")))?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(temp_path, content)
            .map_err(|e| Error::local_io(temp_path, format!("Failed to write: {e}")))?;
    }

    Ok(())
}

impl TokenStorage for FileTokenStorage {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<Option<Credential>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::local_io(
                    &self.path,
                    format!("Failed to read credential file: {e}"),
                ));
            }
        };

        let credential: Credential = serde_json::from_str(&content).map_err(|e| {
            Error::local_io(
                &self.path,
                format!("Malformed credential file: {e}"),
            )
        })?;

        Ok(Some(credential))
    }

    #[instrument(skip(self, credential), fields(path = %self.path.display()))]
    fn save(&self, credential: &Credential) -> Result<()> {
        let content = serde_json::to_string_pretty(credential)
            .map_err(|e| Error::local_io(&self.path, format!("Failed to serialize: {e}")))?;
        write_private(&self.path, &content)
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::local_io(
                &self.path,
                format!("Failed to remove credential file: {e}"),
            )),
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}

// =============================================================================
// MemoryTokenStorage
// =============================================================================

/// In-memory credential storage, primarily for testing.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    credential: RwLock<Option<Credential>>,
    saves: RwLock<usize>,
}

impl MemoryTokenStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage pre-populated with `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
            saves: RwLock::new(0),
        }
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        *self.saves.read().unwrap_or_else(|p| p.into_inner())
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self
            .credential
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self.credential.write().unwrap_or_else(|p| p.into_inner()) = Some(credential.clone());
        *self.saves.write().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.credential.write().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
