//! SSH key sources and resolution

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

/// Identity files tried, in order, when a connection has no explicit keys
const DEFAULT_IDENTITIES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

static TEMP_KEY_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Where a private key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Explicit path to key file
    Path(PathBuf),
    /// Base64-encoded key from environment
    Env(String),
}

impl KeySource {
    /// Resolve key source to a readable key file
    ///
    /// For `Env`, decodes base64 and writes to temp file
    ///
    /// # Errors
    /// Returns `KeyError` if key resolution fails (env not set, invalid base64, etc.)
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        match self {
            KeySource::Path(path) => {
                validate_key_permissions(path)?;
                Ok(ResolvedKey::Path(path.clone()))
            }
            KeySource::Env(var_name) => {
                let base64_key =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;

                let temp_path = write_temp_key(&key_data)?;
                Ok(ResolvedKey::Temp(temp_path))
            }
        }
    }
}

impl From<PathBuf> for KeySource {
    fn from(path: PathBuf) -> Self {
        KeySource::Path(path)
    }
}

impl From<&Path> for KeySource {
    fn from(path: &Path) -> Self {
        KeySource::Path(path.to_path_buf())
    }
}

impl From<&str> for KeySource {
    fn from(path: &str) -> Self {
        KeySource::Path(PathBuf::from(path))
    }
}

/// Identity files from `~/.ssh` that exist on this machine
#[must_use]
pub fn default_identities() -> Vec<KeySource> {
    let Some(ssh_dir) = dirs::home_dir().map(|home| home.join(".ssh")) else {
        return Vec::new();
    };

    DEFAULT_IDENTITIES
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|path| path.is_file())
        .map(KeySource::Path)
        .collect()
}

/// Resolved key location
#[derive(Debug)]
pub enum ResolvedKey {
    /// Path to key file
    Path(PathBuf),
    /// Temporary file (will be deleted on drop)
    Temp(PathBuf),
}

impl ResolvedKey {
    /// Get path for SSH library
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ResolvedKey::Path(p) | ResolvedKey::Temp(p) => p,
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

#[cfg(unix)]
fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();

    // group and other bits must be clear
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    std::fs::metadata(path)?;
    Ok(())
}

fn write_temp_key(key_data: &[u8]) -> Result<PathBuf, KeyError> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let seq = TEMP_KEY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path =
        env::temp_dir().join(format!("fleetsh_ssh_key_{}_{seq}", std::process::id()));

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&temp_path)?;
    file.write_all(key_data)?;

    debug!(path = %temp_path.display(), "wrote temporary SSH key");

    Ok(temp_path)
}

impl Drop for ResolvedKey {
    fn drop(&mut self) {
        if let ResolvedKey::Temp(path) = self
            && let Err(e) = std::fs::remove_file(&*path)
        {
            warn!(path = %path.display(), error = %e, "failed to remove temp key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key_round_trip_and_cleanup() {
        use base64::Engine;

        let var = "FLEETSH_TEST_KEY_ROUND_TRIP";
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"not really a key");
        // SAFETY: test-local variable name, not read by other tests
        unsafe { env::set_var(var, encoded) };

        let resolved = KeySource::Env(var.to_string()).resolve().unwrap();
        let path = resolved.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"not really a key");

        drop(resolved);
        assert!(!path.exists());
    }

    #[test]
    fn test_env_key_missing() {
        let err = KeySource::Env("FLEETSH_TEST_KEY_UNSET".to_string())
            .resolve()
            .unwrap_err();
        assert!(matches!(err, KeyError::EnvNotSet(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_key_rejects_open_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_test");
        std::fs::write(&key, b"key").unwrap();
        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = KeySource::Path(key.clone()).resolve().unwrap_err();
        assert!(matches!(err, KeyError::BadPermissions(_)));

        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(KeySource::Path(key).resolve().is_ok());
    }
}
