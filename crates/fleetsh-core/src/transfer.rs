//! Upload sources and download sinks: files on disk or in-memory buffers

use std::path::PathBuf;

use fleetsh_exec::ExecError;

use crate::error::CoreError;

/// Something to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    /// Local file, uploaded under its own file name
    Path(PathBuf),
    /// In-memory bytes, uploaded as `name`
    Memory {
        /// Remote file name
        name: String,
        /// File contents
        bytes: Vec<u8>,
    },
}

impl TransferSource {
    /// In-memory source
    pub fn memory(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        TransferSource::Memory {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub(crate) fn file_name(&self) -> Result<String, CoreError> {
        match self {
            TransferSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    CoreError::Config(format!("upload source has no file name: {}", path.display()))
                }),
            TransferSource::Memory { name, .. } if name.is_empty() || name.contains('/') => Err(
                CoreError::Config(format!("invalid in-memory upload name: {name:?}")),
            ),
            TransferSource::Memory { name, .. } => Ok(name.clone()),
        }
    }

    pub(crate) async fn read(&self) -> Result<Vec<u8>, CoreError> {
        match self {
            TransferSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", path.display())).into()),
            TransferSource::Memory { bytes, .. } => Ok(bytes.clone()),
        }
    }
}

impl From<PathBuf> for TransferSource {
    fn from(path: PathBuf) -> Self {
        TransferSource::Path(path)
    }
}

impl From<&str> for TransferSource {
    fn from(path: &str) -> Self {
        TransferSource::Path(PathBuf::from(path))
    }
}

/// Where downloaded bytes go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSink {
    /// Local file, created or truncated
    Path(PathBuf),
    /// In-memory buffer, replaced by the download
    Memory(Vec<u8>),
}

impl TransferSink {
    /// Empty in-memory sink
    #[must_use]
    pub fn memory() -> Self {
        TransferSink::Memory(Vec::new())
    }

    /// Buffered bytes of an in-memory sink
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            TransferSink::Memory(bytes) => Some(bytes),
            TransferSink::Path(_) => None,
        }
    }

    pub(crate) async fn store(&mut self, contents: Vec<u8>) -> Result<(), CoreError> {
        match self {
            TransferSink::Path(path) => tokio::fs::write(&*path, contents)
                .await
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", path.display())).into()),
            TransferSink::Memory(buffer) => {
                *buffer = contents;
                Ok(())
            }
        }
    }
}

impl From<PathBuf> for TransferSink {
    fn from(path: PathBuf) -> Self {
        TransferSink::Path(path)
    }
}
