use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Failed to read seed file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The canonical, well-formed input every mutant is derived from.
///
/// A `Seed` is read once and never modified afterwards. Mutation strategies
/// copy its bytes into fresh buffers, so cloning a `Seed` is cheap and shares
/// the underlying storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    bytes: Arc<[u8]>,
}

impl Seed {
    /// Reads the whole file at `path` byte-for-byte.
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let bytes = fs::read(path).map_err(|source| SeedError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for Seed {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl From<&[u8]> for Seed {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}
