use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest sanitized signature stem kept in an evidence filename.
const MAX_STEM_LEN: usize = 64;
/// Hex digits of the signature's MD5 digest appended to every filename.
const DIGEST_PREFIX_LEN: usize = 8;
/// Stem used when nothing of the signature survives sanitization.
const FALLBACK_STEM: &str = "failure";

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("Failed to create evidence directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write evidence file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes one representative mutant per failure signature into a directory.
///
/// Filenames are `<stem>-<digest>.<extension>`, where `stem` is a filesystem-safe
/// rendition of the signature and `digest` is the first hex digits of its MD5.
/// Two signatures that sanitize to the same stem still get distinct files.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    dir: PathBuf,
    extension: String,
}

impl EvidenceStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, signature: &str) -> PathBuf {
        let digest = format!("{:x}", md5::compute(signature.as_bytes()));
        let mut file_name = format!(
            "{}-{}",
            sanitize_signature(signature),
            &digest[..DIGEST_PREFIX_LEN]
        );
        if !self.extension.is_empty() {
            file_name.push('.');
            file_name.push_str(&self.extension);
        }
        self.dir.join(file_name)
    }

    /// Persists `mutant` as the evidence for `signature`, replacing any file
    /// left at the same path by an earlier run.
    pub fn persist(&self, signature: &str, mutant: &[u8]) -> Result<PathBuf, EvidenceError> {
        if !self.dir.as_os_str().is_empty() && !self.dir.is_dir() {
            fs::create_dir_all(&self.dir).map_err(|source| EvidenceError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;
        }

        let path = self.path_for(signature);
        fs::write(&path, mutant).map_err(|source| EvidenceError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Maps a signature to a string usable as a single path component.
///
/// ASCII alphanumerics, `-`, `_` and `.` are kept; every other character
/// becomes `_` and runs of `_` collapse into one. Leading dots are dropped so
/// the result is never hidden or a relative path.
pub fn sanitize_signature(signature: &str) -> String {
    let mut stem = String::with_capacity(signature.len().min(MAX_STEM_LEN));
    for c in signature.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            c
        } else {
            '_'
        };
        if mapped == '_' && stem.ends_with('_') {
            continue;
        }
        if mapped == '.' && stem.is_empty() {
            continue;
        }
        stem.push(mapped);
        if stem.len() >= MAX_STEM_LEN {
            break;
        }
    }

    let stem = stem.trim_matches('_').trim_start_matches(['.', '_']);
    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem.to_string()
    }
}
