//! SHA-1 verification of downloaded plugin binaries.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use super::PluginResult;

const CHUNK_SIZE: usize = 64 * 1024;

/// Computes and checks the SHA-1 digest of one file at a time.
#[derive(Debug, Clone)]
pub struct Sha1Checksum {
    path: PathBuf,
}

impl Sha1Checksum {
    /// Create a verifier for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Point the verifier at another file.
    pub fn set_file_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// The file currently being verified.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Stream the file through SHA-1 and return the lowercase hex digest.
    pub fn compute_file_sha1(&self) -> PluginResult<String> {
        let mut file = File::open(&self.path)?;
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Whether the file's digest equals `target`.
    ///
    /// An unreadable file is reported as a mismatch.
    pub fn check_sha1(&self, target: &str) -> bool {
        match self.compute_file_sha1() {
            Ok(actual) => actual == target,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Could not hash file");
                false
            }
        }
    }
}

/// Whether `s` looks like a SHA-1 digest (40 lowercase hex digits).
pub fn is_sha1_hex(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
