//! Content-addressed artifact cache
//!
//! Each artifact is a JSON envelope `{ key, kind, checksum, payload }` where `payload`
//! is the serialized artifact and `checksum` its SHA-256. Writes go to a temporary
//! file in the cache directory that is renamed into place, so readers see either
//! nothing or a complete file. A `.building` marker exists while a write is in
//! progress.
//!
//! A present file that fails to parse, carries another key or fails its checksum is
//! treated as absent: it is removed and the caller rebuilds.

use riskfold_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// What an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Master,
    Fold,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Master => "master",
            ArtifactKind::Fold => "fold",
        }
    }
}

/// Lifecycle of one cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Absent,
    Building,
    Present,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    key: String,
    kind: ArtifactKind,
    checksum: String,
    payload: String,
}

/// Hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Cache key of any serializable value
pub fn cache_key<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(sha256_hex(&serde_json::to_vec(value)?))
}

/// Directory of cached artifacts
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, kind: ArtifactKind, key: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.json", kind.as_str(), key))
    }

    fn marker(&self, kind: ArtifactKind, key: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.building", kind.as_str(), key))
    }

    pub fn state(&self, kind: ArtifactKind, key: &str) -> CacheState {
        if self.path(kind, key).is_file() {
            CacheState::Present
        } else if self.marker(kind, key).is_file() {
            CacheState::Building
        } else {
            CacheState::Absent
        }
    }

    /// Serialize and atomically write an artifact
    pub fn store<T: Serialize>(&self, kind: ArtifactKind, key: &str, artifact: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let marker = self.marker(kind, key);
        fs::write(&marker, b"")?;

        let result = self.write_envelope(kind, key, artifact);
        if let Err(err) = fs::remove_file(&marker) {
            tracing::warn!(path = %marker.display(), error = %err, "Failed to remove build marker");
        }
        result
    }

    fn write_envelope<T: Serialize>(&self, kind: ArtifactKind, key: &str, artifact: &T) -> Result<()> {
        let payload = serde_json::to_string(artifact)?;
        let envelope = Envelope {
            key: key.to_string(),
            kind,
            checksum: sha256_hex(payload.as_bytes()),
            payload,
        };

        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut file, &envelope)?;
        file.flush()?;
        let path = self.path(kind, key);
        file.persist(&path)
            .map_err(|e| Error::Cache(format!("Failed to persist {}: {}", path.display(), e)))?;

        tracing::debug!(kind = kind.as_str(), key, "Stored artifact");
        Ok(())
    }

    /// Load an artifact; `None` when absent or corrupt
    pub fn load<T: DeserializeOwned>(&self, kind: ArtifactKind, key: &str) -> Result<Option<T>> {
        let Some(payload) = self.read_payload(kind, key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(artifact) => {
                tracing::debug!(kind = kind.as_str(), key, "Cache hit");
                Ok(Some(artifact))
            }
            Err(err) => {
                self.discard(kind, key, &err.to_string())?;
                Ok(None)
            }
        }
    }

    /// Whether a present artifact is intact; a corrupt one is removed
    pub fn verify(&self, kind: ArtifactKind, key: &str) -> Result<bool> {
        Ok(self.read_payload(kind, key)?.is_some())
    }

    fn read_payload(&self, kind: ArtifactKind, key: &str) -> Result<Option<String>> {
        let content = match fs::read_to_string(self.path(kind, key)) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(kind = kind.as_str(), key, "Cache miss");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        match Self::open_envelope(&content, kind, key) {
            Ok(payload) => Ok(Some(payload)),
            Err(reason) => {
                self.discard(kind, key, &reason)?;
                Ok(None)
            }
        }
    }

    fn discard(&self, kind: ArtifactKind, key: &str, reason: &str) -> Result<()> {
        let path = self.path(kind, key);
        tracing::warn!(path = %path.display(), reason, "Discarding corrupt artifact");
        fs::remove_file(&path)?;
        Ok(())
    }

    fn open_envelope(content: &str, kind: ArtifactKind, key: &str) -> std::result::Result<String, String> {
        let envelope: Envelope = serde_json::from_str(content).map_err(|e| e.to_string())?;
        if envelope.key != key || envelope.kind != kind {
            return Err(format!("envelope holds {} {}", envelope.kind.as_str(), envelope.key));
        }
        if sha256_hex(envelope.payload.as_bytes()) != envelope.checksum {
            return Err("checksum mismatch".to_string());
        }
        Ok(envelope.payload)
    }

    /// Remove every artifact and build marker
    pub fn clear_all(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_artifact = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e == "json" || e == "building");
            if is_artifact && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        tracing::info!(dir = %self.dir.display(), removed, "Cleared artifact cache");
        Ok(removed)
    }
}
