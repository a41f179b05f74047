//! Cache manifest (`tables_cache.bin`)
//!
//! ```text
//! tableCount:Int
//! tableCount x { name:String, lastModified:DateTime }
//! ```
//!
//! The manifest is written after every table file, so a manifest on disk
//! never names a table whose file is older than the recorded timestamp.

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::codec::{Decoder, Encoder};
use crate::error::{CacheError, Result};

/// File name of the manifest inside the cache directory
pub const MANIFEST_FILE: &str = "tables_cache.bin";

/// Timestamp a table file was loaded at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Table name
    pub name: String,
    /// Server timestamp the file corresponds to
    pub last_modified: Option<NaiveDateTime>,
}

/// Index of the table files in a cache directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Manifest listing `entries`
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    /// Manifest path inside `dir`
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Entries in write order
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of tables listed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no table is listed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded entry for `name`; `None` if the table is not listed
    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Serialize the manifest
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::with_capacity(16 + 48 * self.entries.len());
        enc.put_len(self.entries.len())?;
        for entry in &self.entries {
            enc.put_string(&entry.name)?;
            enc.put_datetime(entry.last_modified)?;
        }
        Ok(enc.freeze().to_vec())
    }

    /// Parse manifest bytes; trailing bytes are an error
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let count = dec.get_len()?;
        let mut entries = Vec::with_capacity(count.min(dec.remaining()));
        for _ in 0..count {
            let name = dec.get_string()?;
            let last_modified = dec.get_datetime()?;
            entries.push(ManifestEntry {
                name,
                last_modified,
            });
        }
        if !dec.is_empty() {
            return Err(CacheError::codec(format!(
                "{} trailing bytes after manifest",
                dec.remaining()
            )));
        }
        Ok(Self { entries })
    }

    /// Read the manifest from `dir`
    ///
    /// A missing file is `Ok(None)`. A corrupt file is an error and is left
    /// in place for the caller to remove.
    pub async fn read(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(dir);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::decode(&bytes).map(Some)
    }

    /// Write the manifest atomically (temp file + rename)
    pub async fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).await?;
        let path = Self::path(dir);
        let temp_path = path.with_extension("bin.tmp");
        fs::write(&temp_path, self.encode()?).await?;
        fs::rename(&temp_path, &path).await?;
        debug!(path = ?path, tables = self.entries.len(), "Manifest written");
        Ok(())
    }

    /// Delete the manifest; a missing file is not an error
    pub async fn remove(dir: &Path) -> Result<()> {
        match fs::remove_file(Self::path(dir)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> Manifest {
        Manifest::new(vec![
            ManifestEntry {
                name: "a".into(),
                last_modified: NaiveDate::from_ymd_opt(2024, 6, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0),
            },
            ManifestEntry {
                name: "b".into(),
                last_modified: None,
            },
            ManifestEntry {
                name: "c".into(),
                last_modified: Some(NaiveDateTime::MAX),
            },
        ])
    }

    #[test]
    fn test_encode_decode() {
        let manifest = sample();
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.get("a"), manifest.get("a"));
        assert_eq!(decoded.get("b").unwrap().last_modified, None);
        assert_eq!(decoded.get("c").unwrap().last_modified, Some(NaiveDateTime::MAX));
        assert!(decoded.get("d").is_none());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(Manifest::decode(b"garbage").is_err());
        assert!(Manifest::decode(&[]).is_err());
    }

    #[tokio::test]
    async fn test_read_write_remove() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Manifest::read(dir.path()).await.unwrap(), None);

        sample().write(dir.path()).await.unwrap();
        assert_eq!(Manifest::read(dir.path()).await.unwrap(), Some(sample()));
        assert!(!dir.path().join("tables_cache.bin.tmp").exists());

        Manifest::remove(dir.path()).await.unwrap();
        Manifest::remove(dir.path()).await.unwrap();
        assert_eq!(Manifest::read(dir.path()).await.unwrap(), None);
    }
}
