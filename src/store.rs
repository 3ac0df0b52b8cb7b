use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde_json::Value;
use tempfile::Builder;

use crate::domain::{EntityId, MAX_ID, MIN_CACHED_ENTRIES, NameCache, NameRecord, OwnershipCache};
use crate::error::DexError;

pub const NAMES_DOCUMENT: &str = "pokedex_de_names_v3";
pub const OWNERSHIP_DOCUMENT: &str = "pokedex_ownership_v1";

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, DexError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("dex-cache")).ok()
            })
            .ok_or_else(|| DexError::Filesystem("unable to resolve cache directory".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn names_path(&self) -> Utf8PathBuf {
        self.root.join(format!("{NAMES_DOCUMENT}.json"))
    }

    pub fn ownership_path(&self) -> Utf8PathBuf {
        self.root.join(format!("{OWNERSHIP_DOCUMENT}.json"))
    }

    pub fn load_names(&self) -> Option<NameCache> {
        let path = self.names_path();
        let raw = read_document(&path)?;
        let mut cache = match parse_names(&raw) {
            Ok(cache) => cache,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "name cache unreadable, ignoring");
                return None;
            }
        };
        let dropped = cache.retain_range(MAX_ID);
        if dropped > 0 {
            tracing::warn!(path = %path, dropped, "name cache has ids out of range, dropping them");
        }
        if cache.len() >= MIN_CACHED_ENTRIES {
            return Some(cache);
        }
        tracing::warn!(
            path = %path,
            entries = cache.len(),
            "name cache below minimum size, ignoring"
        );
        None
    }

    pub fn save_names(&self, cache: &NameCache) -> Result<(), DexError> {
        let content = serde_json::to_vec(cache).map_err(|err| DexError::Parse(err.to_string()))?;
        write_document_atomic(&self.names_path(), &content)
    }

    pub fn load_ownership(&self) -> OwnershipCache {
        let path = self.ownership_path();
        let Some(raw) = read_document(&path) else {
            return OwnershipCache::new();
        };
        parse_ownership(&raw).unwrap_or_else(|err| {
            tracing::warn!(path = %path, error = %err, "ownership document unreadable, starting empty");
            OwnershipCache::new()
        })
    }

    pub fn save_ownership(&self, cache: &OwnershipCache) -> Result<(), DexError> {
        let content = serde_json::to_vec(cache).map_err(|err| DexError::Parse(err.to_string()))?;
        write_document_atomic(&self.ownership_path(), &content)
    }

    /// Deletes both documents. Destructive and immediate.
    pub fn clear(&self) -> Result<(), DexError> {
        for path in [self.names_path(), self.ownership_path()] {
            if path.as_std_path().exists() {
                fs::remove_file(path.as_std_path())
                    .map_err(|err| DexError::Filesystem(err.to_string()))?;
            }
        }
        Ok(())
    }
}

fn read_document(path: &Utf8Path) -> Option<String> {
    match fs::read_to_string(path.as_std_path()) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "failed to read cache document");
            None
        }
    }
}

pub fn parse_names(raw: &str) -> Result<NameCache, DexError> {
    let value: Value = serde_json::from_str(raw).map_err(|err| DexError::Parse(err.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| DexError::Parse("name cache is not a JSON object".to_string()))?;
    object
        .iter()
        .map(|(key, entry)| {
            let id = EntityId::from_key(key)
                .map_err(|_| DexError::Parse(format!("invalid entity key {key:?}")))?;
            let record: NameRecord = serde_json::from_value(entry.clone())
                .map_err(|err| DexError::Parse(format!("entry {key}: {err}")))?;
            Ok((id, record))
        })
        .collect()
}

pub fn parse_ownership(raw: &str) -> Result<OwnershipCache, DexError> {
    let value: Value = serde_json::from_str(raw).map_err(|err| DexError::Parse(err.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| DexError::Parse("ownership document is not a JSON object".to_string()))?;
    object
        .iter()
        .map(|(key, entry)| {
            let id = EntityId::from_key(key)
                .map_err(|_| DexError::Parse(format!("invalid entity key {key:?}")))?;
            let owned = entry
                .as_bool()
                .ok_or_else(|| DexError::Parse(format!("entry {key} is not a boolean")))?;
            Ok((id, owned))
        })
        .collect()
}

fn write_document_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), DexError> {
    let parent = path
        .parent()
        .ok_or_else(|| DexError::Filesystem("invalid document path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| DexError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix("dex-cache-doc")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| DexError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| DexError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| DexError::Filesystem(err.to_string()))?;
    Ok(())
}
