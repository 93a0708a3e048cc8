use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use tempfile::NamedTempFile;

use crate::error::ClientError;

/// Storage key for the persisted username.
pub const IDENTITY_KEY: &str = "username";
pub const MAX_USERNAME_CHARS: usize = 50;

/// A trimmed, non-empty username. Not authenticated in any way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ClientError::validation("username must not be empty"));
        }
        if name.chars().count() > MAX_USERNAME_CHARS {
            return Err(ClientError::validation(format!(
                "username must be at most {MAX_USERNAME_CHARS} characters"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key/value persistence port for client-local state.
pub trait IdentityStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten whole on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read(&self) -> anyhow::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(b) if b.iter().all(u8::is_ascii_whitespace) => Ok(None),
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }

    fn load(&self) -> anyhow::Result<BTreeMap<String, String>> {
        match self.read()? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse {}", self.path.display())),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Writes to a sibling temp file and renames it over the target, so a
    /// reader never sees a half-written file.
    fn save(&self, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
                parent
            }
            _ => Path::new("."),
        };
        let json = serde_json::to_vec_pretty(entries).context("encode state file")?;
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .with_context(|| format!("write {}", tmp.path().display()))?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> anyhow::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file store poisoned"))?;
        // A state file that does not parse is replaced rather than blocking every write.
        let mut entries = match self.read()? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding corrupt state file");
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        f(&mut entries);
        self.save(&entries)
    }
}

impl IdentityStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}
