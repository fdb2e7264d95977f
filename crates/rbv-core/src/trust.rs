//! Trusted signer keys per source repository.
//!
//! Stored as TOML:
//!
//! ```toml
//! schema_version = 1
//! revision = 3
//!
//! [[repository]]
//! url = "https://github.com/example/app"
//! keys = ["0123456789ABCDEF0123456789ABCDEFABCD1234"]
//! ```
//!
//! The verification pipeline only reads a store. Writes go through
//! [`TrustStore::add_key`] + [`TrustStore::save`], driven by `rbv trust add`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

pub const TRUST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("failed to read trust store {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write trust store {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("unable to parse trust store: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unable to encode trust store: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("unsupported trust store schema version {found} (expected 1)")]
    SchemaVersion { found: u32 },

    #[error("invalid key id {0:?}")]
    InvalidKey(String),

    #[error("invalid repository url {0:?}")]
    InvalidRepo(String),
}

pub type Result<T> = std::result::Result<T, TrustStoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedRepository {
    pub url: String,
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TrustFile {
    schema_version: u32,
    #[serde(default)]
    revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "repository")]
    repositories: Vec<TrustedRepository>,
}

/// `repoUrl -> set<keyId>`, loaded once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustStore {
    revision: u64,
    updated_at: Option<DateTime<Utc>>,
    repositories: Vec<TrustedRepository>,
    source: Option<PathBuf>,
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl TrustStore {
    pub fn empty() -> Self {
        Self {
            revision: 0,
            updated_at: None,
            repositories: Vec::new(),
            source: None,
        }
    }

    /// Load from `path`. A missing file is an empty store bound to that path.
    pub fn load(path: &Path) -> Result<Self> {
        let mut store = match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no trust store, starting empty");
                Self::empty()
            }
            Err(source) => {
                return Err(TrustStoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        store.source = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TrustFile = toml::from_str(content)?;
        if file.schema_version != TRUST_SCHEMA_VERSION {
            return Err(TrustStoreError::SchemaVersion {
                found: file.schema_version,
            });
        }
        Ok(Self {
            revision: file.revision,
            updated_at: file.updated_at,
            repositories: file.repositories,
            source: None,
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let file = TrustFile {
            schema_version: TRUST_SCHEMA_VERSION,
            revision: self.revision,
            updated_at: self.updated_at,
            repositories: self.repositories.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Monotonic counter bumped by every administrative change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// When the last administrative change was made.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Path the store was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn repositories(&self) -> &[TrustedRepository] {
        &self.repositories
    }

    /// Trusted keys for `repo_url`, in file order.
    pub fn keys_for(&self, repo_url: &str) -> &[String] {
        let wanted = normalize_repo_url(repo_url);
        self.repositories
            .iter()
            .find(|r| normalize_repo_url(&r.url) == wanted)
            .map(|r| r.keys.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_trusted(&self, repo_url: &str, key_id: &str) -> bool {
        self.keys_for(repo_url)
            .iter()
            .any(|trusted| key_ids_match(trusted, key_id))
    }

    /// Trust `key_id` for `repo_url`. Returns `false` if it already was.
    pub fn add_key(&mut self, repo_url: &str, key_id: &str) -> Result<bool> {
        let url = repo_url.trim();
        if normalize_repo_url(url).is_empty() {
            return Err(TrustStoreError::InvalidRepo(repo_url.to_string()));
        }
        let key = normalize_key_id(key_id);
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == ':') {
            return Err(TrustStoreError::InvalidKey(key_id.to_string()));
        }
        if self.is_trusted(url, &key) {
            return Ok(false);
        }

        let wanted = normalize_repo_url(url);
        match self
            .repositories
            .iter_mut()
            .find(|r| normalize_repo_url(&r.url) == wanted)
        {
            Some(repo) => repo.keys.push(key),
            None => self.repositories.push(TrustedRepository {
                url: url.to_string(),
                keys: vec![key],
            }),
        }
        self.revision += 1;
        self.updated_at = Some(Utc::now());
        Ok(true)
    }

    /// Atomically write the store to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded = self.to_toml_string()?;
        let write_err = |source: io::Error| TrustStoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
        tmp.write_all(encoded.as_bytes()).map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        info!(path = %path.display(), revision = self.revision, "trust store saved");
        Ok(())
    }

    /// The administrative command that would trust `key_id` for `repo_url`.
    pub fn add_key_command(&self, repo_url: &str, key_id: &str) -> String {
        let mut cmd = format!("rbv trust add --repo {repo_url} --key {key_id}");
        if let Some(path) = &self.source {
            cmd.push_str(&format!(" --trust-store {}", path.display()));
        }
        cmd
    }
}

/// Canonical form used to compare repository URLs.
pub fn normalize_repo_url(url: &str) -> String {
    let mut url = url.trim().trim_end_matches('/');
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped.trim_end_matches('/');
    }
    url.to_ascii_lowercase()
}

/// Canonical form used to compare key ids: uppercase, no `0x`, no spaces.
pub fn normalize_key_id(key: &str) -> String {
    let compact: String = key.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    compact.to_ascii_uppercase()
}

/// A short key id matches a longer fingerprint ending in it.
pub fn key_ids_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_key_id(a), normalize_key_id(b));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.ends_with(&b) || b.ends_with(&a)
}
