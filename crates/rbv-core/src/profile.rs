//! Per-application capability records.
//!
//! One engine serves every app; what differs per app is a small record
//! (repository, tag naming, build command, where the build leaves its
//! artifacts) plus the artifact family, which decides how artifacts are
//! unpacked. Profiles live in `apps.toml`:
//!
//! ```toml
//! [[app]]
//! app_id = "com.example.wallet"
//! repo_url = "https://github.com/example/wallet"
//! family = "device-split-apk"
//! tag_convention = "v{version}"
//! build_command = ["./build.sh", "{source}", "{output}"]
//! artifact_locator = "splits/*.apk"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::decompose::{ArchiveReader, RawImageReader, ZipArchiveReader};
use crate::domain::VerifyError;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profiles {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("unable to parse profiles: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown artifact family {0:?}")]
    UnknownFamily(String),

    #[error("app '{0}' is defined more than once")]
    DuplicateApp(String),

    #[error("app '{app_id}' has no build command")]
    EmptyBuildCommand { app_id: String },

    #[error("failed to start build for '{app_id}': {source}")]
    BuildSpawn { app_id: String, source: io::Error },

    #[error("build for '{app_id}' exited with {exit_code}: {stderr}")]
    BuildFailed {
        app_id: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("build output {} already holds files from an earlier build", path.display())]
    StaleOutput { path: PathBuf },

    #[error("invalid artifact locator {0:?}")]
    InvalidLocator(String),

    #[error("failed to locate build artifacts in {}: {source}", path.display())]
    Locate { path: PathBuf, source: io::Error },
}

impl ProfileError {
    /// The action an operator can take to resolve the error, if one exists.
    pub fn remediation(&self) -> Option<String> {
        match self {
            ProfileError::StaleOutput { path } => Some(format!("rm -rf {}", path.display())),
            _ => None,
        }
    }
}

/// Application families, each with its own unpacking and default locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactFamily {
    SingleApk,
    DeviceSplitApk,
    AabBundletool,
    FirmwareImage,
}

impl ArtifactFamily {
    pub fn archive_reader(self) -> Arc<dyn ArchiveReader> {
        match self {
            ArtifactFamily::FirmwareImage => Arc::new(RawImageReader),
            ArtifactFamily::SingleApk
            | ArtifactFamily::DeviceSplitApk
            | ArtifactFamily::AabBundletool => Arc::new(ZipArchiveReader),
        }
    }

    pub fn default_locator(self) -> &'static str {
        match self {
            ArtifactFamily::SingleApk | ArtifactFamily::DeviceSplitApk => "*.apk",
            ArtifactFamily::AabBundletool => "splits/*.apk",
            ArtifactFamily::FirmwareImage => "*.bin",
        }
    }
}

impl fmt::Display for ArtifactFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactFamily::SingleApk => "single-apk",
            ArtifactFamily::DeviceSplitApk => "device-split-apk",
            ArtifactFamily::AabBundletool => "aab-bundletool",
            ArtifactFamily::FirmwareImage => "firmware-image",
        };
        f.write_str(s)
    }
}

impl FromStr for ArtifactFamily {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-apk" => Ok(ArtifactFamily::SingleApk),
            "device-split-apk" => Ok(ArtifactFamily::DeviceSplitApk),
            "aab-bundletool" => Ok(ArtifactFamily::AabBundletool),
            "firmware-image" => Ok(ArtifactFamily::FirmwareImage),
            other => Err(ProfileError::UnknownFamily(other.to_string())),
        }
    }
}

fn default_tag_convention() -> String {
    "v{version}".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppProfile {
    pub app_id: String,
    pub repo_url: String,
    pub family: ArtifactFamily,
    /// Tag name template with `{version}` / `{code}` placeholders.
    #[serde(default = "default_tag_convention")]
    pub tag_convention: String,
    /// Build argv; `{source}` and `{output}` are substituted. No shell.
    #[serde(default)]
    pub build_command: Vec<String>,
    /// Relative to the build output dir; `*` allowed in the last component.
    #[serde(default)]
    pub artifact_locator: Option<String>,
}

impl AppProfile {
    pub fn locator(&self) -> &str {
        self.artifact_locator
            .as_deref()
            .unwrap_or_else(|| self.family.default_locator())
    }
}

/// Result of running a profile's build command.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// What the engine needs from an application family.
#[async_trait]
pub trait AppCapabilities: Send + Sync {
    /// Tag name for a release.
    fn resolve_tag(&self, version_name: &str, version_code: &str) -> String;

    /// Build from `source_dir`, leaving artifacts under `output_dir`.
    async fn build(&self, source_dir: &Path, output_dir: &Path) -> Result<BuildOutput, ProfileError>;

    /// Built artifacts under `output_dir`, sorted by path.
    fn locate_output_artifacts(&self, output_dir: &Path) -> Result<Vec<PathBuf>, ProfileError>;
}

#[async_trait]
impl AppCapabilities for AppProfile {
    fn resolve_tag(&self, version_name: &str, version_code: &str) -> String {
        self.tag_convention
            .replace("{version}", version_name)
            .replace("{code}", version_code)
    }

    async fn build(&self, source_dir: &Path, output_dir: &Path) -> Result<BuildOutput, ProfileError> {
        let start = Instant::now();
        let Some((exe, rest)) = self.build_command.split_first() else {
            return Err(ProfileError::EmptyBuildCommand {
                app_id: self.app_id.clone(),
            });
        };
        let source = source_dir.display().to_string();
        let output = output_dir.display().to_string();
        let args: Vec<String> = rest
            .iter()
            .map(|a| a.replace("{source}", &source).replace("{output}", &output))
            .collect();

        if has_entries(output_dir).map_err(|source| ProfileError::Locate {
            path: output_dir.to_path_buf(),
            source,
        })? {
            return Err(ProfileError::StaleOutput {
                path: output_dir.to_path_buf(),
            });
        }
        fs::create_dir_all(output_dir).map_err(|source| ProfileError::BuildSpawn {
            app_id: self.app_id.clone(),
            source,
        })?;

        info!(app_id = %self.app_id, %exe, ?args, "running build");
        let child = Command::new(exe)
            .args(&args)
            .current_dir(source_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProfileError::BuildSpawn {
                app_id: self.app_id.clone(),
                source,
            })?;
        let out = child
            .wait_with_output()
            .await
            .map_err(|source| ProfileError::BuildSpawn {
                app_id: self.app_id.clone(),
                source,
            })?;

        let result = BuildOutput {
            exit_code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        if !out.status.success() {
            return Err(ProfileError::BuildFailed {
                app_id: self.app_id.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        debug!(app_id = %self.app_id, duration_ms = result.duration_ms, "build finished");
        Ok(result)
    }

    fn locate_output_artifacts(&self, output_dir: &Path) -> Result<Vec<PathBuf>, ProfileError> {
        locate(output_dir, self.locator())
    }
}

/// Whether `dir` exists and holds anything. A missing dir is empty.
fn has_entries(dir: &Path) -> io::Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Resolve `locator` under `root`. Only the last component may hold `*`.
pub fn locate(root: &Path, locator: &str) -> Result<Vec<PathBuf>, ProfileError> {
    let locator = locator.trim_matches('/');
    let (dir, pattern) = match locator.rsplit_once('/') {
        Some((dir, pattern)) => (root.join(dir), pattern),
        None => (root.to_path_buf(), locator),
    };
    if pattern.is_empty() || dir.to_string_lossy().contains('*') || locator.contains("..") {
        return Err(ProfileError::InvalidLocator(locator.to_string()));
    }

    if !pattern.contains('*') {
        let path = dir.join(pattern);
        return Ok(if path.is_file() { vec![path] } else { Vec::new() });
    }

    let glob = wildcard_regex(pattern)?;
    let entries = fs::read_dir(&dir).map_err(|source| ProfileError::Locate {
        path: dir.clone(),
        source,
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ProfileError::Locate {
            path: dir.clone(),
            source,
        })?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| glob.is_match(n))
            .unwrap_or(false);
        if matches && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn wildcard_regex(pattern: &str) -> Result<Regex, ProfileError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("[^/]*");
    Regex::new(&format!("^{body}$")).map_err(|_| ProfileError::InvalidLocator(pattern.to_string()))
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default, rename = "app")]
    apps: Vec<AppProfile>,
}

/// Known applications keyed by app id.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, AppProfile>,
}

impl ProfileRegistry {
    /// Load from `path`. A missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ProfileError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ProfileError> {
        let file: ProfileFile = toml::from_str(content)?;
        let mut profiles = BTreeMap::new();
        for app in file.apps {
            if profiles.contains_key(&app.app_id) {
                return Err(ProfileError::DuplicateApp(app.app_id));
            }
            profiles.insert(app.app_id.clone(), app);
        }
        Ok(Self { profiles })
    }

    pub fn get(&self, app_id: &str) -> Option<&AppProfile> {
        self.profiles.get(app_id)
    }

    /// Like [`get`](Self::get), but an unknown app is an identity error.
    pub fn require(&self, app_id: &str) -> Result<&AppProfile, VerifyError> {
        self.get(app_id).ok_or_else(|| VerifyError::UnsupportedApp {
            app_id: app_id.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
