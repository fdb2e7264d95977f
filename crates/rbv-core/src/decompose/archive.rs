//! Archive-reading capabilities injected into the decomposer.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

/// Entry name used for opaque images by [`RawImageReader`].
pub const RAW_IMAGE_ENTRY: &str = "image";

/// Errors raised while unpacking an artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unreadable archive {}: {detail}", path.display())]
    Unreadable { path: PathBuf, detail: String },

    #[error("archive {} has an entry outside the destination: {entry}", path.display())]
    UnsafeEntry { path: PathBuf, entry: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Unpacks an artifact into a destination directory.
pub trait ArchiveReader: Send + Sync {
    /// Unpack `archive` into `dest`, which exists and is empty.
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), ArchiveError>;
}

/// Reader for zip-based packages (APK, AAB, split APKs).
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiveReader;

impl ArchiveReader for ZipArchiveReader {
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let file = File::open(archive).map_err(|source| ArchiveError::Open {
            path: archive.to_path_buf(),
            source,
        })?;
        let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::Unreadable {
            path: archive.to_path_buf(),
            detail: e.to_string(),
        })?;

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| ArchiveError::Unreadable {
                path: archive.to_path_buf(),
                detail: e.to_string(),
            })?;
            let relative = match entry.enclosed_name() {
                Some(p) => p.to_path_buf(),
                None => {
                    return Err(ArchiveError::UnsafeEntry {
                        path: archive.to_path_buf(),
                        entry: entry.name().to_string(),
                    })
                }
            };
            let target = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out).map_err(|e| ArchiveError::Unreadable {
                path: archive.to_path_buf(),
                detail: format!("entry {}: {e}", entry.name()),
            })?;
        }

        debug!(archive = %archive.display(), entries = zip.len(), "unpacked zip archive");
        Ok(())
    }
}

/// Reader for opaque firmware images: the whole file becomes one entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawImageReader;

impl ArchiveReader for RawImageReader {
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
        if !archive.is_file() {
            return Err(ArchiveError::Unreadable {
                path: archive.to_path_buf(),
                detail: "not a regular file".to_string(),
            });
        }
        fs::copy(archive, dest.join(RAW_IMAGE_ENTRY)).map_err(|source| ArchiveError::Open {
            path: archive.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}
