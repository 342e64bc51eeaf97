//! Snapshot storage backing the install-path cache.
//!
//! The store maps tags to full snapshots of the shared install directory.
//! The contract is deliberately small - existence check, save, restore - so
//! any content-addressed backing satisfies it; the default [`ArchiveStore`]
//! keeps one gzipped tarball per tag.
//!
//! # Storage Layout
//!
//! ```text
//! {cache_dir}/snapshots/
//! ├── <tag>.tar.gz          # One snapshot per tag
//! └── <tag>.tar.gz.tmp      # In-flight write (renamed into place)
//! ```
//!
//! Saves are atomic (temp file + rename), so a snapshot either exists
//! complete or not at all; overwrite-on-commit is the same rename. The store
//! directory is created lazily on first save and is safe to delete wholesale
//! to force a full rebuild.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::debug;

use crate::util::fs as fsx;

/// Errors raised by snapshot storage.
#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("failed to create snapshot directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write snapshot '{tag}': {source}")]
  Write {
    tag: String,
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to restore snapshot '{tag}': {source}")]
  Restore {
    tag: String,
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

/// Tagged, full-tree snapshots of one install directory.
pub trait SnapshotStore {
  /// Whether a snapshot exists under `tag`.
  fn has(&self, tag: &str) -> Result<bool, SnapshotError>;

  /// Record `dir`'s current full state under `tag`, replacing any prior
  /// snapshot with that tag.
  fn save(&self, tag: &str, dir: &Path) -> Result<(), SnapshotError>;

  /// If a snapshot exists under `tag`, reset `dir` to it and return `true`;
  /// otherwise leave `dir` untouched and return `false`.
  fn restore(&self, tag: &str, dir: &Path) -> Result<bool, SnapshotError>;
}

/// Tarball-per-tag snapshot store.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
  root: PathBuf,
}

impl ArchiveStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn archive_path(&self, tag: &str) -> PathBuf {
    self.root.join(format!("{}.tar.gz", sanitize_tag(tag)))
  }
}

impl SnapshotStore for ArchiveStore {
  fn has(&self, tag: &str) -> Result<bool, SnapshotError> {
    Ok(self.archive_path(tag).is_file())
  }

  fn save(&self, tag: &str, dir: &Path) -> Result<(), SnapshotError> {
    let write_err = |source: Box<dyn std::error::Error + Send + Sync>| SnapshotError::Write {
      tag: tag.to_string(),
      source,
    };

    fs::create_dir_all(&self.root).map_err(|e| SnapshotError::CreateDir {
      path: self.root.clone(),
      source: e,
    })?;

    let path = self.archive_path(tag);
    let temp_path = path.with_extension("gz.tmp");

    {
      let file = File::create(&temp_path).map_err(|e| write_err(Box::new(e)))?;
      let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
      let mut builder = tar::Builder::new(encoder);
      builder.follow_symlinks(false);
      builder.append_dir_all(".", dir).map_err(|e| write_err(Box::new(e)))?;
      builder
        .into_inner()
        .map_err(|e| write_err(Box::new(e)))?
        .finish()
        .map_err(|e| write_err(Box::new(e)))?;
    }

    fs::rename(&temp_path, &path).map_err(|e| write_err(Box::new(e)))?;
    debug!(tag, path = %path.display(), "snapshot saved");
    Ok(())
  }

  fn restore(&self, tag: &str, dir: &Path) -> Result<bool, SnapshotError> {
    let restore_err = |source: Box<dyn std::error::Error + Send + Sync>| SnapshotError::Restore {
      tag: tag.to_string(),
      source,
    };

    let path = self.archive_path(tag);
    if !path.is_file() {
      return Ok(false);
    }

    // Only wipe the target once the snapshot is known to exist.
    fsx::reset_dir(dir).map_err(|e| restore_err(Box::new(e)))?;

    let file = File::open(&path).map_err(|e| restore_err(Box::new(e)))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.unpack(dir).map_err(|e| restore_err(Box::new(e)))?;

    debug!(tag, path = %path.display(), "snapshot restored");
    Ok(true)
  }
}

/// Make a tag safe to use as a file name.
fn sanitize_tag(tag: &str) -> String {
  tag
    .chars()
    .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
    .collect()
}
