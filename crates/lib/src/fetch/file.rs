//! Fetcher for a single local file.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use super::{FetchError, FetchState, FetchStateStore, Fetcher};
use crate::util::hash;

/// Copies one literal file into the component source dir.
///
/// The fingerprint covers the file path and its content hash, so editing the
/// upstream file triggers a refetch even though the declared version is
/// unchanged.
#[derive(Debug)]
pub struct FileFetcher {
  name: String,
  source_file: PathBuf,
  dest_dir: PathBuf,
  state: FetchStateStore,
}

impl FileFetcher {
  pub fn new(name: &str, source_file: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>, state: FetchStateStore) -> Self {
    Self {
      name: name.to_string(),
      source_file: source_file.into(),
      dest_dir: dest_dir.into(),
      state,
    }
  }

  fn dest_file(&self) -> Result<PathBuf, FetchError> {
    let file_name = self
      .source_file
      .file_name()
      .ok_or_else(|| FetchError::SourceMissing {
        path: self.source_file.clone(),
      })?;
    Ok(self.dest_dir.join(file_name))
  }

  fn fingerprint(&self) -> Result<String, FetchError> {
    if !self.source_file.is_file() {
      return Err(FetchError::SourceMissing {
        path: self.source_file.clone(),
      });
    }
    let content = hash::hash_file(&self.source_file).map_err(|e| FetchError::Hash {
      path: self.source_file.clone(),
      source: e,
    })?;
    Ok(format!("{}#{}", self.source_file.display(), content))
  }

  fn copy_into_place(&self) -> Result<(), FetchError> {
    let io_err = |path: PathBuf, source| FetchError::Io { path, source };

    fs::create_dir_all(&self.dest_dir).map_err(|e| FetchError::CreateDir {
      path: self.dest_dir.clone(),
      source: e,
    })?;

    let dest = self.dest_file()?;
    fs::copy(&self.source_file, &dest).map_err(|e| io_err(dest.clone(), e))?;
    debug!(name = %self.name, dest = %dest.display(), "copied file source");
    Ok(())
  }
}

impl Fetcher for FileFetcher {
  fn fetch_required(&self) -> Result<bool, FetchError> {
    let fingerprint = self.fingerprint()?;
    let up_to_date = self.state.load(&self.name).is_some_and(|s| s.fingerprint == fingerprint)
      && self.dest_file()?.is_file();
    Ok(!up_to_date)
  }

  fn fetch(&self) -> Result<(), FetchError> {
    let fingerprint = self.fingerprint()?;
    self.copy_into_place()?;
    self.state.save(&self.name, &FetchState::new(fingerprint))?;
    info!(name = %self.name, source = %self.source_file.display(), "fetched file source");
    Ok(())
  }

  fn clean(&self) -> Result<bool, FetchError> {
    let removed = crate::util::fs::reset_dir(&self.dest_dir).map_err(|e| FetchError::Io {
      path: self.dest_dir.clone(),
      source: e,
    })?;
    if self.source_file.is_file() {
      self.copy_into_place()?;
    }
    Ok(removed)
  }

  fn version_for_cache(&self) -> Result<String, FetchError> {
    self.fingerprint()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn fetcher_in(root: &std::path::Path) -> FileFetcher {
    let source = root.join("notes.txt");
    fs::write(&source, "original").unwrap();
    FileFetcher::new(
      "notes",
      source,
      root.join("src/notes"),
      FetchStateStore::new(root.join("fetch-state")),
    )
  }

  #[test]
  fn fetch_copies_and_records_state() {
    let temp = tempdir().unwrap();
    let fetcher = fetcher_in(temp.path());

    assert!(fetcher.fetch_required().unwrap());
    fetcher.fetch().unwrap();

    assert_eq!(
      fs::read_to_string(temp.path().join("src/notes/notes.txt")).unwrap(),
      "original"
    );
    assert!(!fetcher.fetch_required().unwrap());
  }

  #[test]
  fn upstream_edit_requires_refetch() {
    let temp = tempdir().unwrap();
    let fetcher = fetcher_in(temp.path());
    fetcher.fetch().unwrap();

    fs::write(temp.path().join("notes.txt"), "edited").unwrap();
    assert!(fetcher.fetch_required().unwrap());

    fetcher.fetch().unwrap();
    assert_eq!(fs::read_to_string(temp.path().join("src/notes/notes.txt")).unwrap(), "edited");
  }

  #[test]
  fn missing_source_is_fatal() {
    let temp = tempdir().unwrap();
    let fetcher = FileFetcher::new(
      "ghost",
      temp.path().join("nope.txt"),
      temp.path().join("src/ghost"),
      FetchStateStore::new(temp.path().join("fetch-state")),
    );

    assert!(matches!(fetcher.fetch_required(), Err(FetchError::SourceMissing { .. })));
  }

  #[test]
  fn clean_restores_pristine_copy() {
    let temp = tempdir().unwrap();
    let fetcher = fetcher_in(temp.path());
    fetcher.fetch().unwrap();

    // Simulate a build scribbling over the source tree.
    fs::write(temp.path().join("src/notes/notes.txt"), "patched").unwrap();
    fs::write(temp.path().join("src/notes/build.log"), "noise").unwrap();

    assert!(fetcher.clean().unwrap());
    assert_eq!(
      fs::read_to_string(temp.path().join("src/notes/notes.txt")).unwrap(),
      "original"
    );
    assert!(!temp.path().join("src/notes/build.log").exists());
  }
}
