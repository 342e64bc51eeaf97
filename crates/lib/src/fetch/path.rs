//! Fetcher for a local source directory.

use std::path::PathBuf;

use tracing::info;

use super::{FetchError, FetchState, FetchStateStore, Fetcher};
use crate::util::fs as fsx;
use crate::util::hash;

/// Copies a local directory tree into the component source dir.
///
/// The fingerprint is the source path plus a deterministic content hash of
/// the whole tree, so any upstream edit invalidates the fetch even when the
/// declared version string is unchanged.
#[derive(Debug)]
pub struct PathFetcher {
  name: String,
  source_path: PathBuf,
  dest_dir: PathBuf,
  state: FetchStateStore,
}

impl PathFetcher {
  pub fn new(name: &str, source_path: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>, state: FetchStateStore) -> Self {
    Self {
      name: name.to_string(),
      source_path: source_path.into(),
      dest_dir: dest_dir.into(),
      state,
    }
  }

  fn fingerprint(&self) -> Result<String, FetchError> {
    if !self.source_path.is_dir() {
      return Err(FetchError::SourceMissing {
        path: self.source_path.clone(),
      });
    }
    let content = hash::hash_directory(&self.source_path).map_err(|e| FetchError::Hash {
      path: self.source_path.clone(),
      source: e,
    })?;
    Ok(format!("{}#{}", self.source_path.display(), content))
  }

  fn copy_into_place(&self) -> Result<(), FetchError> {
    fsx::reset_dir(&self.dest_dir).map_err(|e| FetchError::Io {
      path: self.dest_dir.clone(),
      source: e,
    })?;
    fsx::copy_dir_all(&self.source_path, &self.dest_dir).map_err(|e| FetchError::Io {
      path: self.dest_dir.clone(),
      source: e,
    })
  }
}

impl Fetcher for PathFetcher {
  fn fetch_required(&self) -> Result<bool, FetchError> {
    let fingerprint = self.fingerprint()?;
    let up_to_date = self.state.load(&self.name).is_some_and(|s| s.fingerprint == fingerprint)
      && fsx::dir_is_populated(&self.dest_dir);
    Ok(!up_to_date)
  }

  fn fetch(&self) -> Result<(), FetchError> {
    let fingerprint = self.fingerprint()?;
    self.copy_into_place()?;
    self.state.save(&self.name, &FetchState::new(fingerprint))?;
    info!(name = %self.name, source = %self.source_path.display(), "fetched path source");
    Ok(())
  }

  fn clean(&self) -> Result<bool, FetchError> {
    let removed = fsx::dir_is_populated(&self.dest_dir);
    if self.source_path.is_dir() {
      self.copy_into_place()?;
    } else {
      fsx::reset_dir(&self.dest_dir).map_err(|e| FetchError::Io {
        path: self.dest_dir.clone(),
        source: e,
      })?;
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
  use std::fs;
  use tempfile::tempdir;

  fn fetcher_in(root: &std::path::Path) -> PathFetcher {
    let source = root.join("upstream");
    fs::create_dir_all(source.join("src")).unwrap();
    fs::write(source.join("src/lib.c"), "/* lib */").unwrap();
    PathFetcher::new(
      "locallib",
      source,
      root.join("src-cache/locallib"),
      FetchStateStore::new(root.join("fetch-state")),
    )
  }

  #[test]
  fn fetch_copies_tree() {
    let temp = tempdir().unwrap();
    let fetcher = fetcher_in(temp.path());

    assert!(fetcher.fetch_required().unwrap());
    fetcher.fetch().unwrap();

    assert!(temp.path().join("src-cache/locallib/src/lib.c").exists());
    assert!(!fetcher.fetch_required().unwrap());
  }

  #[test]
  fn upstream_edit_changes_fingerprint() {
    let temp = tempdir().unwrap();
    let fetcher = fetcher_in(temp.path());
    fetcher.fetch().unwrap();
    let before = fetcher.version_for_cache().unwrap();

    fs::write(temp.path().join("upstream/src/lib.c"), "/* changed */").unwrap();
    let after = fetcher.version_for_cache().unwrap();

    assert_ne!(before, after);
    assert!(fetcher.fetch_required().unwrap());
  }

  #[test]
  fn clean_discards_build_droppings() {
    let temp = tempdir().unwrap();
    let fetcher = fetcher_in(temp.path());
    fetcher.fetch().unwrap();

    fs::write(temp.path().join("src-cache/locallib/lib.o"), "obj").unwrap();

    assert!(fetcher.clean().unwrap());
    assert!(!temp.path().join("src-cache/locallib/lib.o").exists());
    assert!(temp.path().join("src-cache/locallib/src/lib.c").exists());
  }

  #[test]
  fn missing_source_dir_is_fatal() {
    let temp = tempdir().unwrap();
    let fetcher = PathFetcher::new(
      "ghost",
      temp.path().join("nope"),
      temp.path().join("src-cache/ghost"),
      FetchStateStore::new(temp.path().join("fetch-state")),
    );

    assert!(matches!(fetcher.fetch_required(), Err(FetchError::SourceMissing { .. })));
  }
}
