//! Source fetching.
//!
//! Every component carries a source specification; a [`Fetcher`] turns it
//! into a working source tree under the project cache. Concrete fetchers:
//!
//! - [`git`] - git repositories via gix (clone, fetch, revision checkout)
//! - [`net`] - downloadable archives/files with sha256 verification
//! - [`path`] - local directories
//! - [`file`] - single local files
//! - [`null`] - nothing to fetch
//!
//! # Protocol
//!
//! [`Fetcher::fetch_required`] is side-effect-free: it compares the recorded
//! fetch fingerprint against [`Fetcher::version_for_cache`], the opaque
//! identity of the exact source bytes (commit id, url+checksum, path+content
//! hash). [`Fetcher::fetch`] idempotently makes the source tree match,
//! re-cleaning itself when switching revisions, and records the fingerprint
//! last. [`Fetcher::clean`] resets the tree to a pristine state before a
//! rebuild.
//!
//! The fingerprint is deliberately distinct from the resolved version: a
//! symbolic ref's target can move between runs while the declared version
//! string stays the same.

pub mod archive;
pub mod file;
pub mod git;
pub mod net;
pub mod null;
pub mod path;

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::component::{Component, SourceSpec};
use crate::project::Paths;
use crate::util::hash::HashError;
use crate::util::retry::{Backoff, Transient};

pub use archive::ArchiveError;

/// Errors raised by fetch operations.
///
/// Variants classify themselves as transient (worth retrying) or not via
/// [`Transient`]; exhausted retries surface the final error unchanged.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to create directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to fetch from '{url}': {source}")]
  RemoteFetch {
    url: String,
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// The remote genuinely has no such ref; retrying cannot fix this.
  #[error("revision '{rev}' not found in '{url}'")]
  RefNotFound { rev: String, url: String },

  #[error("failed to checkout revision '{rev}': {source}")]
  Checkout {
    rev: String,
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("request for '{url}' failed: {source}")]
  Request {
    url: String,
    #[source]
    source: Box<reqwest::Error>,
  },

  #[error("server returned HTTP {status} for '{url}'")]
  HttpStatus { url: String, status: u16 },

  /// The downloaded artifact does not match its pinned checksum.
  #[error("checksum mismatch for '{url}': expected {expected}, got {actual}")]
  ChecksumMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("source path does not exist: {path}")]
  SourceMissing { path: PathBuf },

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error("failed to hash source '{path}': {source}")]
  Hash {
    path: PathBuf,
    #[source]
    source: HashError,
  },

  #[error("io failure at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to record fetch state for '{name}': {source}")]
  State {
    name: String,
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// `fetch`/`fetch_required` called before the version was resolved.
  #[error("version for '{name}' has not been resolved yet")]
  VersionNotResolved { name: String },
}

impl Transient for FetchError {
  fn is_transient(&self) -> bool {
    matches!(
      self,
      FetchError::Clone { .. }
        | FetchError::RemoteFetch { .. }
        | FetchError::Request { .. }
        | FetchError::HttpStatus { .. }
    )
  }
}

/// The source-retrieval strategy for one component.
pub trait Fetcher {
  /// Map a textual version to the concrete fetch target.
  ///
  /// Identity for most sources; the git fetcher resolves symbolic refs to
  /// commit ids here (a branch name alone is not a stable cache key). Must
  /// be called before `fetch_required`/`fetch` for sources with symbolic
  /// versions.
  fn resolve_version(&self, declared: &str) -> Result<String, FetchError> {
    Ok(declared.to_string())
  }

  /// Whether local state differs from the requested source.
  ///
  /// Side-effect-free.
  fn fetch_required(&self) -> Result<bool, FetchError>;

  /// Make the local source tree match the requested source.
  fn fetch(&self) -> Result<(), FetchError>;

  /// Reset the source tree to a pristine state; returns whether anything was
  /// cleaned.
  fn clean(&self) -> Result<bool, FetchError>;

  /// Opaque fingerprint of the exact source fetched.
  fn version_for_cache(&self) -> Result<String, FetchError>;
}

/// Persisted fetch fingerprint for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchState {
  pub fingerprint: String,
}

impl FetchState {
  pub fn new(fingerprint: impl Into<String>) -> Self {
    Self {
      fingerprint: fingerprint.into(),
    }
  }
}

/// Directory of per-component fetch state files.
///
/// Unreadable or corrupt state reads as "never fetched": the worst case is a
/// redundant fetch, never a stale one.
#[derive(Debug, Clone)]
pub struct FetchStateStore {
  dir: PathBuf,
}

impl FetchStateStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn path(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{name}.json"))
  }

  pub fn load(&self, name: &str) -> Option<FetchState> {
    let text = match fs::read_to_string(self.path(name)) {
      Ok(text) => text,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
      Err(e) => {
        warn!(name, error = %e, "unreadable fetch state, treating as never fetched");
        return None;
      }
    };

    match serde_json::from_str(&text) {
      Ok(state) => Some(state),
      Err(e) => {
        warn!(name, error = %e, "corrupt fetch state, treating as never fetched");
        None
      }
    }
  }

  /// Write state atomically (temp file + rename).
  pub fn save(&self, name: &str, state: &FetchState) -> Result<(), FetchError> {
    let state_err = |source: Box<dyn std::error::Error + Send + Sync>| FetchError::State {
      name: name.to_string(),
      source,
    };

    fs::create_dir_all(&self.dir).map_err(|e| state_err(Box::new(e)))?;

    let path = self.path(name);
    let temp_path = self.dir.join(format!("{name}.json.tmp"));

    let content = serde_json::to_string_pretty(state).map_err(|e| state_err(Box::new(e)))?;
    fs::write(&temp_path, &content).map_err(|e| state_err(Box::new(e)))?;
    fs::rename(&temp_path, &path).map_err(|e| state_err(Box::new(e)))?;

    Ok(())
  }

  /// Forget recorded state for one component.
  pub fn clear(&self, name: &str) -> Result<(), FetchError> {
    match fs::remove_file(self.path(name)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(FetchError::State {
        name: name.to_string(),
        source: Box::new(e),
      }),
    }
  }
}

/// Creates the fetcher for a component's source kind.
pub trait FetcherFactory {
  fn create(&self, component: &Component) -> Box<dyn Fetcher>;
}

/// Dispatches on the source specification's kind.
#[derive(Debug, Clone)]
pub struct DefaultFetcherFactory {
  paths: Paths,
  backoff: Backoff,
}

impl DefaultFetcherFactory {
  pub fn new(paths: Paths) -> Self {
    Self {
      paths,
      backoff: Backoff::new(),
    }
  }

  /// Replace the retry policy (tests use a non-sleeping one).
  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = backoff;
    self
  }
}

impl FetcherFactory for DefaultFetcherFactory {
  fn create(&self, component: &Component) -> Box<dyn Fetcher> {
    let state = FetchStateStore::new(self.paths.fetch_state_dir());
    let source_dir = self.paths.source_dir(&component.name);

    match &component.source {
      SourceSpec::Git { url } => Box::new(git::GitFetcher::new(
        &component.name,
        url,
        source_dir,
        state,
        self.backoff.clone(),
      )),
      SourceSpec::Net { url, sha256 } => Box::new(net::NetFetcher::new(
        &component.name,
        url,
        sha256,
        self.paths.downloads_dir(),
        source_dir,
        state,
        self.backoff.clone(),
      )),
      SourceSpec::Path { path } => Box::new(path::PathFetcher::new(&component.name, path, source_dir, state)),
      SourceSpec::File { path } => Box::new(file::FileFetcher::new(&component.name, path, source_dir, state)),
      SourceSpec::Null => Box::new(null::NullFetcher::new(&component.name)),
    }
  }
}
