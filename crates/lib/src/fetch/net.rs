//! Fetcher for downloadable sources (HTTP/HTTPS).
//!
//! Downloads go to the shared downloads cache keyed by filename. A cached
//! file whose sha256 already matches is never downloaded again. After a
//! download the checksum is verified before anything else happens; a
//! mismatch deletes the artifact and fails without retry (a checksum error
//! is a pinning problem, not a network hiccup). Only then is the archive
//! unpacked into the component source dir.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::archive;
use super::{FetchError, FetchState, FetchStateStore, Fetcher};
use crate::util::fs as fsx;
use crate::util::retry::Backoff;

/// Per-attempt bounds, independent of the retry loop.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Downloads and unpacks a checksummed archive or file.
#[derive(Debug)]
pub struct NetFetcher {
  name: String,
  url: String,
  sha256: String,
  downloads_dir: PathBuf,
  dest_dir: PathBuf,
  state: FetchStateStore,
  backoff: Backoff,
}

impl NetFetcher {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    name: &str,
    url: &str,
    sha256: &str,
    downloads_dir: impl Into<PathBuf>,
    dest_dir: impl Into<PathBuf>,
    state: FetchStateStore,
    backoff: Backoff,
  ) -> Self {
    Self {
      name: name.to_string(),
      url: url.to_string(),
      sha256: sha256.to_ascii_lowercase(),
      downloads_dir: downloads_dir.into(),
      dest_dir: dest_dir.into(),
      state,
      backoff,
    }
  }

  fn download_path(&self) -> PathBuf {
    self.downloads_dir.join(url_to_filename(&self.url))
  }

  fn fingerprint(&self) -> String {
    format!("{}#{}", self.url, self.sha256)
  }

  /// Whether the cached download already matches the pinned checksum.
  fn cached_download_valid(&self, path: &Path) -> bool {
    if !path.is_file() {
      return false;
    }
    match crate::util::hash::hash_file(path) {
      Ok(actual) => actual == self.sha256,
      Err(_) => false,
    }
  }

  /// Download the artifact, verifying the checksum before it is kept.
  fn download(&self, dest: &Path) -> Result<(), FetchError> {
    let request_err = |source: reqwest::Error| FetchError::Request {
      url: self.url.clone(),
      source: Box::new(source),
    };

    let client = reqwest::blocking::Client::builder()
      .connect_timeout(CONNECT_TIMEOUT)
      .timeout(TRANSFER_TIMEOUT)
      .build()
      .map_err(request_err)?;

    let response = client.get(&self.url).send().map_err(request_err)?;
    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::HttpStatus {
        url: self.url.clone(),
        status: status.as_u16(),
      });
    }

    let bytes = response.bytes().map_err(request_err)?;

    // Verify before writing anything permanent.
    let actual = {
      let mut hasher = Sha256::new();
      hasher.update(&bytes);
      hex::encode(hasher.finalize())
    };
    if actual != self.sha256 {
      return Err(FetchError::ChecksumMismatch {
        url: self.url.clone(),
        expected: self.sha256.clone(),
        actual,
      });
    }

    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(|e| FetchError::CreateDir {
        path: parent.to_path_buf(),
        source: e,
      })?;
    }
    fs::write(dest, &bytes).map_err(|e| FetchError::Io {
      path: dest.to_path_buf(),
      source: e,
    })?;

    info!(name = %self.name, url = %self.url, size = bytes.len(), "download complete");
    Ok(())
  }

  /// Make sure a verified artifact sits in the downloads cache.
  fn ensure_download(&self) -> Result<PathBuf, FetchError> {
    let path = self.download_path();

    if self.cached_download_valid(&path) {
      debug!(name = %self.name, path = %path.display(), "using cached download");
      return Ok(path);
    }

    // A stale or truncated leftover must not survive a failed verification.
    if path.exists() {
      debug!(name = %self.name, path = %path.display(), "cached download invalid, re-downloading");
      fs::remove_file(&path).map_err(|e| FetchError::Io {
        path: path.clone(),
        source: e,
      })?;
    }

    self.backoff.run("download", || self.download(&path))?;
    Ok(path)
  }

  /// Populate the source dir from a verified artifact.
  fn extract(&self, artifact: &Path) -> Result<(), FetchError> {
    fsx::reset_dir(&self.dest_dir).map_err(|e| FetchError::Io {
      path: self.dest_dir.clone(),
      source: e,
    })?;

    if archive::is_archive(artifact) {
      archive::unpack_archive(artifact, &self.dest_dir)?;
    } else {
      // Non-archive artifacts (single binaries, patches) are used verbatim.
      let file_name = artifact.file_name().unwrap_or_default();
      fs::copy(artifact, self.dest_dir.join(file_name)).map_err(|e| FetchError::Io {
        path: self.dest_dir.clone(),
        source: e,
      })?;
    }

    Ok(())
  }
}

impl Fetcher for NetFetcher {
  fn fetch_required(&self) -> Result<bool, FetchError> {
    let up_to_date = self.state.load(&self.name).is_some_and(|s| s.fingerprint == self.fingerprint())
      && fsx::dir_is_populated(&self.dest_dir);
    Ok(!up_to_date)
  }

  fn fetch(&self) -> Result<(), FetchError> {
    let artifact = self.ensure_download()?;
    self.extract(&artifact)?;
    self.state.save(&self.name, &FetchState::new(self.fingerprint()))?;
    info!(name = %self.name, url = %self.url, "fetched net source");
    Ok(())
  }

  fn clean(&self) -> Result<bool, FetchError> {
    let removed = fsx::dir_is_populated(&self.dest_dir);

    let artifact = self.download_path();
    if self.cached_download_valid(&artifact) {
      self.extract(&artifact)?;
    } else {
      fsx::reset_dir(&self.dest_dir).map_err(|e| FetchError::Io {
        path: self.dest_dir.clone(),
        source: e,
      })?;
    }

    Ok(removed)
  }

  fn version_for_cache(&self) -> Result<String, FetchError> {
    Ok(self.fingerprint())
  }
}

/// Derive a cache filename from a URL.
///
/// Takes the last path component without its query string and sanitizes it;
/// falls back to a hash of the URL when nothing usable remains.
fn url_to_filename(url: &str) -> String {
  if let Some(last) = url.rsplit('/').next() {
    let last = last.split('?').next().unwrap_or(last);
    let sanitized: String = last
      .chars()
      .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("download_{}", &crate::util::hash::hash_bytes(url.as_bytes())[..16])
}
