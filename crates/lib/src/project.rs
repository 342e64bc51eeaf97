//! Project configuration and derived paths.
//!
//! A project is the unit one orchestrator run operates on: a named install
//! root, a cache directory, the top-level component list, and where to find
//! component definitions. Configuration is an explicit value loaded from a
//! `project.toml` and threaded into the orchestrator; nothing is read from
//! ambient process state.
//!
//! ```toml
//! name = "full-stack"
//! install-dir = "/opt/full-stack"
//! cache-dir = "/var/cache/forgepack/full-stack"
//! components = ["preparation", "zlib"]
//! definitions = "components"
//! overrides = "overrides.txt"
//! ```
//!
//! Relative paths are resolved against the directory containing the project
//! file.
//!
//! # Cache layout
//!
//! ```text
//! <cache-dir>/
//! ├── downloads/            # verified archive downloads, keyed by filename
//! ├── src/<component>/      # per-component working source trees
//! ├── fetch-state/          # per-component fetch fingerprints (JSON)
//! └── snapshots/            # install-path snapshot store (one tarball per tag)
//! ```
//!
//! The snapshot store lives under the cache dir, never under the install
//! dir: deleting the cache dir wholesale forces a full rebuild and nothing
//! else.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a project file.
#[derive(Debug, Error)]
pub enum ProjectError {
  #[error("failed to read project file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse project file '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("project '{name}' lists no components")]
  NoComponents { name: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawProject {
  name: String,
  install_dir: PathBuf,
  cache_dir: PathBuf,
  components: Vec<String>,
  definitions: PathBuf,
  overrides: Option<PathBuf>,
}

/// A loaded project configuration.
#[derive(Debug, Clone)]
pub struct Project {
  name: String,
  install_dir: PathBuf,
  cache_dir: PathBuf,
  components: Vec<String>,
  definitions_dir: PathBuf,
  overrides_path: Option<PathBuf>,
}

impl Project {
  /// Load a project from a TOML file.
  pub fn load(path: &Path) -> Result<Self, ProjectError> {
    let text = fs::read_to_string(path).map_err(|e| ProjectError::Read {
      path: path.to_path_buf(),
      source: e,
    })?;

    let raw: RawProject = toml::from_str(&text).map_err(|e| ProjectError::Parse {
      path: path.to_path_buf(),
      source: Box::new(e),
    })?;

    if raw.components.is_empty() {
      return Err(ProjectError::NoComponents { name: raw.name });
    }

    let base = path.parent().unwrap_or(Path::new("."));

    Ok(Self {
      name: raw.name,
      install_dir: resolve_against(base, raw.install_dir),
      cache_dir: resolve_against(base, raw.cache_dir),
      components: raw.components,
      definitions_dir: resolve_against(base, raw.definitions),
      overrides_path: raw.overrides.map(|p| resolve_against(base, p)),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Top-level component names, in declaration order.
  pub fn components(&self) -> &[String] {
    &self.components
  }

  pub fn definitions_dir(&self) -> &Path {
    &self.definitions_dir
  }

  pub fn overrides_path(&self) -> Option<&Path> {
    self.overrides_path.as_deref()
  }

  pub fn paths(&self) -> Paths {
    Paths::new(self.install_dir.clone(), self.cache_dir.clone())
  }
}

fn resolve_against(base: &Path, path: PathBuf) -> PathBuf {
  if path.is_absolute() { path } else { base.join(path) }
}

/// The filesystem locations one orchestrator run owns.
#[derive(Debug, Clone)]
pub struct Paths {
  pub install_dir: PathBuf,
  pub cache_dir: PathBuf,
}

impl Paths {
  pub fn new(install_dir: PathBuf, cache_dir: PathBuf) -> Self {
    Self { install_dir, cache_dir }
  }

  /// Verified archive downloads.
  pub fn downloads_dir(&self) -> PathBuf {
    self.cache_dir.join("downloads")
  }

  /// The working source tree for one component.
  pub fn source_dir(&self, component: &str) -> PathBuf {
    self.cache_dir.join("src").join(component)
  }

  /// Per-component fetch fingerprint files.
  pub fn fetch_state_dir(&self) -> PathBuf {
    self.cache_dir.join("fetch-state")
  }

  /// The install-path snapshot store.
  pub fn snapshot_dir(&self) -> PathBuf {
    self.cache_dir.join("snapshots")
  }
}
