//! Version overrides and resolution precedence.
//!
//! Each component carries a default version in its definition. An overrides
//! file can replace it per component name:
//!
//! ```text
//! # comment lines and blank lines are ignored
//! zlib 1.8.0
//! openssl 3.2.1
//! ```
//!
//! Precedence, highest first: overrides entry, then the definition's default.
//! The result of this textual step may still be symbolic for VCS sources (a
//! branch or tag name that can silently move); the component's fetcher maps
//! it to the concrete revision used for cache tagging.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::component::Component;

/// Errors raised while parsing an overrides file.
#[derive(Debug, Error)]
pub enum OverridesError {
  #[error("failed to read overrides file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A line that is not `<name> <version>`.
  #[error("malformed override at line {line_no}: '{line}' (expected '<name> <version>')")]
  MalformedLine { line_no: usize, line: String },

  /// The same name appearing twice is ambiguous, not a harmless repeat.
  #[error("duplicate override for '{name}' at line {line_no}")]
  DuplicateName { name: String, line_no: usize },
}

/// Parsed version overrides, keyed by component name.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  entries: BTreeMap<String, String>,
}

impl Overrides {
  /// An empty overrides set (no file given).
  pub fn empty() -> Self {
    Self::default()
  }

  /// Parse overrides from text, one `name version` pair per line.
  pub fn parse(text: &str) -> Result<Self, OverridesError> {
    let mut entries = BTreeMap::new();

    for (idx, raw_line) in text.lines().enumerate() {
      let line_no = idx + 1;
      let line = raw_line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      let mut tokens = line.split_whitespace();
      let (Some(name), Some(version), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(OverridesError::MalformedLine {
          line_no,
          line: raw_line.to_string(),
        });
      };

      if entries.insert(name.to_string(), version.to_string()).is_some() {
        return Err(OverridesError::DuplicateName {
          name: name.to_string(),
          line_no,
        });
      }
    }

    Ok(Self { entries })
  }

  pub fn from_file(path: &Path) -> Result<Self, OverridesError> {
    let text = fs::read_to_string(path).map_err(|e| OverridesError::Read {
      path: path.to_path_buf(),
      source: e,
    })?;
    Self::parse(&text)
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.entries.get(name).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Apply override precedence to a component's declared version.
///
/// Returns the textual version for this run; for VCS sources the fetcher
/// still maps it to a concrete revision afterwards.
pub fn declared_version(component: &Component, overrides: &Overrides) -> String {
  match overrides.get(&component.name) {
    Some(version) => {
      debug!(
        name = %component.name,
        default = %component.declared_version,
        override_ = %version,
        "version overridden"
      );
      version.to_string()
    }
    None => component.declared_version.clone(),
  }
}
