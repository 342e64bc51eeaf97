//! Component definitions and runtime state.
//!
//! A component is one named, versioned unit of software. Definitions are
//! declarative TOML records:
//!
//! ```toml
//! name = "zlib"
//! default-version = "1.7.2"
//! dependencies = ["preparation"]
//!
//! [source]
//! url = "https://example.com/zlib-1.7.2.tar.gz"
//! sha256 = "..."
//! ```
//!
//! The `[source]` table is a tagged record: exactly one of `git`, `url`,
//! `path`, or `file` selects the fetch kind; omitting all of them selects the
//! null source (nothing to fetch). Anything else is a configuration error
//! rejected at parse time, before any fetch or build work begins.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while reading or validating a component definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("failed to read component definition '{origin}': {source}")]
  Read {
    origin: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse component definition '{origin}': {source}")]
  Parse {
    origin: String,
    #[source]
    source: Box<toml::de::Error>,
  },

  /// More than one of `git`, `url`, `path`, `file` was given.
  #[error("component '{name}' declares more than one source kind")]
  AmbiguousSource { name: String },

  /// `url` sources must carry a checksum so downloads can be verified.
  #[error("component '{name}' has a url source without a sha256 checksum")]
  MissingChecksum { name: String },

  /// A checksum was given for a source kind that cannot use one.
  #[error("component '{name}' declares a sha256 checksum for a {kind} source")]
  UnexpectedChecksum { name: String, kind: &'static str },

  /// The definition file's `name` field disagrees with the requested name.
  #[error("definition '{origin}' declares name '{declared}' but was loaded as '{requested}'")]
  NameMismatch {
    origin: String,
    declared: String,
    requested: String,
  },
}

/// Where a component's source material comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
  /// A git repository; the component version names the ref to build.
  Git { url: String },
  /// A downloadable archive or file, pinned by checksum.
  Net { url: String, sha256: String },
  /// A local directory.
  Path { path: PathBuf },
  /// A single local file.
  File { path: PathBuf },
  /// Nothing to fetch (e.g. a component that only runs preparation steps).
  Null,
}

impl SourceSpec {
  /// The source kind name, as used in logs and error messages.
  pub fn kind(&self) -> &'static str {
    match self {
      SourceSpec::Git { .. } => "git",
      SourceSpec::Net { .. } => "url",
      SourceSpec::Path { .. } => "path",
      SourceSpec::File { .. } => "file",
      SourceSpec::Null => "null",
    }
  }
}

/// Raw `[source]` table as written in TOML, before kind validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawSource {
  git: Option<String>,
  url: Option<String>,
  path: Option<PathBuf>,
  file: Option<PathBuf>,
  sha256: Option<String>,
}

/// Raw definition as written in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawDef {
  name: String,
  default_version: String,
  #[serde(default)]
  dependencies: Vec<String>,
  #[serde(default)]
  source: RawSource,
}

/// A validated component definition.
#[derive(Debug, Clone)]
pub struct ComponentDef {
  pub name: String,
  pub default_version: String,
  pub dependencies: Vec<String>,
  pub source: SourceSpec,
}

impl ComponentDef {
  /// Parse a definition from TOML text.
  ///
  /// `origin` identifies the definition in error messages (usually the file
  /// path).
  pub fn parse(text: &str, origin: &str) -> Result<Self, DefinitionError> {
    let raw: RawDef = toml::from_str(text).map_err(|e| DefinitionError::Parse {
      origin: origin.to_string(),
      source: Box::new(e),
    })?;

    let source = validate_source(&raw.name, raw.source)?;

    Ok(Self {
      name: raw.name,
      default_version: raw.default_version,
      dependencies: raw.dependencies,
      source,
    })
  }
}

fn validate_source(name: &str, raw: RawSource) -> Result<SourceSpec, DefinitionError> {
  let kinds =
    usize::from(raw.git.is_some()) + usize::from(raw.url.is_some()) + usize::from(raw.path.is_some()) + usize::from(raw.file.is_some());
  if kinds > 1 {
    return Err(DefinitionError::AmbiguousSource { name: name.to_string() });
  }

  let spec = if let Some(url) = raw.git {
    SourceSpec::Git { url }
  } else if let Some(url) = raw.url {
    let sha256 = raw.sha256.ok_or_else(|| DefinitionError::MissingChecksum { name: name.to_string() })?;
    return Ok(SourceSpec::Net { url, sha256 });
  } else if let Some(path) = raw.path {
    SourceSpec::Path { path }
  } else if let Some(path) = raw.file {
    SourceSpec::File { path }
  } else {
    SourceSpec::Null
  };

  // Only url sources verify a checksum; anywhere else it is a likely mistake.
  if raw.sha256.is_some() {
    return Err(DefinitionError::UnexpectedChecksum {
      name: name.to_string(),
      kind: spec.kind(),
    });
  }

  Ok(spec)
}

/// A component instance for one orchestrator run.
///
/// Created when the library is built; the only mutation afterwards is version
/// resolution, which pins `resolved_version` exactly once.
#[derive(Debug, Clone)]
pub struct Component {
  pub name: String,
  pub declared_version: String,
  pub dependencies: Vec<String>,
  pub source: SourceSpec,
  resolved_version: Option<String>,
}

impl Component {
  pub fn from_def(def: ComponentDef) -> Self {
    Self {
      name: def.name,
      declared_version: def.default_version,
      dependencies: def.dependencies,
      source: def.source,
      resolved_version: None,
    }
  }

  /// The version pinned for this run, if resolution has happened yet.
  pub fn resolved_version(&self) -> Option<&str> {
    self.resolved_version.as_deref()
  }

  /// Pin the resolved version. The first pin wins; later calls are no-ops.
  pub fn pin_version(&mut self, version: String) {
    debug_assert!(self.resolved_version.is_none(), "version pinned twice for '{}'", self.name);
    if self.resolved_version.is_none() {
      self.resolved_version = Some(version);
    }
  }
}
