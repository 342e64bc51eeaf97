//! Dependency graph building.
//!
//! The library is the ordered, deduplicated collection of all components
//! reachable from a project's top-level list. Loading is recursive: a
//! component's dependencies are fully loaded before the component itself is
//! appended, so insertion order is dependency-first. That order is
//! authoritative twice over: it is the build order, and each component's
//! cache tag covers the whole library prefix in front of it.
//!
//! # Algorithm
//!
//! 1. For each top-level name, recurse through declared dependencies with an
//!    explicit in-progress stack.
//! 2. A name already in the library is a no-op (idempotent re-visit; first
//!    loaded definition wins).
//! 3. A name already on the in-progress stack is a dependency cycle and is
//!    reported with the full chain.
//! 4. A name with no definition aborts loading, naming the dependent that
//!    required it.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, trace};

use crate::component::{Component, ComponentDef, DefinitionError};

/// Errors raised while building a library.
#[derive(Debug, Error)]
pub enum LibraryError {
  /// No definition exists for a declared dependency.
  #[error("no definition found for component '{name}' (required by '{required_by}')")]
  UnknownComponent { name: String, required_by: String },

  /// A component transitively depends on itself.
  #[error("dependency cycle detected: {chain}")]
  DependencyCycle { chain: String },

  #[error(transparent)]
  Definition(#[from] DefinitionError),
}

/// A lookup of component definitions by name.
pub trait DefinitionSource {
  /// Load the definition for `name`, or `Ok(None)` if there is none.
  fn load(&self, name: &str) -> Result<Option<ComponentDef>, DefinitionError>;
}

/// Definitions stored as `<dir>/<name>.toml` files.
#[derive(Debug, Clone)]
pub struct TomlDefinitions {
  dir: PathBuf,
}

impl TomlDefinitions {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }
}

impl DefinitionSource for TomlDefinitions {
  fn load(&self, name: &str) -> Result<Option<ComponentDef>, DefinitionError> {
    let path = self.dir.join(format!("{name}.toml"));
    let origin = path.display().to_string();

    let text = match fs::read_to_string(&path) {
      Ok(text) => text,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(DefinitionError::Read { origin, source: e }),
    };

    let def = ComponentDef::parse(&text, &origin)?;
    if def.name != name {
      return Err(DefinitionError::NameMismatch {
        origin,
        declared: def.name,
        requested: name.to_string(),
      });
    }

    Ok(Some(def))
  }
}

/// The dependency-first, deduplicated component list for one run.
#[derive(Debug, Default)]
pub struct Library {
  components: Vec<Component>,
  index: HashMap<String, usize>,
}

impl Library {
  /// Build a library from top-level component names.
  pub fn build(roots: &[String], definitions: &dyn DefinitionSource) -> Result<Self, LibraryError> {
    let mut library = Library::default();
    let mut in_progress: Vec<String> = Vec::new();

    for root in roots {
      library.load_recursive(root, "project", definitions, &mut in_progress)?;
    }

    debug!(components = library.len(), "library loaded");
    Ok(library)
  }

  fn load_recursive(
    &mut self,
    name: &str,
    required_by: &str,
    definitions: &dyn DefinitionSource,
    in_progress: &mut Vec<String>,
  ) -> Result<(), LibraryError> {
    if self.index.contains_key(name) {
      trace!(name, required_by, "component already loaded");
      return Ok(());
    }

    if in_progress.iter().any(|n| n == name) {
      let mut chain = in_progress.join(" -> ");
      chain.push_str(" -> ");
      chain.push_str(name);
      return Err(LibraryError::DependencyCycle { chain });
    }

    let def = definitions.load(name)?.ok_or_else(|| LibraryError::UnknownComponent {
      name: name.to_string(),
      required_by: required_by.to_string(),
    })?;

    in_progress.push(name.to_string());
    for dep in &def.dependencies {
      self.load_recursive(dep, name, definitions, in_progress)?;
    }
    in_progress.pop();

    trace!(name, position = self.components.len(), "component appended");
    self.index.insert(name.to_string(), self.components.len());
    self.components.push(Component::from_def(def));

    Ok(())
  }

  pub fn len(&self) -> usize {
    self.components.len()
  }

  pub fn is_empty(&self) -> bool {
    self.components.is_empty()
  }

  /// Components in build order.
  pub fn components(&self) -> &[Component] {
    &self.components
  }

  pub fn get(&self, name: &str) -> Option<&Component> {
    self.index.get(name).map(|&i| &self.components[i])
  }

  /// A component's position in build order.
  pub fn position(&self, name: &str) -> Option<usize> {
    self.index.get(name).copied()
  }

  pub fn component_at(&self, index: usize) -> &Component {
    &self.components[index]
  }

  /// Pin the resolved version of the component at `index`.
  pub fn pin_version(&mut self, index: usize, version: String) {
    self.components[index].pin_version(version);
  }
}
