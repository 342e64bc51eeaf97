//! Build orchestration.
//!
//! The orchestrator walks the library strictly sequentially, in dependency-
//! first order. Parallelizing components would be unsound: they share and
//! mutate one install tree, and every cache tag covers the final installed
//! state of every predecessor. Per component the flow is:
//!
//! 1. Resolve the version (overrides, then fetcher ref resolution) and pin
//!    it on the library entry.
//! 2. Compute the cache tag from the pinned prefix.
//! 3. Try a snapshot restore. A hit skips fetch and build entirely.
//! 4. On a miss: fetch if the source tree is stale, invoke the injected
//!    build callback exactly once, then commit a new snapshot.
//!
//! Any failure aborts the whole project run; the install path keeps whatever
//! the last completed step produced, and the next run's cache restores carry
//! it past the components that already committed.

use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{ArchiveStore, InstallPathCache, Pinned, SnapshotStore};
use crate::fetch::{DefaultFetcherFactory, FetchError, FetcherFactory};
use crate::library::{Library, LibraryError, TomlDefinitions};
use crate::package::{BuildContext, BuildFailure, Builder, Packager, Publisher};
use crate::project::{Paths, Project};
use crate::version::{Overrides, OverridesError, declared_version};

/// Errors that abort a project build.
#[derive(Debug, Error)]
pub enum OrchestrateError {
  #[error(transparent)]
  Library(#[from] LibraryError),

  #[error(transparent)]
  Overrides(#[from] OverridesError),

  #[error("failed to prepare directory '{path}': {source}")]
  Prepare {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to resolve version for '{component}': {source}")]
  ResolveVersion {
    component: String,
    #[source]
    source: FetchError,
  },

  #[error("failed to fetch source for '{component}': {source}")]
  Fetch {
    component: String,
    #[source]
    source: FetchError,
  },

  #[error("build failed for '{component}': {source}")]
  Build {
    component: String,
    #[source]
    source: BuildFailure,
  },

  #[error("packaging failed: {source}")]
  Package {
    #[source]
    source: BuildFailure,
  },

  #[error("publishing '{artifact}' failed: {source}")]
  Publish {
    artifact: PathBuf,
    #[source]
    source: BuildFailure,
  },
}

/// How one component reached `DONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Snapshot restored; fetch and build were skipped.
  Restored,
  /// Fetched (when required), built, and committed.
  Built,
}

/// Per-component result of a run.
#[derive(Debug, Clone)]
pub struct ComponentResult {
  pub name: String,
  pub version: String,
  pub tag: String,
  pub outcome: Outcome,
}

/// The result of a full, successful run.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
  pub components: Vec<ComponentResult>,
}

impl BuildReport {
  pub fn built_count(&self) -> usize {
    self.components.iter().filter(|c| c.outcome == Outcome::Built).count()
  }

  pub fn restored_count(&self) -> usize {
    self.components.iter().filter(|c| c.outcome == Outcome::Restored).count()
  }
}

/// Drives one project build against one install path.
pub struct Orchestrator {
  library: Library,
  overrides: Overrides,
  paths: Paths,
  store: Box<dyn SnapshotStore>,
  factory: Box<dyn FetcherFactory>,
  builder: Box<dyn Builder>,
}

impl Orchestrator {
  /// Create an orchestrator with the default snapshot store and fetcher
  /// factory for `paths`.
  pub fn new(library: Library, overrides: Overrides, paths: Paths, builder: Box<dyn Builder>) -> Self {
    let store = ArchiveStore::new(paths.snapshot_dir());
    let factory = DefaultFetcherFactory::new(paths.clone());
    Self {
      library,
      overrides,
      paths,
      store: Box::new(store),
      factory: Box::new(factory),
      builder,
    }
  }

  /// Load the library and overrides from a project configuration.
  pub fn for_project(project: &Project, builder: Box<dyn Builder>) -> Result<Self, OrchestrateError> {
    let definitions = TomlDefinitions::new(project.definitions_dir());
    let library = Library::build(project.components(), &definitions)?;
    let overrides = match project.overrides_path() {
      Some(path) => Overrides::from_file(path)?,
      None => Overrides::empty(),
    };
    Ok(Self::new(library, overrides, project.paths(), builder))
  }

  /// Replace the snapshot store backing.
  pub fn with_store(mut self, store: Box<dyn SnapshotStore>) -> Self {
    self.store = store;
    self
  }

  /// Replace the fetcher factory.
  pub fn with_fetcher_factory(mut self, factory: Box<dyn FetcherFactory>) -> Self {
    self.factory = factory;
    self
  }

  pub fn library(&self) -> &Library {
    &self.library
  }

  /// Run the build: every library component, in order, restore-or-build.
  pub fn run(&mut self) -> Result<BuildReport, OrchestrateError> {
    fs::create_dir_all(&self.paths.install_dir).map_err(|e| OrchestrateError::Prepare {
      path: self.paths.install_dir.clone(),
      source: e,
    })?;

    let mut pinned: Vec<Pinned> = Vec::with_capacity(self.library.len());
    let mut report = BuildReport::default();

    info!(components = self.library.len(), install_dir = %self.paths.install_dir.display(), "starting build");

    for index in 0..self.library.len() {
      let component = self.library.component_at(index).clone();
      let name = component.name.clone();

      let fetcher = self.factory.create(&component);

      // PENDING -> VERSION_RESOLVED
      let declared = declared_version(&component, &self.overrides);
      let version = fetcher.resolve_version(&declared).map_err(|e| OrchestrateError::ResolveVersion {
        component: name.clone(),
        source: e,
      })?;
      self.library.pin_version(index, version.clone());
      debug!(name = %name, declared = %declared, version = %version, "version resolved");

      // The tag covers the whole pinned prefix, not just direct deps.
      let cache = InstallPathCache::new(self.store.as_ref(), &self.paths.install_dir, &name, &version, &pinned);
      pinned.push(Pinned::new(name.clone(), version.clone()));

      // CACHE_HIT -> RESTORED -> DONE
      if cache.restore() {
        info!(name = %name, version = %version, tag = %cache.tag(), "cache hit, restored snapshot");
        report.components.push(ComponentResult {
          name,
          version,
          tag: cache.tag().to_string(),
          outcome: Outcome::Restored,
        });
        continue;
      }

      // CACHE_MISS -> FETCHING -> FETCHED
      let fetch_required = fetcher.fetch_required().map_err(|e| OrchestrateError::Fetch {
        component: name.clone(),
        source: e,
      })?;
      if fetch_required {
        info!(name = %name, "fetching source");
        fetcher.fetch().map_err(|e| OrchestrateError::Fetch {
          component: name.clone(),
          source: e,
        })?;
      } else {
        debug!(name = %name, "source already up to date");
      }

      // BUILDING -> BUILT
      let ctx = BuildContext {
        name: &name,
        version: &version,
        install_dir: &self.paths.install_dir,
        source_dir: self.paths.source_dir(&name),
      };
      info!(name = %name, version = %version, "building");
      self.builder.build(&ctx).map_err(|e| OrchestrateError::Build {
        component: name.clone(),
        source: e,
      })?;

      // BUILT -> CACHED -> DONE
      cache.commit();
      report.components.push(ComponentResult {
        name,
        version,
        tag: cache.tag().to_string(),
        outcome: Outcome::Built,
      });
    }

    info!(
      built = report.built_count(),
      restored = report.restored_count(),
      "build finished"
    );
    Ok(report)
  }

  /// Run the build, then package and publish.
  ///
  /// The packager only ever sees a fully successful run: any component
  /// failure aborts before packaging, so no partial install tree is ever
  /// wrapped into an artifact.
  pub fn build_and_package(
    &mut self,
    project: &Project,
    packager: &dyn Packager,
    publishers: &[&dyn Publisher],
  ) -> Result<PathBuf, OrchestrateError> {
    let report = self.run()?;

    let artifact = packager
      .package(project, &report)
      .map_err(|e| OrchestrateError::Package { source: e })?;
    info!(artifact = %artifact.display(), "packaged");

    for publisher in publishers {
      publisher.publish(&artifact).map_err(|e| OrchestrateError::Publish {
        artifact: artifact.clone(),
        source: e,
      })?;
    }

    Ok(artifact)
  }
}
