//! forgepack-lib: dependency-graph build orchestration with an incremental,
//! content-addressed install-path cache.
//!
//! A project declares named, versioned components; the library loader pulls
//! in their dependencies dependency-first, and the orchestrator compiles
//! each one into a shared install root. Because components install
//! additively into the same tree, a component's cached result is keyed not
//! just on its own version but on the cumulative identity of everything
//! built before it - unchanged components restore from snapshots instead of
//! rebuilding.
//!
//! - [`component`] / [`library`]: definitions and the dependency-first
//!   component list
//! - [`version`]: overrides files and resolution precedence
//! - [`fetch`]: pluggable source fetchers (git, url, path, file, null)
//! - [`cache`]: cache tags and the snapshot store
//! - [`orchestrate`]: the sequential build driver
//! - [`package`]: seams for the external build/package/publish collaborators

pub mod cache;
pub mod component;
pub mod fetch;
pub mod library;
pub mod orchestrate;
pub mod package;
pub mod project;
pub mod util;
pub mod version;

pub use cache::{ArchiveStore, InstallPathCache, Pinned, SnapshotStore, cache_tag};
pub use component::{Component, ComponentDef, SourceSpec};
pub use fetch::{FetchError, Fetcher, FetcherFactory};
pub use library::{DefinitionSource, Library, LibraryError, TomlDefinitions};
pub use orchestrate::{BuildReport, Orchestrator, OrchestrateError, Outcome};
pub use package::{BuildContext, BuildFailure, Builder, Packager, Publisher};
pub use project::{Paths, Project};
pub use version::{Overrides, OverridesError};
