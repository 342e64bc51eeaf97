//! Interfaces for the external build/package/publish collaborators.
//!
//! The orchestrator treats a component's build steps as opaque: it hands a
//! [`Builder`] the resolved version, install dir, and source dir, invokes it
//! at most once per cache miss, and reacts only to success or failure.
//! Package writers and publishing backends sit behind the same kind of seam
//! and run only after a fully successful build.

use std::path::{Path, PathBuf};

use crate::orchestrate::BuildReport;
use crate::project::Project;

/// Opaque failure from an external collaborator.
pub type BuildFailure = Box<dyn std::error::Error + Send + Sync>;

/// Everything a build callback may look at for one component.
#[derive(Debug)]
pub struct BuildContext<'a> {
  /// Component name.
  pub name: &'a str,
  /// The version pinned for this run.
  pub version: &'a str,
  /// The shared install root all components write into.
  pub install_dir: &'a Path,
  /// This component's working source tree.
  pub source_dir: PathBuf,
}

/// The injected build callback.
///
/// Invoked exactly once per cache miss; never invoked on a cache hit.
pub trait Builder {
  fn build(&self, ctx: &BuildContext<'_>) -> Result<(), BuildFailure>;
}

/// Emits an OS-specific package from a fully built install path.
pub trait Packager {
  /// Write the package and return the artifact path.
  fn package(&self, project: &Project, report: &BuildReport) -> Result<PathBuf, BuildFailure>;
}

/// Uploads a finished artifact to a distribution target.
pub trait Publisher {
  fn publish(&self, artifact: &Path) -> Result<(), BuildFailure>;
}

#[cfg(test)]
mod tests {
  use super::*;

  // The traits are seams for excluded collaborators; closures in the
  // orchestrator tests exercise them. Here we only check that a trivial
  // builder satisfies the object-safe contract.
  struct NoopBuilder;

  impl Builder for NoopBuilder {
    fn build(&self, _ctx: &BuildContext<'_>) -> Result<(), BuildFailure> {
      Ok(())
    }
  }

  #[test]
  fn builder_is_object_safe() {
    let builder: Box<dyn Builder> = Box::new(NoopBuilder);
    let ctx = BuildContext {
      name: "zlib",
      version: "1.7.2",
      install_dir: Path::new("/opt/stack"),
      source_dir: PathBuf::from("/cache/src/zlib"),
    };
    builder.build(&ctx).unwrap();
  }
}
