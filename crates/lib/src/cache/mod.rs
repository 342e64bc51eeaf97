//! Incremental install-path cache.
//!
//! Components install additively into one shared directory tree, so a
//! component's cached result is only valid against the exact cumulative
//! state left by every component built before it. The cache tag therefore
//! covers two things:
//!
//! - the component's own identity (`name-version`), and
//! - a digest of the *entire library prefix* built before it - not just its
//!   declared dependencies.
//!
//! Changing the resolved version of any earlier component changes the tag of
//! every later one; earlier tags are unaffected.
//!
//! Store failures never abort a build: an unreadable snapshot reads as a
//! miss and a failed commit logs a warning, because rebuilding preserves
//! correctness and only costs time.

pub mod store;

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::util::hash::hash_bytes;

pub use store::{ArchiveStore, SnapshotError, SnapshotStore};

/// A component that has already been pinned for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pinned {
  pub name: String,
  pub version: String,
}

impl Pinned {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
    }
  }
}

/// Compute the cache tag for a component.
///
/// `prefix` is the full library prefix built before this component, in
/// order. The tag is `name-version-sha256(join("-", prefix pairs))` where
/// each pair is `name-version`; an empty prefix hashes the empty string.
/// Pure and deterministic: same inputs, same tag, across runs and processes.
pub fn cache_tag(name: &str, version: &str, prefix: &[Pinned]) -> String {
  let joined = prefix
    .iter()
    .map(|p| format!("{}-{}", p.name, p.version))
    .collect::<Vec<_>>()
    .join("-");

  format!("{}-{}-{}", name, version, hash_bytes(joined.as_bytes()))
}

/// The cache handle for one (install path, component) pair.
pub struct InstallPathCache<'a> {
  store: &'a dyn SnapshotStore,
  install_dir: PathBuf,
  tag: String,
}

impl<'a> InstallPathCache<'a> {
  pub fn new(store: &'a dyn SnapshotStore, install_dir: &Path, name: &str, version: &str, prefix: &[Pinned]) -> Self {
    Self {
      store,
      install_dir: install_dir.to_path_buf(),
      tag: cache_tag(name, version, prefix),
    }
  }

  /// The deterministic tag for this component at this point in the library.
  pub fn tag(&self) -> &str {
    &self.tag
  }

  /// Try to restore the snapshot for this tag.
  ///
  /// On a hit the install path is forcibly reset to the snapshot and the
  /// component needs neither fetch nor build. On a miss - including a store
  /// failure, which fails open - the install path is left untouched.
  pub fn restore(&self) -> bool {
    match self.store.restore(&self.tag, &self.install_dir) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(tag = %self.tag, error = %e, "snapshot restore failed, treating as cache miss");
        false
      }
    }
  }

  /// Record the install path's current state under this tag.
  ///
  /// Overwrites any prior snapshot for the tag. Failures are logged, not
  /// fatal: a lost snapshot costs a rebuild next run, nothing more.
  pub fn commit(&self) {
    if let Err(e) = self.store.save(&self.tag, &self.install_dir) {
      warn!(tag = %self.tag, error = %e, "snapshot commit failed, component will rebuild next run");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  mod tags {
    use super::*;

    #[test]
    fn worked_example_with_prefix() {
      // Library order: [preparation@1.0.0, snoopy@1.0.0, zlib@1.7.2].
      let prefix = vec![Pinned::new("preparation", "1.0.0"), Pinned::new("snoopy", "1.0.0")];

      // sha256("preparation-1.0.0-snoopy-1.0.0")
      assert_eq!(
        cache_tag("zlib", "1.7.2", &prefix),
        "zlib-1.7.2-9664a7dd4f27909a38769faef7ec739a4d6934f1c2cf95d3112e064682f6a91a"
      );
    }

    #[test]
    fn worked_example_empty_prefix() {
      // sha256("")
      assert_eq!(
        cache_tag("zlib", "1.7.2", &[]),
        "zlib-1.7.2-e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
      );
    }

    #[test]
    fn tag_is_deterministic() {
      let prefix = vec![Pinned::new("a", "1.0.0"), Pinned::new("b", "2.0.0")];
      assert_eq!(cache_tag("c", "3.0.0", &prefix), cache_tag("c", "3.0.0", &prefix));
    }

    #[test]
    fn growing_the_library_keeps_earlier_tags_stable() {
      // tag(A) is identical whether the library is [A] or [A, B]:
      // A has no predecessors either way.
      let tag_a_alone = cache_tag("A", "1.0.0", &[]);
      let tag_a_with_b_after = cache_tag("A", "1.0.0", &[]);
      assert_eq!(tag_a_alone, tag_a_with_b_after);

      let tag_b = cache_tag("B", "1.0.0", &[Pinned::new("A", "1.0.0")]);
      assert_ne!(tag_b, tag_a_alone);
      assert_eq!(
        tag_b,
        format!("B-1.0.0-{}", hash_bytes(b"A-1.0.0"))
      );
    }

    #[test]
    fn cumulative_invalidation() {
      // Changing component i's version changes tags for all j > i and no k < i.
      let p1 = Pinned::new("one", "1.0.0");
      let p2_old = Pinned::new("two", "1.0.0");
      let p2_new = Pinned::new("two", "1.0.1");

      let tag_one = cache_tag("one", "1.0.0", &[]);
      let tag_three_old = cache_tag("three", "1.0.0", &[p1.clone(), p2_old]);
      let tag_three_new = cache_tag("three", "1.0.0", &[p1.clone(), p2_new]);

      // "three" does not directly depend on "two", yet its tag moves.
      assert_ne!(tag_three_old, tag_three_new);
      // "one" precedes the change and is untouched.
      assert_eq!(tag_one, cache_tag("one", "1.0.0", &[]));
    }

    #[test]
    fn own_version_changes_tag() {
      assert_ne!(cache_tag("zlib", "1.7.2", &[]), cache_tag("zlib", "1.7.3", &[]));
    }
  }

  mod cache_handle {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn commit_then_restore_roundtrips() {
      let temp = tempdir().unwrap();
      let store = ArchiveStore::new(temp.path().join("snapshots"));
      let install = temp.path().join("install");
      fs::create_dir_all(&install).unwrap();
      fs::write(install.join("state.txt"), "after zlib").unwrap();

      let cache = InstallPathCache::new(&store, &install, "zlib", "1.7.2", &[]);
      cache.commit();

      fs::write(install.join("state.txt"), "mutated").unwrap();
      assert!(cache.restore());
      assert_eq!(fs::read_to_string(install.join("state.txt")).unwrap(), "after zlib");
    }

    #[test]
    fn restore_miss_returns_false_and_keeps_dir() {
      let temp = tempdir().unwrap();
      let store = ArchiveStore::new(temp.path().join("snapshots"));
      let install = temp.path().join("install");
      fs::create_dir_all(&install).unwrap();
      fs::write(install.join("state.txt"), "untouched").unwrap();

      let cache = InstallPathCache::new(&store, &install, "zlib", "1.7.2", &[]);
      assert!(!cache.restore());
      assert_eq!(fs::read_to_string(install.join("state.txt")).unwrap(), "untouched");
    }

    #[test]
    fn corrupt_snapshot_fails_open_as_miss() {
      let temp = tempdir().unwrap();
      let snapshots = temp.path().join("snapshots");
      let store = ArchiveStore::new(&snapshots);
      let install = temp.path().join("install");
      fs::create_dir_all(&install).unwrap();

      let cache = InstallPathCache::new(&store, &install, "zlib", "1.7.2", &[]);

      // Plant garbage where the snapshot would live.
      fs::create_dir_all(&snapshots).unwrap();
      fs::write(snapshots.join(format!("{}.tar.gz", cache.tag())), "not a tarball").unwrap();

      assert!(!cache.restore());
    }

    #[test]
    fn different_prefixes_use_different_snapshots() {
      let temp = tempdir().unwrap();
      let store = ArchiveStore::new(temp.path().join("snapshots"));
      let install = temp.path().join("install");
      fs::create_dir_all(&install).unwrap();
      fs::write(install.join("state.txt"), "with deps").unwrap();

      let with_prefix = InstallPathCache::new(&store, &install, "zlib", "1.7.2", &[Pinned::new("a", "1.0.0")]);
      with_prefix.commit();

      let without_prefix = InstallPathCache::new(&store, &install, "zlib", "1.7.2", &[]);
      assert!(!without_prefix.restore());
      assert!(with_prefix.restore());
    }
  }
}
