//! Filesystem helpers shared by fetchers and the snapshot store.

use std::fs;
use std::io;
use std::path::Path;

/// Recursively copy a directory tree.
///
/// Symlinks are recreated as symlinks on Unix; on other platforms their
/// targets are copied.
pub fn copy_dir_all(src: &Path, dest: &Path) -> io::Result<()> {
  fs::create_dir_all(dest)?;

  for entry in fs::read_dir(src)? {
    let entry = entry?;
    let file_type = entry.file_type()?;
    let target = dest.join(entry.file_name());

    if file_type.is_dir() {
      copy_dir_all(&entry.path(), &target)?;
    } else if file_type.is_symlink() {
      let link_target = fs::read_link(entry.path())?;
      #[cfg(unix)]
      std::os::unix::fs::symlink(&link_target, &target)?;
      #[cfg(not(unix))]
      fs::copy(entry.path(), &target).map(|_| ())?;
    } else {
      fs::copy(entry.path(), &target)?;
    }
  }

  Ok(())
}

/// Remove everything inside `dir`, keeping the directory itself.
///
/// Creates the directory if it does not exist. Returns whether anything was
/// removed.
pub fn reset_dir(dir: &Path) -> io::Result<bool> {
  if !dir.exists() {
    fs::create_dir_all(dir)?;
    return Ok(false);
  }

  let mut removed = false;
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    if entry.file_type()?.is_dir() {
      fs::remove_dir_all(entry.path())?;
    } else {
      fs::remove_file(entry.path())?;
    }
    removed = true;
  }

  Ok(removed)
}

/// Remove everything inside `dir` except entries named in `keep`.
///
/// Returns whether anything was removed.
pub fn reset_dir_keeping(dir: &Path, keep: &[&str]) -> io::Result<bool> {
  if !dir.exists() {
    return Ok(false);
  }

  let mut removed = false;
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    let name = entry.file_name();
    if keep.iter().any(|k| name == std::ffi::OsStr::new(k)) {
      continue;
    }
    if entry.file_type()?.is_dir() {
      fs::remove_dir_all(entry.path())?;
    } else {
      fs::remove_file(entry.path())?;
    }
    removed = true;
  }

  Ok(removed)
}

/// Check whether a directory exists and contains at least one entry.
pub fn dir_is_populated(dir: &Path) -> bool {
  fs::read_dir(dir).map(|mut entries| entries.next().is_some()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn copy_preserves_nested_tree() {
    let temp = tempdir().unwrap();
    let src = temp.path().join("src");
    let dest = temp.path().join("dest");

    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("top.txt"), "top").unwrap();
    fs::write(src.join("sub/inner.txt"), "inner").unwrap();

    copy_dir_all(&src, &dest).unwrap();

    assert_eq!(fs::read_to_string(dest.join("top.txt")).unwrap(), "top");
    assert_eq!(fs::read_to_string(dest.join("sub/inner.txt")).unwrap(), "inner");
  }

  #[test]
  fn reset_dir_empties_and_reports() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("f.txt"), "x").unwrap();
    fs::create_dir(temp.path().join("d")).unwrap();

    assert!(reset_dir(temp.path()).unwrap());
    assert!(!dir_is_populated(temp.path()));
    assert!(!reset_dir(temp.path()).unwrap());
  }

  #[test]
  fn reset_dir_creates_missing_directory() {
    let temp = tempdir().unwrap();
    let dir = temp.path().join("missing");

    assert!(!reset_dir(&dir).unwrap());
    assert!(dir.exists());
  }

  #[test]
  fn reset_dir_keeping_spares_named_entries() {
    let temp = tempdir().unwrap();
    fs::create_dir(temp.path().join(".git")).unwrap();
    fs::write(temp.path().join(".git/HEAD"), "ref").unwrap();
    fs::write(temp.path().join("built.o"), "obj").unwrap();

    assert!(reset_dir_keeping(temp.path(), &[".git"]).unwrap());
    assert!(temp.path().join(".git/HEAD").exists());
    assert!(!temp.path().join("built.o").exists());
  }
}
