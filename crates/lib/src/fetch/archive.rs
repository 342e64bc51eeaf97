//! Source archive extraction.
//!
//! Downloaded source archives conventionally wrap everything in a single
//! top-level directory (`zlib-1.7.2/...`); extraction strips that first path
//! component so the component source dir holds the tree directly.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::debug;

/// Errors raised while unpacking an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("failed to open archive '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to unpack archive '{path}': {source}")]
  Unpack {
    path: PathBuf,
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("unsupported archive format: {path}")]
  UnsupportedFormat { path: PathBuf },
}

/// Whether a filename looks like an archive this module can unpack.
pub fn is_archive(path: &Path) -> bool {
  let Some(name) = path.to_str() else { return false };
  name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".tar") || name.ends_with(".zip")
}

/// Unpack an archive into `dest`, stripping the first path component.
///
/// Supports `.tar.gz` / `.tgz`, `.tar`, and `.zip`.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
  fs::create_dir_all(dest).map_err(|e| ArchiveError::Open {
    path: dest.to_path_buf(),
    source: e,
  })?;

  let name = archive_path.to_str().unwrap_or_default();
  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    let file = open(archive_path)?;
    unpack_tar_entries(Archive::new(GzDecoder::new(BufReader::new(file))), archive_path, dest)?;
  } else if name.ends_with(".tar") {
    let file = open(archive_path)?;
    unpack_tar_entries(Archive::new(BufReader::new(file)), archive_path, dest)?;
  } else if name.ends_with(".zip") {
    unpack_zip(archive_path, dest)?;
  } else {
    return Err(ArchiveError::UnsupportedFormat {
      path: archive_path.to_path_buf(),
    });
  }

  debug!(archive = %archive_path.display(), dest = %dest.display(), "unpacked archive");
  Ok(())
}

fn open(path: &Path) -> Result<File, ArchiveError> {
  File::open(path).map_err(|e| ArchiveError::Open {
    path: path.to_path_buf(),
    source: e,
  })
}

fn unpack_tar_entries<R: std::io::Read>(
  mut archive: Archive<R>,
  archive_path: &Path,
  dest: &Path,
) -> Result<(), ArchiveError> {
  let unpack_err = |e: Box<dyn std::error::Error + Send + Sync>| ArchiveError::Unpack {
    path: archive_path.to_path_buf(),
    source: e,
  };

  let entries = archive.entries().map_err(|e| unpack_err(Box::new(e)))?;
  for entry in entries {
    let mut entry = entry.map_err(|e| unpack_err(Box::new(e)))?;
    let path = entry.path().map_err(|e| unpack_err(Box::new(e)))?;

    let Some(stripped) = strip_first_component(&path) else {
      continue;
    };

    let dest_path = dest.join(stripped);
    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent).map_err(|e| unpack_err(Box::new(e)))?;
    }

    entry.unpack(&dest_path).map_err(|e| unpack_err(Box::new(e)))?;
  }

  Ok(())
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
  let unpack_err = |e: Box<dyn std::error::Error + Send + Sync>| ArchiveError::Unpack {
    path: archive_path.to_path_buf(),
    source: e,
  };

  let file = open(archive_path)?;
  let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| unpack_err(Box::new(e)))?;

  for i in 0..archive.len() {
    let mut file = archive.by_index(i).map_err(|e| unpack_err(Box::new(e)))?;

    let Some(path) = file.enclosed_name() else {
      return Err(unpack_err("zip entry escapes the destination".into()));
    };
    let Some(stripped) = strip_first_component(&path) else {
      continue;
    };

    let dest_path = dest.join(stripped);
    if file.is_dir() {
      fs::create_dir_all(&dest_path).map_err(|e| unpack_err(Box::new(e)))?;
      continue;
    }

    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent).map_err(|e| unpack_err(Box::new(e)))?;
    }

    let mut outfile = File::create(&dest_path).map_err(|e| unpack_err(Box::new(e)))?;
    std::io::copy(&mut file, &mut outfile).map_err(|e| unpack_err(Box::new(e)))?;

    #[cfg(unix)]
    if let Some(mode) = file.unix_mode() {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode)).map_err(|e| unpack_err(Box::new(e)))?;
    }
  }

  Ok(())
}

/// Drop the leading path component; `None` when nothing remains.
fn strip_first_component(path: &Path) -> Option<PathBuf> {
  let stripped: PathBuf = path.components().skip(1).collect();
  if stripped.as_os_str().is_empty() { None } else { Some(stripped) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flate2::Compression;
  use flate2::write::GzEncoder;
  use tempfile::tempdir;

  fn make_tar_gz(dest: &Path, top_dir: &str) {
    let file = File::create(dest).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let content_dir = tempdir().unwrap();
    fs::create_dir_all(content_dir.path().join("sub")).unwrap();
    fs::write(content_dir.path().join("main.c"), "int main(void) { return 0; }\n").unwrap();
    fs::write(content_dir.path().join("sub/util.c"), "/* util */\n").unwrap();

    builder.append_dir_all(top_dir, content_dir.path()).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
  }

  #[test]
  fn recognizes_archive_extensions() {
    assert!(is_archive(Path::new("pkg-1.0.tar.gz")));
    assert!(is_archive(Path::new("pkg-1.0.tgz")));
    assert!(is_archive(Path::new("pkg-1.0.tar")));
    assert!(is_archive(Path::new("pkg-1.0.zip")));
    assert!(!is_archive(Path::new("pkg-1.0.bin")));
    assert!(!is_archive(Path::new("pkg-1.0.txt")));
  }

  #[test]
  fn tar_gz_strips_top_directory() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("src.tar.gz");
    make_tar_gz(&archive, "pkg-1.0");

    let dest = temp.path().join("out");
    unpack_archive(&archive, &dest).unwrap();

    assert!(dest.join("main.c").exists());
    assert!(dest.join("sub/util.c").exists());
    assert!(!dest.join("pkg-1.0").exists());
  }

  #[test]
  fn unsupported_format_rejected() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("src.rar");
    fs::write(&archive, "not an archive").unwrap();

    let err = unpack_archive(&archive, &temp.path().join("out")).unwrap_err();
    assert!(matches!(err, ArchiveError::UnsupportedFormat { .. }));
  }

  #[test]
  fn strip_drops_root_only_entries() {
    assert_eq!(strip_first_component(Path::new("pkg-1.0")), None);
    assert_eq!(
      strip_first_component(Path::new("pkg-1.0/src/main.c")),
      Some(PathBuf::from("src/main.c"))
    );
  }
}
