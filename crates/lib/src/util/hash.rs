//! Hashing utilities for fingerprints and cache tags.
//!
//! All digests are full 64-character lowercase hex SHA-256 strings. Directory
//! hashing is deterministic: entries are visited in sorted order and encoded
//! with a type prefix so that renames, content edits, and symlink retargets
//! all change the digest.

use std::fs;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised while hashing files or directories.
#[derive(Debug, Error)]
pub enum HashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file '{path}': {source}")]
  ReadFile {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read symlink '{path}': {source}")]
  ReadSymlink {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

/// Hash a file's contents in fixed-size chunks.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
  let mut file = fs::File::open(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    source: e,
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| HashError::ReadFile {
      path: path.display().to_string(),
      source: e,
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hex::encode(hasher.finalize()))
}

/// Compute a deterministic hash of a directory tree.
///
/// Covers file contents, directory structure, and symlink targets; metadata
/// such as timestamps and permissions is ignored. Special files (sockets,
/// devices) are skipped.
pub fn hash_directory(path: &Path) -> Result<String, HashError> {
  let mut entries: Vec<String> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| HashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .to_string();

    // The root directory itself carries no information.
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    if file_type.is_file() {
      entries.push(format!("F:{}:{}", rel_path, hash_file(entry_path)?));
    } else if file_type.is_dir() {
      entries.push(format!("D:{}", rel_path));
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| HashError::ReadSymlink {
        path: entry_path.display().to_string(),
        source: e,
      })?;
      entries.push(format!("L:{}:{}", rel_path, hash_bytes(target.to_string_lossy().as_bytes())));
    }
  }

  // WalkDir sorts per directory; sort the flattened list to be explicit.
  entries.sort();

  let mut hasher = Sha256::new();
  for entry in entries {
    hasher.update(entry.as_bytes());
    hasher.update(b"\n");
  }

  Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn hash_bytes_known_digest() {
    assert_eq!(
      hash_bytes(b"hello world"),
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("f.txt");
    fs::write(&file, b"hello world").unwrap();

    assert_eq!(hash_file(&file).unwrap(), hash_bytes(b"hello world"));
  }

  #[test]
  fn directory_hash_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "content a").unwrap();
    fs::write(temp.path().join("b.txt"), "content b").unwrap();

    let first = hash_directory(temp.path()).unwrap();
    let second = hash_directory(temp.path()).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn directory_hash_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("f.txt"), "original").unwrap();
    let before = hash_directory(temp.path()).unwrap();

    fs::write(temp.path().join("f.txt"), "modified").unwrap();
    let after = hash_directory(temp.path()).unwrap();

    assert_ne!(before, after);
  }

  #[test]
  fn directory_hash_changes_with_structure() {
    let flat = tempdir().unwrap();
    fs::write(flat.path().join("f.txt"), "content").unwrap();

    let nested = tempdir().unwrap();
    fs::create_dir(nested.path().join("sub")).unwrap();
    fs::write(nested.path().join("sub/f.txt"), "content").unwrap();

    assert_ne!(
      hash_directory(flat.path()).unwrap(),
      hash_directory(nested.path()).unwrap()
    );
  }

  #[test]
  fn empty_directory_hashes() {
    let temp = tempdir().unwrap();
    let hash = hash_directory(temp.path()).unwrap();
    assert_eq!(hash.len(), 64);
  }
}
