//! The null fetcher: components with nothing to fetch.

use tracing::debug;

use super::{FetchError, Fetcher};

/// Fetcher for components without source material (preparation steps,
/// meta-components that only declare dependencies).
#[derive(Debug)]
pub struct NullFetcher {
  name: String,
}

impl NullFetcher {
  pub fn new(name: &str) -> Self {
    Self { name: name.to_string() }
  }
}

impl Fetcher for NullFetcher {
  fn fetch_required(&self) -> Result<bool, FetchError> {
    Ok(false)
  }

  fn fetch(&self) -> Result<(), FetchError> {
    debug!(name = %self.name, "null source, nothing to fetch");
    Ok(())
  }

  fn clean(&self) -> Result<bool, FetchError> {
    Ok(false)
  }

  fn version_for_cache(&self) -> Result<String, FetchError> {
    Ok("null".to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn never_requires_fetch() {
    let fetcher = NullFetcher::new("preparation");
    assert!(!fetcher.fetch_required().unwrap());
    fetcher.fetch().unwrap();
    assert!(!fetcher.clean().unwrap());
    assert_eq!(fetcher.version_for_cache().unwrap(), "null");
  }

  #[test]
  fn resolve_version_is_identity() {
    let fetcher = NullFetcher::new("preparation");
    assert_eq!(fetcher.resolve_version("1.0.0").unwrap(), "1.0.0");
  }
}
