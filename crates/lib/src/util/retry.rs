//! Retry with exponential backoff for network operations.
//!
//! Fetch network I/O (listing refs, cloning, fetching, downloading) retries
//! up to [`MAX_RETRIES`] times, sleeping `base * 2^attempt` between attempts.
//! Errors classify themselves through [`Transient`]: a non-transient error
//! (missing ref, checksum mismatch) short-circuits without sleeping, since
//! retrying cannot fix it.
//!
//! The sleep function is injectable so tests can observe backoff behavior
//! without waiting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Number of retries after the initial attempt.
pub const MAX_RETRIES: u32 = 3;

/// Base delay; attempt `n` sleeps `base * 2^n`.
pub const BASE_DELAY: Duration = Duration::from_secs(5);

/// Classifies whether retrying an error can help.
pub trait Transient {
  fn is_transient(&self) -> bool;
}

/// A retry policy with an injectable sleep function.
#[derive(Clone)]
pub struct Backoff {
  max_retries: u32,
  base_delay: Duration,
  sleep: Arc<dyn Fn(Duration) + Send + Sync>,
}

impl Default for Backoff {
  fn default() -> Self {
    Self {
      max_retries: MAX_RETRIES,
      base_delay: BASE_DELAY,
      sleep: Arc::new(std::thread::sleep),
    }
  }
}

impl fmt::Debug for Backoff {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Backoff")
      .field("max_retries", &self.max_retries)
      .field("base_delay", &self.base_delay)
      .finish_non_exhaustive()
  }
}

impl Backoff {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the sleep function (tests).
  pub fn with_sleep(mut self, sleep: Arc<dyn Fn(Duration) + Send + Sync>) -> Self {
    self.sleep = sleep;
    self
  }

  /// The delay before retrying after attempt `attempt` (0-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    self.base_delay * 2u32.saturating_pow(attempt)
  }

  /// Run `op`, retrying transient failures.
  ///
  /// Performs at most `max_retries + 1` attempts. Non-transient errors and
  /// the final attempt's error are returned as-is.
  pub fn run<T, E>(&self, label: &str, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E>
  where
    E: Transient + fmt::Display,
  {
    let mut attempt = 0;
    loop {
      match op() {
        Ok(value) => return Ok(value),
        Err(e) if e.is_transient() && attempt < self.max_retries => {
          let delay = self.delay_for(attempt);
          warn!(
            operation = label,
            attempt = attempt + 1,
            delay_secs = delay.as_secs(),
            error = %e,
            "transient failure, retrying"
          );
          (self.sleep)(delay);
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[derive(Debug)]
  struct FakeError {
    transient: bool,
  }

  impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "fake error")
    }
  }

  impl Transient for FakeError {
    fn is_transient(&self) -> bool {
      self.transient
    }
  }

  fn recording_backoff() -> (Backoff, Arc<Mutex<Vec<Duration>>>) {
    let sleeps: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&sleeps);
    let backoff = Backoff::new().with_sleep(Arc::new(move |d| recorder.lock().unwrap().push(d)));
    (backoff, sleeps)
  }

  #[test]
  fn succeeds_on_third_attempt() {
    let (backoff, sleeps) = recording_backoff();
    let mut calls = 0;

    let result: Result<u32, FakeError> = backoff.run("op", || {
      calls += 1;
      if calls < 3 { Err(FakeError { transient: true }) } else { Ok(42) }
    });

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls, 3);
    assert_eq!(
      *sleeps.lock().unwrap(),
      vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
  }

  #[test]
  fn gives_up_after_four_attempts() {
    let (backoff, sleeps) = recording_backoff();
    let mut calls = 0;

    let result: Result<(), FakeError> = backoff.run("op", || {
      calls += 1;
      Err(FakeError { transient: true })
    });

    assert!(result.is_err());
    assert_eq!(calls, 4);
    assert_eq!(
      *sleeps.lock().unwrap(),
      vec![
        Duration::from_secs(5),
        Duration::from_secs(10),
        Duration::from_secs(20)
      ]
    );
  }

  #[test]
  fn non_transient_short_circuits_without_sleeping() {
    let (backoff, sleeps) = recording_backoff();
    let mut calls = 0;

    let result: Result<(), FakeError> = backoff.run("op", || {
      calls += 1;
      Err(FakeError { transient: false })
    });

    assert!(result.is_err());
    assert_eq!(calls, 1);
    assert!(sleeps.lock().unwrap().is_empty());
  }

  #[test]
  fn delay_doubles_per_attempt() {
    let backoff = Backoff::new();
    assert_eq!(backoff.delay_for(0), Duration::from_secs(5));
    assert_eq!(backoff.delay_for(1), Duration::from_secs(10));
    assert_eq!(backoff.delay_for(2), Duration::from_secs(20));
  }
}
