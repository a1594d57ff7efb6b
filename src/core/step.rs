//! The step contract and the retry wrapper the runner drives it through.

use crate::error::{Error, Result};

/// Attempt budget for a single step.
pub const RETRIES: u32 = 3;

/// One idempotent unit of configuration work.
///
/// `run` must be safe to call again after a failed attempt; the runner
/// relies on that to retry. `should_run` and `dry_run` never have side effects.
pub trait Step: Send {
    /// Display name used in logs and dry-run output, e.g. `InstallFile`.
    fn name(&self) -> &str;

    /// Drift check: `false` when the desired state already holds.
    /// Informational only; the runner always invokes `run`.
    fn should_run(&self) -> bool;

    fn run(&mut self) -> Result<()>;

    /// Descriptions of the effects `run` would perform.
    fn dry_run(&self) -> Vec<String>;
}

/// Invoke `op` up to `RETRIES` times with no delay between attempts.
///
/// Returns the first success. When every attempt fails the error carries the
/// attempt count and the last underlying message.
pub fn call_with_retry<T, F>(mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 1..=RETRIES {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                log::warn!("attempt {}/{} failed: {}", attempt, RETRIES, err.detail_text());
                last_error = Some(err);
            }
        }
    }

    let last_message = last_error
        .map(|e| e.detail_text())
        .unwrap_or_default();
    Err(Error::step_retries_exhausted(RETRIES, last_message))
}
