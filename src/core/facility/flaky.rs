//! A facility that fails a configurable number of times before succeeding.
//! Used to exercise the retry budget end to end.

use serde::Deserialize;
use serde_json::Value;

use super::BuildContext;
use crate::error::{Error, Result};
use crate::step::Step;

#[derive(Deserialize)]
struct FlakyParams {
    #[serde(default = "default_attempts")]
    attempts: u32,
}

fn default_attempts() -> u32 {
    3
}

/// Succeeds on the `total_attempts`-th call to `run`.
pub struct FlakyAction {
    pub total_attempts: u32,
    remaining_attempts: u32,
}

impl FlakyAction {
    pub fn new(attempts: u32) -> Self {
        Self {
            total_attempts: attempts,
            remaining_attempts: attempts,
        }
    }
}

pub(super) fn build_flaky(entry: &Value, ctx: &BuildContext) -> Result<Box<dyn Step>> {
    let params: FlakyParams = ctx.params(entry)?;
    Ok(Box::new(FlakyAction::new(params.attempts)))
}

impl Step for FlakyAction {
    fn name(&self) -> &str {
        "FlakyAction"
    }

    fn should_run(&self) -> bool {
        true
    }

    fn run(&mut self) -> Result<()> {
        if self.remaining_attempts > 0 {
            self.remaining_attempts -= 1;
        }
        if self.remaining_attempts > 0 {
            return Err(Error::other("not working yet"));
        }
        Ok(())
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!("flaky action (attempts={})", self.total_attempts)]
    }
}
