//! The on-host side of an execution: what `cattle-run init` and
//! `cattle-run exec` do once the artifacts have landed in the exec dir.
//!
//! `exec` owns the STATUS file for its execution. It writes `PROGRESS` before
//! the first step, then exactly one of `DONE` or `ERROR`. A step that exhausts
//! its retry budget is contained: the status records it and the process still
//! exits cleanly, so callers only learn about it through a later status query.

use std::path::{Path, PathBuf};

use crate::config::{self, LoadedConfig};
use crate::error::{Error, Result};
use crate::execution::{Status, StatusFile};
use crate::facility::FacilityRegistry;
use crate::package;
use crate::step::{call_with_retry, Step};

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub config_module: String,
    pub dry_run: bool,
}

/// Extract a received archive into `dest` (the exec dir), producing `config/`.
pub fn init(archive: &Path, dest: &Path) -> Result<()> {
    package::extract_archive(archive, dest)?;
    log::debug!("extracted {} into {}", archive.display(), dest.display());
    Ok(())
}

/// The exec dir is the parent of the config directory.
pub fn exec_dir_for(config_dir: &Path) -> Result<PathBuf> {
    let absolute = if config_dir.is_absolute() {
        config_dir.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| Error::internal_io(e.to_string(), Some("resolve cwd".to_string())))?
            .join(config_dir)
    };

    let absolute = absolute.canonicalize().map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("resolve config dir {}", config_dir.display())),
        )
    })?;

    absolute.parent().map(Path::to_path_buf).ok_or_else(|| {
        Error::validation_invalid_argument(
            "config_dir",
            "Config dir has no parent to use as exec dir",
            Some(config_dir.display().to_string()),
            None,
        )
    })
}

pub fn load_config(config_dir: &Path, opts: &ExecOptions) -> Result<LoadedConfig> {
    config::load(config_dir, &opts.config_module, &FacilityRegistry::builtin())
}

/// Render each step's dry-run descriptions. Touches nothing.
pub fn dry_run_lines(steps: &[Box<dyn Step>]) -> Vec<String> {
    let mut lines = Vec::new();
    for step in steps {
        lines.push(format!("> {}:", step.name()));
        for description in step.dry_run() {
            lines.push(format!("   > {}", description));
        }
    }
    lines
}

/// Drives a step sequence through the status state machine.
pub struct RemoteExecutor {
    status: StatusFile,
}

impl RemoteExecutor {
    pub fn new(exec_dir: &Path) -> Self {
        Self {
            status: StatusFile::new(exec_dir),
        }
    }

    pub fn status(&self) -> Status {
        self.status.current()
    }

    /// Run every step in order, each through the retry wrapper.
    ///
    /// Returns the terminal status. `Err` when the exec dir already holds a
    /// STATUS (no step runs) or when the STATUS file can't be written.
    pub fn run(&mut self, steps: &mut [Box<dyn Step>]) -> Result<Status> {
        self.status.transition(Status::Progress)?;
        log::info!("running in real mode");

        for (index, step) in steps.iter_mut().enumerate() {
            let number = index + 1;
            let name = step.name().to_string();
            log::info!("Running step {} ({})", number, name);

            if let Err(err) = call_with_retry(|| step.run()) {
                log::error!(
                    "aborting config at step {} ({}): {}",
                    number,
                    name,
                    err.message
                );
                self.status.transition(Status::Error)?;
                return Ok(Status::Error);
            }

            log::info!("Step {} completed successfully.", number);
        }

        log::info!("config executed successfully.");
        self.status.transition(Status::Done)?;
        Ok(Status::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::read_status;
    use crate::facility::FlakyAction;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Counts invocations so tests can assert a step was never reached.
    struct Counting {
        calls: Arc<AtomicU32>,
    }

    impl Step for Counting {
        fn name(&self) -> &str {
            "Counting"
        }
        fn should_run(&self) -> bool {
            true
        }
        fn run(&mut self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn dry_run(&self) -> Vec<String> {
            vec!["count".to_string()]
        }
    }

    /// Records the STATUS value visible while the step runs.
    struct Observer {
        exec_dir: PathBuf,
        seen: Arc<Mutex<Vec<Status>>>,
    }

    impl Step for Observer {
        fn name(&self) -> &str {
            "Observer"
        }
        fn should_run(&self) -> bool {
            true
        }
        fn run(&mut self) -> Result<()> {
            self.seen.lock().unwrap().push(read_status(&self.exec_dir));
            Ok(())
        }
        fn dry_run(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn steps_needing_up_to_three_attempts_finish_done() {
        let dir = tempfile::tempdir().unwrap();
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(FlakyAction::new(1)),
            Box::new(FlakyAction::new(2)),
            Box::new(FlakyAction::new(3)),
        ];

        let status = RemoteExecutor::new(dir.path()).run(&mut steps).unwrap();
        assert_eq!(status, Status::Done);
        assert_eq!(read_status(dir.path()), Status::Done);
    }

    #[test]
    fn step_needing_four_attempts_errors_and_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(FlakyAction::new(4)),
            Box::new(Counting {
                calls: Arc::clone(&calls),
            }),
        ];

        let status = RemoteExecutor::new(dir.path()).run(&mut steps).unwrap();
        assert_eq!(status, Status::Error);
        assert_eq!(read_status(dir.path()), Status::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn progress_is_visible_while_steps_run() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(Observer {
                exec_dir: dir.path().to_path_buf(),
                seen: Arc::clone(&seen),
            }),
            Box::new(Observer {
                exec_dir: dir.path().to_path_buf(),
                seen: Arc::clone(&seen),
            }),
        ];

        let mut executor = RemoteExecutor::new(dir.path());
        executor.run(&mut steps).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Status::Progress, Status::Progress]);
        assert_eq!(executor.status(), Status::Done);
    }

    #[test]
    fn second_run_in_the_same_exec_dir_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut first: Vec<Box<dyn Step>> = vec![Box::new(FlakyAction::new(1))];
        assert_eq!(
            RemoteExecutor::new(dir.path()).run(&mut first).unwrap(),
            Status::Done
        );

        let calls = Arc::new(AtomicU32::new(0));
        let mut second: Vec<Box<dyn Step>> = vec![Box::new(Counting {
            calls: Arc::clone(&calls),
        })];
        let mut executor = RemoteExecutor::new(dir.path());

        assert!(executor.run(&mut second).is_err());
        assert_eq!(executor.status(), Status::Done);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(read_status(dir.path()), Status::Done);
    }

    #[test]
    fn empty_sequence_is_done() {
        let dir = tempfile::tempdir().unwrap();
        let mut steps: Vec<Box<dyn Step>> = Vec::new();
        assert_eq!(
            RemoteExecutor::new(dir.path()).run(&mut steps).unwrap(),
            Status::Done
        );
    }

    #[test]
    fn dry_run_lines_render_every_description_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("poems");
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(crate::facility::MakeDir {
                path: target.clone(),
            }),
            Box::new(FlakyAction::new(2)),
        ];

        let lines = dry_run_lines(&steps);
        assert_eq!(
            lines,
            vec![
                "> MakeDir:".to_string(),
                format!("   > make directory {}", target.display()),
                "> FlakyAction:".to_string(),
                "   > flaky action (attempts=2)".to_string(),
            ]
        );
        assert!(!target.exists());
        assert_eq!(read_status(dir.path()), Status::Unknown);
    }

    #[test]
    fn exec_dir_is_parent_of_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        std::fs::create_dir(&config).unwrap();

        let exec_dir = exec_dir_for(&config).unwrap();
        assert_eq!(exec_dir, dir.path().canonicalize().unwrap());
    }
}
