//! Concurrent fan-out of one host operation across every target.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::host::HostRunner;

/// What happens to the remaining hosts when one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Every host runs to completion regardless of the others.
    #[default]
    BestEffort,
    /// The first failure stops hosts that haven't started yet. Hosts already
    /// running are left to finish.
    FailFast,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct HostOutcome<T> {
    pub host: String,
    pub result: Result<T>,
}

/// Per-host outcomes in the order hosts finished.
#[derive(Debug)]
pub struct FanOutReport<T> {
    outcomes: Vec<HostOutcome<T>>,
}

impl<T> FanOutReport<T> {
    pub fn outcomes(&self) -> &[HostOutcome<T>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<HostOutcome<T>> {
        self.outcomes
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// All host values, or the first error to complete. Later outcomes are
    /// dropped.
    pub fn into_result(self) -> Result<Vec<(String, T)>> {
        self.outcomes
            .into_iter()
            .map(|o| o.result.map(|value| (o.host, value)))
            .collect()
    }
}

/// Run `op` once per runner on a pool of `min(hosts, max_workers)` threads.
pub fn map<T, F>(
    runners: &mut [HostRunner],
    max_workers: usize,
    policy: FanOutPolicy,
    op: F,
) -> Result<FanOutReport<T>>
where
    T: Send,
    F: Fn(&mut HostRunner) -> Result<T> + Sync,
{
    if runners.is_empty() {
        return Ok(FanOutReport {
            outcomes: Vec::new(),
        });
    }

    let threads = runners.len().min(max_workers.max(1));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("cattle-fanout-{}", i))
        .build()
        .map_err(|e| Error::internal_unexpected(format!("Failed to create fan-out pool: {}", e)))?;

    log::debug!(
        "fanning out to {} hosts on {} threads ({:?})",
        runners.len(),
        threads,
        policy
    );

    let token = CancelToken::new();
    let (tx, rx) = mpsc::channel::<HostOutcome<T>>();
    let op = &op;

    pool.scope(|scope| {
        for runner in runners.iter_mut() {
            let tx = tx.clone();
            let token = token.clone();
            scope.spawn(move |_| {
                let host = runner.label().to_string();
                let result = if token.is_cancelled() {
                    Err(Error::fan_out_cancelled(host.clone()))
                } else {
                    op(runner)
                };

                if let Err(err) = &result {
                    log::debug!("{}: {}", host, err.message);
                    if policy == FanOutPolicy::FailFast {
                        token.cancel();
                    }
                }

                // The receiver outlives the scope.
                let _ = tx.send(HostOutcome { host, result });
            });
        }
    });
    drop(tx);

    Ok(FanOutReport {
        outcomes: rx.into_iter().collect(),
    })
}

static CONSOLE: Mutex<()> = Mutex::new(());

/// Hold the console while `f` prints, so blocks from different hosts don't
/// interleave.
pub fn with_console<R>(f: impl FnOnce() -> R) -> R {
    let _guard = CONSOLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conduit::LocalConduit;
    use crate::execution::{ExecDir, ExecutionId};
    use crate::host::HostDescriptor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn runners(hosts: &[&str]) -> Vec<HostRunner> {
        let id = ExecutionId::parse("20260101T000000-abcd1234").unwrap();
        hosts
            .iter()
            .map(|h| {
                HostRunner::new(
                    id.clone(),
                    ExecDir::new("/tmp/cattle", id.as_str()),
                    HostDescriptor {
                        host: h.to_string(),
                        port: 22,
                        username: "deploy".to_string(),
                    },
                    Box::new(LocalConduit::new()),
                )
            })
            .collect()
    }

    #[test]
    fn best_effort_runs_every_host() {
        let mut runners = runners(&["a", "b", "bad", "c"]);
        let calls = AtomicUsize::new(0);

        let report = map(&mut runners, 32, FanOutPolicy::BestEffort, |runner| {
            calls.fetch_add(1, Ordering::SeqCst);
            if runner.label() == "bad" {
                Err(Error::other("boom"))
            } else {
                Ok(runner.label().len())
            }
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.outcomes().len(), 4);
        assert_eq!(report.failed_count(), 1);

        let err = report.into_result().unwrap_err();
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn all_success_returns_every_value() {
        let mut runners = runners(&["a", "b", "c"]);
        let report = map(&mut runners, 2, FanOutPolicy::BestEffort, |runner| {
            Ok(runner.label().to_string())
        })
        .unwrap();

        assert!(report.is_success());
        let mut hosts: Vec<String> = report
            .into_result()
            .unwrap()
            .into_iter()
            .map(|(host, value)| {
                assert_eq!(host, value);
                host
            })
            .collect();
        hosts.sort();
        assert_eq!(hosts, vec!["a", "b", "c"]);
    }

    #[test]
    fn fail_fast_cancels_hosts_not_yet_started() {
        let mut runners = runners(&["a", "b", "c", "d"]);
        let calls = AtomicUsize::new(0);

        // One worker: the first host to run fails before any other starts.
        let report = map(&mut runners, 1, FanOutPolicy::FailFast, |_| -> Result<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::other("unreachable host"))
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let cancelled = report
            .outcomes()
            .iter()
            .filter(|o| {
                o.result
                    .as_ref()
                    .err()
                    .map(|e| e.code.as_str() == "fanout.cancelled")
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(cancelled, 3);

        // The first completed outcome is the real failure.
        assert_eq!(report.into_result().unwrap_err().message, "unreachable host");
    }

    #[test]
    fn concurrency_is_bounded_by_max_workers() {
        let mut runners = runners(&["a", "b", "c", "d", "e", "f"]);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        map(&mut runners, 2, FanOutPolicy::BestEffort, |_| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn empty_fleet_is_empty_report() {
        let mut runners: Vec<HostRunner> = Vec::new();
        let report = map(&mut runners, 4, FanOutPolicy::FailFast, |_| Ok(())).unwrap();
        assert!(report.outcomes().is_empty());
        assert!(report.into_result().unwrap().is_empty());
    }

    /// Answers every command with a fixed STATUS, or refuses to connect.
    struct StatusConduit(Option<&'static str>);

    impl crate::conduit::Conduit for StatusConduit {
        fn transfer(&mut self, _: &std::path::Path, _: &std::path::Path, _: &str) -> Result<()> {
            Ok(())
        }

        fn exec_command(&mut self, _cmd: &str) -> Result<String> {
            match self.0 {
                Some(status) => Ok(status.to_string()),
                None => Err(Error::ssh_connect_failed(
                    crate::error::TargetDetails::local(),
                    "Connection refused",
                )),
            }
        }

        fn describe(&self) -> String {
            "status".to_string()
        }
    }

    #[test]
    fn one_unreachable_host_does_not_hide_the_others() {
        let id = ExecutionId::parse("20260101T000000-abcd1234").unwrap();
        let mut runners: Vec<HostRunner> = [("a", Some("DONE")), ("b", None), ("c", Some("PROGRESS"))]
            .into_iter()
            .map(|(host, reply)| {
                HostRunner::new(
                    id.clone(),
                    ExecDir::new("/tmp/cattle", id.as_str()),
                    HostDescriptor {
                        host: host.to_string(),
                        port: 22,
                        username: "deploy".to_string(),
                    },
                    Box::new(StatusConduit(reply)),
                )
            })
            .collect();

        let report = map(&mut runners, 32, FanOutPolicy::BestEffort, |r| r.status()).unwrap();
        assert_eq!(report.failed_count(), 1);
        assert_eq!(
            report.into_result().unwrap_err().code.as_str(),
            "ssh.connect_failed"
        );

        assert_eq!(runners[0].status().unwrap(), crate::execution::Status::Done);
        assert_eq!(runners[2].status().unwrap(), crate::execution::Status::Progress);
    }

    #[test]
    fn with_console_returns_closure_value() {
        assert_eq!(with_console(|| 7), 7);
    }
}
