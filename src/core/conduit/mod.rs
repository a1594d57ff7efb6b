//! Transport to one target host.
//!
//! A conduit moves the execution artifacts onto a host and runs shell commands
//! there. It never retries; a failure is reported to the caller as-is.

mod local;
mod remote;

pub use local::LocalConduit;
pub use remote::{HostKeyPolicy, RemoteConduit, RemoteOptions};

use std::path::Path;

use crate::error::Result;

pub trait Conduit: Send {
    /// Copy the config archive and the runner executable into `dest_dir`,
    /// which must already exist on the target.
    fn transfer(&mut self, archive: &Path, executable: &Path, dest_dir: &str) -> Result<()>;

    /// Run a shell command on the target and return its trimmed stdout.
    fn exec_command(&mut self, cmd: &str) -> Result<String>;

    /// Short label for logs and errors, e.g. `deploy@web1:22`.
    fn describe(&self) -> String;
}
