//! Runner executable shipped to every target host.
//!
//! ```text
//! cattle-run init <archive>
//! cattle-run exec <config-dir> [--config-module NAME] [--dry-run] [--verbose]
//! ```

use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cattle::execution::LOG_FILE;
use cattle::runner::{self, ExecOptions, RemoteExecutor};

#[derive(Parser)]
#[command(name = "cattle-run")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Apply a cattle configuration on this host")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract a config archive into the current directory
    Init {
        archive: PathBuf,
    },
    /// Run the steps of a config directory
    Exec {
        config_dir: PathBuf,

        /// Step manifest inside the config directory
        #[arg(long, short = 'm', default_value = "cattle.json")]
        config_module: String,

        /// Print what each step would do without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Log at debug level
        #[arg(long, short = 'v')]
        verbose: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Init { archive } => init(&archive),
        Command::Exec {
            config_dir,
            config_module,
            dry_run,
            verbose,
        } => exec(
            &config_dir,
            &ExecOptions {
                config_module,
                dry_run,
            },
            verbose,
        ),
    }
}

fn init(archive: &Path) -> ExitCode {
    let result = std::env::current_dir()
        .map_err(|e| cattle::Error::internal_io(e.to_string(), Some("resolve cwd".to_string())))
        .and_then(|cwd| runner::init(archive, &cwd));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("couldn't extract archive: {}", err.detail_text());
            ExitCode::FAILURE
        }
    }
}

fn exec(config_dir: &Path, opts: &ExecOptions, verbose: bool) -> ExitCode {
    let mut loaded = match runner::load_config(config_dir, opts) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("couldn't load config: {}", err.detail_text());
            return ExitCode::FAILURE;
        }
    };

    if opts.dry_run {
        for line in runner::dry_run_lines(&loaded.steps) {
            println!("{}", line);
        }
        return ExitCode::SUCCESS;
    }

    let exec_dir = match runner::exec_dir_for(config_dir) {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("{}", err.detail_text());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_file_logger(&exec_dir.join(LOG_FILE), verbose) {
        eprintln!("couldn't open {}: {}", LOG_FILE, e);
        return ExitCode::FAILURE;
    }

    // A failed step is recorded in STATUS; only a STATUS write failure is fatal.
    match RemoteExecutor::new(&exec_dir).run(&mut loaded.steps) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err.detail_text());
            eprintln!("{}", err.detail_text());
            ExitCode::FAILURE
        }
    }
}

fn init_file_logger(path: &Path, verbose: bool) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    env_logger::Builder::new()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_timestamp_secs()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}
