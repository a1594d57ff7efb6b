use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    Raw,
}

mod commands;
mod output;
mod tty;

use commands::{clean, exec, logs, status};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "cattle")]
#[command(version = VERSION)]
#[command(about = "Ship configuration steps to hosts and track their execution")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package a config directory, ship it to hosts and start it
    Exec(exec::ExecArgs),
    /// Show the STATUS of an execution on each host
    Status(status::StatusArgs),
    /// Remove an execution's exec dir from each host
    Clean(clean::CleanArgs),
    /// Print an execution's exec.log from each host
    Log(logs::LogArgs),
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::Log(_) => ResponseMode::Raw,
        _ => ResponseMode::Json,
    }
}

fn init_logging(command: &Commands) {
    let verbose = matches!(command, Commands::Exec(args) if args.verbose);
    let default_filter = if verbose { "debug" } else { "warn" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.command);

    let exit_code = match response_mode(&cli.command) {
        ResponseMode::Raw => match commands::run_raw(cli.command) {
            Ok(code) => code,
            Err(err) => {
                let _ = output::print_error(&err);
                1
            }
        },
        ResponseMode::Json => {
            let (json_result, exit_code) = commands::run_json(cli.command);
            if let Err(err) = output::print_json_result(json_result) {
                eprintln!("{}", err);
            }
            exit_code
        }
    };

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
