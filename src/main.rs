use clap::{Parser, Subcommand};
use electrobot::config::Config;
use electrobot::logging;
use electrobot::runtime::{self, StartupError, StatusReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    name = "electrobot",
    version = VERSION,
    about = "Telegram bot that tells its subscribers when it comes back up"
)]
struct Cli {
    /// YAML config file (overrides ELECTROBOT_CONFIG and ./electrobot.config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the database file
    #[arg(long, global = true)]
    working_dir: Option<String>,
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Run the bot until SIGINT/SIGTERM (default)
    Start,
    /// Show subscriber count and the last recorded alive time
    Status,
    /// Show version
    Version,
}

fn print_version() {
    println!("electrobot {VERSION}");
}

fn load_config(cli: &Cli) -> Result<Config, StartupError> {
    let mut config =
        Config::load_or_discover(cli.config.as_deref()).map_err(StartupError::Config)?;
    config.override_working_dir(cli.working_dir.as_deref());
    Ok(config)
}

fn print_status(config: &Config) -> Result<(), StartupError> {
    let report = StatusReport::collect(config)?;
    println!("{}", report.render(config.tz()));
    Ok(())
}

fn fail(err: StartupError) -> ExitCode {
    error!("{err}");
    ExitCode::from(err.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let command = match &cli.command {
        Some(MainCommand::Version) => {
            print_version();
            return ExitCode::SUCCESS;
        }
        Some(MainCommand::Status) => MainCommand::Status,
        Some(MainCommand::Start) | None => MainCommand::Start,
    };

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            logging::init_console_logging();
            return fail(e);
        }
    };

    match config.log_dir.as_deref() {
        Some(dir) => {
            if let Err(e) = logging::init_logging(Path::new(dir)) {
                logging::init_console_logging();
                error!("Failed to set up file logging in {dir}: {e}");
            }
        }
        None => logging::init_console_logging(),
    }

    if let MainCommand::Status = command {
        return match print_status(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fail(e),
        };
    }

    info!("Starting ElectroBot {VERSION}...");
    match runtime::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}
