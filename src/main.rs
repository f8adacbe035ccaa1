use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use taskdeck::{
    cli::{self, Invocation, RootCommand},
    gateway::{Gateway, HttpGateway},
    logging::{init_logging, print_log_location},
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(
    name = "taskdeck",
    about = "Terminal client for a self-hosted kanban issue tracker",
    long_about = "Browse boards, the backlog and the archive, and reorder tasks and categories against a taskdeck-compatible REST backend.",
    version = env!("TASKDECK_BUILD_VERSION"),
    author
)]
struct Cli {
    /// Board name, id or id prefix. Falls back to `default_board` in the settings file.
    #[arg(short, long, global = true, value_name = "BOARD")]
    board: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: RootCommand,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_path = match init_logging() {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("warning: failed to initialize logging: {err}");
            None
        }
    };
    info!(
        version = env!("TASKDECK_BUILD_VERSION"),
        commit = env!("TASKDECK_BUILD_COMMIT"),
        "taskdeck starting"
    );

    let code = run(cli).await;
    if code != 0 {
        if let Some(path) = log_path.as_ref() {
            print_log_location(path);
        }
    }
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let settings = Settings::load();
    let gateway = match HttpGateway::new(&settings) {
        Ok(gateway) => gateway,
        Err(err) => {
            warn!(error = %err, "failed to set up the backend client");
            return cli::report_startup_error(&err, cli.json);
        }
    };
    info!(api = gateway.base_url(), "using backend");

    let gateway: Arc<dyn Gateway> = Arc::new(gateway);
    let invocation = Invocation {
        gateway,
        settings,
        config_path: Settings::config_path(),
        board: cli.board,
        json_output: cli.json,
        quiet: cli.quiet,
    };
    cli::run(invocation, cli.command).await
}
