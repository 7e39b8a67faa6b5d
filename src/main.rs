use clap::Parser;
use std::path::PathBuf;

mod chan;
mod config;
mod engine;
mod error;
mod logging;
mod pipe;
mod plugins;
mod session;

/// An intransparent, modular qrexec proxy: routes one qrexec call through a
/// configured chain of filter plugins between the calling VM and the
/// destination VM.
#[derive(Parser)]
#[command(name = "qrexec-proxy")]
#[command(version)]
#[command(about = "Intransparent, modular qrexec proxy")]
struct Cli {
    /// Call specification, as dispatched by qrexec: [chain]+[destination vm]+[call]
    call: String,

    /// Chain configuration file
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    logging::init_logging(&cli.log_level);
    // stdout and stderr belong to the qrexec channel; a panic backtrace on
    // either would leak into the source VM
    logging::install_panic_hook();

    if session::run(&cli.call, &cli.config).await.is_err() {
        std::process::exit(1);
    }
}
