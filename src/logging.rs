//! Diagnostic output wiring.
//!
//! The proxy sits between two VMs on the qrexec byte channel, so stdout and
//! stderr carry payload and must never receive log lines. All diagnostics go
//! to the systemd journal instead. On hosts without a journal socket the
//! subscriber runs without a sink unless `QREXEC_PROXY_LOG_STDERR=1` opts
//! into an stderr fmt layer for development.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable that opts into stderr logging when no journal exists.
const STDERR_OPT_IN: &str = "QREXEC_PROXY_LOG_STDERR";

pub fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match tracing_journald::layer() {
        Ok(journal) => registry.with(journal).init(),
        Err(_) if std::env::var_os(STDERR_OPT_IN).is_some() => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init(),
        Err(_) => registry.init(),
    }
}

/// Route panics to the journal instead of stderr.
///
/// Replaces the default hook entirely: its stderr backtrace would otherwise
/// end up on the qrexec channel of the source VM.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("uncaught panic: {info}");
    }));
}
