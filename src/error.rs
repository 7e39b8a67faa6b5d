//! Error types shared across the proxy.

use crate::plugins::StageRole;
use thiserror::Error;

/// Everything that can abort a proxied qrexec session.
///
/// The first stage task to fail determines the session outcome; its error
/// kind ends up in the terminal journal record so that policy rejections,
/// peer failures and plain I/O trouble can be told apart when reading logs.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("plugin '{name}' not found for role {role}")]
    PluginNotFound { name: String, role: StageRole },

    #[error("plugin '{name}' exists but cannot act as {role}")]
    PluginRoleMismatch { name: String, role: StageRole },

    #[error("connection refused by policy: {0}")]
    Admission(String),

    #[error("peer failure: {0}")]
    Peer(String),

    #[error("deadline of {seconds}s exceeded on the {direction} stream")]
    Timeout { seconds: f64, direction: &'static str },

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ProxyError {
    /// Stable kind label attached to the terminal journal record.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Config(_) => "config",
            ProxyError::PluginNotFound { .. } | ProxyError::PluginRoleMismatch { .. } => {
                "plugin-load"
            }
            ProxyError::Admission(_) => "admission",
            ProxyError::Peer(_) => "peer",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Io(_) => "io",
            ProxyError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_are_distinct_per_category() {
        let io: ProxyError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(io.kind(), "io");
        assert_eq!(ProxyError::Admission("quota".into()).kind(), "admission");
        assert_eq!(
            ProxyError::PluginNotFound {
                name: "nope".into(),
                role: StageRole::Filter,
            }
            .kind(),
            "plugin-load"
        );
    }
}
