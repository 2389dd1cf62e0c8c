use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("upstream transport error: {0}")]
    Upstream(#[from] tungstenite::Error),

    #[error("relay service is not running")]
    Stopped,
}

/// Rejections of a viewer command. The `Display` text is sent back to the
/// viewer verbatim as the `msg` field of an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("symbol required")]
    SymbolRequired,

    #[error("Invalid client message")]
    InvalidMessage,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}
