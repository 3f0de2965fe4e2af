use thiserror::Error;

/// Error taxonomy for the web client.
///
/// Transient transport failures and scan-window expiry are absorbed by the
/// login cycle itself; everything that reaches a caller through this type is
/// either fatal for the current attempt (`UnknownServerGroup`, `Init`) or a
/// per-call failure the caller may retry.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("malformed {format} response: {detail}")]
    Parse {
        format: &'static str,
        detail: String,
    },

    #[error("redirect host {0:?} does not match any configured server group")]
    UnknownServerGroup(String),

    #[error("session initialization failed: {0}")]
    Init(String),

    #[error("server rejected request, ret={0}")]
    Protocol(i64),

    #[error("client is not logged in")]
    NotLoggedIn,

    #[error("client is already running")]
    AlreadyRunning,
}

impl ClientError {
    pub(crate) fn parse(format: &'static str, detail: impl Into<String>) -> Self {
        Self::Parse {
            format,
            detail: detail.into(),
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
