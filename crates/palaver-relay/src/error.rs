use palaver_shared::ServerFrame;
use palaver_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RelayError {
    /// The frame sent to the client that triggered this error.
    ///
    /// Authorization failures carry their reason verbatim; anything else is
    /// internal and only the logs get the detail.
    pub fn client_frame(&self) -> ServerFrame {
        match self {
            RelayError::Store(e) if e.is_authorization() => ServerFrame::error(e.to_string()),
            _ => ServerFrame::error("storage error"),
        }
    }
}
