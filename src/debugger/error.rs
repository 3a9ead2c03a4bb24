use crate::oracle::OracleError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shown to the DAP client verbatim, with no additional context.
    #[error("{0}")]
    UserFacing(String),
    /// Engine invariant violation; the client only sees a generic failure.
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("hook: {0}")]
    Hook(anyhow::Error),
}

impl Error {
    pub(crate) fn user_facing(message: impl Into<String>) -> Error {
        Error::UserFacing(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        Error::Internal(message.into())
    }

    /// Message safe to surface to the client, if any.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Error::UserFacing(message) => Some(message.clone()),
            Error::Oracle(err) if err.is_semantic() => Some(err.to_string()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
