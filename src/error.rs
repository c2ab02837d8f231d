use thiserror::Error;

/// Everything that can go wrong while authorizing a user or relaying a file.
///
/// Each variant maps to exactly one chat reply via [`Error::user_message`];
/// the detail carried inside only ever reaches the logs.
#[derive(Debug, Error)]
pub enum Error {
    /// The user has no cached credentials yet.
    #[error("user has not completed authorization")]
    AuthPending,
    /// The authorization flow timed out, was superseded, or is unknown.
    #[error("authorization flow expired")]
    AuthExpired,
    /// The token endpoint rejected the request, or the user denied access.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    /// A Drive API call failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    /// The document could not be staged on local disk.
    #[error("staging failed: {0}")]
    StagingFailed(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The text sent back to the chat for this error.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::AuthPending => "⚠️ Use /start to authorize first.",
            Error::AuthExpired => "❌ Timeout. Please try /start again.",
            Error::ExchangeFailed(_) => "❌ Authorization error occurred.",
            Error::StorageUnavailable(_) | Error::StagingFailed(_) => {
                "❌ Upload failed. Try again."
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::StorageUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_and_staging_share_the_upload_message() {
        let storage = Error::StorageUnavailable("503".into());
        let staging = Error::StagingFailed(std::io::Error::other("disk full"));
        assert_eq!(storage.user_message(), staging.user_message());
    }

    #[test]
    fn pending_asks_for_start() {
        assert!(Error::AuthPending.user_message().contains("/start"));
    }
}
