use agora_api::Error as ApiError;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Destructive action needs explicit confirmation")]
    ConfirmationRequired,

    #[error("Request timed out")]
    Timeout,

    #[error("Synchronizer is shut down")]
    Closed,
}

impl SyncError {
    /// Local-origin failures the viewer can act on by retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Api(ApiError::Unknown(_)) | SyncError::Timeout => true,
            SyncError::Api(_)
            | SyncError::NotLoggedIn
            | SyncError::ConfirmationRequired
            | SyncError::Closed => false,
        }
    }
}
