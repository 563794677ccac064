use thiserror::Error;

use crate::auth::AuthError;
use crate::remote::RemoteError;

/// Application-level failure taxonomy. Validation errors never reach the
/// remote; everything else is caught at the command boundary and rendered as
/// inline text by the webview. "Not found" is not an error at all: a
/// succeeded query with zero rows comes back as a typed empty result.
/// Nothing here is fatal to the process.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Real-time connection error ({0}). Please refresh.")]
    Realtime(String),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("Not signed in")]
    Unauthenticated,
}
