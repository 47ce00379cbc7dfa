use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// `AuthFailure` deliberately carries no detail: the API maps every
/// credential problem (unknown user, wrong password, bad token, expired
/// token, signing-algorithm mismatch) to the same uniform response.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("authentication failed")]
    AuthFailure,

    #[error("no available addresses in client subnet")]
    AllocationExhausted,

    #[error("device configuration failed: {0}")]
    Device(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
