use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("interactive sign-in required")]
    InteractionRequired,
    #[error("a sign-in is already in progress")]
    LoginInProgress,
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("sign-in required before calling the data API")]
    AuthRequired,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("data API request failed ({status}): {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Keychain(#[from] keyring::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Config(String),
}

/// How a failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected path to the login screen, not an error banner.
    InteractionRequired,
    /// Network or provider hiccup; offer a retry.
    Transient,
    /// A second login while one is running.
    ConcurrentOperation,
    /// A panel's fetch failed; only that panel shows it.
    DataFetch,
    Configuration,
}

impl AppError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::InteractionRequired => ErrorClass::InteractionRequired,
            AppError::LoginInProgress => ErrorClass::ConcurrentOperation,
            AppError::Authentication(_) | AppError::Keychain(_) | AppError::Io(_) => {
                ErrorClass::Transient
            }
            AppError::AuthRequired
            | AppError::NotFound(_)
            | AppError::Api { .. }
            | AppError::Json(_) => ErrorClass::DataFetch,
            AppError::Http(err) if err.is_decode() => ErrorClass::DataFetch,
            AppError::Http(_) => ErrorClass::Transient,
            AppError::Config(_) => ErrorClass::Configuration,
        }
    }

    pub fn is_interaction_required(&self) -> bool {
        matches!(self, AppError::InteractionRequired)
    }
}
