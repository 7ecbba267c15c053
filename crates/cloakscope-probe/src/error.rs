use crate::guard::UrlRejection;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("blocked outbound URL: {0}")]
    Blocked(#[from] UrlRejection),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("redirect limit of {0} hops exceeded")]
    TooManyRedirects(usize),

    #[error("invalid redirect location: {0}")]
    InvalidRedirect(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
