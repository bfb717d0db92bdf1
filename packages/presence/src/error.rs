#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("peer id must not be empty")]
    EmptyPeerId,

    #[error("invalid presence server url: {0}")]
    InvalidUrl(String),

    #[error("presence server is unavailable")]
    Unavailable(#[source] reqwest::Error),

    #[error("presence request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("presence server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl PresenceError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable(err)
        } else {
            Self::Http(err)
        }
    }
}
