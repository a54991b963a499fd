use gitmesh_core::error::{Categorize, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http transport error: {0}")]
    Transport(#[from] Box<ureq::Error>),
    #[error("response decoding error: {0}")]
    Decode(#[from] std::io::Error),
    #[error("response body was not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("vendor api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("session error: {0}")]
    Session(#[from] gitmesh_session::Error),
    #[error("patch error: {0}")]
    Patch(#[from] gitmesh_patch::Error),
    #[error("no authentication token configured for this host")]
    MissingAuth,
    #[error("fork/import failed: {0}")]
    Import(String),
    #[error("fork/import did not complete within the poll budget")]
    ImportTimedOut,
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}

impl Categorize for Error {
    fn category(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::NetworkError,
            Self::Decode(_) => ErrorKind::NetworkError,
            Self::Json(_) => ErrorKind::FsError,
            Self::Api { status, .. } if *status == 401 || *status == 403 => ErrorKind::AuthInvalid,
            Self::Api { status, .. } if *status == 404 => ErrorKind::RepoNotFound,
            Self::Api { status, .. } if *status >= 500 => ErrorKind::Server5xx,
            Self::Api { status, .. } if *status == 429 => ErrorKind::RateLimited,
            Self::Api { .. } => ErrorKind::InvalidInput,
            Self::Session(e) => e.category(),
            Self::Patch(e) => e.category(),
            Self::MissingAuth => ErrorKind::AuthRequired,
            Self::Import(_) | Self::ImportTimedOut => ErrorKind::NetworkError,
        }
    }
}
