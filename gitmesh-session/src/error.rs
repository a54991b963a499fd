use gitmesh_core::cache;
use gitmesh_core::error::{categorize_git2, Categorize, ErrorKind};
use gitmesh_core::refs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cache error: {0}")]
    Cache(#[from] cache::Error),
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("reference resolution failed: {0}")]
    Refs(#[from] refs::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no clone URL succeeded for this repository")]
    AllUrlsFailed,
    #[error("no clone URLs were supplied")]
    NoUrls,
}

impl Categorize for Error {
    fn category(&self) -> ErrorKind {
        match self {
            Self::Cache(_) => ErrorKind::FsError,
            Self::Git(e) => categorize_git2(e),
            Self::Refs(e) => e.category(),
            Self::Io(e) => gitmesh_core::error::categorize_io(e),
            Self::AllUrlsFailed => ErrorKind::NetworkError,
            Self::NoUrls => ErrorKind::InvalidInput,
        }
    }
}
