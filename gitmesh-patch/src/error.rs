use gitmesh_core::error::{categorize_git2, Categorize, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("cache error: {0}")]
    Cache(#[from] gitmesh_core::cache::Error),
    #[error("session error: {0}")]
    Session(#[from] gitmesh_session::Error),
    #[error("patch parse error: {0}")]
    Parse(#[from] crate::unidiff::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("merge conflict in: {0:?}")]
    MergeConflict(Vec<String>),
    #[error("no branches could be resolved")]
    NoBranches,
    #[error("working tree has uncommitted changes")]
    UncommittedChanges,
    #[error("remote is ahead of the local branch")]
    RemoteAhead,
    #[error("local repository is a shallow clone")]
    ShallowClone,
    #[error("push rejected: not a fast-forward")]
    NotFastForward,
    #[error("push requires explicit confirmation to proceed")]
    RequiresConfirmation,
}

impl Categorize for Error {
    fn category(&self) -> ErrorKind {
        match self {
            Self::Git(e) => categorize_git2(e),
            Self::Cache(_) => ErrorKind::FsError,
            Self::Session(e) => e.category(),
            Self::Parse(_) => ErrorKind::InvalidInput,
            Self::Io(e) => gitmesh_core::error::categorize_io(e),
            Self::Serde(_) => ErrorKind::InvalidInput,
            Self::MergeConflict(_) => ErrorKind::MergeConflict,
            Self::NoBranches => ErrorKind::InvalidRefspec,
            Self::UncommittedChanges => ErrorKind::UncommittedChanges,
            Self::RemoteAhead => ErrorKind::RemoteAhead,
            Self::ShallowClone => ErrorKind::ShallowClone,
            Self::NotFastForward => ErrorKind::NotFastForward,
            Self::RequiresConfirmation => ErrorKind::RequiresConfirmation,
        }
    }
}
