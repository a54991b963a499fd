//! The error taxonomy shared by every component.
//!
//! Individual modules define their own `thiserror`-derived `Error` enum
//! (see `storage::Error`, `cache::Error`, `refs::Error`, ...) and implement
//! [`Categorize`] so that the RPC boundary can build a structured result
//! without re-deriving the mapping at each call site.

use std::fmt;

/// A kind, not a type: the bucket an error falls into, independent of which
/// component raised it. See spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    // User-actionable.
    AuthRequired,
    AuthExpired,
    AuthInvalid,
    NotFastForward,
    MergeConflict,
    RepoNotFound,
    RepoAlreadyExists,
    QuotaExceeded,
    PermissionDenied,
    RefLocked,
    InvalidRefspec,
    InvalidInput,
    UncommittedChanges,
    RemoteAhead,
    ShallowClone,
    RequiresConfirmation,
    // Retriable.
    NetworkError,
    Timeout,
    RelayTimeout,
    RelayError,
    Server5xx,
    TemporaryFailure,
    RateLimited,
    // Fatal.
    CorruptPack,
    CorruptObject,
    FsError,
    OperationAborted,
    UnknownError,
}

impl ErrorKind {
    /// Whether a caller may usefully retry the operation unchanged.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::NetworkError
                | Self::Timeout
                | Self::RelayTimeout
                | Self::RelayError
                | Self::Server5xx
                | Self::TemporaryFailure
                | Self::RateLimited
        )
    }

    /// Whether the error represents a condition the caller can act on
    /// directly (as opposed to a transport or internal failure).
    pub fn is_user_actionable(self) -> bool {
        matches!(
            self,
            Self::AuthRequired
                | Self::AuthExpired
                | Self::AuthInvalid
                | Self::NotFastForward
                | Self::MergeConflict
                | Self::RepoNotFound
                | Self::RepoAlreadyExists
                | Self::QuotaExceeded
                | Self::PermissionDenied
                | Self::RefLocked
                | Self::InvalidRefspec
                | Self::InvalidInput
                | Self::UncommittedChanges
                | Self::RemoteAhead
                | Self::ShallowClone
                | Self::RequiresConfirmation
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "unknown-error".into());
        f.write_str(&s)
    }
}

/// Where in the system an error originated. Carried alongside every
/// categorized error so the host can render a useful message without
/// inspecting the underlying error chain.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ErrorContext {
    pub repo: Option<String>,
    pub ref_name: Option<String>,
    pub remote: Option<String>,
    pub operation: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Self::default()
        }
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn with_ref(mut self, name: impl Into<String>) -> Self {
        self.ref_name = Some(name.into());
        self
    }
}

/// Implemented by every module's `Error` enum so it can be categorized at
/// the RPC boundary without the boundary needing to match on every variant
/// of every error type in the workspace.
pub trait Categorize {
    fn category(&self) -> ErrorKind;

    /// A short remediation hint, if one applies generically to this kind
    /// of failure (e.g. "run `git pull --rebase` and try again").
    fn hint(&self) -> Option<String> {
        None
    }
}

/// Categorize a raw `git2::Error` using its class/code, for errors that
/// reach the surface without having passed through a module `Error` enum
/// (e.g. inside a closure where threading a typed error through is
/// impractical).
pub fn categorize_git2(err: &git2::Error) -> ErrorKind {
    use git2::ErrorCode::*;

    match err.code() {
        NotFound => ErrorKind::RepoNotFound,
        Exists => ErrorKind::RepoAlreadyExists,
        Locked => ErrorKind::RefLocked,
        Auth => ErrorKind::AuthRequired,
        Certificate => ErrorKind::AuthInvalid,
        Ambiguous | InvalidSpec => ErrorKind::InvalidRefspec,
        Conflict | MergeConflict | Unmerged => ErrorKind::MergeConflict,
        _ => match err.class() {
            git2::ErrorClass::Net => ErrorKind::NetworkError,
            git2::ErrorClass::Odb => ErrorKind::CorruptObject,
            _ => ErrorKind::UnknownError,
        },
    }
}

/// Categorize a raw `std::io::Error`.
pub fn categorize_io(err: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as K;

    match err.kind() {
        K::NotFound => ErrorKind::RepoNotFound,
        K::PermissionDenied => ErrorKind::PermissionDenied,
        K::TimedOut => ErrorKind::Timeout,
        K::AlreadyExists => ErrorKind::RepoAlreadyExists,
        _ => ErrorKind::FsError,
    }
}
