//! The structured error payload every RPC call returns on failure
//! instead of throwing across the boundary (spec §6, §7).

use gitmesh_core::error::{categorize_git2, categorize_io, Categorize, ErrorContext, ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unifies every module's `Error` enum at the dispatch boundary, so a
/// single op handler can use `?` regardless of which crate raised the
/// failure.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("session error: {0}")]
    Session(#[from] gitmesh_session::Error),
    #[error("patch error: {0}")]
    Patch(#[from] gitmesh_patch::Error),
    #[error("vendor error: {0}")]
    Vendor(#[from] gitmesh_vendor::Error),
    #[error("cache error: {0}")]
    Cache(#[from] gitmesh_core::cache::Error),
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no branch could be resolved")]
    NoBranches,
    #[error("unknown vendor host: {0}")]
    UnknownHost(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("event i/o error: {0}")]
    EventIo(String),
}

impl Categorize for DispatchError {
    fn category(&self) -> ErrorKind {
        match self {
            Self::Session(e) => e.category(),
            Self::Patch(e) => e.category(),
            Self::Vendor(e) => e.category(),
            Self::Cache(_) => ErrorKind::FsError,
            Self::Git(e) => categorize_git2(e),
            Self::Io(e) => categorize_io(e),
            Self::Serde(_) => ErrorKind::InvalidInput,
            Self::NoBranches => ErrorKind::InvalidRefspec,
            Self::UnknownHost(_) | Self::Unsupported(_) => ErrorKind::InvalidInput,
            Self::EventIo(_) => ErrorKind::RelayError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub success: bool,
    pub error: String,
    pub code: String,
    pub category: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
}

impl ErrorPayload {
    pub fn from_error(err: &(impl Categorize + std::fmt::Display), context: Option<ErrorContext>) -> Self {
        let category = err.category();
        Self {
            success: false,
            error: err.to_string(),
            code: category.to_string(),
            hint: err.hint(),
            category,
            context,
        }
    }

    /// A panic crossed the dispatch boundary; never let it take the
    /// host process down with it (spec §8: "a `catch_unwind` at the
    /// dispatch edge converts a panic into `unknown-error`").
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with no message".to_owned()
        };
        Self {
            success: false,
            error: message,
            code: ErrorKind::UnknownError.to_string(),
            category: ErrorKind::UnknownError,
            hint: None,
            context: None,
        }
    }
}
