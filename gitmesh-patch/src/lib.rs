//! Patch analysis, application and safe push.

pub mod engine;
pub mod error;
pub mod safe_push;
pub mod unidiff;

pub use engine::{analyze_patch_merge, apply_patch_and_push, MergeAnalysis, PatchPayload};
pub use error::Error;
pub use safe_push::{safe_push_to_remote, SafePushOptions, SafePushResult};
