//! Progress reporting for fetching operations (spec §4.E).

use gitmesh_core::model::CanonicalKey;
use serde::Serialize;

/// Which operation a [`ProgressEvent`] belongs to, so a host relaying
/// events over the wire (spec §6) can tell a clone-side fetch apart
/// from a patch-engine mergeability check without guessing from phase
/// names alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressKind {
    Clone,
    Merge,
}

/// One update in the lifecycle of a fetching or merge-analysis
/// operation. Absence of a sink is tolerated: callers that don't care
/// simply pass [`NoopSink`].
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub key: CanonicalKey,
    pub kind: ProgressKind,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
}

impl ProgressEvent {
    pub fn phase(key: &CanonicalKey, kind: ProgressKind, phase: &str) -> Self {
        Self {
            key: key.clone(),
            kind,
            phase: phase.to_owned(),
            loaded: None,
            total: None,
            percent: None,
        }
    }

    pub fn progress(key: &CanonicalKey, kind: ProgressKind, phase: &str, loaded: u64, total: u64) -> Self {
        let percent = if total == 0 {
            None
        } else {
            Some(loaded as f32 / total as f32 * 100.0)
        };
        Self {
            key: key.clone(),
            kind,
            phase: phase.to_owned(),
            loaded: Some(loaded),
            total: Some(total),
            percent,
        }
    }
}

/// A host-supplied sink for [`ProgressEvent`]s. The host decides where
/// these go (a websocket, a log file, nowhere); this crate only ever
/// calls [`ProgressSink::emit`].
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// A sink that discards every event. The default when the host doesn't
/// care to observe progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

impl<F: Fn(ProgressEvent) + Send + Sync> ProgressSink for F {
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}
