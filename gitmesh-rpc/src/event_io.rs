//! The host-injected event-network I/O adapter (spec §6).
//!
//! This crate never signs or publishes an event itself; `fetchEvents`,
//! `publishEvent`, `publishEvents` and `getCurrentPubkey` are all
//! delegated to whatever the host wires up (a relay pool, a local
//! Nostr cache, a test double).

use gitmesh_core::model::CanonicalKey;
use gitmesh_vendor::RawEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilters {
    pub key: Option<CanonicalKey>,
    pub kinds: Vec<u32>,
    pub authors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub ok: bool,
    #[serde(default)]
    pub relays: Vec<String>,
    pub error: Option<String>,
}

pub trait EventIoAdapter: Send + Sync {
    fn fetch_events(&self, filters: &EventFilters) -> Result<Vec<RawEvent>, String>;
    fn publish_event(&self, unsigned: serde_json::Value) -> Result<PublishOutcome, String>;
    fn publish_events(&self, unsigned: Vec<serde_json::Value>) -> Result<Vec<PublishOutcome>, String> {
        unsigned.into_iter().map(|e| self.publish_event(e)).collect()
    }
    fn get_current_pubkey(&self) -> Option<String>;
}

/// Adapts an [`EventIoAdapter`] to the narrower [`gitmesh_vendor::EventSource`]
/// surface `RadicleBackend` needs: one key, a set of kinds, no authors.
pub struct AdapterEventSource<'a> {
    pub adapter: &'a dyn EventIoAdapter,
}

impl gitmesh_vendor::EventSource for AdapterEventSource<'_> {
    fn fetch(&self, key: &CanonicalKey, kinds: &[u32]) -> Result<Vec<RawEvent>, gitmesh_vendor::Error> {
        let filters = EventFilters {
            key: Some(key.clone()),
            kinds: kinds.to_vec(),
            authors: Vec::new(),
        };
        self.adapter
            .fetch_events(&filters)
            .map_err(gitmesh_vendor::Error::Import)
    }
}
