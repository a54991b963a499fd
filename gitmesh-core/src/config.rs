//! Process-wide, runtime-mutable configuration (spec §5, §9).
//!
//! The host sets auth tokens, git identity, and the event-IO proxy address
//! once at startup and again whenever they change, via the RPC surface's
//! `setAuthConfig` / `setGitConfig` / `setEventIO`. Rather than a global
//! mutable cell guarded by a lock that every reader must contend for, the
//! config is rebuilt wholesale on every `set*` call and published behind
//! an [`arc_swap::ArcSwap`]: readers snapshot it once at operation entry
//! (`EngineConfig::current()`) and see a consistent view for the rest of
//! that operation, even if a concurrent `set*` call lands mid-flight.

use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A bearer token or basic-auth credential scoped to one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostToken {
    pub host: String,
    pub token: String,
}

/// Git identity used when the engine creates merge commits (spec §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// Where signed event publication is proxied through. The engine never
/// talks to a relay directly; it hands unsigned events to whatever sits
/// behind this address and trusts the host to sign and publish them
/// (spec §6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventIoConfig {
    pub proxy: String,
}

/// The engine's entire runtime configuration, rebuilt wholesale on every
/// `set*` RPC call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tokens: Vec<HostToken>,
    pub git: Option<GitIdentity>,
    pub event_io: Option<EventIoConfig>,
}

impl EngineConfig {
    pub fn token_for_host(&self, host: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| t.host.eq_ignore_ascii_case(host))
            .map(|t| t.token.as_str())
    }
}

static CURRENT: Lazy<ArcSwap<EngineConfig>> =
    Lazy::new(|| ArcSwap::from_pointee(EngineConfig::default()));

/// Snapshot the current configuration. Cheap: an atomic load of an `Arc`.
pub fn current() -> Arc<EngineConfig> {
    CURRENT.load_full()
}

/// Replace the entire configuration. Used by `setAuthConfig` /
/// `setGitConfig` / `setEventIO`; each call replaces the whole struct, so
/// callers that only want to change one field must read [`current`] first
/// and clone-modify it.
pub fn replace(config: EngineConfig) {
    CURRENT.store(Arc::new(config));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_is_visible_to_subsequent_snapshots() {
        let mut cfg = (*current()).clone();
        cfg.tokens.push(HostToken {
            host: "example.com".into(),
            token: "abc".into(),
        });
        replace(cfg);

        let snap = current();
        assert_eq!(snap.token_for_host("example.com"), Some("abc"));
        assert_eq!(snap.token_for_host("EXAMPLE.COM"), Some("abc"));
    }
}
