//! The data model shared by every component (spec §3).

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A Git object id. Re-exported from `git2` rather than wrapped: every
/// component in this workspace already speaks `git2`, and an extra
/// new-type here would only cost conversions at every boundary.
pub type Oid = git2::Oid;

/// A 32-byte public key identifying an author or maintainer. Gitmesh never
/// holds the corresponding secret key; signing happens behind the
/// host-injected event-IO adapter (see `gitmesh-rpc::events`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubKey([u8; 32]);

#[derive(Debug, thiserror::Error)]
pub enum PubKeyError {
    #[error("public key must be 64 hex characters, got {0}")]
    BadLength(usize),
    #[error("invalid hex in public key: {0}")]
    InvalidHex(#[from] std::num::ParseIntError),
}

impl PubKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for PubKey {
    type Err = PubKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(PubKeyError::BadLength(s.len()));
        }
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({self})")
    }
}

impl Serialize for PubKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        PubKey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A stable identifier derived from an unambiguous owner/name pair.
/// Construction is deterministic and idempotent: equivalent inputs yield
/// byte-identical keys (spec §3, §8).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalKey(Arc<str>);

impl CanonicalKey {
    /// Build the canonical key for an `owner/name` pair.
    ///
    /// Normalization: lowercase the owner (hosting backends treat owner
    /// names case-insensitively), trim a trailing `.git` from the name
    /// (a common clone-URL artifact that must not create two cache
    /// entries for the same repository), and percent-decode both parts.
    pub fn new(owner: &str, name: &str) -> Self {
        let owner = percent_decode(owner).to_lowercase();
        let name = percent_decode(name.trim_end_matches(".git"));
        Self(format!("{owner}/{name}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanonicalKey({:?})", self.0)
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(b) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// How much Git data is present locally for a repo (spec §3). Ordered so
/// escalation checks reduce to `new_level >= current_level`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataLevel {
    #[default]
    None,
    Refs,
    Shallow,
    Full,
}

impl DataLevel {
    pub fn satisfies(self, requested: DataLevel) -> bool {
        self >= requested
    }
}

impl fmt::Display for DataLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Refs => "refs",
            Self::Shallow => "shallow",
            Self::Full => "full",
        };
        f.write_str(s)
    }
}

/// The two namespaces a ref record can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Heads,
    Tags,
}

/// A single ref belonging to a repo (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRecord {
    pub kind: RefKind,
    pub name: String,
    #[serde(with = "oid_serde")]
    pub oid: Oid,
    #[serde(default, with = "oid_vec_serde")]
    pub lineage: Vec<Oid>,
}

impl RefRecord {
    /// The `(type, name)` pair that ref-merging dedups and orders on.
    pub fn key(&self) -> (RefKind, &str) {
        (self.kind, self.name.as_str())
    }
}

mod oid_serde {
    use super::Oid;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(oid: &Oid, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(oid)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Oid, D::Error> {
        let s = String::deserialize(d)?;
        Oid::from_str(&s).map_err(serde::de::Error::custom)
    }
}

mod oid_vec_serde {
    use super::Oid;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(oids: &[Oid], s: S) -> Result<S::Ok, S::Error> {
        let strings: Vec<String> = oids.iter().map(ToString::to_string).collect();
        strings.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Oid>, D::Error> {
        let strings = Vec::<String>::deserialize(d)?;
        strings
            .iter()
            .map(|s| Oid::from_str(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// A replaceable signed message declaring a repo's refs at a moment in
/// time (spec §3, NIP-34 kind `30618`; the maintainer-list/ownership
/// announcement is kind `30617` and is represented the same way, with
/// `refs` left empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateAnnouncement {
    /// The repo this announcement concerns.
    pub subject: CanonicalKey,
    /// Explicit HEAD ref name (e.g. `refs/heads/main`), if advertised.
    pub head: Option<String>,
    pub refs: Vec<RefRecord>,
    pub author: PubKey,
    /// Logical (Nostr `created_at`, Unix seconds) timestamp. Ties are
    /// broken lexically by `author` (spec §4.D).
    pub timestamp: i64,
    /// Maintainers listed in this announcement, if it is (or includes)
    /// an ownership announcement. The owner is always implicitly a
    /// maintainer and need not appear here.
    pub maintainers: Vec<PubKey>,
    /// True for pre-NIP-34-ref-record announcements that encoded refs as
    /// flat, positionally-paired tags (`["ref", name, oid]`) rather than
    /// structured records. `refs` has already been reconstructed from
    /// that layout by the adapter that produced this value; the flag is
    /// kept only so callers can tell which events needed reconstruction.
    #[serde(default)]
    pub legacy_encoding: bool,
}

/// The union of a repo's owner and the identities its signed
/// announcement lists as maintainers. Only announcements from members
/// of this set are authoritative (spec §3, §4.D).
#[derive(Debug, Clone, Default)]
pub struct MaintainerSet(BTreeSet<PubKey>);

impl MaintainerSet {
    pub fn new(owner: PubKey, maintainers: impl IntoIterator<Item = PubKey>) -> Self {
        let mut set = BTreeSet::new();
        set.insert(owner);
        set.extend(maintainers);
        Self(set)
    }

    pub fn contains(&self, id: &PubKey) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PubKey> {
        self.0.iter()
    }
}

/// Order two announcements the way `merge_signed_state` does: greatest
/// timestamp wins, ties broken by lexical author order.
pub(crate) fn announcement_order(a: &StateAnnouncement, b: &StateAnnouncement) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.author.to_string().cmp(&b.author.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_pure_and_total() {
        let a = CanonicalKey::new("Alice", "proj");
        let b = CanonicalKey::new("alice", "proj");
        assert_eq!(a, b);

        let c = CanonicalKey::new("alice", "proj.git");
        assert_eq!(a, c);
    }

    #[test]
    fn canonical_key_distinguishes_different_repos() {
        let a = CanonicalKey::new("alice", "proj");
        let b = CanonicalKey::new("bob", "proj");
        assert_ne!(a, b);
    }

    #[test]
    fn data_level_is_ordered() {
        assert!(DataLevel::None < DataLevel::Refs);
        assert!(DataLevel::Refs < DataLevel::Shallow);
        assert!(DataLevel::Shallow < DataLevel::Full);
        assert!(DataLevel::Full.satisfies(DataLevel::Shallow));
        assert!(!DataLevel::Refs.satisfies(DataLevel::Full));
    }

    #[test]
    fn pubkey_round_trips_through_display() {
        let hex = "a".repeat(64);
        let key: PubKey = hex.parse().unwrap();
        assert_eq!(key.to_string(), hex);
    }

    #[qcheck_macros::quickcheck]
    fn canonical_key_pure(owner: String, name: String) -> bool {
        CanonicalKey::new(&owner, &name) == CanonicalKey::new(&owner, &name)
    }
}
