//! Repo cache store (spec §4.C).

use std::time;

use serde::{Deserialize, Serialize};
use sqlite as sql;
use thiserror::Error;

use crate::db::{self, Database};
use crate::error::{Categorize, ErrorKind};
use crate::model::{CanonicalKey, DataLevel, Oid};

/// TTL for commit-history snapshots (spec §3).
pub const COMMIT_HISTORY_TTL: time::Duration = time::Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Db(#[from] db::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Categorize for Error {
    fn category(&self) -> ErrorKind {
        ErrorKind::FsError
    }
}

/// Persisted per-repo metadata (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    /// Ordered list of clone URLs, first-working-wins (spec §4.E).
    pub clone_urls: Vec<String>,
    #[serde(default)]
    pub last_head: Option<String>,
    #[serde(default)]
    pub last_sync: Option<i64>,
    /// The data level last observed for this repo, so `smartInitializeRepo`
    /// can answer from cache alone without touching disk or network.
    #[serde(default)]
    pub data_level: DataLevel,
}

fn data_level_as_str(level: DataLevel) -> &'static str {
    match level {
        DataLevel::None => "none",
        DataLevel::Refs => "refs",
        DataLevel::Shallow => "shallow",
        DataLevel::Full => "full",
    }
}

fn data_level_from_str(s: &str) -> DataLevel {
    match s {
        "refs" => DataLevel::Refs,
        "shallow" => DataLevel::Shallow,
        "full" => DataLevel::Full,
        _ => DataLevel::None,
    }
}

/// A cached commit-history query result, bounded per spec §3 (count +
/// depth + age).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitHistorySnapshot {
    pub oids: Vec<String>,
    pub depth: usize,
}

/// A cached merge-analysis result, keyed by `(patch id, target branch)`
/// and invalidated when the target branch's tip changes (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedMergeAnalysis {
    pub target_tip: String,
    /// Opaque to this crate: the JSON-serialized `MergeAnalysis` value
    /// from `gitmesh-patch`, which depends on this crate and so cannot
    /// be named here without a cycle.
    pub result_json: String,
}

/// Operations exposed by the cache store (spec §4.C). Implemented by
/// [`SqliteCacheStore`] for durability across process restarts, and by
/// an in-memory store for tests.
pub trait CacheStore {
    fn get(&self, key: &CanonicalKey) -> Result<Option<CacheEntry>, Error>;
    fn put(&self, key: &CanonicalKey, entry: &CacheEntry) -> Result<(), Error>;
    fn delete(&self, key: &CanonicalKey) -> Result<(), Error>;

    fn set_commit_history(
        &self,
        key: &CanonicalKey,
        branch: &str,
        snapshot: &CommitHistorySnapshot,
    ) -> Result<(), Error>;
    /// Returns `None` if there is no entry, or if the stored entry is
    /// older than [`COMMIT_HISTORY_TTL`] (spec §4.C).
    fn get_commit_history(
        &self,
        key: &CanonicalKey,
        branch: &str,
    ) -> Result<Option<CommitHistorySnapshot>, Error>;

    fn set_merge_analysis(
        &self,
        key: &CanonicalKey,
        patch_id: &str,
        target_branch: &str,
        target_tip: Oid,
        result_json: &str,
    ) -> Result<(), Error>;
    /// Returns `None` if there is no entry, or if the stored `target_tip`
    /// no longer matches `current_tip` (spec §3: "invalidated by
    /// target-branch tip change").
    fn get_merge_analysis(
        &self,
        key: &CanonicalKey,
        patch_id: &str,
        target_branch: &str,
        current_tip: Oid,
    ) -> Result<Option<CachedMergeAnalysis>, Error>;

    /// Drop expired commit-history and superseded merge-analysis rows.
    /// Does not touch `repo-cache` entries, which have no TTL of their
    /// own (spec §4.C).
    fn clear_old_cache(&self) -> Result<(), Error>;
}

/// A durable, file-backed implementation built on the `sqlite` crate
/// (grounded on `radicle::node::db` and `radicle::node::notifications::
/// store`, which use the same crate and migration convention for other
/// per-node state).
pub struct SqliteCacheStore {
    db: Database,
}

impl SqliteCacheStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    pub fn memory() -> Result<Self, Error> {
        Ok(Self {
            db: Database::memory()?,
        })
    }

    fn now() -> i64 {
        time::SystemTime::now()
            .duration_since(time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, key: &CanonicalKey) -> Result<Option<CacheEntry>, Error> {
        let mut stmt = self.db.prepare(
            "SELECT \"clone-urls\", \"last-head\", \"last-sync\", \"data-level\"
             FROM \"repo-cache\" WHERE \"key\" = ?",
        )?;
        stmt.bind((1, key.as_str()))?;

        let Some(row) = stmt.into_iter().next() else {
            return Ok(None);
        };
        let row = row?;
        let clone_urls: Vec<String> =
            serde_json::from_str(row.read::<&str, _>(0)).unwrap_or_default();
        let last_head: Option<String> = row.read::<Option<&str>, _>(1).map(str::to_owned);
        let last_sync: Option<i64> = row.read::<Option<i64>, _>(2);
        let data_level = data_level_from_str(row.read::<&str, _>(3));

        Ok(Some(CacheEntry {
            clone_urls,
            last_head,
            last_sync,
            data_level,
        }))
    }

    fn put(&self, key: &CanonicalKey, entry: &CacheEntry) -> Result<(), Error> {
        let urls = serde_json::to_string(&entry.clone_urls)?;
        let data_level = data_level_as_str(entry.data_level);
        let mut stmt = self.db.prepare(
            "INSERT INTO \"repo-cache\" (\"key\", \"clone-urls\", \"last-head\", \"last-sync\", \"data-level\")
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(\"key\") DO UPDATE
             SET \"clone-urls\" = ?2, \"last-head\" = ?3, \"last-sync\" = ?4, \"data-level\" = ?5",
        )?;
        stmt.bind((1, key.as_str()))?;
        stmt.bind((2, urls.as_str()))?;
        stmt.bind((3, entry.last_head.as_deref()))?;
        stmt.bind((4, entry.last_sync))?;
        stmt.bind((5, data_level))?;
        stmt.next()?;

        Ok(())
    }

    fn delete(&self, key: &CanonicalKey) -> Result<(), Error> {
        db::transaction(&self.db, |db| {
            for table in ["repo-cache", "commit-history", "merge-analysis"] {
                let mut stmt =
                    db.prepare(format!("DELETE FROM \"{table}\" WHERE \"key\" = ?"))?;
                stmt.bind((1, key.as_str()))?;
                stmt.next()?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn set_commit_history(
        &self,
        key: &CanonicalKey,
        branch: &str,
        snapshot: &CommitHistorySnapshot,
    ) -> Result<(), Error> {
        let json = serde_json::to_string(snapshot)?;
        let mut stmt = self.db.prepare(
            "INSERT INTO \"commit-history\" (\"key\", \"branch\", \"snapshot\", \"last-updated\")
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(\"key\", \"branch\") DO UPDATE
             SET \"snapshot\" = ?3, \"last-updated\" = ?4",
        )?;
        stmt.bind((1, key.as_str()))?;
        stmt.bind((2, branch))?;
        stmt.bind((3, json.as_str()))?;
        stmt.bind((4, Self::now()))?;
        stmt.next()?;

        Ok(())
    }

    fn get_commit_history(
        &self,
        key: &CanonicalKey,
        branch: &str,
    ) -> Result<Option<CommitHistorySnapshot>, Error> {
        let mut stmt = self.db.prepare(
            "SELECT \"snapshot\", \"last-updated\" FROM \"commit-history\"
             WHERE \"key\" = ?1 AND \"branch\" = ?2",
        )?;
        stmt.bind((1, key.as_str()))?;
        stmt.bind((2, branch))?;

        let Some(row) = stmt.into_iter().next() else {
            return Ok(None);
        };
        let row = row?;
        let last_updated = row.read::<i64, _>(1);
        if Self::now() - last_updated > COMMIT_HISTORY_TTL.as_secs() as i64 {
            return Ok(None);
        }
        let snapshot = serde_json::from_str(row.read::<&str, _>(0))?;
        Ok(Some(snapshot))
    }

    fn set_merge_analysis(
        &self,
        key: &CanonicalKey,
        patch_id: &str,
        target_branch: &str,
        target_tip: Oid,
        result_json: &str,
    ) -> Result<(), Error> {
        let mut stmt = self.db.prepare(
            "INSERT INTO \"merge-analysis\"
                (\"key\", \"patch-id\", \"target-branch\", \"target-tip\", \"result\")
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(\"key\", \"patch-id\", \"target-branch\") DO UPDATE
             SET \"target-tip\" = ?4, \"result\" = ?5",
        )?;
        stmt.bind((1, key.as_str()))?;
        stmt.bind((2, patch_id))?;
        stmt.bind((3, target_branch))?;
        stmt.bind((4, target_tip.to_string().as_str()))?;
        stmt.bind((5, result_json))?;
        stmt.next()?;

        Ok(())
    }

    fn get_merge_analysis(
        &self,
        key: &CanonicalKey,
        patch_id: &str,
        target_branch: &str,
        current_tip: Oid,
    ) -> Result<Option<CachedMergeAnalysis>, Error> {
        let mut stmt = self.db.prepare(
            "SELECT \"target-tip\", \"result\" FROM \"merge-analysis\"
             WHERE \"key\" = ?1 AND \"patch-id\" = ?2 AND \"target-branch\" = ?3",
        )?;
        stmt.bind((1, key.as_str()))?;
        stmt.bind((2, patch_id))?;
        stmt.bind((3, target_branch))?;

        let Some(row) = stmt.into_iter().next() else {
            return Ok(None);
        };
        let row = row?;
        let target_tip = row.read::<&str, _>(0).to_owned();
        if target_tip != current_tip.to_string() {
            return Ok(None);
        }
        Ok(Some(CachedMergeAnalysis {
            target_tip,
            result_json: row.read::<&str, _>(1).to_owned(),
        }))
    }

    fn clear_old_cache(&self) -> Result<(), Error> {
        let cutoff = Self::now() - COMMIT_HISTORY_TTL.as_secs() as i64;
        let mut stmt = self
            .db
            .prepare("DELETE FROM \"commit-history\" WHERE \"last-updated\" < ?")?;
        stmt.bind((1, cutoff))?;
        stmt.next()?;

        Ok(())
    }
}

impl From<sql::Error> for Error {
    fn from(e: sql::Error) -> Self {
        Self::Db(db::Error::Internal(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CanonicalKey {
        CanonicalKey::new("alice", "proj")
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = SqliteCacheStore::memory().unwrap();
        let entry = CacheEntry {
            clone_urls: vec!["https://example.com/alice/proj.git".into()],
            last_head: Some("abc123".into()),
            last_sync: Some(1000),
            data_level: DataLevel::Shallow,
        };
        store.put(&key(), &entry).unwrap();

        let got = store.get(&key()).unwrap().unwrap();
        assert_eq!(got.clone_urls, entry.clone_urls);
        assert_eq!(got.last_head, entry.last_head);
        assert_eq!(got.last_sync, entry.last_sync);
        assert_eq!(got.data_level, entry.data_level);
    }

    #[test]
    fn data_level_survives_a_round_trip_for_every_variant() {
        let store = SqliteCacheStore::memory().unwrap();
        for (i, level) in [DataLevel::None, DataLevel::Refs, DataLevel::Shallow, DataLevel::Full]
            .into_iter()
            .enumerate()
        {
            let key = CanonicalKey::new("alice", &format!("proj-{i}"));
            store
                .put(&key, &CacheEntry { data_level: level, ..CacheEntry::default() })
                .unwrap();
            assert_eq!(store.get(&key).unwrap().unwrap().data_level, level);
        }
    }

    #[test]
    fn missing_entry_is_none() {
        let store = SqliteCacheStore::memory().unwrap();
        assert!(store.get(&key()).unwrap().is_none());
    }

    #[test]
    fn delete_clears_all_tables() {
        let store = SqliteCacheStore::memory().unwrap();
        store.put(&key(), &CacheEntry::default()).unwrap();
        store
            .set_commit_history(
                &key(),
                "main",
                &CommitHistorySnapshot {
                    oids: vec!["a".into()],
                    depth: 1,
                },
            )
            .unwrap();

        store.delete(&key()).unwrap();

        assert!(store.get(&key()).unwrap().is_none());
        assert!(store.get_commit_history(&key(), "main").unwrap().is_none());
    }

    #[test]
    fn merge_analysis_invalidated_by_tip_change() {
        let store = SqliteCacheStore::memory().unwrap();
        let tip_a = Oid::from_str("a".repeat(40).as_str()).unwrap();
        let tip_b = Oid::from_str("b".repeat(40).as_str()).unwrap();

        store
            .set_merge_analysis(&key(), "patch-1", "main", tip_a, "{\"analysis\":\"clean\"}")
            .unwrap();

        assert!(store
            .get_merge_analysis(&key(), "patch-1", "main", tip_a)
            .unwrap()
            .is_some());
        assert!(store
            .get_merge_analysis(&key(), "patch-1", "main", tip_b)
            .unwrap()
            .is_none());
    }

    use std::str::FromStr;
}

/// An in-memory [`CacheStore`], for tests.
pub mod mem {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemCacheStore {
        entries: Mutex<HashMap<CanonicalKey, CacheEntry>>,
        commit_history: Mutex<HashMap<(CanonicalKey, String), (CommitHistorySnapshot, i64)>>,
        merge_analysis: Mutex<HashMap<(CanonicalKey, String, String), CachedMergeAnalysis>>,
    }

    impl MemCacheStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl CacheStore for MemCacheStore {
        fn get(&self, key: &CanonicalKey) -> Result<Option<CacheEntry>, Error> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn put(&self, key: &CanonicalKey, entry: &CacheEntry) -> Result<(), Error> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.clone(), entry.clone());
            Ok(())
        }

        fn delete(&self, key: &CanonicalKey) -> Result<(), Error> {
            self.entries.lock().unwrap().remove(key);
            self.commit_history
                .lock()
                .unwrap()
                .retain(|(k, _), _| k != key);
            self.merge_analysis
                .lock()
                .unwrap()
                .retain(|(k, _, _), _| k != key);
            Ok(())
        }

        fn set_commit_history(
            &self,
            key: &CanonicalKey,
            branch: &str,
            snapshot: &CommitHistorySnapshot,
        ) -> Result<(), Error> {
            let now = SqliteCacheStore::now();
            self.commit_history
                .lock()
                .unwrap()
                .insert((key.clone(), branch.to_owned()), (snapshot.clone(), now));
            Ok(())
        }

        fn get_commit_history(
            &self,
            key: &CanonicalKey,
            branch: &str,
        ) -> Result<Option<CommitHistorySnapshot>, Error> {
            let now = SqliteCacheStore::now();
            let guard = self.commit_history.lock().unwrap();
            Ok(guard
                .get(&(key.clone(), branch.to_owned()))
                .filter(|(_, ts)| now - ts < COMMIT_HISTORY_TTL.as_secs() as i64)
                .map(|(snap, _)| snap.clone()))
        }

        fn set_merge_analysis(
            &self,
            key: &CanonicalKey,
            patch_id: &str,
            target_branch: &str,
            target_tip: Oid,
            result_json: &str,
        ) -> Result<(), Error> {
            self.merge_analysis.lock().unwrap().insert(
                (key.clone(), patch_id.to_owned(), target_branch.to_owned()),
                CachedMergeAnalysis {
                    target_tip: target_tip.to_string(),
                    result_json: result_json.to_owned(),
                },
            );
            Ok(())
        }

        fn get_merge_analysis(
            &self,
            key: &CanonicalKey,
            patch_id: &str,
            target_branch: &str,
            current_tip: Oid,
        ) -> Result<Option<CachedMergeAnalysis>, Error> {
            let guard = self.merge_analysis.lock().unwrap();
            Ok(guard
                .get(&(key.clone(), patch_id.to_owned(), target_branch.to_owned()))
                .filter(|cached| cached.target_tip == current_tip.to_string())
                .cloned())
        }

        fn clear_old_cache(&self) -> Result<(), Error> {
            let now = SqliteCacheStore::now();
            self.commit_history
                .lock()
                .unwrap()
                .retain(|_, (_, ts)| now - *ts <= COMMIT_HISTORY_TTL.as_secs() as i64);
            Ok(())
        }
    }
}
