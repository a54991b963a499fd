//! Session manager (spec §4.E): owns escalation of a repo's local data
//! level, clone-URL fallback, and in-flight deduplication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gitmesh_core::cache::{CacheEntry, CacheStore};
use gitmesh_core::model::{CanonicalKey, DataLevel};

use crate::error::Error;
use crate::progress::{ProgressEvent, ProgressKind, ProgressSink};
use crate::registry::JobRegistry;

/// Deepening applied when a shallow-clone's history proves insufficient
/// for a query, capped per spec §4.E.
const MAX_AUTO_DEEPEN: usize = 1000;

pub struct SessionManager<C: CacheStore> {
    root: PathBuf,
    cache: Arc<C>,
    registry: JobRegistry<Result<DataLevel, Arc<Error>>>,
}

impl<C: CacheStore> SessionManager<C> {
    pub fn new(root: impl Into<PathBuf>, cache: Arc<C>) -> Self {
        Self {
            root: root.into(),
            cache,
            registry: JobRegistry::new(),
        }
    }

    pub fn repo_path(&self, key: &CanonicalKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// The cache store this manager reads and writes through, for callers
    /// in other crates (e.g. `gitmesh-patch::safe_push`) that need to
    /// consult it directly rather than through a session-manager method.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Current data level for `key`, derived from what's actually on disk
    /// rather than trusted blindly from the cache.
    pub fn get_data_level(&self, key: &CanonicalKey) -> Result<DataLevel, Error> {
        let path = self.repo_path(key);
        let Ok(repo) = git2::Repository::open(&path) else {
            return Ok(DataLevel::None);
        };
        if repo.is_shallow() {
            Ok(DataLevel::Shallow)
        } else if repo.head().is_ok() {
            Ok(DataLevel::Full)
        } else {
            Ok(DataLevel::Refs)
        }
    }

    /// Ensure `key` has at least [`DataLevel::Refs`] locally: the remote
    /// has been consulted and its clone URL recorded, but no objects need
    /// be fetched yet.
    pub fn initialize_repo(
        &self,
        key: &CanonicalKey,
        clone_urls: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<DataLevel, Error> {
        self.escalate(key, DataLevel::Refs, clone_urls, None, None, sink)
    }

    /// Ensure `key` has at least [`DataLevel::Shallow`] at `branch`.
    pub fn ensure_shallow_clone(
        &self,
        key: &CanonicalKey,
        branch: Option<&str>,
        clone_urls: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<DataLevel, Error> {
        self.escalate(key, DataLevel::Shallow, clone_urls, branch, Some(1), sink)
    }

    /// Ensure `key` has at least [`DataLevel::Full`] at `branch`, with at
    /// least `depth` commits reachable from it.
    pub fn ensure_full_clone(
        &self,
        key: &CanonicalKey,
        branch: Option<&str>,
        depth: usize,
        clone_urls: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<DataLevel, Error> {
        self.escalate(
            key,
            DataLevel::Full,
            clone_urls,
            branch,
            Some(depth),
            sink,
        )
    }

    /// Consult the cache and the remote's advertised HEAD, and perform the
    /// minimum sufficient escalation (spec §4.E).
    pub fn smart_initialize_repo(
        &self,
        key: &CanonicalKey,
        clone_urls: &[String],
        force_update: bool,
        sink: &dyn ProgressSink,
    ) -> Result<DataLevel, Error> {
        let current = self.get_data_level(key)?;
        if !force_update && current >= DataLevel::Refs {
            let entry = self.cache.get(key)?;
            let stale = crate::sync::needs_update(key, clone_urls, entry.as_ref())?;
            if !stale {
                return Ok(current);
            }
        }
        self.initialize_repo(key, clone_urls, sink)
    }

    /// Remove all local state for `key`: the working tree and every cache
    /// row. Leaves no partial state behind on either success or failure
    /// partway through (spec §4.E: "atomic reset").
    pub fn delete_repo(&self, key: &CanonicalKey) -> Result<(), Error> {
        let path = self.repo_path(key);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        self.cache.delete(key)?;
        Ok(())
    }

    /// Re-run `getCommitHistory`-style queries against a shallow clone
    /// whose history proved insufficient, deepening once by doubling the
    /// current depth (capped at [`MAX_AUTO_DEEPEN`]) and retrying.
    pub fn deepen_once(
        &self,
        key: &CanonicalKey,
        branch: &str,
        current_depth: usize,
        clone_urls: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<DataLevel, Error> {
        let next_depth = (current_depth.saturating_mul(2)).min(MAX_AUTO_DEEPEN);
        self.ensure_full_clone(key, Some(branch), next_depth, clone_urls, sink)
    }

    fn escalate(
        &self,
        key: &CanonicalKey,
        requested: DataLevel,
        clone_urls: &[String],
        branch: Option<&str>,
        depth: Option<usize>,
        sink: &dyn ProgressSink,
    ) -> Result<DataLevel, Error> {
        let current = self.get_data_level(key)?;
        if current.satisfies(requested) {
            return Ok(current);
        }
        if clone_urls.is_empty() {
            return Err(Error::NoUrls);
        }

        let key = key.clone();
        let clone_urls = clone_urls.to_vec();
        let branch = branch.map(str::to_owned);
        let path = self.repo_path(&key);
        let cache = self.cache.clone();

        let result = self.registry.run(&key, move || {
            fetch_with_fallback(&path, &cache, &key, &clone_urls, branch.as_deref(), depth, requested, sink)
                .map_err(Arc::new)
        });

        result.map_err(|e| {
            Arc::try_unwrap(e).unwrap_or_else(|e| Error::Io(std::io::Error::other(e.to_string())))
        })
    }
}

/// Try each clone URL in order until one succeeds at reaching `requested`.
/// The successful URL is recorded in the cache and preferred by future
/// calls (spec §4.E).
#[allow(clippy::too_many_arguments)]
fn fetch_with_fallback<C: CacheStore>(
    path: &Path,
    cache: &C,
    key: &CanonicalKey,
    clone_urls: &[String],
    branch: Option<&str>,
    depth: Option<usize>,
    requested: DataLevel,
    sink: &dyn ProgressSink,
) -> Result<DataLevel, Error> {
    sink.emit(ProgressEvent::phase(key, ProgressKind::Clone, "start"));

    let mut last_err = None;
    let mut ordered = clone_urls.to_vec();
    if let Some(entry) = cache.get(key)? {
        prefer_recorded_url(&mut ordered, &entry);
    }

    for url in &ordered {
        match fetch_one(path, url, branch, depth, requested, key, sink) {
            Ok(level) => {
                let mut entry = cache.get(key)?.unwrap_or_default();
                entry.clone_urls = ordered.clone();
                entry.data_level = level;
                entry.last_sync = Some(now());
                cache.put(key, &entry)?;
                sink.emit(ProgressEvent::phase(key, ProgressKind::Clone, "complete"));
                return Ok(level);
            }
            Err(e) => last_err = Some(e),
        }
    }

    sink.emit(ProgressEvent::phase(key, ProgressKind::Clone, "error"));
    Err(last_err.unwrap_or(Error::AllUrlsFailed))
}

/// Move the cache's last-successful URL to the front, so it's tried
/// first on the next attempt (spec §4.E: "preferred thereafter").
fn prefer_recorded_url(urls: &mut [String], entry: &CacheEntry) {
    if let Some(preferred) = entry.clone_urls.first() {
        if let Some(pos) = urls.iter().position(|u| u == preferred) {
            urls.swap(0, pos);
        }
    }
}

fn fetch_one(
    path: &Path,
    url: &str,
    branch: Option<&str>,
    depth: Option<usize>,
    requested: DataLevel,
    key: &CanonicalKey,
    sink: &dyn ProgressSink,
) -> Result<DataLevel, Error> {
    if requested == DataLevel::Refs {
        // A refs-only probe doesn't need a local repository: just ask the
        // remote what it has.
        let mut remote = git2::Remote::create_detached(url)?;
        remote.connect(git2::Direction::Fetch)?;
        remote.disconnect()?;
        return Ok(DataLevel::Refs);
    }

    std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))?;

    let mut callbacks = git2::RemoteCallbacks::new();
    let key_cloned = key.clone();
    callbacks.transfer_progress(move |stats| {
        sink.emit(ProgressEvent::progress(
            &key_cloned,
            ProgressKind::Clone,
            "fetching",
            stats.received_objects() as u64,
            stats.total_objects() as u64,
        ));
        true
    });

    let mut fetch_opts = git2::FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks);
    if let Some(depth) = depth {
        fetch_opts.depth(depth as i32);
    }

    let repo = if path.join(".git").exists() || git2::Repository::open_bare(path).is_ok() {
        git2::Repository::open(path)?
    } else {
        git2::build::RepoBuilder::new().bare(false).clone(url, path)?
    };

    {
        let mut remote = match repo.find_remote("origin") {
            Ok(remote) => remote,
            Err(_) => repo.remote("origin", url)?,
        };
        let refspec = branch
            .map(|b| format!("+refs/heads/{b}:refs/remotes/origin/{b}"))
            .unwrap_or_else(|| "+refs/heads/*:refs/remotes/origin/*".to_owned());
        remote.fetch(&[refspec], Some(&mut fetch_opts), None)?;
    }

    if let Some(branch) = branch {
        let reference = repo.find_reference(&format!("refs/remotes/origin/{branch}"))?;
        let commit = reference.peel_to_commit()?;
        repo.branch(branch, &commit, true)?;
        repo.set_head(&format!("refs/heads/{branch}"))?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
    }

    if repo.is_shallow() && depth.is_none() {
        Ok(DataLevel::Shallow)
    } else if depth.is_some() {
        Ok(DataLevel::Full)
    } else {
        Ok(DataLevel::Shallow)
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitmesh_core::cache::mem::MemCacheStore;
    use crate::progress::NoopSink;
    use tempfile::TempDir;

    fn upstream_with_commit(dir: &Path) -> git2::Oid {
        let repo = git2::Repository::init(dir).unwrap();
        let sig = git2::Signature::now("t", "t@example.com").unwrap();
        let tree = repo.find_tree(repo.index().unwrap().write_tree().unwrap()).unwrap();
        let oid = repo.commit(None, &sig, &sig, "c1", &tree, &[]).unwrap();
        repo.branch("main", &repo.find_commit(oid).unwrap(), true).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        oid
    }

    #[test]
    fn get_data_level_reports_none_for_missing_repo() {
        let workdir = TempDir::new().unwrap();
        let manager = SessionManager::new(workdir.path().join("repos"), Arc::new(MemCacheStore::new()));
        let key = CanonicalKey::new("alice", "proj");
        assert_eq!(manager.get_data_level(&key).unwrap(), DataLevel::None);
    }

    #[test]
    fn shallow_clone_escalates_from_none() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_commit(upstream_dir.path());

        let workdir = TempDir::new().unwrap();
        let manager = SessionManager::new(workdir.path().join("repos"), Arc::new(MemCacheStore::new()));
        let key = CanonicalKey::new("alice", "proj");
        let url = upstream_dir.path().to_string_lossy().into_owned();

        let level = manager
            .ensure_shallow_clone(&key, Some("main"), &[url], &NoopSink)
            .unwrap();
        assert!(level >= DataLevel::Shallow);
    }

    #[test]
    fn escalation_is_a_no_op_when_already_satisfied() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_commit(upstream_dir.path());

        let workdir = TempDir::new().unwrap();
        let manager = SessionManager::new(workdir.path().join("repos"), Arc::new(MemCacheStore::new()));
        let key = CanonicalKey::new("alice", "proj");
        let url = upstream_dir.path().to_string_lossy().into_owned();

        manager
            .ensure_full_clone(&key, Some("main"), 10, &[url.clone()], &NoopSink)
            .unwrap();
        let level = manager
            .ensure_shallow_clone(&key, Some("main"), &[url], &NoopSink)
            .unwrap();
        assert_eq!(level, DataLevel::Full);
    }

    #[test]
    fn smart_initialize_repo_consults_remote_head_instead_of_trusting_cache_presence() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_commit(upstream_dir.path());

        let workdir = TempDir::new().unwrap();
        let manager = SessionManager::new(workdir.path().join("repos"), Arc::new(MemCacheStore::new()));
        let key = CanonicalKey::new("alice", "proj");
        let url = upstream_dir.path().to_string_lossy().into_owned();

        manager
            .ensure_shallow_clone(&key, Some("main"), &[url], &NoopSink)
            .unwrap();

        // A cache entry whose `last_head` is set but stale-by-time, paired with
        // a clone URL that no longer resolves. The old `.is_some()` check would
        // trust the mere presence of `last_head` and never touch the network;
        // a correct staleness check must consult the remote and surface the
        // failure instead of silently reporting the repo up to date.
        let mut entry = manager.cache().get(&key).unwrap().unwrap();
        entry.last_head = Some("0".repeat(40));
        entry.last_sync = Some(0);
        manager.cache().put(&key, &entry).unwrap();

        let bogus_url = "file:///nonexistent/path/that/does/not/exist".to_string();
        let result = manager.smart_initialize_repo(&key, &[bogus_url], false, &NoopSink);
        assert!(result.is_err());
    }

    #[test]
    fn delete_repo_removes_working_tree_and_cache() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_commit(upstream_dir.path());

        let workdir = TempDir::new().unwrap();
        let manager = SessionManager::new(workdir.path().join("repos"), Arc::new(MemCacheStore::new()));
        let key = CanonicalKey::new("alice", "proj");
        let url = upstream_dir.path().to_string_lossy().into_owned();

        manager
            .ensure_shallow_clone(&key, Some("main"), &[url], &NoopSink)
            .unwrap();
        manager.delete_repo(&key).unwrap();

        assert_eq!(manager.get_data_level(&key).unwrap(), DataLevel::None);
    }
}
