//! Remote sync (spec §4.F).

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gitmesh_core::cache::{CacheEntry, CacheStore};
use gitmesh_core::model::CanonicalKey;
use gitmesh_core::refs;

use crate::error::Error;

/// Minimum time a cached entry is trusted before a remote HEAD check is
/// forced, regardless of whether the caller asks (spec §4.F).
const MIN_STALENESS: Duration = Duration::from_secs(60);

/// True when `key` should be re-synced: no cached entry, the cache is
/// older than [`MIN_STALENESS`], or the remote's advertised HEAD differs
/// from what's cached. Discovery is a refs-only query, never a fetch.
pub fn needs_update(
    key: &CanonicalKey,
    clone_urls: &[String],
    cached_entry: Option<&CacheEntry>,
) -> Result<bool, Error> {
    let Some(entry) = cached_entry else {
        return Ok(true);
    };

    let stale = match entry.last_sync {
        None => true,
        Some(last_sync) => now() - last_sync > MIN_STALENESS.as_secs() as i64,
    };
    if stale {
        return Ok(true);
    }

    let Some(url) = clone_urls.first() else {
        return Ok(true);
    };
    let remote_head = remote_head(url)?;
    Ok(remote_head != entry.last_head)
}

/// The result of a successful sync (spec §4.F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub branch: String,
    pub previous_head: Option<String>,
    pub new_head: String,
    /// True when the local branch could be fast-forwarded; false when the
    /// local and remote branches have diverged. A divergence is reported,
    /// never silently resolved — callers use the safe-push flow for that.
    pub fast_forwarded: bool,
}

/// Resolve `branch` (spec §4.D), fetch updates for it, and fast-forward
/// the local ref if possible. Never rewrites history.
pub fn sync_with_remote<C: CacheStore>(
    repo_dir: &Path,
    key: &CanonicalKey,
    clone_urls: &[String],
    branch: Option<&str>,
    cache: &C,
) -> Result<SyncResult, Error> {
    let branch = refs::resolve_branch(repo_dir, branch)?;
    let url = clone_urls.first().ok_or(Error::NoUrls)?;

    let repo = git2::Repository::open(repo_dir)?;
    let previous_head = repo
        .find_reference(&format!("refs/heads/{branch}"))
        .ok()
        .and_then(|r| r.target())
        .map(|oid| oid.to_string());

    let mut remote = match repo.find_remote("origin") {
        Ok(remote) => remote,
        Err(_) => repo.remote("origin", url)?,
    };
    remote.fetch(
        &[format!("+refs/heads/{branch}:refs/remotes/origin/{branch}")],
        None,
        None,
    )?;

    let remote_ref = repo.find_reference(&format!("refs/remotes/origin/{branch}"))?;
    let remote_commit = remote_ref.peel_to_commit()?;
    let new_head = remote_commit.id().to_string();

    let fast_forwarded = match repo.find_branch(&branch, git2::BranchType::Local) {
        Ok(mut local) => {
            let local_oid = local.get().target();
            let is_descendant = local_oid
                .map(|local_oid| repo.graph_descendant_of(remote_commit.id(), local_oid).unwrap_or(false))
                .unwrap_or(true);
            if is_descendant {
                local.get_mut().set_target(remote_commit.id(), "fast-forward")?;
                true
            } else {
                false
            }
        }
        Err(_) => {
            repo.branch(&branch, &remote_commit, false)?;
            true
        }
    };

    let mut entry = cache.get(key)?.unwrap_or_default();
    entry.last_head = Some(new_head.clone());
    entry.last_sync = Some(now());
    cache.put(key, &entry)?;

    Ok(SyncResult {
        branch,
        previous_head,
        new_head,
        fast_forwarded,
    })
}

fn remote_head(url: &str) -> Result<Option<String>, Error> {
    let mut remote = git2::Remote::create_detached(url)?;
    remote.connect(git2::Direction::Fetch)?;
    let head = remote
        .list()?
        .iter()
        .find(|h| h.name() == "HEAD")
        .map(|h| h.oid().to_string());
    remote.disconnect()?;
    Ok(head)
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitmesh_core::cache::mem::MemCacheStore;
    use tempfile::TempDir;

    fn upstream_with_commit(dir: &Path) -> git2::Oid {
        let repo = git2::Repository::init(dir).unwrap();
        let sig = git2::Signature::now("t", "t@example.com").unwrap();
        let tree = repo
            .find_tree(repo.index().unwrap().write_tree().unwrap())
            .unwrap();
        let oid = repo.commit(None, &sig, &sig, "c1", &tree, &[]).unwrap();
        repo.branch("main", &repo.find_commit(oid).unwrap(), true)
            .unwrap();
        repo.set_head("refs/heads/main").unwrap();
        oid
    }

    #[test]
    fn needs_update_is_true_with_no_cached_entry() {
        let key = CanonicalKey::new("alice", "proj");
        assert!(needs_update(&key, &["https://example.com".into()], None).unwrap());
    }

    #[test]
    fn needs_update_is_true_when_cache_is_stale() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_commit(upstream_dir.path());
        let url = upstream_dir.path().to_string_lossy().into_owned();

        let key = CanonicalKey::new("alice", "proj");
        let entry = CacheEntry {
            last_sync: Some(0),
            ..Default::default()
        };
        assert!(needs_update(&key, &[url], Some(&entry)).unwrap());
    }

    #[test]
    fn sync_fast_forwards_local_branch() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_commit(upstream_dir.path());
        let url = upstream_dir.path().to_string_lossy().into_owned();

        let local_dir = TempDir::new().unwrap();
        git2::build::RepoBuilder::new()
            .clone(&url, local_dir.path())
            .unwrap();

        // Advance upstream by one commit.
        {
            let repo = git2::Repository::open(upstream_dir.path()).unwrap();
            let sig = git2::Signature::now("t", "t@example.com").unwrap();
            let parent = repo.head().unwrap().peel_to_commit().unwrap();
            let tree = repo
                .find_tree(repo.index().unwrap().write_tree().unwrap())
                .unwrap();
            repo.commit(
                Some("refs/heads/main"),
                &sig,
                &sig,
                "c2",
                &tree,
                &[&parent],
            )
            .unwrap();
        }

        let cache = MemCacheStore::new();
        let key = CanonicalKey::new("alice", "proj");
        let result = sync_with_remote(local_dir.path(), &key, &[url], Some("main"), &cache).unwrap();
        assert!(result.fast_forwarded);
    }
}
