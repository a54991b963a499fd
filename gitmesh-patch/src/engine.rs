//! Patch engine (spec §4.G): mergeability analysis and patch application.

use std::path::Path;

use gitmesh_core::cache::CacheStore;
use gitmesh_core::model::CanonicalKey;
use gitmesh_core::refs;
use gitmesh_session::progress::{ProgressEvent, ProgressKind, ProgressSink};
use gitmesh_session::SessionManager;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::unidiff::{self, ChangeKind, FileDiff};

/// A patch series to analyze or apply: the unified-diff payload, plus an
/// optional base commit the series was generated against. The base is
/// used to distinguish `already-applied` from `up-to-date` (spec §4.G).
#[derive(Debug, Clone)]
pub struct PatchPayload {
    pub diff: String,
    pub base: Option<git2::Oid>,
}

/// The exhaustive classification of a mergeability check (spec §4.G).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "classification", rename_all = "kebab-case")]
pub enum MergeAnalysis {
    Clean { files_changed: Vec<String> },
    AlreadyApplied,
    UpToDate,
    Conflict { paths: Vec<String> },
    Error { message: String },
}

/// Escalate to a full clone sufficient to include `patch`'s base commit,
/// then analyze its mergeability against `target_branch`, consulting and
/// populating the cache along the way (spec §4.G).
#[allow(clippy::too_many_arguments)]
pub fn analyze_patch_merge<C: CacheStore>(
    session: &SessionManager<C>,
    cache: &C,
    key: &CanonicalKey,
    clone_urls: &[String],
    patch_id: &str,
    patch: &PatchPayload,
    target_branch: Option<&str>,
    sink: &dyn ProgressSink,
) -> Result<MergeAnalysis, Error> {
    let depth = 1000;
    session.ensure_full_clone(key, target_branch, depth, clone_urls, sink)?;
    let repo_dir = session.repo_path(key);

    let branch = refs::resolve_branch(&repo_dir, target_branch).map_err(|_| Error::NoBranches)?;
    let repo = git2::Repository::open(&repo_dir)?;
    let target_commit = repo
        .find_reference(&format!("refs/heads/{branch}"))?
        .peel_to_commit()?;
    let target_tip = target_commit.id();

    if let Some(cached) = cache.get_merge_analysis(key, patch_id, &branch, target_tip)? {
        return Ok(serde_json::from_str(&cached.result_json)?);
    }

    sink.emit(ProgressEvent::phase(key, ProgressKind::Merge, "analyzing"));

    let analysis = match parse_and_classify(&repo, &target_commit, target_tip, patch) {
        Ok(analysis) => analysis,
        Err(e) => {
            sink.emit(ProgressEvent::phase(key, ProgressKind::Merge, "error"));
            return Ok(MergeAnalysis::Error {
                message: e.to_string(),
            });
        }
    };

    sink.emit(ProgressEvent::phase(key, ProgressKind::Merge, "persisting"));
    let result_json = serde_json::to_string(&analysis)?;
    cache.set_merge_analysis(key, patch_id, &branch, target_tip, &result_json)?;
    sink.emit(ProgressEvent::phase(key, ProgressKind::Merge, "complete"));

    Ok(analysis)
}

fn parse_and_classify(
    repo: &git2::Repository,
    target_commit: &git2::Commit,
    target_tip: git2::Oid,
    patch: &PatchPayload,
) -> Result<MergeAnalysis, Error> {
    let files = unidiff::parse(&patch.diff)?;
    let base_is_ancestor = match patch.base {
        Some(base) => repo.graph_descendant_of(target_tip, base).unwrap_or(false),
        None => true,
    };
    classify(repo, target_commit, &files, base_is_ancestor)
}

fn classify(
    repo: &git2::Repository,
    target_commit: &git2::Commit,
    files: &[FileDiff],
    base_is_ancestor: bool,
) -> Result<MergeAnalysis, Error> {
    let tree = target_commit.tree()?;

    let mut conflicts = Vec::new();
    let mut changed = Vec::new();
    let mut all_already_applied = true;

    for file in files {
        let path = file
            .new_path
            .as_deref()
            .or(file.old_path.as_deref())
            .unwrap_or_default();

        let mut content = read_tree_content(repo, &tree, path, file.kind)?;
        let mut file_touched = false;
        let mut last_pos = 0;
        let mut delta: isize = 0;

        for hunk in &file.hunks {
            if unidiff::hunk_already_applied(&content, hunk) {
                continue;
            }
            all_already_applied = false;
            let before = content.len();
            match unidiff::apply_hunk(&mut content, hunk, last_pos, delta) {
                Ok(pos) => {
                    last_pos = pos;
                    delta += content.len() as isize - before as isize;
                    file_touched = true;
                }
                Err(_) => {
                    conflicts.push(path.to_owned());
                }
            }
        }

        if file_touched {
            changed.push(path.to_owned());
        }
    }

    if !conflicts.is_empty() {
        conflicts.sort();
        conflicts.dedup();
        return Ok(MergeAnalysis::Conflict { paths: conflicts });
    }

    if all_already_applied {
        return Ok(if base_is_ancestor {
            MergeAnalysis::AlreadyApplied
        } else {
            MergeAnalysis::UpToDate
        });
    }

    Ok(MergeAnalysis::Clean {
        files_changed: changed,
    })
}

fn read_tree_content(
    repo: &git2::Repository,
    tree: &git2::Tree,
    path: &str,
    kind: ChangeKind,
) -> Result<Vec<String>, Error> {
    match tree.get_path(Path::new(path)) {
        Ok(entry) => {
            let blob = entry.to_object(repo)?.peel_to_blob()?;
            let text = String::from_utf8_lossy(blob.content()).into_owned();
            Ok(text.lines().map(str::to_owned).collect())
        }
        Err(_) if matches!(kind, ChangeKind::Add) => Ok(Vec::new()),
        Err(e) => Err(Error::Git(e)),
    }
}

/// The result of [`apply_patch_and_push`] (spec §4.G).
#[derive(Debug, Clone, Serialize)]
pub struct PushResult {
    pub merge_commit: String,
    pub pushed_remotes: Vec<String>,
    pub push_errors: Vec<(String, String)>,
    pub skipped_remotes: Vec<String>,
}

/// A Git identity to attribute the merge commit to.
#[derive(Debug, Clone)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// Apply `patch` against `target_branch` as a merge commit, and push the
/// result to every remote configured for `key` (spec §4.G).
#[allow(clippy::too_many_arguments)]
pub fn apply_patch_and_push<C: CacheStore>(
    session: &SessionManager<C>,
    key: &CanonicalKey,
    clone_urls: &[String],
    patch: &PatchPayload,
    target_branch: Option<&str>,
    merge_commit_message: Option<&str>,
    author: &Author,
    sink: &dyn ProgressSink,
) -> Result<PushResult, Error> {
    session.ensure_full_clone(key, target_branch, 1000, clone_urls, sink)?;
    let repo_dir = session.repo_path(key);
    let branch = refs::resolve_branch(&repo_dir, target_branch).map_err(|_| Error::NoBranches)?;

    let repo = git2::Repository::open(&repo_dir)?;
    let branch_ref = format!("refs/heads/{branch}");
    repo.set_head(&branch_ref)?;
    repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;

    let parent = repo.head()?.peel_to_commit()?;
    let tree = parent.tree()?;

    let files = unidiff::parse(&patch.diff)?;
    let mut builder = repo.treebuilder(Some(&tree))?;
    let mut conflicts = Vec::new();

    for file in &files {
        let path = file
            .new_path
            .as_deref()
            .or(file.old_path.as_deref())
            .unwrap_or_default();
        let mut content = read_tree_content(&repo, &tree, path, file.kind)?;
        let mut ok = true;
        let mut last_pos = 0;
        let mut delta: isize = 0;
        for hunk in &file.hunks {
            if unidiff::hunk_already_applied(&content, hunk) {
                continue;
            }
            let before = content.len();
            match unidiff::apply_hunk(&mut content, hunk, last_pos, delta) {
                Ok(pos) => {
                    last_pos = pos;
                    delta += content.len() as isize - before as isize;
                }
                Err(_) => {
                    ok = false;
                    conflicts.push(path.to_owned());
                }
            }
        }
        if !ok {
            continue;
        }

        match file.kind {
            ChangeKind::Delete => {
                builder.remove(path)?;
            }
            _ => {
                let joined = content.join("\n");
                let blob = repo.blob(joined.as_bytes())?;
                builder.insert(path, blob, 0o100644)?;
            }
        }
    }

    if !conflicts.is_empty() {
        return Err(Error::MergeConflict(conflicts));
    }

    let new_tree_id = builder.write()?;
    let new_tree = repo.find_tree(new_tree_id)?;
    let sig = git2::Signature::now(&author.name, &author.email)?;
    let message = merge_commit_message.unwrap_or("Apply patch series");
    let commit_id = repo.commit(
        Some(&branch_ref),
        &sig,
        &sig,
        message,
        &new_tree,
        &[&parent],
    )?;

    let mut pushed_remotes = Vec::new();
    let mut push_errors = Vec::new();
    let mut skipped_remotes = Vec::new();

    let remote_names = repo.remotes()?;
    for name in remote_names.iter().flatten() {
        let config = gitmesh_core::config::current();
        let mut remote = match repo.find_remote(name) {
            Ok(r) => r,
            Err(e) => {
                push_errors.push((name.to_owned(), e.to_string()));
                continue;
            }
        };
        let url = remote.url().unwrap_or_default().to_owned();
        let Ok(parsed) = url::Url::parse(&url) else {
            skipped_remotes.push(name.to_owned());
            continue;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            skipped_remotes.push(name.to_owned());
            continue;
        }

        let auth = gitmesh_core::auth::resolve_auth(&parsed, &config);
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(move |_url, _username, _allowed| match &auth {
            gitmesh_core::auth::AuthResolution::Bearer(token) => {
                git2::Cred::userpass_plaintext(token, "")
            }
            gitmesh_core::auth::AuthResolution::Anonymous => git2::Cred::default(),
        });
        let mut push_opts = git2::PushOptions::new();
        push_opts.remote_callbacks(callbacks);

        match remote.push(&[format!("{branch_ref}:{branch_ref}")], Some(&mut push_opts)) {
            Ok(()) => pushed_remotes.push(name.to_owned()),
            Err(e) => push_errors.push((name.to_owned(), e.to_string())),
        }
    }

    Ok(PushResult {
        merge_commit: commit_id.to_string(),
        pushed_remotes,
        push_errors,
        skipped_remotes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitmesh_core::cache::mem::MemCacheStore;
    use gitmesh_session::progress::NoopSink;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn upstream_with_file(dir: &Path, content: &str) -> git2::Oid {
        let repo = git2::Repository::init(dir).unwrap();
        let sig = git2::Signature::now("t", "t@example.com").unwrap();
        std::fs::write(dir.join("foo.txt"), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("foo.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let oid = repo.commit(None, &sig, &sig, "c1", &tree, &[]).unwrap();
        repo.branch("main", &repo.find_commit(oid).unwrap(), true)
            .unwrap();
        repo.set_head("refs/heads/main").unwrap();
        oid
    }

    const PATCH: &str = "diff --git a/foo.txt b/foo.txt\n--- a/foo.txt\n+++ b/foo.txt\n@@ -1,3 +1,3 @@\n line one\n-line two\n+line TWO\n line three\n";

    #[test]
    fn analyze_reports_clean_for_unapplied_patch() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_file(&upstream_dir.path(), "line one\nline two\nline three");
        let url = upstream_dir.path().to_string_lossy().into_owned();

        let workdir = TempDir::new().unwrap();
        let cache = Arc::new(MemCacheStore::new());
        let session = SessionManager::new(workdir.path().join("repos"), cache.clone());
        let key = CanonicalKey::new("alice", "proj");

        let patch = PatchPayload {
            diff: PATCH.to_owned(),
            base: None,
        };
        let analysis = analyze_patch_merge(
            &session,
            &*cache,
            &key,
            &[url],
            "patch-1",
            &patch,
            Some("main"),
            &NoopSink,
        )
        .unwrap();

        assert_eq!(
            analysis,
            MergeAnalysis::Clean {
                files_changed: vec!["foo.txt".to_owned()]
            }
        );
    }

    #[test]
    fn analyze_reports_already_applied() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_file(&upstream_dir.path(), "line one\nline TWO\nline three");
        let url = upstream_dir.path().to_string_lossy().into_owned();

        let workdir = TempDir::new().unwrap();
        let cache = Arc::new(MemCacheStore::new());
        let session = SessionManager::new(workdir.path().join("repos"), cache.clone());
        let key = CanonicalKey::new("alice", "proj");

        let patch = PatchPayload {
            diff: PATCH.to_owned(),
            base: None,
        };
        let analysis = analyze_patch_merge(
            &session,
            &*cache,
            &key,
            &[url],
            "patch-1",
            &patch,
            Some("main"),
            &NoopSink,
        )
        .unwrap();

        assert_eq!(analysis, MergeAnalysis::AlreadyApplied);
    }

    #[test]
    fn analyze_reports_error_for_a_malformed_patch_instead_of_failing() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_file(&upstream_dir.path(), "line one\nline two\nline three");
        let url = upstream_dir.path().to_string_lossy().into_owned();

        let workdir = TempDir::new().unwrap();
        let cache = Arc::new(MemCacheStore::new());
        let session = SessionManager::new(workdir.path().join("repos"), cache.clone());
        let key = CanonicalKey::new("alice", "proj");

        let patch = PatchPayload {
            diff: "diff --git a/foo.txt b/foo.txt\n--- a/foo.txt\n+++ b/foo.txt\n@@ garbage @@\n".to_owned(),
            base: None,
        };
        let analysis = analyze_patch_merge(
            &session,
            &*cache,
            &key,
            &[url],
            "patch-1",
            &patch,
            Some("main"),
            &NoopSink,
        )
        .unwrap();

        assert!(matches!(analysis, MergeAnalysis::Error { .. }));
    }
}
