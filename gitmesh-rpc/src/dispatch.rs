//! `dispatch(request) -> response` (spec §6, §8): every RPC op in one
//! place, each returning a structured `{success:false,...}` on failure
//! rather than throwing across the boundary. A `catch_unwind` at the
//! edge converts a stray panic into `unknown-error`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use gitmesh_core::cache::CacheStore;
use gitmesh_core::model::{CanonicalKey, MaintainerSet, PubKey, RefKind};
use gitmesh_core::refs;
use gitmesh_patch::engine::{Author, PatchPayload};
use gitmesh_session::progress::ProgressSink;
use gitmesh_session::SessionManager;
use gitmesh_vendor::{RestBackend, VendorProvider};
use serde_json::{json, Value};

use crate::error::{DispatchError, ErrorPayload};
use crate::event_io::{AdapterEventSource, EventIoAdapter};
use crate::types::Request;

/// Everything a running dispatch loop needs: the session manager (which
/// owns the cache store) and, for decentralized-backend ops, the
/// host-injected event adapter. The adapter is held as an `Arc` (set
/// once at startup, via `setEventIO`-driven construction) rather than
/// passed per-call, since publishing a state announcement spawns a
/// thread that must outlive the dispatch call that started it.
pub struct Engine<C: CacheStore> {
    pub session: Arc<SessionManager<C>>,
    pub event_io: Option<Arc<dyn EventIoAdapter>>,
}

impl<C: CacheStore> Engine<C> {
    pub fn new(session: Arc<SessionManager<C>>) -> Self {
        Self { session, event_io: None }
    }

    pub fn with_event_io(session: Arc<SessionManager<C>>, event_io: Arc<dyn EventIoAdapter>) -> Self {
        Self { session, event_io: Some(event_io) }
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(Value),
    Err(ErrorPayload),
}

pub fn dispatch<C: CacheStore>(engine: &Engine<C>, request: Request, sink: &dyn ProgressSink) -> Response {
    match catch_unwind(AssertUnwindSafe(|| handle(engine, request, sink))) {
        Ok(Ok(value)) => Response::Ok(value),
        Ok(Err(err)) => Response::Err(ErrorPayload::from_error(&err, None)),
        Err(panic) => Response::Err(ErrorPayload::from_panic(panic)),
    }
}

fn handle<C: CacheStore>(engine: &Engine<C>, request: Request, sink: &dyn ProgressSink) -> Result<Value, DispatchError> {
    let session = &engine.session;
    let event_io = engine.event_io.as_deref();

    match request {
        Request::SetAuthConfig { tokens } => {
            let mut cfg = (*gitmesh_core::config::current()).clone();
            cfg.tokens = tokens;
            gitmesh_core::config::replace(cfg);
            Ok(json!({ "success": true }))
        }
        Request::SetGitConfig { user } => {
            let mut cfg = (*gitmesh_core::config::current()).clone();
            cfg.git = Some(user);
            gitmesh_core::config::replace(cfg);
            Ok(json!({ "success": true }))
        }
        Request::SetEventIo { proxy } => {
            let mut cfg = (*gitmesh_core::config::current()).clone();
            cfg.event_io = Some(gitmesh_core::config::EventIoConfig { proxy });
            gitmesh_core::config::replace(cfg);
            Ok(json!({ "success": true }))
        }

        Request::InitializeRepo { key, clone_urls } => {
            let level = session.initialize_repo(&key, &clone_urls, sink)?;
            Ok(json!({ "success": true, "dataLevel": level }))
        }
        Request::SmartInitializeRepo { key, clone_urls, force_update } => {
            let level = session.smart_initialize_repo(&key, &clone_urls, force_update, sink)?;
            Ok(json!({ "success": true, "dataLevel": level }))
        }
        Request::EnsureShallowClone { key, clone_urls, branch } => {
            let level = session.ensure_shallow_clone(&key, branch.as_deref(), &clone_urls, sink)?;
            Ok(json!({ "success": true, "dataLevel": level }))
        }
        Request::EnsureFullClone { key, clone_urls, branch, depth } => {
            let level = session.ensure_full_clone(&key, branch.as_deref(), depth, &clone_urls, sink)?;
            Ok(json!({ "success": true, "dataLevel": level }))
        }
        Request::Clone { key, clone_urls, branch } => {
            let level = session.ensure_full_clone(&key, branch.as_deref(), 1, &clone_urls, sink)?;
            Ok(json!({ "success": true, "dataLevel": level }))
        }
        Request::DeleteRepo { key } => {
            session.delete_repo(&key)?;
            Ok(json!({ "success": true }))
        }
        Request::ClearCloneCache => {
            session.cache().clear_old_cache()?;
            Ok(json!({ "success": true }))
        }
        Request::GetRepoDataLevel { key } => {
            let level = session.get_data_level(&key)?;
            Ok(json!({ "success": true, "dataLevel": level }))
        }

        Request::GetStatus { key } => {
            let level = session.get_data_level(&key)?;
            let path = session.repo_path(&key);
            let (branch, uncommitted) = match git2::Repository::open(&path) {
                Ok(repo) => {
                    let branch = repo.head().ok().and_then(|h| h.shorthand().map(str::to_owned));
                    let mut opts = git2::StatusOptions::new();
                    opts.include_untracked(true);
                    let dirty = repo.statuses(Some(&mut opts)).map(|s| !s.is_empty()).unwrap_or(false);
                    (branch, dirty)
                }
                Err(_) => (None, false),
            };
            Ok(json!({ "success": true, "dataLevel": level, "branch": branch, "uncommittedChanges": uncommitted }))
        }
        Request::GetCommitHistory { key, branch, limit } => {
            let path = session.repo_path(&key);
            let repo = git2::Repository::open(&path)?;
            let branch = refs::resolve_branch(&path, branch.as_deref()).map_err(|_| DispatchError::NoBranches)?;
            let head = repo.find_branch(&branch, git2::BranchType::Local)
                .or_else(|_| repo.find_branch(&branch, git2::BranchType::Remote))?
                .get()
                .target()
                .ok_or(DispatchError::NoBranches)?;
            let mut walk = repo.revwalk()?;
            walk.push(head)?;
            let limit = limit.unwrap_or(100);
            let oids: Vec<String> = walk.take(limit).filter_map(|o| o.ok()).map(|o| o.to_string()).collect();
            Ok(json!({ "success": true, "branch": branch, "oids": oids }))
        }
        Request::GetCommitCount { key, branch } => {
            let path = session.repo_path(&key);
            let repo = git2::Repository::open(&path)?;
            let branch = refs::resolve_branch(&path, branch.as_deref()).map_err(|_| DispatchError::NoBranches)?;
            let head = repo.find_branch(&branch, git2::BranchType::Local)
                .or_else(|_| repo.find_branch(&branch, git2::BranchType::Remote))?
                .get()
                .target()
                .ok_or(DispatchError::NoBranches)?;
            let mut walk = repo.revwalk()?;
            walk.push(head)?;
            let count = walk.filter_map(|o| o.ok()).count();
            Ok(json!({ "success": true, "count": count }))
        }
        Request::GetCommitDetails { key, oid } => {
            let path = session.repo_path(&key);
            let repo = git2::Repository::open(&path)?;
            let commit = repo.find_commit(git2::Oid::from_str(&oid)?)?;
            let author = commit.author();
            Ok(json!({
                "success": true,
                "oid": commit.id().to_string(),
                "message": commit.message().unwrap_or_default(),
                "authorName": author.name().unwrap_or_default(),
                "authorEmail": author.email().unwrap_or_default(),
                "timestamp": commit.time().seconds(),
                "parents": commit.parent_ids().map(|p| p.to_string()).collect::<Vec<_>>(),
            }))
        }
        Request::ListBranches { key } => {
            let path = session.repo_path(&key);
            let repo = git2::Repository::open(&path)?;
            Ok(json!({ "success": true, "branches": list_local_branches(&repo)? }))
        }
        Request::ResolveBranch { key, requested } => {
            let path = session.repo_path(&key);
            let branch = refs::resolve_branch(&path, requested.as_deref()).map_err(|_| DispatchError::NoBranches)?;
            Ok(json!({ "success": true, "branch": branch }))
        }
        Request::ListServerRefs { clone_urls } => {
            let url = clone_urls.first().ok_or(DispatchError::NoBranches)?;
            let mut remote = git2::Remote::create_detached(url)?;
            remote.connect(git2::Direction::Fetch)?;
            let refs: Vec<Value> = remote
                .list()?
                .iter()
                .map(|h| json!({ "name": h.name(), "oid": h.oid().to_string() }))
                .collect();
            remote.disconnect()?;
            Ok(json!({ "success": true, "refs": refs }))
        }
        Request::ListRepoFilesFromEvent { key, owner, maintainers, branch } => {
            let (repo, oid) = resolve_event_commit(session, event_io, &key, &owner, &maintainers, branch.as_deref())?;
            let commit = repo.find_commit(oid)?;
            let tree = commit.tree()?;
            let mut files = Vec::new();
            tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() == Some(git2::ObjectType::Blob) {
                    files.push(format!("{root}{}", entry.name().unwrap_or_default()));
                }
                git2::TreeWalkResult::Ok
            })?;
            Ok(json!({ "success": true, "files": files }))
        }
        Request::GetRepoFileContentFromEvent { key, owner, maintainers, branch, path } => {
            let (repo, oid) = resolve_event_commit(session, event_io, &key, &owner, &maintainers, branch.as_deref())?;
            let commit = repo.find_commit(oid)?;
            let entry = commit.tree()?.get_path(Path::new(&path))?;
            let blob = repo.find_blob(entry.id())?;
            Ok(json!({ "success": true, "path": path, "content": String::from_utf8_lossy(blob.content()) }))
        }
        Request::ListBranchesFromEvent { key, owner, maintainers } => {
            let events = fetch_state_events(event_io, &key)?;
            let announcements = decode_announcements(&events);
            let maintainer_set = MaintainerSet::new(owner, maintainers);
            let merged = refs::merge_signed_state(&announcements, &maintainer_set);
            let branches: Vec<Value> = merged
                .into_iter()
                .filter(|((kind, _), _)| *kind == RefKind::Heads)
                .map(|((_, name), record)| json!({ "name": name, "oid": record.oid.to_string() }))
                .collect();
            Ok(json!({ "success": true, "branches": branches }))
        }
        Request::FileExistsAtCommit { key, oid, path } => {
            let repo_path = session.repo_path(&key);
            let repo = git2::Repository::open(&repo_path)?;
            let commit = repo.find_commit(git2::Oid::from_str(&oid)?)?;
            let exists = commit.tree()?.get_path(Path::new(&path)).is_ok();
            Ok(json!({ "success": true, "exists": exists }))
        }
        Request::GetFileHistory { key, branch, path } => {
            let repo_path = session.repo_path(&key);
            let repo = git2::Repository::open(&repo_path)?;
            let branch = refs::resolve_branch(&repo_path, branch.as_deref()).map_err(|_| DispatchError::NoBranches)?;
            let head = repo
                .find_branch(&branch, git2::BranchType::Local)
                .or_else(|_| repo.find_branch(&branch, git2::BranchType::Remote))?
                .get()
                .target()
                .ok_or(DispatchError::NoBranches)?;
            let mut walk = repo.revwalk()?;
            walk.push(head)?;
            let mut touching = Vec::new();
            for oid in walk.take(500) {
                let oid = oid?;
                let commit = repo.find_commit(oid)?;
                let tree = commit.tree()?;
                let current = tree.get_path(Path::new(&path)).ok().map(|e| e.id());
                let parent_matches = commit.parents().next().and_then(|p| {
                    p.tree().ok().and_then(|t| t.get_path(Path::new(&path)).ok().map(|e| e.id()))
                });
                if current != parent_matches {
                    touching.push(oid.to_string());
                }
            }
            Ok(json!({ "success": true, "oids": touching }))
        }
        Request::ListTreeAtCommit { key, oid, path } => {
            let repo_path = session.repo_path(&key);
            let repo = git2::Repository::open(&repo_path)?;
            let commit = repo.find_commit(git2::Oid::from_str(&oid)?)?;
            let tree = match &path {
                Some(p) if !p.is_empty() => {
                    let entry = commit.tree()?.get_path(Path::new(p))?;
                    repo.find_tree(entry.id())?
                }
                _ => commit.tree()?,
            };
            let entries: Vec<Value> = tree
                .iter()
                .map(|e| {
                    json!({
                        "name": e.name().unwrap_or_default(),
                        "oid": e.id().to_string(),
                        "kind": format!("{:?}", e.kind().unwrap_or(git2::ObjectType::Any)),
                    })
                })
                .collect();
            Ok(json!({ "success": true, "entries": entries }))
        }

        Request::SyncWithRemote { key, clone_urls, branch } => {
            let repo_path = session.repo_path(&key);
            let result = gitmesh_session::sync::sync_with_remote(
                &repo_path,
                &key,
                &clone_urls,
                branch.as_deref(),
                session.cache(),
            )
            .map_err(DispatchError::Session)?;
            Ok(serde_json::to_value(result)?)
        }
        Request::NeedsUpdate { key, clone_urls } => {
            let entry = session.cache().get(&key)?;
            let needs = gitmesh_session::sync::needs_update(&key, &clone_urls, entry.as_ref())
                .map_err(DispatchError::Session)?;
            Ok(json!({ "success": true, "needsUpdate": needs }))
        }
        Request::ResetRepoToRemote { key, clone_urls, branch } => {
            session.delete_repo(&key)?;
            let level = session.ensure_full_clone(&key, branch.as_deref(), 1, &clone_urls, sink)?;
            Ok(json!({ "success": true, "dataLevel": level }))
        }

        Request::AnalyzePatchMerge { key, clone_urls, patch_id, diff, base, target_branch } => {
            let base = base.map(|b| git2::Oid::from_str(&b)).transpose()?;
            let payload = PatchPayload { diff, base };
            let analysis = gitmesh_patch::analyze_patch_merge(
                session,
                session.cache(),
                &key,
                &clone_urls,
                &patch_id,
                &payload,
                target_branch.as_deref(),
                sink,
            )?;
            Ok(serde_json::to_value(analysis)?)
        }
        Request::ApplyPatchAndPush {
            key,
            clone_urls,
            diff,
            base,
            target_branch,
            merge_commit_message,
            author_name,
            author_email,
        } => {
            let base = base.map(|b| git2::Oid::from_str(&b)).transpose()?;
            let payload = PatchPayload { diff, base };
            let author = Author { name: author_name, email: author_email };
            let result = gitmesh_patch::apply_patch_and_push(
                session,
                &key,
                &clone_urls,
                &payload,
                target_branch.as_deref(),
                merge_commit_message.as_deref(),
                &author,
                sink,
            )?;
            Ok(serde_json::to_value(result)?)
        }

        Request::PushToRemote { key, remote_url, branch, force } => {
            let options = gitmesh_patch::SafePushOptions {
                allow_force: force,
                confirm_destructive: force,
                branch,
                ..Default::default()
            };
            let result = gitmesh_patch::safe_push_to_remote(
                session,
                &key,
                &[],
                &remote_url,
                false,
                |_job| Ok(()),
                &options,
            )?;
            Ok(serde_json::to_value(result)?)
        }
        Request::SafePushToRemote { key, clone_urls, remote_url, is_decentralized, options } => {
            let adapter = engine.event_io.clone();
            let result = gitmesh_patch::safe_push_to_remote(
                session,
                &key,
                &clone_urls,
                &remote_url,
                is_decentralized,
                move |job| announce_via_event_io(adapter.as_deref(), job),
                &options.into(),
            )?;
            Ok(serde_json::to_value(result)?)
        }

        Request::CreateRemoteRepo { host_api_base, name, description, private } => {
            let backend = rest_backend_for(&host_api_base)?;
            let repo = backend.create_repo(&gitmesh_vendor::model::NewRepo { name, description, private })?;
            Ok(serde_json::to_value(repo)?)
        }
        Request::UpdateRemoteRepoMetadata { host_api_base, owner, name, description, default_branch, private } => {
            let backend = rest_backend_for(&host_api_base)?;
            let repo = backend.update_repo(
                &owner,
                &name,
                &gitmesh_vendor::model::RepoUpdate { description, default_branch, private },
            )?;
            Ok(serde_json::to_value(repo)?)
        }
        Request::ForkAndCloneRepo { host_api_base, owner, name, key } => {
            let backend = rest_backend_for(&host_api_base)?;
            let forked = backend.fork_repo(&owner, &name)?;
            let level = session.initialize_repo(&key, &[forked.clone_url.clone()], sink)?;
            Ok(json!({ "success": true, "repo": forked, "dataLevel": level }))
        }
        Request::UpdateAndPushFiles { key, clone_urls, branch, files, commit_message, author_name, author_email } => {
            let level = session.ensure_full_clone(&key, branch.as_deref(), 1, &clone_urls, sink)?;
            let repo_path = session.repo_path(&key);
            let repo = git2::Repository::open(&repo_path)?;
            let branch_name = refs::resolve_branch(&repo_path, branch.as_deref()).map_err(|_| DispatchError::NoBranches)?;
            repo.set_head(&format!("refs/heads/{branch_name}"))?;
            repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
            let parent = repo.head()?.peel_to_commit()?;
            let mut builder = repo.treebuilder(Some(&parent.tree()?))?;
            for file in &files {
                let blob = repo.blob(file.content.as_bytes())?;
                builder.insert(&file.path, blob, git2::FileMode::Blob.into())?;
            }
            let tree_id = builder.write()?;
            let tree = repo.find_tree(tree_id)?;
            let sig = git2::Signature::now(&author_name, &author_email)?;
            let commit_id = repo.commit(
                Some("HEAD"),
                &sig,
                &sig,
                &commit_message,
                &tree,
                &[&parent],
            )?;
            Ok(json!({ "success": true, "dataLevel": level, "commit": commit_id.to_string() }))
        }
        Request::CloneAndFork { host_api_base, owner, name, key } => {
            let backend = rest_backend_for(&host_api_base)?;
            let forked = backend.fork_repo(&owner, &name)?;
            let level = session.initialize_repo(&key, &[forked.clone_url.clone()], sink)?;
            Ok(json!({ "success": true, "repo": forked, "dataLevel": level }))
        }
        Request::CloneRemoteRepo { host_api_base, owner, name, key } => {
            let backend = rest_backend_for(&host_api_base)?;
            let repo = backend.get_repo(&owner, &name)?;
            let level = session.initialize_repo(&key, &[repo.clone_url.clone()], sink)?;
            Ok(json!({ "success": true, "repo": repo, "dataLevel": level }))
        }

        Request::GetGitignoreTemplate { language } => {
            Ok(json!({ "success": true, "language": language, "content": gitignore_template(&language) }))
        }
        Request::GetLicenseTemplate { license } => {
            Ok(json!({ "success": true, "license": license, "content": license_template(&license) }))
        }
        Request::CreateLocalRepo { key, initial_branch } => {
            let repo_path = session.repo_path(&key);
            std::fs::create_dir_all(&repo_path)?;
            let repo = git2::Repository::init(&repo_path)?;
            if let Some(branch) = initial_branch {
                let mut config = repo.config()?;
                config.set_str("init.defaultBranch", &branch)?;
            }
            Ok(json!({ "success": true }))
        }

        Request::Ping => Ok(json!({ "success": true, "pong": true })),
    }
}

/// A small built-in table of common `.gitignore` templates, keyed by
/// language name (case-insensitive). Unknown languages get an empty
/// stub rather than an error, since the host may pass through arbitrary
/// user input here.
fn gitignore_template(language: &str) -> String {
    match language.to_lowercase().as_str() {
        "rust" => "/target\nCargo.lock\n**/*.rs.bk\n*.pdb\n".to_owned(),
        "node" | "javascript" | "typescript" => "node_modules/\ndist/\n.env\nnpm-debug.log*\n".to_owned(),
        "python" => "__pycache__/\n*.py[cod]\n.venv/\n*.egg-info/\n".to_owned(),
        "go" => "/bin/\n*.exe\n*.test\n*.out\n".to_owned(),
        _ => String::new(),
    }
}

/// A small built-in table of common license texts, keyed by SPDX-ish
/// identifier (case-insensitive). Unknown identifiers get an empty
/// stub rather than an error.
fn license_template(license: &str) -> String {
    match license.to_lowercase().as_str() {
        "mit" => {
            "MIT License\n\nPermission is hereby granted, free of charge, to any person obtaining a copy \
             of this software and associated documentation files (the \"Software\"), to deal \
             in the Software without restriction, including without limitation the rights \
             to use, copy, modify, merge, publish, distribute, sublicense, and/or sell \
             copies of the Software, subject to the following conditions:\n\n\
             The above copyright notice and this permission notice shall be included in all \
             copies or substantial portions of the Software.\n"
                .to_owned()
        }
        "apache-2.0" | "apache2" => {
            "Apache License, Version 2.0\n\n\
             Licensed under the Apache License, Version 2.0 (the \"License\"); you may not \
             use this file except in compliance with the License. You may obtain a copy of \
             the License at http://www.apache.org/licenses/LICENSE-2.0\n"
                .to_owned()
        }
        _ => String::new(),
    }
}

fn list_local_branches(repo: &git2::Repository) -> Result<Vec<Value>, DispatchError> {
    let mut out = Vec::new();
    for branch in repo.branches(Some(git2::BranchType::Local))? {
        let (branch, _) = branch?;
        if let (Ok(Some(name)), Some(oid)) = (branch.name(), branch.get().target()) {
            out.push(json!({ "name": name, "oid": oid.to_string() }));
        }
    }
    Ok(out)
}

fn rest_backend_for(api_base: &str) -> Result<RestBackend, DispatchError> {
    let host = url::Url::parse(api_base)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| api_base.to_owned());
    let token = gitmesh_core::config::current().token_for_host(&host).map(str::to_owned);
    Ok(RestBackend::new(api_base, token))
}

fn fetch_state_events(
    event_io: Option<&dyn EventIoAdapter>,
    key: &CanonicalKey,
) -> Result<Vec<gitmesh_vendor::RawEvent>, DispatchError> {
    let adapter = event_io.ok_or_else(|| DispatchError::EventIo("no event-io adapter configured".into()))?;
    let source = AdapterEventSource { adapter };
    gitmesh_vendor::EventSource::fetch(&source, key, &[30617, 30618]).map_err(DispatchError::Vendor)
}

fn decode_announcements(events: &[gitmesh_vendor::RawEvent]) -> Vec<gitmesh_core::model::StateAnnouncement> {
    events.iter().filter_map(decode_announcement).collect()
}

fn decode_announcement(event: &gitmesh_vendor::RawEvent) -> Option<gitmesh_core::model::StateAnnouncement> {
    let subject = event.tag("d").map(|d| {
        let mut parts = d.splitn(2, '/');
        CanonicalKey::new(parts.next().unwrap_or_default(), parts.next().unwrap_or_default())
    })?;
    let author: PubKey = event.pubkey.parse().ok()?;
    let refs = event
        .tags
        .iter()
        .filter(|t| t.first().map(String::as_str) == Some("ref"))
        .filter_map(|t| {
            let name = t.get(1)?;
            let oid = t.get(2)?.parse().ok()?;
            let kind = if name.starts_with("tags/") { RefKind::Tags } else { RefKind::Heads };
            Some(gitmesh_core::model::RefRecord {
                kind,
                name: name.trim_start_matches("heads/").trim_start_matches("tags/").to_owned(),
                oid,
                lineage: Vec::new(),
            })
        })
        .collect();
    Some(gitmesh_core::model::StateAnnouncement {
        subject,
        head: event.tag("head").map(str::to_owned),
        refs,
        author,
        timestamp: event.created_at,
        maintainers: Vec::new(),
        legacy_encoding: false,
    })
}

/// Turns a state-announcement job into a NIP-34-shaped unsigned event and
/// hands it to the host-injected adapter to sign and publish.
fn announce_via_event_io(adapter: Option<&dyn EventIoAdapter>, job: gitmesh_patch::safe_push::StateAnnouncementJob) -> Result<(), String> {
    let adapter = adapter.ok_or_else(|| "no event-io adapter configured".to_owned())?;
    let mut tags: Vec<Vec<String>> = vec![vec!["d".to_owned(), job.key.as_str().to_owned()]];
    for (name, oid) in &job.heads {
        tags.push(vec!["ref".to_owned(), format!("heads/{name}"), oid.to_string()]);
    }
    for (name, oid) in &job.tags {
        tags.push(vec!["ref".to_owned(), format!("tags/{name}"), oid.to_string()]);
    }
    if let Some(head) = &job.head {
        tags.push(vec!["head".to_owned(), head.clone()]);
    }
    let unsigned = json!({
        "kind": 30618,
        "content": "",
        "tags": tags,
    });
    let outcome = adapter.publish_event(unsigned)?;
    if outcome.ok {
        Ok(())
    } else {
        Err(outcome.error.unwrap_or_else(|| "publish failed".to_owned()))
    }
}

fn resolve_event_commit<C: CacheStore>(
    session: &SessionManager<C>,
    event_io: Option<&dyn EventIoAdapter>,
    key: &CanonicalKey,
    owner: &PubKey,
    maintainers: &[PubKey],
    branch: Option<&str>,
) -> Result<(git2::Repository, git2::Oid), DispatchError> {
    let events = fetch_state_events(event_io, key)?;
    let announcements = decode_announcements(&events);
    let maintainer_set = MaintainerSet::new(owner.clone(), maintainers.iter().cloned());
    let merged = refs::merge_signed_state(&announcements, &maintainer_set);
    let branch_name = branch.unwrap_or("main");
    let record = merged
        .get(&(RefKind::Heads, branch_name.to_owned()))
        .ok_or(DispatchError::NoBranches)?;

    let repo_path = session.repo_path(key);
    let repo = git2::Repository::open(&repo_path)?;
    Ok((repo, record.oid))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use gitmesh_core::cache::mem::MemCacheStore;
    use gitmesh_core::model::CanonicalKey;
    use gitmesh_session::progress::NoopSink;
    use tempfile::TempDir;

    use super::*;

    fn upstream_with_commit(dir: &Path) -> git2::Oid {
        let repo = git2::Repository::init(dir).unwrap();
        let sig = git2::Signature::now("t", "t@example.com").unwrap();
        let tree = repo.find_tree(repo.index().unwrap().write_tree().unwrap()).unwrap();
        let oid = repo.commit(None, &sig, &sig, "c1", &tree, &[]).unwrap();
        repo.branch("main", &repo.find_commit(oid).unwrap(), true).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        oid
    }

    fn test_engine(workdir: &TempDir) -> Engine<MemCacheStore> {
        let session = Arc::new(SessionManager::new(workdir.path().join("repos"), Arc::new(MemCacheStore::new())));
        Engine::new(session)
    }

    #[test]
    fn ping_round_trips() {
        let workdir = TempDir::new().unwrap();
        let engine = test_engine(&workdir);
        match dispatch(&engine, Request::Ping, &NoopSink) {
            Response::Ok(value) => assert_eq!(value["pong"], true),
            Response::Err(err) => panic!("unexpected error: {err:?}"),
        }
    }

    #[test]
    fn initialize_repo_clones_from_a_local_upstream() {
        let upstream_dir = TempDir::new().unwrap();
        upstream_with_commit(upstream_dir.path());
        let url = upstream_dir.path().to_string_lossy().into_owned();

        let workdir = TempDir::new().unwrap();
        let engine = test_engine(&workdir);
        let key = CanonicalKey::new("alice", "proj");

        let request = Request::InitializeRepo { key, clone_urls: vec![url] };
        match dispatch(&engine, request, &NoopSink) {
            Response::Ok(value) => assert_eq!(value["success"], true),
            Response::Err(err) => panic!("unexpected error: {err:?}"),
        }
    }

    #[test]
    fn create_local_repo_initializes_an_empty_working_tree() {
        let workdir = TempDir::new().unwrap();
        let engine = test_engine(&workdir);
        let key = CanonicalKey::new("alice", "scratch");

        let request = Request::CreateLocalRepo { key: key.clone(), initial_branch: Some("main".to_owned()) };
        match dispatch(&engine, request, &NoopSink) {
            Response::Ok(value) => assert_eq!(value["success"], true),
            Response::Err(err) => panic!("unexpected error: {err:?}"),
        }
        assert!(git2::Repository::open(engine.session.repo_path(&key)).is_ok());
    }

    #[test]
    fn unknown_op_in_the_wire_shape_fails_to_parse() {
        let result: Result<Request, _> = serde_json::from_str(r#"{"op":"notARealOp"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn get_commit_history_on_a_missing_repo_reports_an_error_payload() {
        let workdir = TempDir::new().unwrap();
        let engine = test_engine(&workdir);
        let key = CanonicalKey::new("alice", "ghost");

        let request = Request::GetCommitHistory { key, branch: None, limit: None };
        match dispatch(&engine, request, &NoopSink) {
            Response::Ok(value) => panic!("expected an error, got {value:?}"),
            Response::Err(err) => assert!(!err.success),
        }
    }

    #[test]
    fn gitignore_template_is_empty_for_an_unknown_language() {
        assert_eq!(gitignore_template("not-a-real-language"), "");
        assert!(gitignore_template("rust").contains("/target"));
    }

    #[test]
    fn license_template_is_empty_for_an_unknown_license() {
        assert_eq!(license_template("not-a-real-license"), "");
        assert!(license_template("mit").contains("MIT License"));
    }
}
