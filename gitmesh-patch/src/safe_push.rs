//! Safe push (spec §4.H): preflight-gated push with an optional
//! decentralized-backend state-announcement dance.

use std::time::Duration;

use crossbeam_channel::{after, select};
use gitmesh_core::model::{CanonicalKey, DataLevel};
use gitmesh_core::refs;
use gitmesh_session::SessionManager;
use gitmesh_core::cache::CacheStore;

use crate::error::Error;

/// How long to wait for the decentralized backend's state-announcement
/// publish before giving up and pushing regardless (spec §4.H).
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default)]
pub struct SafePushOptions {
    pub block_if_uncommitted: bool,
    pub require_up_to_date: bool,
    pub block_if_shallow: bool,
    pub allow_force: bool,
    pub confirm_destructive: bool,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafePushResult {
    pub branch: String,
    pub forced: bool,
}

/// A decentralized-backend repo-state announcement, ready to publish. The
/// actual signing and relay I/O are delegated to the host via this
/// channel; this crate never holds a signing key (spec §9).
pub struct StateAnnouncementJob {
    pub key: CanonicalKey,
    pub heads: Vec<(String, git2::Oid)>,
    pub tags: Vec<(String, git2::Oid)>,
    pub head: Option<String>,
}

/// Run the safe-push preflight and perform the push (spec §4.H).
///
/// `publish` is invoked to publish a [`StateAnnouncementJob`] for
/// decentralized-backend pushes; its result is raced against
/// [`PUBLISH_TIMEOUT`] and the outcome is only logged, never blocking the
/// pack push that follows.
pub fn safe_push_to_remote<C: CacheStore>(
    session: &SessionManager<C>,
    key: &CanonicalKey,
    clone_urls: &[String],
    remote_url: &str,
    is_decentralized: bool,
    publish: impl FnOnce(StateAnnouncementJob) -> Result<(), String> + Send + 'static,
    options: &SafePushOptions,
) -> Result<SafePushResult, Error> {
    let repo_dir = session.repo_path(key);
    let repo = git2::Repository::open(&repo_dir)?;

    if options.block_if_uncommitted && has_uncommitted_changes(&repo)? {
        return Err(Error::UncommittedChanges);
    }
    if options.block_if_shallow && session.get_data_level(key)? != DataLevel::Full {
        return Err(Error::ShallowClone);
    }
    if options.require_up_to_date {
        let entry = session.cache().get(key)?;
        if gitmesh_session::sync::needs_update(key, clone_urls, entry.as_ref())? {
            return Err(Error::RemoteAhead);
        }
    }

    let branch = refs::resolve_branch(&repo_dir, options.branch.as_deref())
        .map_err(|_| Error::NoBranches)?;
    let branch_ref = format!("refs/heads/{branch}");

    if is_decentralized {
        announce_state(&repo, key, &branch_ref, publish)?;
    }

    let forced = attempt_push(&repo, &branch_ref, remote_url, options)?;

    Ok(SafePushResult { branch, forced })
}

fn has_uncommitted_changes(repo: &git2::Repository) -> Result<bool, Error> {
    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true);
    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(!statuses.is_empty())
}

fn announce_state(
    repo: &git2::Repository,
    key: &CanonicalKey,
    head_ref: &str,
    publish: impl FnOnce(StateAnnouncementJob) -> Result<(), String> + Send + 'static,
) -> Result<(), Error> {
    let mut heads = Vec::new();
    for branch in repo.branches(Some(git2::BranchType::Local))? {
        let (branch, _) = branch?;
        if let (Ok(Some(name)), Some(oid)) = (branch.name(), branch.get().target()) {
            heads.push((name.to_owned(), oid));
        }
    }
    let mut tags = Vec::new();
    repo.tag_foreach(|oid, name| {
        if let Ok(name) = std::str::from_utf8(name) {
            tags.push((name.trim_start_matches("refs/tags/").to_owned(), oid));
        }
        true
    })?;

    let job = StateAnnouncementJob {
        key: key.clone(),
        heads,
        tags,
        head: Some(head_ref.to_owned()),
    };

    let (tx, rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
    std::thread::spawn(move || {
        let _ = tx.send(publish(job));
    });

    select! {
        recv(rx) -> result => {
            if let Ok(Err(reason)) = result {
                log::warn!("state announcement publish failed: {reason}");
            }
        }
        recv(after(PUBLISH_TIMEOUT)) -> _ => {
            log::warn!("state announcement publish timed out after {PUBLISH_TIMEOUT:?}");
        }
    }

    Ok(())
}

fn attempt_push(
    repo: &git2::Repository,
    branch_ref: &str,
    remote_url: &str,
    options: &SafePushOptions,
) -> Result<bool, Error> {
    let mut remote = git2::Remote::create_detached(remote_url)?;
    let user_agent = format!("git/gitmesh-{}", env!("CARGO_PKG_VERSION"));
    let _ = unsafe { git2::opts::set_user_agent(&user_agent) };

    let push_once = |remote: &mut git2::Remote, force: bool| -> Result<(), git2::Error> {
        let refspec = if force {
            format!("+{branch_ref}:{branch_ref}")
        } else {
            format!("{branch_ref}:{branch_ref}")
        };
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.push_update_reference(|_refname, status| match status {
            Some(msg) => Err(git2::Error::from_str(msg)),
            None => Ok(()),
        });
        let mut opts = git2::PushOptions::new();
        opts.remote_callbacks(callbacks);
        remote.push(&[refspec], Some(&mut opts))
    };

    match push_once(&mut remote, false) {
        Ok(()) => Ok(false),
        Err(e) if is_non_fast_forward(&e) => {
            if !options.allow_force {
                Err(Error::NotFastForward)
            } else if !options.confirm_destructive {
                Err(Error::RequiresConfirmation)
            } else {
                push_once(&mut remote, true)?;
                Ok(true)
            }
        }
        Err(e) => Err(Error::Git(e)),
    }
}

fn is_non_fast_forward(err: &git2::Error) -> bool {
    err.message().contains("non-fast-forward") || err.message().contains("fetch first")
}

