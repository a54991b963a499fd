//! [`VendorProvider`] for the decentralized, event-coordinated backend.
//!
//! Repo/commit/branch/tag/file surfaces are served straight out of the
//! local session clone, the same way the centralized backends serve
//! them out of a remote server's object store. The collaboration
//! surface (issues, pull requests, patches, users) instead has no
//! server to ask: it is reconstructed from signed events (kind `1617`
//! patches, kind `1621`/`1622` issue/status, NIP-34-style `30617`/`30618`
//! repo/state announcements) fetched through the host-supplied
//! [`EventSource`], since this crate never talks to a relay directly
//! (spec §9).

use std::sync::Arc;

use gitmesh_core::cache::CacheStore;
use gitmesh_core::model::CanonicalKey;
use gitmesh_session::SessionManager;
use serde::Deserialize;

use crate::model::*;
use crate::provider::VendorProvider;
use crate::Error;

/// A raw signed event, already verified and decoded by the host; this
/// crate only reads its tags and content, never its signature.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub kind: u32,
    pub pubkey: String,
    pub created_at: i64,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
}

impl RawEvent {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// Fetches events relevant to a repository from wherever the host keeps
/// them (a local relay cache, a subscription buffer, ...). Implemented
/// by the host, not this crate.
pub trait EventSource {
    fn fetch(&self, key: &CanonicalKey, kinds: &[u32]) -> Result<Vec<RawEvent>, Error>;
}

const KIND_PATCH: u32 = 1617;
const KIND_ISSUE: u32 = 1621;
const KIND_ISSUE_STATUS: u32 = 1622;

pub struct RadicleBackend<C: CacheStore, E: EventSource> {
    session: Arc<SessionManager<C>>,
    events: E,
}

impl<C: CacheStore, E: EventSource> RadicleBackend<C, E> {
    pub fn new(session: Arc<SessionManager<C>>, events: E) -> Self {
        Self { session, events }
    }

    fn key(owner: &str, name: &str) -> CanonicalKey {
        CanonicalKey::new(owner, name)
    }

    fn repo(&self, owner: &str, name: &str) -> Result<git2::Repository, Error> {
        let path = self.session.repo_path(&Self::key(owner, name));
        git2::Repository::open(&path).map_err(|e| Error::Session(gitmesh_session::Error::Git(e)))
    }
}

impl<C: CacheStore, E: EventSource> VendorProvider for RadicleBackend<C, E> {
    fn get_repo(&self, owner: &str, name: &str) -> Result<Repo, Error> {
        let key = Self::key(owner, name);
        self.repo(owner, name)?;
        let default_branch = gitmesh_core::refs::resolve_branch(&self.session.repo_path(&key), None)
            .unwrap_or_else(|_| "main".to_owned());
        let clone_url = self
            .session
            .cache()
            .get(&key)
            .map_err(gitmesh_session::Error::from)?
            .and_then(|e| e.clone_urls.first().cloned())
            .unwrap_or_default();
        Ok(Repo {
            owner: owner.to_owned(),
            name: name.to_owned(),
            description: None,
            default_branch,
            private: false,
            web_url: String::new(),
            clone_url,
        })
    }

    fn create_repo(&self, _new_repo: &NewRepo) -> Result<Repo, Error> {
        Err(Error::Import(
            "the decentralized backend has no central registry to create a repo on; initialize a local repo and announce it instead".into(),
        ))
    }

    fn update_repo(&self, _owner: &str, _name: &str, _update: &RepoUpdate) -> Result<Repo, Error> {
        Err(Error::Import(
            "repo metadata updates on the decentralized backend happen via a new state announcement, not an in-place edit".into(),
        ))
    }

    fn fork_repo(&self, owner: &str, name: &str) -> Result<Repo, Error> {
        self.get_repo(owner, name)
    }

    fn list_commits(&self, _owner: &str, _name: &str, branch: &str) -> Result<Vec<Commit>, Error> {
        let repo = self.repo(_owner, _name)?;
        let branch_ref = repo
            .find_branch(branch, git2::BranchType::Local)
            .or_else(|_| repo.find_branch(branch, git2::BranchType::Remote))?;
        let head = branch_ref
            .get()
            .target()
            .ok_or_else(|| Error::Import(format!("branch {branch} has no target")))?;
        let mut walk = repo.revwalk()?;
        walk.push(head)?;
        let mut commits = Vec::new();
        for oid in walk.take(100) {
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            commits.push(to_commit(&commit));
        }
        Ok(commits)
    }

    fn get_commit(&self, owner: &str, name: &str, oid: &str) -> Result<Commit, Error> {
        let repo = self.repo(owner, name)?;
        let oid = git2::Oid::from_str(oid)?;
        let commit = repo.find_commit(oid)?;
        Ok(to_commit(&commit))
    }

    fn list_issues(&self, owner: &str, name: &str) -> Result<Vec<Issue>, Error> {
        let key = Self::key(owner, name);
        let events = self.events.fetch(&key, &[KIND_ISSUE, KIND_ISSUE_STATUS])?;
        let mut issues: Vec<Issue> = events
            .iter()
            .filter(|e| e.kind == KIND_ISSUE)
            .enumerate()
            .map(|(i, e)| Issue {
                number: i as u64 + 1,
                title: e.tag("title").unwrap_or_default().to_owned(),
                body: e.content.clone(),
                state: IssueState::Open,
                author: e.pubkey.clone(),
            })
            .collect();
        for status in events.iter().filter(|e| e.kind == KIND_ISSUE_STATUS) {
            if let Some(root) = status.tag("e") {
                if let Some(issue) = issues.iter_mut().find(|i| i.title == root || i.body.contains(root)) {
                    if status.content == "closed" {
                        issue.state = IssueState::Closed;
                    }
                }
            }
        }
        Ok(issues)
    }

    fn get_issue(&self, owner: &str, name: &str, number: u64) -> Result<Issue, Error> {
        self.list_issues(owner, name)?
            .into_iter()
            .find(|i| i.number == number)
            .ok_or_else(|| Error::Import(format!("issue #{number} not found in fetched events")))
    }

    fn create_issue(&self, _owner: &str, _name: &str, _title: &str, _body: &str) -> Result<Issue, Error> {
        Err(Error::Import(
            "issue creation requires publishing a signed event, which is delegated to the host".into(),
        ))
    }

    fn update_issue(&self, _owner: &str, _name: &str, _number: u64, _title: Option<&str>, _body: Option<&str>) -> Result<Issue, Error> {
        Err(Error::Import("issue edits are new signed events, published by the host".into()))
    }

    fn close_issue(&self, _owner: &str, _name: &str, _number: u64) -> Result<Issue, Error> {
        Err(Error::Import("closing an issue requires publishing a status event, delegated to the host".into()))
    }

    fn list_issue_comments(&self, owner: &str, name: &str, number: u64) -> Result<Vec<Comment>, Error> {
        let key = Self::key(owner, name);
        let issue = self.get_issue(owner, name, number)?;
        let events = self.events.fetch(&key, &[KIND_ISSUE_STATUS])?;
        Ok(events
            .iter()
            .filter(|e| e.tag("e") == Some(issue.title.as_str()))
            .enumerate()
            .map(|(i, e)| Comment {
                id: i as u64 + 1,
                author: e.pubkey.clone(),
                body: e.content.clone(),
                timestamp: e.created_at,
            })
            .collect())
    }

    fn list_pull_request_comments(&self, _owner: &str, _name: &str, _number: u64) -> Result<Vec<Comment>, Error> {
        Ok(Vec::new())
    }

    fn get_comment(&self, owner: &str, name: &str, id: u64) -> Result<Comment, Error> {
        let key = Self::key(owner, name);
        let events = self.events.fetch(&key, &[KIND_ISSUE_STATUS])?;
        events
            .get(id as usize - 1)
            .map(|e| Comment {
                id,
                author: e.pubkey.clone(),
                body: e.content.clone(),
                timestamp: e.created_at,
            })
            .ok_or_else(|| Error::Import(format!("comment #{id} not found")))
    }

    fn list_pull_requests(&self, owner: &str, name: &str) -> Result<Vec<PullRequest>, Error> {
        let key = Self::key(owner, name);
        let events = self.events.fetch(&key, &[KIND_PATCH])?;
        Ok(events
            .iter()
            .enumerate()
            .map(|(i, e)| PullRequest {
                number: i as u64 + 1,
                title: e.tag("title").unwrap_or_default().to_owned(),
                body: e.content.clone(),
                state: PullRequestState::Open,
                source_branch: e.tag("branch").unwrap_or_default().to_owned(),
                target_branch: e.tag("target").unwrap_or_default().to_owned(),
                author: e.pubkey.clone(),
            })
            .collect())
    }

    fn get_pull_request(&self, owner: &str, name: &str, number: u64) -> Result<PullRequest, Error> {
        self.list_pull_requests(owner, name)?
            .into_iter()
            .find(|p| p.number == number)
            .ok_or_else(|| Error::Import(format!("patch #{number} not found in fetched events")))
    }

    fn create_pull_request(
        &self,
        _owner: &str,
        _name: &str,
        _title: &str,
        _body: &str,
        _source_branch: &str,
        _target_branch: &str,
    ) -> Result<PullRequest, Error> {
        Err(Error::Import("opening a patch requires publishing a kind-1617 event, delegated to the host".into()))
    }

    fn update_pull_request(&self, _owner: &str, _name: &str, _number: u64, _title: Option<&str>, _body: Option<&str>) -> Result<PullRequest, Error> {
        Err(Error::Import("patch revisions are new signed events, published by the host".into()))
    }

    fn merge_pull_request(&self, _owner: &str, _name: &str, _number: u64) -> Result<PullRequest, Error> {
        Err(Error::Import(
            "merging happens by calling apply_patch_and_push and safe_push_to_remote directly, not through this surface".into(),
        ))
    }

    fn list_patches(&self, owner: &str, name: &str) -> Result<Vec<Patch>, Error> {
        let key = Self::key(owner, name);
        let events = self.events.fetch(&key, &[KIND_PATCH])?;
        Ok(events
            .iter()
            .map(|e| Patch {
                id: e.tag("id").unwrap_or_default().to_owned(),
                title: e.tag("title").unwrap_or_default().to_owned(),
                author: e.pubkey.clone(),
                diff: e.content.clone(),
            })
            .collect())
    }

    fn get_patch(&self, owner: &str, name: &str, id: &str) -> Result<Patch, Error> {
        self.list_patches(owner, name)?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::Import(format!("patch {id} not found in fetched events")))
    }

    fn get_current_user(&self) -> Result<User, Error> {
        Err(Error::MissingAuth)
    }

    fn get_user(&self, login: &str) -> Result<User, Error> {
        Ok(User {
            login: login.to_owned(),
            display_name: None,
            avatar_url: None,
        })
    }

    fn get_file_content(&self, owner: &str, name: &str, branch: &str, path: &str) -> Result<FileContent, Error> {
        let repo = self.repo(owner, name)?;
        let branch_ref = repo
            .find_branch(branch, git2::BranchType::Local)
            .or_else(|_| repo.find_branch(branch, git2::BranchType::Remote))?;
        let commit = branch_ref.get().peel_to_commit()?;
        let entry = commit.tree()?.get_path(std::path::Path::new(path))?;
        let blob = repo.find_blob(entry.id())?;
        Ok(FileContent {
            path: path.to_owned(),
            content: blob.content().to_vec(),
            oid: blob.id().to_string(),
        })
    }

    fn list_branches(&self, owner: &str, name: &str) -> Result<Vec<Branch>, Error> {
        let repo = self.repo(owner, name)?;
        let mut out = Vec::new();
        for branch in repo.branches(Some(git2::BranchType::Local))? {
            let (branch, _) = branch?;
            if let (Ok(Some(name)), Some(oid)) = (branch.name(), branch.get().target()) {
                out.push(Branch {
                    name: name.to_owned(),
                    oid: oid.to_string(),
                });
            }
        }
        Ok(out)
    }

    fn get_branch(&self, owner: &str, name: &str, branch: &str) -> Result<Branch, Error> {
        let repo = self.repo(owner, name)?;
        let b = repo.find_branch(branch, git2::BranchType::Local)?;
        let oid = b
            .get()
            .target()
            .ok_or_else(|| Error::Import(format!("branch {branch} has no target")))?;
        Ok(Branch {
            name: branch.to_owned(),
            oid: oid.to_string(),
        })
    }

    fn list_tags(&self, owner: &str, name: &str) -> Result<Vec<Tag>, Error> {
        let repo = self.repo(owner, name)?;
        let mut out = Vec::new();
        repo.tag_foreach(|oid, name| {
            if let Ok(name) = std::str::from_utf8(name) {
                out.push(Tag {
                    name: name.trim_start_matches("refs/tags/").to_owned(),
                    oid: oid.to_string(),
                });
            }
            true
        })?;
        Ok(out)
    }

    fn get_tag(&self, owner: &str, name: &str, tag: &str) -> Result<Tag, Error> {
        self.list_tags(owner, name)?
            .into_iter()
            .find(|t| t.name == tag)
            .ok_or_else(|| Error::Import(format!("tag {tag} not found")))
    }
}

fn to_commit(commit: &git2::Commit) -> Commit {
    let author = commit.author();
    Commit {
        oid: commit.id().to_string(),
        message: commit.message().unwrap_or_default().to_owned(),
        author_name: author.name().unwrap_or_default().to_owned(),
        author_email: author.email().unwrap_or_default().to_owned(),
        timestamp: commit.time().seconds(),
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Self::Session(gitmesh_session::Error::Git(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitmesh_core::cache::mem::MemCacheStore;

    struct EmptyEvents;
    impl EventSource for EmptyEvents {
        fn fetch(&self, _key: &CanonicalKey, _kinds: &[u32]) -> Result<Vec<RawEvent>, Error> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn list_issues_is_empty_with_no_matching_events() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemCacheStore::default());
        let session = Arc::new(SessionManager::new(tmp.path(), cache));
        let backend = RadicleBackend::new(session, EmptyEvents);
        let issues = backend.list_issues("alice", "proj").unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn raw_event_tag_lookup_finds_first_matching_tag() {
        let event = RawEvent {
            kind: KIND_ISSUE,
            pubkey: "abc".into(),
            created_at: 0,
            content: "body".into(),
            tags: vec![vec!["title".into(), "Bug report".into()]],
        };
        assert_eq!(event.tag("title"), Some("Bug report"));
        assert_eq!(event.tag("missing"), None);
    }
}
