//! The vendor-neutral hosting surface (spec §4.I).

use crate::model::*;

/// Operations every hosting backend (centralized REST, or the
/// decentralized event-coordinated backend) must expose.
///
/// Implementations are synchronous and blocking, matching the rest of
/// this crate family: callers that want concurrency run these on their
/// own threads.
pub trait VendorProvider {
    fn get_repo(&self, owner: &str, name: &str) -> Result<Repo, crate::Error>;
    fn create_repo(&self, new_repo: &NewRepo) -> Result<Repo, crate::Error>;
    fn update_repo(&self, owner: &str, name: &str, update: &RepoUpdate) -> Result<Repo, crate::Error>;
    fn fork_repo(&self, owner: &str, name: &str) -> Result<Repo, crate::Error>;

    fn list_commits(&self, owner: &str, name: &str, branch: &str) -> Result<Vec<Commit>, crate::Error>;
    fn get_commit(&self, owner: &str, name: &str, oid: &str) -> Result<Commit, crate::Error>;

    fn list_issues(&self, owner: &str, name: &str) -> Result<Vec<Issue>, crate::Error>;
    fn get_issue(&self, owner: &str, name: &str, number: u64) -> Result<Issue, crate::Error>;
    fn create_issue(&self, owner: &str, name: &str, title: &str, body: &str) -> Result<Issue, crate::Error>;
    fn update_issue(&self, owner: &str, name: &str, number: u64, title: Option<&str>, body: Option<&str>) -> Result<Issue, crate::Error>;
    fn close_issue(&self, owner: &str, name: &str, number: u64) -> Result<Issue, crate::Error>;

    fn list_issue_comments(&self, owner: &str, name: &str, number: u64) -> Result<Vec<Comment>, crate::Error>;
    fn list_pull_request_comments(&self, owner: &str, name: &str, number: u64) -> Result<Vec<Comment>, crate::Error>;
    fn get_comment(&self, owner: &str, name: &str, id: u64) -> Result<Comment, crate::Error>;

    fn list_pull_requests(&self, owner: &str, name: &str) -> Result<Vec<PullRequest>, crate::Error>;
    fn get_pull_request(&self, owner: &str, name: &str, number: u64) -> Result<PullRequest, crate::Error>;
    fn create_pull_request(
        &self,
        owner: &str,
        name: &str,
        title: &str,
        body: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<PullRequest, crate::Error>;
    fn update_pull_request(&self, owner: &str, name: &str, number: u64, title: Option<&str>, body: Option<&str>) -> Result<PullRequest, crate::Error>;
    fn merge_pull_request(&self, owner: &str, name: &str, number: u64) -> Result<PullRequest, crate::Error>;

    fn list_patches(&self, owner: &str, name: &str) -> Result<Vec<Patch>, crate::Error>;
    fn get_patch(&self, owner: &str, name: &str, id: &str) -> Result<Patch, crate::Error>;

    fn get_current_user(&self) -> Result<User, crate::Error>;
    fn get_user(&self, login: &str) -> Result<User, crate::Error>;

    fn get_file_content(&self, owner: &str, name: &str, branch: &str, path: &str) -> Result<FileContent, crate::Error>;

    fn list_branches(&self, owner: &str, name: &str) -> Result<Vec<Branch>, crate::Error>;
    fn get_branch(&self, owner: &str, name: &str, branch: &str) -> Result<Branch, crate::Error>;

    fn list_tags(&self, owner: &str, name: &str) -> Result<Vec<Tag>, crate::Error>;
    fn get_tag(&self, owner: &str, name: &str, tag: &str) -> Result<Tag, crate::Error>;
}

/// Poll an in-progress fork/import job until it settles or the bound is
/// exhausted (spec §4.I: "fork via import URL + bounded poll").
pub fn poll_import_until_done(
    mut poll_once: impl FnMut() -> Result<ImportStatus, crate::Error>,
    max_attempts: usize,
    interval: std::time::Duration,
) -> Result<(), crate::Error> {
    for attempt in 0..max_attempts {
        let status = poll_once()?;
        if status.complete {
            return match status.error {
                Some(reason) => Err(crate::Error::Import(reason)),
                None => Ok(()),
            };
        }
        if attempt + 1 < max_attempts {
            std::thread::sleep(interval);
        }
    }
    Err(crate::Error::ImportTimedOut)
}
