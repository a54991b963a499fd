//! `ureq`-backed [`VendorProvider`] for centralized, GitHub/GitLab-style
//! REST hosting backends.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::model::*;
use crate::provider::VendorProvider;
use crate::Error;

/// Where the REST endpoints live and how requests are authenticated.
///
/// One `RestBackend` instance talks to one host; multi-host setups hold
/// one instance per configured host (mirrors `gitmesh_core::config`'s
/// per-host token table).
pub struct RestBackend {
    api_base: String,
    token: Option<String>,
}

impl RestBackend {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    fn authed(&self, req: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => req.set("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.authed(ureq::get(&self.url(path)))
            .call()
            .map_err(unwrap_ureq)?
            .into_json()
            .map_err(Error::Decode)
    }

    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let req = self.authed(ureq::request(method, &self.url(path)));
        req.send_json(json!(body))
            .map_err(unwrap_ureq)?
            .into_json()
            .map_err(Error::Decode)
    }

}

/// Translate a transport-level `ureq::Error` into our error type, folding
/// the vendor's HTTP status + body into [`Error::Api`] when the server
/// answered with a structured rejection rather than dropping the
/// connection outright.
fn unwrap_ureq(err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            Error::Api { status, body }
        }
        ureq::Error::Transport(_) => Error::from(err),
    }
}

impl VendorProvider for RestBackend {
    fn get_repo(&self, owner: &str, name: &str) -> Result<Repo, Error> {
        self.get(&format!("/repos/{owner}/{name}"))
    }

    fn create_repo(&self, new_repo: &NewRepo) -> Result<Repo, Error> {
        self.send("POST", "/repos", new_repo)
    }

    fn update_repo(&self, owner: &str, name: &str, update: &RepoUpdate) -> Result<Repo, Error> {
        self.send("PATCH", &format!("/repos/{owner}/{name}"), update)
    }

    fn fork_repo(&self, owner: &str, name: &str) -> Result<Repo, Error> {
        self.send("POST", &format!("/repos/{owner}/{name}/forks"), &json!({}))
    }

    fn list_commits(&self, owner: &str, name: &str, branch: &str) -> Result<Vec<Commit>, Error> {
        self.get(&format!("/repos/{owner}/{name}/commits?sha={branch}"))
    }

    fn get_commit(&self, owner: &str, name: &str, oid: &str) -> Result<Commit, Error> {
        self.get(&format!("/repos/{owner}/{name}/commits/{oid}"))
    }

    fn list_issues(&self, owner: &str, name: &str) -> Result<Vec<Issue>, Error> {
        self.get(&format!("/repos/{owner}/{name}/issues"))
    }

    fn get_issue(&self, owner: &str, name: &str, number: u64) -> Result<Issue, Error> {
        self.get(&format!("/repos/{owner}/{name}/issues/{number}"))
    }

    fn create_issue(&self, owner: &str, name: &str, title: &str, body: &str) -> Result<Issue, Error> {
        self.send(
            "POST",
            &format!("/repos/{owner}/{name}/issues"),
            &json!({ "title": title, "body": body }),
        )
    }

    fn update_issue(
        &self,
        owner: &str,
        name: &str,
        number: u64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<Issue, Error> {
        self.send(
            "PATCH",
            &format!("/repos/{owner}/{name}/issues/{number}"),
            &json!({ "title": title, "body": body }),
        )
    }

    fn close_issue(&self, owner: &str, name: &str, number: u64) -> Result<Issue, Error> {
        self.send(
            "PATCH",
            &format!("/repos/{owner}/{name}/issues/{number}"),
            &json!({ "state": "closed" }),
        )
    }

    fn list_issue_comments(&self, owner: &str, name: &str, number: u64) -> Result<Vec<Comment>, Error> {
        self.get(&format!("/repos/{owner}/{name}/issues/{number}/comments"))
    }

    fn list_pull_request_comments(&self, owner: &str, name: &str, number: u64) -> Result<Vec<Comment>, Error> {
        self.get(&format!("/repos/{owner}/{name}/pulls/{number}/comments"))
    }

    fn get_comment(&self, owner: &str, name: &str, id: u64) -> Result<Comment, Error> {
        self.get(&format!("/repos/{owner}/{name}/comments/{id}"))
    }

    fn list_pull_requests(&self, owner: &str, name: &str) -> Result<Vec<PullRequest>, Error> {
        self.get(&format!("/repos/{owner}/{name}/pulls"))
    }

    fn get_pull_request(&self, owner: &str, name: &str, number: u64) -> Result<PullRequest, Error> {
        self.get(&format!("/repos/{owner}/{name}/pulls/{number}"))
    }

    fn create_pull_request(
        &self,
        owner: &str,
        name: &str,
        title: &str,
        body: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<PullRequest, Error> {
        self.send(
            "POST",
            &format!("/repos/{owner}/{name}/pulls"),
            &json!({
                "title": title,
                "body": body,
                "head": source_branch,
                "base": target_branch,
            }),
        )
    }

    fn update_pull_request(
        &self,
        owner: &str,
        name: &str,
        number: u64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<PullRequest, Error> {
        self.send(
            "PATCH",
            &format!("/repos/{owner}/{name}/pulls/{number}"),
            &json!({ "title": title, "body": body }),
        )
    }

    fn merge_pull_request(&self, owner: &str, name: &str, number: u64) -> Result<PullRequest, Error> {
        self.send(
            "PUT",
            &format!("/repos/{owner}/{name}/pulls/{number}/merge"),
            &json!({}),
        )
    }

    fn list_patches(&self, owner: &str, name: &str) -> Result<Vec<Patch>, Error> {
        self.get(&format!("/repos/{owner}/{name}/patches"))
    }

    fn get_patch(&self, owner: &str, name: &str, id: &str) -> Result<Patch, Error> {
        self.get(&format!("/repos/{owner}/{name}/patches/{id}"))
    }

    fn get_current_user(&self) -> Result<User, Error> {
        self.get("/user")
    }

    fn get_user(&self, login: &str) -> Result<User, Error> {
        self.get(&format!("/users/{login}"))
    }

    fn get_file_content(&self, owner: &str, name: &str, branch: &str, path: &str) -> Result<FileContent, Error> {
        self.get(&format!("/repos/{owner}/{name}/contents/{path}?ref={branch}"))
    }

    fn list_branches(&self, owner: &str, name: &str) -> Result<Vec<Branch>, Error> {
        self.get(&format!("/repos/{owner}/{name}/branches"))
    }

    fn get_branch(&self, owner: &str, name: &str, branch: &str) -> Result<Branch, Error> {
        self.get(&format!("/repos/{owner}/{name}/branches/{branch}"))
    }

    fn list_tags(&self, owner: &str, name: &str) -> Result<Vec<Tag>, Error> {
        self.get(&format!("/repos/{owner}/{name}/tags"))
    }

    fn get_tag(&self, owner: &str, name: &str, tag: &str) -> Result<Tag, Error> {
        self.get(&format!("/repos/{owner}/{name}/git/refs/tags/{tag}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path_without_double_slash() {
        let backend = RestBackend::new("https://api.example.com/v3/", None);
        assert_eq!(backend.url("/repos/foo/bar"), "https://api.example.com/v3/repos/foo/bar");
    }

    #[test]
    fn authed_request_is_unchanged_without_a_token() {
        let backend = RestBackend::new("https://api.example.com", None);
        let req = backend.authed(ureq::get(&backend.url("/user")));
        assert_eq!(req.header("Authorization"), None);
    }

    #[test]
    fn authed_request_carries_bearer_token() {
        let backend = RestBackend::new("https://api.example.com", Some("tok123".into()));
        let req = backend.authed(ureq::get(&backend.url("/user")));
        assert_eq!(req.header("Authorization"), Some("Bearer tok123"));
    }
}
