//! Request/response shapes for every op in the RPC surface (spec §6).

use gitmesh_core::config::{GitIdentity, HostToken};
use gitmesh_core::model::CanonicalKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    // Config
    SetAuthConfig { tokens: Vec<HostToken> },
    SetGitConfig { user: GitIdentity },
    SetEventIo { proxy: String },

    // Lifecycle
    InitializeRepo { key: CanonicalKey, clone_urls: Vec<String> },
    SmartInitializeRepo { key: CanonicalKey, clone_urls: Vec<String>, #[serde(default)] force_update: bool },
    EnsureShallowClone { key: CanonicalKey, clone_urls: Vec<String>, branch: Option<String> },
    EnsureFullClone { key: CanonicalKey, clone_urls: Vec<String>, branch: Option<String>, depth: usize },
    Clone { key: CanonicalKey, clone_urls: Vec<String>, branch: Option<String> },
    DeleteRepo { key: CanonicalKey },
    ClearCloneCache,
    GetRepoDataLevel { key: CanonicalKey },

    // Query
    GetStatus { key: CanonicalKey },
    GetCommitHistory { key: CanonicalKey, branch: Option<String>, #[serde(default)] limit: Option<usize> },
    GetCommitCount { key: CanonicalKey, branch: Option<String> },
    GetCommitDetails { key: CanonicalKey, oid: String },
    ListBranches { key: CanonicalKey },
    ResolveBranch { key: CanonicalKey, requested: Option<String> },
    ListServerRefs { clone_urls: Vec<String> },
    ListRepoFilesFromEvent { key: CanonicalKey, owner: gitmesh_core::model::PubKey, #[serde(default)] maintainers: Vec<gitmesh_core::model::PubKey>, branch: Option<String> },
    GetRepoFileContentFromEvent { key: CanonicalKey, owner: gitmesh_core::model::PubKey, #[serde(default)] maintainers: Vec<gitmesh_core::model::PubKey>, branch: Option<String>, path: String },
    ListBranchesFromEvent { key: CanonicalKey, owner: gitmesh_core::model::PubKey, #[serde(default)] maintainers: Vec<gitmesh_core::model::PubKey> },
    FileExistsAtCommit { key: CanonicalKey, oid: String, path: String },
    GetFileHistory { key: CanonicalKey, branch: Option<String>, path: String },
    ListTreeAtCommit { key: CanonicalKey, oid: String, #[serde(default)] path: Option<String> },

    // Sync
    SyncWithRemote { key: CanonicalKey, clone_urls: Vec<String>, branch: Option<String> },
    NeedsUpdate { key: CanonicalKey, clone_urls: Vec<String> },
    ResetRepoToRemote { key: CanonicalKey, clone_urls: Vec<String>, branch: Option<String> },

    // Patch
    AnalyzePatchMerge {
        key: CanonicalKey,
        clone_urls: Vec<String>,
        patch_id: String,
        diff: String,
        base: Option<String>,
        target_branch: Option<String>,
    },
    ApplyPatchAndPush {
        key: CanonicalKey,
        clone_urls: Vec<String>,
        diff: String,
        base: Option<String>,
        target_branch: Option<String>,
        merge_commit_message: Option<String>,
        author_name: String,
        author_email: String,
    },

    // Push
    PushToRemote { key: CanonicalKey, remote_url: String, branch: Option<String>, #[serde(default)] force: bool },
    SafePushToRemote {
        key: CanonicalKey,
        clone_urls: Vec<String>,
        remote_url: String,
        #[serde(default)]
        is_decentralized: bool,
        #[serde(default)]
        options: SafePushOptionsPayload,
    },

    // Vendor
    CreateRemoteRepo { host_api_base: String, name: String, description: Option<String>, #[serde(default)] private: bool },
    UpdateRemoteRepoMetadata {
        host_api_base: String,
        owner: String,
        name: String,
        description: Option<String>,
        default_branch: Option<String>,
        private: Option<bool>,
    },
    ForkAndCloneRepo { host_api_base: String, owner: String, name: String, key: CanonicalKey },
    UpdateAndPushFiles {
        key: CanonicalKey,
        clone_urls: Vec<String>,
        branch: Option<String>,
        files: Vec<FileWrite>,
        commit_message: String,
        author_name: String,
        author_email: String,
    },
    CloneAndFork { host_api_base: String, owner: String, name: String, key: CanonicalKey },
    CloneRemoteRepo { host_api_base: String, owner: String, name: String, key: CanonicalKey },

    // Scaffold
    GetGitignoreTemplate { language: String },
    GetLicenseTemplate { license: String },
    CreateLocalRepo { key: CanonicalKey, initial_branch: Option<String> },

    // Health
    Ping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafePushOptionsPayload {
    #[serde(default)]
    pub block_if_uncommitted: bool,
    #[serde(default)]
    pub require_up_to_date: bool,
    #[serde(default)]
    pub block_if_shallow: bool,
    #[serde(default)]
    pub allow_force: bool,
    #[serde(default)]
    pub confirm_destructive: bool,
    #[serde(default)]
    pub branch: Option<String>,
}

impl From<SafePushOptionsPayload> for gitmesh_patch::SafePushOptions {
    fn from(p: SafePushOptionsPayload) -> Self {
        Self {
            block_if_uncommitted: p.block_if_uncommitted,
            require_up_to_date: p.require_up_to_date,
            block_if_shallow: p.block_if_shallow,
            allow_force: p.allow_force,
            confirm_destructive: p.confirm_destructive,
            branch: p.branch,
        }
    }
}

/// A clone/merge progress event, as sent to the host (spec §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProgressMessage {
    #[serde(rename = "clone-progress")]
    Clone(ProgressFields),
    #[serde(rename = "merge-progress")]
    Merge(ProgressFields),
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressFields {
    pub repo_id: String,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
}
