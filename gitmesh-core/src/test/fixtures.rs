//! Reusable fixtures for tests across the workspace.

use std::path::Path;

use crate::model::{CanonicalKey, PubKey, RefKind, RefRecord, StateAnnouncement};

/// Create a bare-bones repository at `path` with a single commit on
/// `branch`, and return it along with that commit's id.
pub fn repository<P: AsRef<Path>>(path: P, branch: &str) -> (git2::Repository, git2::Oid) {
    let repo = git2::Repository::init(path).unwrap();
    let sig = git2::Signature::now("anonymous", "anonymous@example.com").unwrap();
    let tree_id = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let oid = repo
        .commit(None, &sig, &sig, "initial commit", &tree, &[])
        .unwrap();
    repo.branch(branch, &repo.find_commit(oid).unwrap(), true)
        .unwrap();
    repo.set_head(&format!("refs/heads/{branch}")).unwrap();

    (repo, oid)
}

/// A deterministic public key, distinguished by `tag`. Only useful in
/// tests: real keys come from the host's event-IO adapter.
pub fn pubkey(tag: u8) -> PubKey {
    format!("{tag:02x}").repeat(32).parse().unwrap()
}

/// A minimal signed state announcement for `owner/name`, advertising a
/// single `refs/heads/<branch>` ref.
pub fn announcement(
    owner: &str,
    name: &str,
    author: PubKey,
    timestamp: i64,
    branch: &str,
    oid: git2::Oid,
) -> StateAnnouncement {
    StateAnnouncement {
        subject: CanonicalKey::new(owner, name),
        head: Some(format!("refs/heads/{branch}")),
        refs: vec![RefRecord {
            kind: RefKind::Heads,
            name: branch.to_owned(),
            oid,
            lineage: vec![],
        }],
        author,
        timestamp,
        maintainers: vec![],
        legacy_encoding: false,
    }
}
