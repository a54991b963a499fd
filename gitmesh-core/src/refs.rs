//! Reference resolver (spec §4.D): branch name resolution against a local
//! working directory, and merging of signed ref announcements into a flat
//! ref map.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::error::{categorize_git2, Categorize, ErrorKind};
use crate::model::{PubKey, RefKind, RefRecord, StateAnnouncement};

#[derive(Debug, Error)]
pub enum Error {
    #[error("no branch could be resolved")]
    NoBranches,
    #[error(transparent)]
    Git(#[from] git2::Error),
}

impl Categorize for Error {
    fn category(&self) -> ErrorKind {
        match self {
            Self::NoBranches => ErrorKind::InvalidRefspec,
            Self::Git(e) => categorize_git2(e),
        }
    }
}

const DEFAULT_BRANCHES: &[&str] = &["main", "master", "develop", "dev"];

/// Resolve `requested` (or a sensible default) to the name of an existing
/// local branch in the repository at `dir` (spec §4.D).
///
/// Candidates are tried in order, each validated by resolving it to an
/// object id; the first that resolves wins. Fails with [`Error::NoBranches`]
/// only once every strategy is exhausted.
pub fn resolve_branch(dir: &Path, requested: Option<&str>) -> Result<String, Error> {
    let repo = git2::Repository::open(dir)?;

    let mut candidates: Vec<String> = Vec::new();
    if let Some(req) = requested {
        candidates.push(req.to_owned());
        candidates.push(format!("origin/{req}"));
        candidates.push(format!("refs/heads/{req}"));
    }
    for name in DEFAULT_BRANCHES {
        candidates.push((*name).to_owned());
        candidates.push(format!("origin/{name}"));
        candidates.push(format!("refs/heads/{name}"));
    }

    for candidate in &candidates {
        if resolves(&repo, candidate) {
            return Ok(candidate.clone());
        }
    }

    if let Some(name) = first_local_head(&repo) {
        return Ok(name);
    }
    if let Some(name) = first_remote_head(&repo) {
        return Ok(name);
    }

    Err(Error::NoBranches)
}

fn resolves(repo: &git2::Repository, candidate: &str) -> bool {
    repo.revparse_single(candidate).is_ok()
}

fn first_local_head(repo: &git2::Repository) -> Option<String> {
    let branches = repo.branches(Some(git2::BranchType::Local)).ok()?;
    for branch in branches {
        let (branch, _) = branch.ok()?;
        if let Ok(Some(name)) = branch.name() {
            return Some(name.to_owned());
        }
    }
    None
}

fn first_remote_head(repo: &git2::Repository) -> Option<String> {
    let branches = repo.branches(Some(git2::BranchType::Remote)).ok()?;
    for branch in branches {
        let (branch, _) = branch.ok()?;
        if let Ok(Some(name)) = branch.name() {
            return Some(name.to_owned());
        }
    }
    None
}

/// Merge a set of signed ref announcements into a flat `(kind, name) → ref
/// record` map (spec §4.D).
///
/// Announcements not authored by a member of `maintainers` are ignored.
/// Legacy announcements (flat, positionally-paired tags) are already
/// reconstructed into [`RefRecord`]s by the adapter that produced the
/// `StateAnnouncement`; this function only needs `legacy_encoding` to know
/// nothing further is required here. For each `(kind, name)`, the record
/// from the announcement with the greatest `timestamp` wins; ties are
/// broken by lexical order of the author's identity.
pub fn merge_signed_state(
    announcements: &[StateAnnouncement],
    maintainers: &crate::model::MaintainerSet,
) -> HashMap<(RefKind, String), RefRecord> {
    let mut winners: HashMap<(RefKind, String), (&StateAnnouncement, &RefRecord)> = HashMap::new();

    for announcement in announcements {
        if !maintainers.contains(&announcement.author) {
            continue;
        }
        for record in &announcement.refs {
            let key = (record.kind, record.name.clone());
            match winners.get(&key) {
                Some((current, _)) if !beats(announcement, current) => {}
                _ => {
                    winners.insert(key, (announcement, record));
                }
            }
        }
    }

    winners
        .into_iter()
        .map(|(key, (_, record))| (key, record.clone()))
        .collect()
}

fn beats(candidate: &StateAnnouncement, current: &StateAnnouncement) -> bool {
    use std::cmp::Ordering;
    match candidate.timestamp.cmp(&current.timestamp) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.author.to_string() > current.author.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CanonicalKey;
    use git2::Repository;
    use tempfile::TempDir;

    fn pubkey(tag: u8) -> PubKey {
        format!("{tag:02x}").repeat(32).parse().unwrap()
    }

    fn repo_with_branch(branch: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            index.write_tree().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        let commit = repo
            .commit(None, &sig, &sig, "initial", &tree, &[])
            .unwrap();
        repo.branch(branch, &repo.find_commit(commit).unwrap(), true)
            .unwrap();
        if branch != "main" {
            repo.set_head(&format!("refs/heads/{branch}")).unwrap();
        }
        dir
    }

    #[test]
    fn resolves_exact_request() {
        let dir = repo_with_branch("feature-x");
        let name = resolve_branch(dir.path(), Some("feature-x")).unwrap();
        assert_eq!(name, "feature-x");
    }

    #[test]
    fn falls_back_to_default_branch_names() {
        let dir = repo_with_branch("main");
        let name = resolve_branch(dir.path(), Some("does-not-exist")).unwrap();
        assert_eq!(name, "main");
    }

    #[test]
    fn falls_back_to_any_local_head() {
        let dir = repo_with_branch("totally-custom");
        let name = resolve_branch(dir.path(), None).unwrap();
        assert_eq!(name, "totally-custom");
    }

    fn announcement(
        subject: &str,
        author: PubKey,
        timestamp: i64,
        refs: Vec<RefRecord>,
    ) -> StateAnnouncement {
        StateAnnouncement {
            subject: CanonicalKey::new("alice", subject),
            head: None,
            refs,
            author,
            timestamp,
            maintainers: vec![],
            legacy_encoding: false,
        }
    }

    fn ref_record(name: &str, oid: &str) -> RefRecord {
        RefRecord {
            kind: RefKind::Heads,
            name: name.into(),
            oid: git2::Oid::from_str(oid).unwrap(),
            lineage: vec![],
        }
    }

    #[test]
    fn latest_timestamp_wins() {
        let owner = pubkey(1);
        let maintainers = crate::model::MaintainerSet::new(owner, []);
        let older = announcement(
            "proj",
            owner,
            100,
            vec![ref_record("main", &"a".repeat(40))],
        );
        let newer = announcement(
            "proj",
            owner,
            200,
            vec![ref_record("main", &"b".repeat(40))],
        );

        let merged = merge_signed_state(&[older, newer], &maintainers);
        let record = &merged[&(RefKind::Heads, "main".to_string())];
        assert_eq!(record.oid.to_string(), "b".repeat(40));
    }

    #[test]
    fn ties_broken_lexically_by_author() {
        let low = pubkey(1);
        let high = pubkey(2);
        let maintainers = crate::model::MaintainerSet::new(low, [high]);
        let from_low = announcement("proj", low, 100, vec![ref_record("main", &"a".repeat(40))]);
        let from_high = announcement("proj", high, 100, vec![ref_record("main", &"b".repeat(40))]);

        let merged = merge_signed_state(&[from_low, from_high], &maintainers);
        let record = &merged[&(RefKind::Heads, "main".to_string())];
        assert_eq!(record.oid.to_string(), "b".repeat(40));
    }

    #[test]
    fn non_maintainer_announcements_are_ignored() {
        let owner = pubkey(1);
        let outsider = pubkey(9);
        let maintainers = crate::model::MaintainerSet::new(owner, []);
        let intruder = announcement(
            "proj",
            outsider,
            999,
            vec![ref_record("main", &"f".repeat(40))],
        );

        let merged = merge_signed_state(&[intruder], &maintainers);
        assert!(merged.is_empty());
    }
}
