//! Unified-diff parsing and application (spec §4.G).
//!
//! No crate in this workspace's dependency graph both parses *and*
//! applies unified diffs: `similar` (used by `radicle-cli` to render
//! diffs) only computes them. Applying a patch series to arbitrary file
//! content is this component's reason to exist, so it's hand-written
//! here rather than delegated.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed file header at line {0}")]
    MalformedFileHeader(usize),
    #[error("malformed hunk header at line {0}: {1}")]
    MalformedHunkHeader(usize, String),
    #[error("binary patch content is not supported")]
    BinaryPatch,
    #[error("hunk at line {0} does not apply: context mismatch at file line {1}")]
    HunkDoesNotApply(usize, usize),
}

/// One file's worth of changes in a patch series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub kind: ChangeKind,
    pub hunks: Vec<Hunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modify,
    Add,
    Delete,
    /// Detected because the `---`/`+++` headers name different paths
    /// while both have non-`/dev/null` sides.
    Rename,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Modify => "modify",
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Rename => "rename",
        };
        f.write_str(s)
    }
}

/// Parse a multi-file unified-diff payload into a series of [`FileDiff`]s.
pub fn parse(patch: &str) -> Result<Vec<FileDiff>, Error> {
    let lines: Vec<&str> = patch.lines().collect();
    let mut files = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].starts_with("diff --git") || lines[i].starts_with("--- ") {
            let (file, next) = parse_file(&lines, i)?;
            files.push(file);
            i = next;
        } else {
            i += 1;
        }
    }

    Ok(files)
}

fn parse_file(lines: &[&str], mut i: usize) -> Result<(FileDiff, usize), Error> {
    let header_line = i;

    if lines[i].starts_with("diff --git") {
        i += 1;
        while i < lines.len() && !lines[i].starts_with("--- ") {
            if lines[i].starts_with("Binary files") || lines[i].starts_with("GIT binary patch") {
                return Err(Error::BinaryPatch);
            }
            i += 1;
        }
    }

    let Some(old_line) = lines.get(i).filter(|l| l.starts_with("--- ")) else {
        return Err(Error::MalformedFileHeader(header_line + 1));
    };
    let old_raw = old_line[4..].split('\t').next().unwrap_or("").trim();
    i += 1;

    let Some(new_line) = lines.get(i).filter(|l| l.starts_with("+++ ")) else {
        return Err(Error::MalformedFileHeader(header_line + 1));
    };
    let new_raw = new_line[4..].split('\t').next().unwrap_or("").trim();
    i += 1;

    let old_path = strip_prefix(old_raw);
    let new_path = strip_prefix(new_raw);

    let kind = match (&old_path, &new_path) {
        (None, Some(_)) => ChangeKind::Add,
        (Some(_), None) => ChangeKind::Delete,
        (Some(o), Some(n)) if o != n => ChangeKind::Rename,
        _ => ChangeKind::Modify,
    };

    let mut hunks = Vec::new();
    while i < lines.len() && lines[i].starts_with("@@ ") {
        let (hunk, next) = parse_hunk(lines, i)?;
        hunks.push(hunk);
        i = next;
    }

    Ok((
        FileDiff {
            old_path,
            new_path,
            kind,
            hunks,
        },
        i,
    ))
}

fn strip_prefix(path: &str) -> Option<String> {
    if path == "/dev/null" {
        return None;
    }
    for prefix in ["a/", "b/"] {
        if let Some(stripped) = path.strip_prefix(prefix) {
            return Some(stripped.to_owned());
        }
    }
    Some(path.to_owned())
}

fn parse_hunk(lines: &[&str], i: usize) -> Result<(Hunk, usize), Error> {
    let header = lines[i];
    let (old_start, old_lines, new_start, new_lines) = parse_hunk_header(header, i)?;

    let mut body = Vec::new();
    let mut j = i + 1;
    while j < lines.len() {
        let line = lines[j];
        if line.starts_with("@@ ") || line.starts_with("diff --git") || line.starts_with("--- ") {
            break;
        }
        let parsed = match line.chars().next() {
            Some('+') => DiffLine::Add(line[1..].to_owned()),
            Some('-') => DiffLine::Remove(line[1..].to_owned()),
            Some(' ') => DiffLine::Context(line[1..].to_owned()),
            Some('\\') => {
                j += 1;
                continue;
            }
            _ => break,
        };
        body.push(parsed);
        j += 1;
    }

    Ok((
        Hunk {
            old_start,
            old_lines,
            new_start,
            new_lines,
            lines: body,
        },
        j,
    ))
}

fn parse_hunk_header(
    header: &str,
    line_no: usize,
) -> Result<(usize, usize, usize, usize), Error> {
    let inner = header
        .strip_prefix("@@ ")
        .and_then(|s| s.split(" @@").next())
        .ok_or_else(|| Error::MalformedHunkHeader(line_no + 1, header.to_owned()))?;

    let mut parts = inner.split_whitespace();
    let old = parts
        .next()
        .ok_or_else(|| Error::MalformedHunkHeader(line_no + 1, header.to_owned()))?;
    let new = parts
        .next()
        .ok_or_else(|| Error::MalformedHunkHeader(line_no + 1, header.to_owned()))?;

    let (old_start, old_lines) = parse_range(old, line_no, header)?;
    let (new_start, new_lines) = parse_range(new, line_no, header)?;

    Ok((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str, line_no: usize, header: &str) -> Result<(usize, usize), Error> {
    let range = range
        .strip_prefix(['-', '+'])
        .ok_or_else(|| Error::MalformedHunkHeader(line_no + 1, header.to_owned()))?;
    let mut parts = range.splitn(2, ',');
    let start: usize = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::MalformedHunkHeader(line_no + 1, header.to_owned()))?;
    let len: usize = match parts.next() {
        Some(s) => s
            .parse()
            .map_err(|_| Error::MalformedHunkHeader(line_no + 1, header.to_owned()))?,
        None => 1,
    };
    Ok((start, len))
}

/// Outcome of test-applying one [`Hunk`] against `lines` (the file's
/// current content, split on `\n`), starting the search at or after
/// `search_from`.
pub fn apply_hunk(
    lines: &mut Vec<String>,
    hunk: &Hunk,
    search_from: usize,
    delta: isize,
) -> Result<usize, HunkFailure> {
    let anchor = find_anchor(lines, hunk, search_from, delta)?;

    let mut pos = anchor;
    let mut new_lines = Vec::new();
    let mut consumed = 0;
    for op in &hunk.lines {
        match op {
            DiffLine::Context(expected) => {
                verify_matches(lines, pos, expected)?;
                new_lines.push(lines[pos].clone());
                pos += 1;
                consumed += 1;
            }
            DiffLine::Remove(expected) => {
                verify_matches(lines, pos, expected)?;
                pos += 1;
                consumed += 1;
            }
            DiffLine::Add(content) => {
                new_lines.push(content.clone());
            }
        }
    }

    lines.splice(anchor..anchor + consumed, new_lines);
    Ok(anchor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkFailure {
    pub at_line: usize,
}

/// `delta` is the cumulative `new_lines - old_lines` from every hunk
/// already applied to this same file's buffer: `old_start` is expressed
/// in the original file's line numbering, so earlier hunks that shifted
/// the buffer's length must be accounted for before comparing against
/// `search_from`, which is itself expressed in that mutated buffer.
fn find_anchor(
    lines: &[String],
    hunk: &Hunk,
    search_from: usize,
    delta: isize,
) -> Result<usize, HunkFailure> {
    let expected_start = (hunk.old_start.saturating_sub(1) as isize + delta).max(0) as usize;
    let candidate = expected_start.max(search_from);
    if candidate <= lines.len() {
        return Ok(candidate);
    }
    Err(HunkFailure { at_line: candidate })
}

fn verify_matches(lines: &[String], pos: usize, expected: &str) -> Result<(), HunkFailure> {
    match lines.get(pos) {
        Some(actual) if actual == expected => Ok(()),
        _ => Err(HunkFailure { at_line: pos }),
    }
}

/// Whether every line this hunk would add is already present at its
/// target position and every line it would remove is already absent —
/// i.e. the hunk's *post-state* already matches (spec §4.G
/// `already-applied`).
pub fn hunk_already_applied(lines: &[String], hunk: &Hunk) -> bool {
    let expected_start = hunk.new_start.saturating_sub(1);
    let post_state: Vec<&str> = hunk
        .lines
        .iter()
        .filter_map(|l| match l {
            DiffLine::Context(s) | DiffLine::Add(s) => Some(s.as_str()),
            DiffLine::Remove(_) => None,
        })
        .collect();

    if expected_start + post_state.len() > lines.len() {
        return false;
    }
    lines[expected_start..expected_start + post_state.len()]
        .iter()
        .zip(post_state.iter())
        .all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "diff --git a/foo.txt b/foo.txt\n--- a/foo.txt\n+++ b/foo.txt\n@@ -1,3 +1,3 @@\n line one\n-line two\n+line TWO\n line three\n";

    #[test]
    fn parses_single_file_single_hunk() {
        let files = parse(SAMPLE).unwrap();
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file.old_path.as_deref(), Some("foo.txt"));
        assert_eq!(file.new_path.as_deref(), Some("foo.txt"));
        assert_eq!(file.kind, ChangeKind::Modify);
        assert_eq!(file.hunks.len(), 1);
        assert_eq!(file.hunks[0].lines.len(), 4);
    }

    #[test]
    fn recognizes_addition_via_dev_null() {
        let patch = "diff --git a/new.txt b/new.txt\n--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,1 @@\n+hello\n";
        let files = parse(patch).unwrap();
        assert_eq!(files[0].kind, ChangeKind::Add);
        assert_eq!(files[0].old_path, None);
    }

    #[test]
    fn recognizes_deletion_via_dev_null() {
        let patch = "diff --git a/gone.txt b/gone.txt\n--- a/gone.txt\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-bye\n";
        let files = parse(patch).unwrap();
        assert_eq!(files[0].kind, ChangeKind::Delete);
        assert_eq!(files[0].new_path, None);
    }

    #[test]
    fn recognizes_rename_via_differing_headers() {
        let patch = "diff --git a/old.txt b/new.txt\n--- a/old.txt\n+++ b/new.txt\n@@ -1,1 +1,1 @@\n-x\n+x\n";
        let files = parse(patch).unwrap();
        assert_eq!(files[0].kind, ChangeKind::Rename);
    }

    #[test]
    fn rejects_binary_patch() {
        let patch = "diff --git a/img.png b/img.png\nGIT binary patch\nliteral 10\n";
        assert!(matches!(parse(patch), Err(Error::BinaryPatch)));
    }

    #[test]
    fn applies_a_clean_hunk() {
        let files = parse(SAMPLE).unwrap();
        let mut content: Vec<String> = vec!["line one", "line two", "line three"]
            .into_iter()
            .map(String::from)
            .collect();
        apply_hunk(&mut content, &files[0].hunks[0], 0, 0).unwrap();
        assert_eq!(content, vec!["line one", "line TWO", "line three"]);
    }

    #[test]
    fn detects_conflicting_hunk() {
        let files = parse(SAMPLE).unwrap();
        let mut content: Vec<String> = vec!["line one", "DIFFERENT", "line three"]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(apply_hunk(&mut content, &files[0].hunks[0], 0, 0).is_err());
    }

    #[test]
    fn applies_second_hunk_at_shifted_position_after_an_earlier_insertion() {
        let patch = "diff --git a/foo.txt b/foo.txt\n\
                      --- a/foo.txt\n\
                      +++ b/foo.txt\n\
                      @@ -1,1 +1,2 @@\n\
                      +inserted\n\
                      \x20line one\n\
                      @@ -5,1 +6,1 @@\n\
                      -line five\n\
                      +line FIVE\n";
        let files = parse(patch).unwrap();
        let file = &files[0];
        assert_eq!(file.hunks.len(), 2);

        let mut content: Vec<String> = vec![
            "line one", "line two", "line three", "line four", "line five",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut last_pos = 0;
        let mut delta: isize = 0;
        for hunk in &file.hunks {
            let before = content.len();
            let pos = apply_hunk(&mut content, hunk, last_pos, delta).unwrap();
            last_pos = pos;
            delta += content.len() as isize - before as isize;
        }

        assert_eq!(
            content,
            vec![
                "inserted", "line one", "line two", "line three", "line four", "line FIVE",
            ]
        );
    }

    #[test]
    fn detects_already_applied_hunk() {
        let files = parse(SAMPLE).unwrap();
        let content: Vec<String> = vec!["line one", "line TWO", "line three"]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(hunk_already_applied(&content, &files[0].hunks[0]));
    }
}
