//! Dimension extraction.
//!
//! Every function here is total: missing or malformed payload fields
//! degrade to [`UNKNOWN`] (or a documented default) and never fail.

use pulse_core::{Dimensions, Event, UNKNOWN};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload;
use crate::sources::builtin_handler;

/// Directory value for files at the repository root.
pub const ROOT_DIRECTORY: &str = "root";

/// Filetype value for files without an extension.
pub const NO_FILETYPE: &str = "none";

/// Extracts the dimension set for an event, dispatching on its source.
///
/// Unknown sources get `{source}` only.
#[must_use]
pub fn extract_dimensions(event: &Event) -> Dimensions {
    builtin_handler(event.source().kind()).dimensions(event)
}

/// Returns the organization part of an `org/repo` full name.
#[must_use]
pub fn extract_org_from_repo(full_name: Option<&str>) -> String {
    full_name
        .and_then(|name| name.trim().split('/').next())
        .map(str::trim)
        .filter(|org| !org.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Returns the number of commits in a push.
///
/// A push without a non-empty `commits` array counts as one change.
#[must_use]
pub fn extract_commit_count(event: &Event) -> u64 {
    match payload::array_at(event.data(), &["commits"]) {
        Some(commits) if !commits.is_empty() => commits.len() as u64,
        _ => 1,
    }
}

/// Returns the acting user: `sender.login`, then `pusher.name`.
#[must_use]
pub fn extract_author(event: &Event) -> String {
    payload::first_str(event.data(), &[&["sender", "login"], &["pusher", "name"]])
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Returns the branch or tag named by `data.ref`.
#[must_use]
pub fn extract_branch(event: &Event) -> String {
    payload::str_at(event.data(), &["ref"])
        .and_then(parse_ref)
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Parses `refs/heads/<name>` or `refs/tags/<name>` into `<name>`.
#[must_use]
pub fn parse_ref(git_ref: &str) -> Option<&str> {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .filter(|name| !name.is_empty())
}

/// How a file was touched by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Listed in the commit's `added` array.
    Added,
    /// Listed in the commit's `modified` array.
    Modified,
    /// Listed in the commit's `removed` array.
    Removed,
}

impl ChangeKind {
    /// Every kind with its payload field name.
    pub const FIELDS: [(Self, &'static str); 3] = [
        (Self::Added, "added"),
        (Self::Modified, "modified"),
        (Self::Removed, "removed"),
    ];
}

/// One file touched by one commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileChange {
    /// Path component before the last `/`, or `root`.
    pub directory: String,
    /// Lowercased extension, or `none`.
    pub filetype: String,
    /// How the file was touched.
    pub kind: ChangeKind,
}

/// Lists every file touched by every commit, one entry per file per commit.
#[must_use]
pub fn extract_file_changes(event: &Event) -> Vec<FileChange> {
    let Some(commits) = payload::array_at(event.data(), &["commits"]) else {
        return Vec::new();
    };

    commits
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|commit| {
            ChangeKind::FIELDS.into_iter().flat_map(move |(kind, field)| {
                commit
                    .get(field)
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .filter(|path| !path.trim().is_empty())
                    .map(move |path| {
                        let (directory, filetype) = split_path(path);
                        FileChange {
                            directory,
                            filetype,
                            kind,
                        }
                    })
            })
        })
        .collect()
}

/// Splits a file path into its directory and filetype.
///
/// Only the last path component is inspected for an extension, and a
/// leading dot alone (a hidden file) is not one.
#[must_use]
pub fn split_path(path: &str) -> (String, String) {
    let path = path.trim().trim_start_matches("./");
    let (directory, file_name) = match path.rsplit_once('/') {
        Some((dir, file)) if !dir.is_empty() => (dir.to_string(), file),
        Some((_, file)) => (ROOT_DIRECTORY.to_string(), file),
        None => (ROOT_DIRECTORY.to_string(), path),
    };

    let filetype = file_name
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map_or_else(|| NO_FILETYPE.to_string(), |(_, ext)| ext.to_ascii_lowercase());

    (directory, filetype)
}
