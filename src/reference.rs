//! URL Resolver (`spec.md` §4.2): turns free-form user input into
//! [`Reference`] values, and a [`Reference`] into the [`Commit`]s it covers.

use std::sync::OnceLock;

use regex::Regex;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::IngestError;
use crate::github::client::Client;

/// What kind of GitHub object a [`Reference`] names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    PullRequest(u64),
    Commit(String),
}

/// A single resolved input pointer, per `spec.md` §3's Reference entity.
///
/// Identity is `(kind, owner, repo, identifier)`; `urlIndex` preserves the
/// 0-based position in the input list so presentation layers can number
/// references the way the user supplied them.
#[derive(Debug, Clone)]
pub struct Reference {
    pub owner: String,
    pub repo: String,
    pub kind: ReferenceKind,
    pub display_url: String,
    pub display_name: String,
    pub url_index: usize,
}

impl Reference {
    pub fn identifier(&self) -> String {
        match &self.kind {
            ReferenceKind::PullRequest(number) => number.to_string(),
            ReferenceKind::Commit(sha) => sha.clone(),
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match &self.kind {
            ReferenceKind::PullRequest(_) => "pr",
            ReferenceKind::Commit(_) => "commit",
        }
    }
}

/// A commit contributed by a [`Reference`] — a PR's head plus its
/// PR-scoped commits, or a commit Reference's single SHA.
#[derive(Debug, Clone)]
pub struct Commit {
    pub sha: String,
    pub branch: Option<String>,
    pub pushed_at: Option<OffsetDateTime>,
}

fn reference_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^(?:https?://github\.com/)?
            (?P<owner>[A-Za-z0-9][A-Za-z0-9_.-]*)/
            (?P<repo>[A-Za-z0-9][A-Za-z0-9_.-]*)/
            (?P<kind>pull|pulls|commit|commits)/
            (?P<id>[A-Za-z0-9]+)
            (?:[/?#].*)?$
            ",
        )
        .expect("reference regex is valid")
    })
}

/// Parse one free-form input string into a [`Reference`].
///
/// Accepts a full URL, the path portion of one, or the bare
/// `owner/repo/(pull|commit)/identifier` form. Anything else is a
/// structural error, surfaced at setup time per `spec.md` §7.
pub fn parse_reference(input: &str, url_index: usize) -> Result<Reference, IngestError> {
    let trimmed = input.trim();
    let caps = reference_regex().captures(trimmed).ok_or_else(|| {
        IngestError::Validation(format!(
            "could not parse reference \"{trimmed}\": expected a GitHub URL or \
             owner/repo/(pull|commit)/identifier"
        ))
    })?;

    let owner = caps["owner"].to_string();
    let repo = caps["repo"].to_string();
    let kind_str = &caps["kind"];
    let id = &caps["id"];

    let kind = if kind_str.starts_with("pull") {
        let number: u64 = id.parse().map_err(|_| {
            IngestError::Validation(format!("pull request identifier \"{id}\" is not a number"))
        })?;
        ReferenceKind::PullRequest(number)
    } else {
        ReferenceKind::Commit(id.to_string())
    };

    let display_name = format!("{owner}/{repo}#{id}");
    debug!(%display_name, "parsed reference");

    Ok(Reference {
        owner,
        repo,
        kind,
        display_url: trimmed.to_string(),
        display_name,
        url_index,
    })
}

/// Parse every entry in `inputs`, preserving order. A malformed reference is
/// a Validation error and aborts the whole run per `spec.md` §7 — unlike
/// Resolution failures (missing upstream data), a bad shape is caught before
/// any network traffic.
pub fn parse_references(inputs: &[String]) -> Result<Vec<Reference>, IngestError> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| parse_reference(input, index))
        .collect()
}

/// Resolve a [`Reference`] into the [`Commit`]s it contributes.
///
/// A PR Reference yields its head commit plus every commit in its
/// PR-scoped commit listing; a commit Reference yields a single-element set.
pub async fn resolve_commits(
    client: &Client,
    reference: &Reference,
) -> Result<Vec<Commit>, IngestError> {
    match &reference.kind {
        ReferenceKind::Commit(sha) => {
            let commit = client
                .get_commit(&reference.owner, &reference.repo, sha)
                .await
                .map_err(|source| IngestError::Resolution {
                    display_url: reference.display_url.clone(),
                    source,
                })?
                .ok_or_else(|| IngestError::Resolution {
                    display_url: reference.display_url.clone(),
                    source: crate::error::ApiProblem::NotFound,
                })?;
            Ok(vec![commit])
        }
        ReferenceKind::PullRequest(number) => {
            let pr = client
                .get_pull_request(&reference.owner, &reference.repo, *number)
                .await
                .map_err(|source| IngestError::Resolution {
                    display_url: reference.display_url.clone(),
                    source,
                })?
                .ok_or_else(|| IngestError::Resolution {
                    display_url: reference.display_url.clone(),
                    source: crate::error::ApiProblem::NotFound,
                })?;

            let mut commits: Vec<Commit> = client
                .list_pull_request_commits(&reference.owner, &reference.repo, *number)
                .collect_all()
                .await
                .map_err(|source| IngestError::Resolution {
                    display_url: reference.display_url.clone(),
                    source,
                })?
                .into_iter()
                .map(|commit| Commit {
                    sha: commit.sha,
                    branch: None,
                    pushed_at: Some(commit.commit.committer.date),
                })
                .collect();

            if !commits.iter().any(|commit| commit.sha == pr.head_sha()) {
                commits.push(Commit {
                    sha: pr.head_sha().to_string(),
                    branch: Some(pr.head_ref().to_string()),
                    pushed_at: None,
                });
            }

            Ok(commits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_pull_request_url() {
        let r = parse_reference("https://github.com/acme/widgets/pull/42", 0).unwrap();
        assert_eq!(r.owner, "acme");
        assert_eq!(r.repo, "widgets");
        assert_eq!(r.kind, ReferenceKind::PullRequest(42));
        assert_eq!(r.url_index, 0);
    }

    #[test]
    fn parses_bare_commit_form() {
        let r = parse_reference("acme/widgets/commit/deadbeef", 3).unwrap();
        assert_eq!(r.kind, ReferenceKind::Commit("deadbeef".to_string()));
        assert_eq!(r.url_index, 3);
    }

    #[test]
    fn parses_plural_commits_path() {
        let r = parse_reference("acme/widgets/commits/deadbeef", 0).unwrap();
        assert_eq!(r.kind, ReferenceKind::Commit("deadbeef".to_string()));
    }

    #[test]
    fn parses_url_with_trailing_fragment() {
        let r = parse_reference("https://github.com/acme/widgets/pull/7/files", 0).unwrap();
        assert_eq!(r.kind, ReferenceKind::PullRequest(7));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_reference("not-a-reference", 0).is_err());
        assert!(parse_reference("acme/widgets/issues/5", 0).is_err());
    }

    #[test]
    fn preserves_input_order_as_url_index() {
        let inputs = vec![
            "acme/widgets/pull/1".to_string(),
            "acme/widgets/commit/abc".to_string(),
        ];
        let refs = parse_references(&inputs).unwrap();
        assert_eq!(refs[0].url_index, 0);
        assert_eq!(refs[1].url_index, 1);
    }
}
