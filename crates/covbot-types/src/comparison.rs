//! The comparison payload posted by the coverage reporting service.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Shortest identifier treated as a commit sha rather than a pull number.
pub const COMMIT_SHA_MIN_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Link to the comparison in the reporting service's web UI.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pullid: Option<PullId>,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
    #[serde(default, deserialize_with = "coverage")]
    pub head_totals_c: Option<f64>,
    #[serde(default, deserialize_with = "coverage")]
    pub base_totals_c: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadCommit {
    pub commitid: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub ci_passed: Option<bool>,
    #[serde(default)]
    pub pull: Option<PullId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    User {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::User { name: Some(name), .. } => f.write_str(name),
            Self::User { username: Some(username), .. } => f.write_str(username),
            Self::User { .. } => f.write_str("unknown"),
        }
    }
}

/// Pull ids arrive as numbers or strings depending on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PullId {
    Number(u64),
    Text(String),
}

impl fmt::Display for PullId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// What a comparison is about, which decides whether it can be keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonReference {
    PullRequest(String),
    Commit(String),
    Unknown,
}

impl ComparisonReference {
    pub fn pull_request_id(&self) -> Option<&str> {
        match self {
            Self::PullRequest(id) => Some(id),
            _ => None,
        }
    }
}

impl Comparison {
    /// Explicit pull ids win, then the head commit's pull, then the URL shape.
    pub fn reference(&self) -> ComparisonReference {
        let explicit = self
            .pullid
            .as_ref()
            .or_else(|| self.head_commit.as_ref().and_then(|c| c.pull.as_ref()));
        if let Some(id) = explicit {
            return classify(&id.to_string());
        }

        match self.url.as_deref() {
            Some(url) => reference_from_url(url),
            None => ComparisonReference::Unknown,
        }
    }

    /// Head coverage minus base coverage, when both are known.
    pub fn coverage_change(&self) -> Option<f64> {
        Some(self.head_totals_c? - self.base_totals_c?)
    }
}

fn reference_from_url(url: &str) -> ComparisonReference {
    if let Some(segment) = segment_after(url, "/pull/") {
        return classify(segment);
    }
    match segment_after(url, "/commit/") {
        Some(sha) if !sha.is_empty() => ComparisonReference::Commit(sha.to_string()),
        _ => ComparisonReference::Unknown,
    }
}

fn segment_after<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
    let (_, tail) = url.split_once(marker)?;
    tail.split(['/', '?', '#']).next()
}

fn classify(segment: &str) -> ComparisonReference {
    let segment = segment.trim();
    if segment.len() >= COMMIT_SHA_MIN_LEN {
        ComparisonReference::Commit(segment.to_string())
    } else if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
        ComparisonReference::PullRequest(segment.to_string())
    } else {
        ComparisonReference::Unknown
    }
}

fn coverage<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .trim_end_matches('%')
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
