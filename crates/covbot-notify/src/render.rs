//! Comparison payload to Slack blocks. Pure: the same comparison always
//! renders to the same message, which keeps in-place updates honest.

use std::fmt::Write;

use covbot_types::blocks::Block;
use covbot_types::comparison::{Comparison, ComparisonReference, HeadCommit};

const SHORT_SHA_LEN: usize = 7;

pub const HELP_HINT: &str =
    "ℹ️ You can use `/codecov compare` to get the full comparison. Use `/codecov help` to know more.";

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    /// Notification fallback for clients that do not show blocks.
    pub text: String,
    pub blocks: Vec<Block>,
}

pub fn render_comparison(owner: &str, repo: &str, comparison: &Comparison) -> RenderedMessage {
    let title = title(owner, repo, &comparison.reference());
    let coverage = coverage_line(comparison);

    let header = match comparison.url.as_deref() {
        Some(url) => format!("*<{}|{title}>*\n{coverage}", escape_mrkdwn(url)),
        None => format!("*{title}*\n{coverage}"),
    };

    let mut blocks = vec![Block::section(header), Block::Divider];
    if let Some(commit) = &comparison.head_commit {
        blocks.push(Block::section(commit_details(commit)));
        blocks.push(Block::Divider);
    }
    blocks.push(Block::section(HELP_HINT));

    RenderedMessage {
        text: format!("Coverage report for {title}: {coverage}"),
        blocks,
    }
}

/// Slack treats `<...>` as links and mentions, so payload text must not
/// carry raw control characters into mrkdwn.
pub fn escape_mrkdwn(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn title(owner: &str, repo: &str, reference: &ComparisonReference) -> String {
    let (owner, repo) = (escape_mrkdwn(owner), escape_mrkdwn(repo));
    match reference {
        ComparisonReference::PullRequest(id) => format!("{owner}/{repo}#{id}"),
        ComparisonReference::Commit(sha) => {
            format!("{owner}/{repo}@{}", escape_mrkdwn(short_sha(sha)))
        }
        ComparisonReference::Unknown => format!("{owner}/{repo}"),
    }
}

fn coverage_line(comparison: &Comparison) -> String {
    match (comparison.head_totals_c, comparison.coverage_change()) {
        (Some(head), Some(change)) => format!("*Coverage:* {head:.2}% ({change:+.2}%)"),
        (Some(head), None) => format!("*Coverage:* {head:.2}%"),
        (None, _) => "*Coverage:* unknown".to_string(),
    }
}

fn commit_details(commit: &HeadCommit) -> String {
    let mut out = format!(
        "*Head Commit* _{}_\n",
        escape_mrkdwn(short_sha(&commit.commitid))
    );
    // Writing to a String cannot fail.
    let _ = writeln!(out, "*ID:* {}", escape_mrkdwn(&commit.commitid));
    if let Some(branch) = &commit.branch {
        let _ = writeln!(out, "*Branch:* {}", escape_mrkdwn(branch));
    }
    if let Some(message) = &commit.message {
        let _ = writeln!(out, "*Message:* {}", escape_mrkdwn(message));
    }
    if let Some(author) = &commit.author {
        let _ = writeln!(out, "*Author:* {}", escape_mrkdwn(&author.to_string()));
    }
    if let Some(timestamp) = &commit.timestamp {
        let _ = writeln!(out, "*Timestamp:* {}", escape_mrkdwn(timestamp));
    }
    if let Some(passed) = commit.ci_passed {
        let _ = writeln!(out, "*CI Passed:* {}", if passed { "✅" } else { "❌" });
    }
    out
}

fn short_sha(sha: &str) -> &str {
    match sha.char_indices().nth(SHORT_SHA_LEN) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}
