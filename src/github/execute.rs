//! Platform Executor: deterministic side-effecting calls
//!
//! Merging and build-triggering go through here. Failures are classified
//! rather than propagated: a branch-policy refusal gets a different
//! recovery menu than a transport error, so the caller needs to know
//! which one it was.

use anyhow::{Context, Result};
use serde_json::Value;

use super::fetch::GhPlatformClient;
use super::MergeFailure;

/// Squash-merge the PR, optionally with admin override
pub(super) async fn merge_pr(
    client: &GhPlatformClient,
    admin: bool,
) -> std::result::Result<(), MergeFailure> {
    let repo_arg = format!("{}/{}", client.owner, client.repo);
    let number_arg = client.number.to_string();
    let mut args: Vec<&str> = vec!["pr", "merge", &number_arg, "--squash", "-R", &repo_arg];
    if admin {
        args.push("--admin");
    }

    match client.gh.run(&args).await {
        Ok(_) => Ok(()),
        Err(err) => {
            let message = format!("{err:#}");
            Err(MergeFailure {
                policy_blocked: is_policy_failure(&message),
                message,
            })
        }
    }
}

/// True when a merge refusal came from branch policy rather than transport
pub fn is_policy_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    [
        "protected branch",
        "branch protection",
        "required status check",
        "review is required",
        "reviews are required",
        "approving review",
        "not mergeable",
        "base branch policy",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Push an empty commit to the head branch to trigger a fresh build.
///
/// Reads the current head commit's tree, creates a new commit with the
/// same tree and the head as parent, then moves the branch ref to it.
pub(super) async fn push_empty_commit(
    client: &GhPlatformClient,
    head_sha: &str,
    branch: &str,
) -> Result<String> {
    let commit_path = client.repo_path(&format!("git/commits/{head_sha}"));
    let commit = client.gh.run_json(&["api", &commit_path]).await?;
    let tree_sha = commit
        .pointer("/tree/sha")
        .and_then(Value::as_str)
        .context("commit payload missing tree.sha")?;

    let create_path = client.repo_path("git/commits");
    let tree_arg = format!("tree={tree_sha}");
    let parent_arg = format!("parents[]={head_sha}");
    let created = client
        .gh
        .run_json(&[
            "api",
            "-X",
            "POST",
            &create_path,
            "-f",
            "message=Trigger a fresh CI build",
            "-f",
            &tree_arg,
            "-f",
            &parent_arg,
        ])
        .await?;
    let new_sha = created
        .get("sha")
        .and_then(Value::as_str)
        .context("create-commit payload missing sha")?;

    let ref_path = client.repo_path(&format!("git/refs/heads/{branch}"));
    let sha_arg = format!("sha={new_sha}");
    client
        .gh
        .run(&["api", "-X", "PATCH", &ref_path, "-f", &sha_arg])
        .await
        .context("failed to advance branch ref")?;

    Ok(new_sha.to_string())
}
