//! GitHub REST API client.
//!
//! Implements [`ContentProvider`] over the compare, contents and tree
//! endpoints and [`ObjectStoreWriter`] over the Git database endpoints
//! (`git/blobs`, `git/trees`, `git/commits`, `git/refs`).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::remote::{
    ChangedFile, Comparison, ContentProvider, FileMode, ObjectStoreWriter, RefUpdate, TreeEntry,
};
use crate::errors::{ContentError, GitHubError};
use crate::models::RepoSlug;

/// The compare endpoint lists at most this many files.
const COMPARE_FILE_LIMIT: usize = 300;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct CompareResponse {
    base_commit: CommitRef,
    merge_base_commit: CommitRef,
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct CommitRef {
    sha: String,
    commit: CommitBody,
}

#[derive(Debug, Clone, Deserialize)]
struct CommitBody {
    tree: ShaRef,
}

#[derive(Debug, Clone, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CompareFile {
    filename: String,
    status: String,
    /// Set on `renamed` entries.
    #[serde(default)]
    previous_filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TreeListing {
    tree: Vec<TreeListingEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TreeListingEntry {
    path: String,
    mode: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Debug, Serialize)]
struct TreeItem<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    /// `null` removes the path from the base tree.
    sha: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        user_agent: &str,
    ) -> Result<Self, GitHubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| GitHubError::ParseError(format!("invalid user agent: {}", e)))?,
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token: token.into(),
        })
    }

    /// The same client acting with a different token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            api_url: self.api_url.clone(),
            token: token.into(),
        }
    }

    fn repo_url(&self, repo: &RepoSlug, rest: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, repo.owner, repo.name, rest)
    }

    /// `contents/{path}` with each path segment percent-encoded.
    fn contents_url(&self, repo: &RepoSlug, path: &str) -> Result<Url, GitHubError> {
        let mut url = Url::parse(&self.repo_url(repo, "contents"))
            .map_err(|e| GitHubError::ParseError(format!("invalid API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| GitHubError::ParseError("API URL cannot be a base".into()))?
            .extend(path.split('/'));
        Ok(url)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_commit_sha(&self, repo: &RepoSlug, git_ref: &str) -> Result<String, GitHubError> {
        let url = self.repo_url(repo, &format!("commits/{}", git_ref));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp, &url).await?;
        let commit: ShaRef = resp.json().await?;
        debug!(sha = %commit.sha, "resolved commit");
        Ok(commit.sha)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_branch_tip(&self, repo: &RepoSlug, branch: &str) -> Result<String, GitHubError> {
        let url = self.repo_url(repo, &format!("git/ref/heads/{}", branch));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp, &url).await?;
        let reference: RefResponse = resp.json().await?;
        Ok(reference.object.sha)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_git_blob(&self, repo: &RepoSlug, sha: &str) -> Result<Vec<u8>, GitHubError> {
        let url = self.repo_url(repo, &format!("git/blobs/{}", sha));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp, &url).await?;
        let blob: BlobResponse = resp.json().await?;
        if blob.encoding != "base64" {
            return Err(GitHubError::ParseError(format!(
                "unexpected blob encoding '{}'",
                blob.encoding
            )));
        }
        decode_base64(&blob.content)
    }

    async fn fetch_content(
        &self,
        repo: &RepoSlug,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, GitHubError> {
        let url = self.contents_url(repo, path)?;
        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(&self.token)
            .query(&[("ref", git_ref)])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_response(resp, url.as_str()).await?;
        let body: serde_json::Value = resp.json().await?;
        if body.is_array() {
            return Err(GitHubError::ParseError(format!("'{}' is a directory", path)));
        }
        let contents: ContentsResponse = serde_json::from_value(body)
            .map_err(|e| GitHubError::ParseError(e.to_string()))?;
        if contents.kind != "file" {
            return Err(GitHubError::ParseError(format!(
                "'{}' is a {}, not a file",
                path, contents.kind
            )));
        }
        match (contents.encoding.as_deref(), contents.content.as_deref()) {
            (Some("base64"), Some(content)) => decode_base64(content).map(Some),
            // Large files come back with encoding "none"; the blob endpoint
            // still serves them.
            _ => {
                debug!(path, sha = %contents.sha, "falling back to blob endpoint");
                self.get_git_blob(repo, &contents.sha).await.map(Some)
            }
        }
    }
}

fn decode_base64(content: &str) -> Result<Vec<u8>, GitHubError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| GitHubError::ParseError(format!("invalid base64 content: {}", e)))
}

/// Map non-success responses onto [`GitHubError`], keeping the body for
/// diagnostics.
async fn check_response(
    resp: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, GitHubError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let reset = header("x-ratelimit-reset");
    let exhausted = header("x-ratelimit-remaining").as_deref() == Some("0");
    let body = resp.text().await.unwrap_or_default();

    match status.as_u16() {
        429 => Err(GitHubError::RateLimited {
            reset_at: reset.unwrap_or_else(|| "unknown".into()),
        }),
        403 if exhausted => Err(GitHubError::RateLimited {
            reset_at: reset.unwrap_or_else(|| "unknown".into()),
        }),
        401 | 403 => Err(GitHubError::AuthenticationFailed(format!(
            "HTTP {}: {}",
            status, body
        ))),
        404 => Err(GitHubError::NotFound(url.to_string())),
        code => Err(GitHubError::ApiError { status: code, body }),
    }
}

#[async_trait]
impl ContentProvider for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn compare(
        &self,
        repo: &RepoSlug,
        base: &str,
        head: &str,
    ) -> Result<Comparison, GitHubError> {
        // Pin both tips first so the merge base, the file list and the head
        // tip all describe the same pair of commits.
        let (base_sha, head_sha) = tokio::try_join!(
            self.get_commit_sha(repo, base),
            self.get_commit_sha(repo, head),
        )?;

        let url = self.repo_url(repo, &format!("compare/{}...{}", base_sha, head_sha));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp, &url).await?;
        let cmp: CompareResponse = resp.json().await?;

        let files_complete = cmp.files.len() < COMPARE_FILE_LIMIT;
        if !files_complete {
            warn!(
                files = cmp.files.len(),
                "compare file list is at the remote cap and may be incomplete"
            );
        }
        let files = changed_files(cmp.files);
        debug!(
            merge_base = %cmp.merge_base_commit.sha,
            files = files.len(),
            "fetched comparison"
        );
        Ok(Comparison {
            merge_base_sha: cmp.merge_base_commit.sha,
            base_sha: cmp.base_commit.sha,
            base_tree_sha: cmp.base_commit.commit.tree.sha,
            head_sha,
            files,
            files_complete,
        })
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_blob_content(
        &self,
        repo: &RepoSlug,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, ContentError> {
        let bytes = self
            .fetch_content(repo, path, git_ref)
            .await
            .map_err(|e| ContentError::Unreadable {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        match bytes {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|_| {
                ContentError::Binary {
                    path: path.to_string(),
                }
            }),
        }
    }

    #[instrument(skip(self, paths), fields(repo = %repo, paths = paths.len()))]
    async fn file_modes(
        &self,
        repo: &RepoSlug,
        commit_sha: &str,
        paths: &[String],
    ) -> Result<HashMap<String, FileMode>, GitHubError> {
        let url = self.repo_url(repo, &format!("git/trees/{}", commit_sha));
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("recursive", "1")])
            .send()
            .await?;
        let resp = check_response(resp, &url).await?;
        let listing: TreeListing = resp.json().await?;

        let wanted: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let modes: HashMap<String, FileMode> = listing
            .tree
            .into_iter()
            .filter(|e| wanted.contains(e.path.as_str()))
            .filter_map(|e| FileMode::parse(&e.mode).map(|mode| (e.path, mode)))
            .collect();
        if listing.truncated {
            warn!(
                commit = commit_sha,
                found = modes.len(),
                wanted = paths.len(),
                "tree listing truncated, missing paths default to regular files"
            );
        }
        Ok(modes)
    }
}

/// Flatten compare entries into changed paths. A rename contributes its old
/// path as a removal, since it no longer exists on head.
fn changed_files(entries: Vec<CompareFile>) -> Vec<ChangedFile> {
    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(previous) = entry.previous_filename {
            if previous != entry.filename && seen.insert(previous.clone()) {
                files.push(ChangedFile::new(previous, "removed"));
            }
        }
        if seen.insert(entry.filename.clone()) {
            files.push(ChangedFile::new(entry.filename, entry.status));
        }
    }
    files
}

#[async_trait]
impl ObjectStoreWriter for GitHubClient {
    #[instrument(skip(self, content), fields(repo = %repo, bytes = content.len()))]
    async fn create_blob(&self, repo: &RepoSlug, content: &str) -> Result<String, GitHubError> {
        let url = self.repo_url(repo, "git/blobs");
        let payload = serde_json::json!({ "content": content, "encoding": "utf-8" });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = check_response(resp, &url).await?;
        let blob: ShaRef = resp.json().await?;
        debug!(sha = %blob.sha, "created blob");
        Ok(blob.sha)
    }

    #[instrument(skip(self, entries), fields(repo = %repo, entries = entries.len()))]
    async fn create_tree(
        &self,
        repo: &RepoSlug,
        entries: &[TreeEntry],
        base_tree: &str,
    ) -> Result<String, GitHubError> {
        let url = self.repo_url(repo, "git/trees");
        let tree: Vec<TreeItem<'_>> = entries
            .iter()
            .map(|e| TreeItem {
                path: &e.path,
                mode: e.mode.as_str(),
                kind: "blob",
                sha: e.blob_sha.as_deref(),
            })
            .collect();
        let payload = serde_json::json!({ "base_tree": base_tree, "tree": tree });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = check_response(resp, &url).await?;
        let created: ShaRef = resp.json().await?;
        debug!(sha = %created.sha, "created tree");
        Ok(created.sha)
    }

    #[instrument(skip(self, message), fields(repo = %repo))]
    async fn create_commit(
        &self,
        repo: &RepoSlug,
        tree: &str,
        message: &str,
        parents: [String; 2],
    ) -> Result<String, GitHubError> {
        let url = self.repo_url(repo, "git/commits");
        let payload = serde_json::json!({
            "message": message,
            "tree": tree,
            "parents": parents,
        });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = check_response(resp, &url).await?;
        let commit: ShaRef = resp.json().await?;
        info!(sha = %commit.sha, "created merge commit");
        Ok(commit.sha)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn update_ref(
        &self,
        repo: &RepoSlug,
        branch: &str,
        expected_old: &str,
        new: &str,
    ) -> Result<RefUpdate, GitHubError> {
        let actual = self.get_branch_tip(repo, branch).await?;
        if actual != expected_old {
            warn!(expected = expected_old, actual = %actual, "branch moved");
            return Ok(RefUpdate::Conflict { actual });
        }

        // A non-forced update is rejected unless it fast-forwards, which also
        // catches a move between the read above and this write.
        let url = self.repo_url(repo, &format!("git/refs/heads/{}", branch));
        let payload = serde_json::json!({ "sha": new, "force": false });
        let resp = self
            .http
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = resp.text().await.unwrap_or_default();
            let actual = self.get_branch_tip(repo, branch).await?;
            if actual != expected_old {
                warn!(actual = %actual, "ref update rejected, branch moved");
                return Ok(RefUpdate::Conflict { actual });
            }
            return Err(GitHubError::ApiError { status: 422, body });
        }
        check_response(resp, &url).await?;
        info!(branch, sha = new, "advanced branch");
        Ok(RefUpdate::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_ignores_line_breaks() {
        let decoded = decode_base64("aGVs\nbG8K\n").unwrap();
        assert_eq!(decoded, b"hello\n");
        assert!(decode_base64("!!!").is_err());
    }

    #[test]
    fn test_tree_item_serializes_deletion_as_null() {
        let item = TreeItem {
            path: "gone.txt",
            mode: "100644",
            kind: "blob",
            sha: None,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert!(json["sha"].is_null());
        assert_eq!(json["type"], "blob");
    }

    #[test]
    fn test_compare_response_parses() {
        let json = serde_json::json!({
            "base_commit": { "sha": "b1", "commit": { "tree": { "sha": "t1" } } },
            "merge_base_commit": { "sha": "m1", "commit": { "tree": { "sha": "t0" } } },
            "files": [{ "filename": "src/lib.rs", "status": "modified", "additions": 1 }],
            "total_commits": 3
        });
        let cmp: CompareResponse = serde_json::from_value(json).unwrap();
        assert_eq!(cmp.base_commit.commit.tree.sha, "t1");
        assert_eq!(cmp.merge_base_commit.sha, "m1");
        assert_eq!(cmp.files[0].filename, "src/lib.rs");
    }

    #[test]
    fn test_renamed_entry_also_removes_old_path() {
        let entries: Vec<CompareFile> = serde_json::from_value(serde_json::json!([
            { "filename": "new.rs", "previous_filename": "old.rs", "status": "renamed" },
            { "filename": "lib.rs", "status": "modified" },
            { "filename": "old.rs", "status": "added" }
        ]))
        .unwrap();
        let files = changed_files(entries);
        let paths: Vec<_> = files.iter().map(|f| (f.path.as_str(), f.status.as_str())).collect();
        assert_eq!(
            paths,
            vec![("old.rs", "removed"), ("new.rs", "renamed"), ("lib.rs", "modified")]
        );
    }

    #[test]
    fn test_contents_url_encodes_segments() {
        let client = GitHubClient::new("https://api.github.com/", "t", "mergeway-test").unwrap();
        let url = client
            .contents_url(&RepoSlug::new("o", "r"), "dir/a file#1.txt")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/o/r/contents/dir/a%20file%231.txt"
        );
    }
}
