//! Tests for the GitHub REST client against a mock HTTP server.

use base64::Engine;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use std::sync::Arc;

use mergeway_core::config::LimitsConfig;
use mergeway_core::conflict::ConflictDetector;
use mergeway_core::errors::{ContentError, GitHubError};
use mergeway_core::git::remote::{
    ContentProvider, FileMode, ObjectStoreWriter, RefUpdate, TreeEntry,
};
use mergeway_core::git::GitHubClient;
use mergeway_core::models::RepoSlug;

fn repo() -> RepoSlug {
    RepoSlug::new("acme", "widgets")
}

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::new(server.uri(), "test-token", "mergeway-test").unwrap()
}

fn encoded(text: &[u8]) -> String {
    // GitHub wraps base64 content at 60 columns.
    let raw = base64::engine::general_purpose::STANDARD.encode(text);
    raw.as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

async fn mount_tip(server: &MockServer, git_ref: &str, sha: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/widgets/commits/{}", git_ref)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sha": sha })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_compare(server: &MockServer, files: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/compare/base1...head1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "base_commit": { "sha": "base1", "commit": { "tree": { "sha": "tree1" } } },
            "merge_base_commit": { "sha": "mb1", "commit": { "tree": { "sha": "tree0" } } },
            "files": files,
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_compare_reads_merge_base_and_tips() {
    let server = MockServer::start().await;
    mount_tip(&server, "main", "base1").await;
    mount_tip(&server, "feature", "head1").await;
    mount_compare(
        &server,
        json!([
            { "filename": "src/lib.rs", "status": "modified" },
            { "filename": "README.md", "status": "added" }
        ]),
    )
    .await;

    let cmp = client(&server)
        .compare(&repo(), "main", "feature")
        .await
        .unwrap();
    assert_eq!(cmp.merge_base_sha, "mb1");
    assert_eq!(cmp.base_sha, "base1");
    assert_eq!(cmp.base_tree_sha, "tree1");
    assert_eq!(cmp.head_sha, "head1");
    assert!(cmp.files_complete);
    assert_eq!(cmp.files.len(), 2);
    assert_eq!(cmp.files[0].path, "src/lib.rs");
}

#[tokio::test]
async fn test_compare_renamed_file_removes_old_path() {
    let server = MockServer::start().await;
    mount_tip(&server, "main", "base1").await;
    mount_tip(&server, "feature", "head1").await;
    mount_compare(
        &server,
        json!([
            { "filename": "src/new_name.rs", "previous_filename": "src/old_name.rs", "status": "renamed" },
            { "filename": "src/lib.rs", "status": "modified" }
        ]),
    )
    .await;

    let cmp = client(&server)
        .compare(&repo(), "main", "feature")
        .await
        .unwrap();
    let paths: Vec<(&str, &str)> = cmp
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.status.as_str()))
        .collect();
    assert_eq!(
        paths,
        vec![
            ("src/old_name.rs", "removed"),
            ("src/new_name.rs", "renamed"),
            ("src/lib.rs", "modified"),
        ]
    );
}

#[tokio::test]
async fn test_compare_at_file_cap_is_incomplete() {
    let server = MockServer::start().await;
    mount_tip(&server, "main", "base1").await;
    mount_tip(&server, "feature", "head1").await;
    let files: Vec<serde_json::Value> = (0..300)
        .map(|i| json!({ "filename": format!("f{:03}.txt", i), "status": "modified" }))
        .collect();
    mount_compare(&server, json!(files)).await;

    let cmp = client(&server)
        .compare(&repo(), "main", "feature")
        .await
        .unwrap();
    assert_eq!(cmp.files.len(), 300);
    assert!(!cmp.files_complete);
}

#[tokio::test]
async fn test_session_truncated_when_remote_caps_file_list() {
    let server = MockServer::start().await;
    mount_tip(&server, "main", "base1").await;
    mount_tip(&server, "feature", "head1").await;
    let files: Vec<serde_json::Value> = (0..300)
        .map(|i| json!({ "filename": format!("f{:03}.txt", i), "status": "added" }))
        .collect();
    mount_compare(&server, json!(files)).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/acme/widgets/git/trees/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tree": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/acme/widgets/contents/.+$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    // The configured cap is above the remote's, so only the remote cap applies.
    let limits = LimitsConfig {
        max_files: 1000,
        ..LimitsConfig::default()
    };
    let detector = ConflictDetector::new(Arc::new(client(&server)), limits);
    let session = detector
        .fetch_merge_conflicts(&repo(), "main", "feature")
        .await
        .unwrap();
    assert!(session.truncated);
    assert_eq!(session.total_changed_files, 300);
    assert_eq!(session.files.len(), 300);
}

#[tokio::test]
async fn test_compare_missing_branch_is_not_found() {
    let server = MockServer::start().await;
    mount_tip(&server, "main", "base1").await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/acme/widgets/compare/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server)
        .compare(&repo(), "main", "gone")
        .await
        .unwrap_err();
    assert!(matches!(err, GitHubError::NotFound(_)));
    assert_eq!(err.http_status(), Some(404));
}

#[tokio::test]
async fn test_file_modes_reads_recursive_tree() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/git/trees/head1"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "head1",
            "tree": [
                { "path": "bin", "mode": "040000", "type": "tree", "sha": "t1" },
                { "path": "bin/run.sh", "mode": "100755", "type": "blob", "sha": "b1" },
                { "path": "bin/current", "mode": "120000", "type": "blob", "sha": "b2" },
                { "path": "README.md", "mode": "100644", "type": "blob", "sha": "b3" },
                { "path": "vendor/lib", "mode": "160000", "type": "commit", "sha": "c1" }
            ],
            "truncated": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wanted: Vec<String> = ["bin", "bin/run.sh", "bin/current", "README.md", "vendor/lib"]
        .iter()
        .map(|p| p.to_string())
        .collect();
    let modes = client(&server)
        .file_modes(&repo(), "head1", &wanted)
        .await
        .unwrap();
    assert_eq!(modes.get("bin/run.sh"), Some(&FileMode::Executable));
    assert_eq!(modes.get("bin/current"), Some(&FileMode::Symlink));
    assert_eq!(modes.get("README.md"), Some(&FileMode::Regular));
    assert_eq!(modes.get("vendor/lib"), Some(&FileMode::Submodule));
    assert!(!modes.contains_key("bin"));
}

#[tokio::test]
async fn test_contents_decodes_base64_at_ref() {
    let server = MockServer::start().await;
    let text = "fn main() {\n    println!(\"a fairly long line to force base64 wrapping\");\n}\n";
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/src/main.rs"))
        .and(query_param("ref", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "file",
            "sha": "blob1",
            "encoding": "base64",
            "content": encoded(text.as_bytes()),
        })))
        .mount(&server)
        .await;

    let content = client(&server)
        .get_blob_content(&repo(), "src/main.rs", "abc123")
        .await
        .unwrap();
    assert_eq!(content.as_deref(), Some(text));
}

#[tokio::test]
async fn test_contents_missing_file_is_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/nope.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let content = client(&server)
        .get_blob_content(&repo(), "nope.txt", "abc123")
        .await
        .unwrap();
    assert_eq!(content, None);
}

#[tokio::test]
async fn test_large_file_falls_back_to_blob_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/big.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "file",
            "sha": "bigblob",
            "encoding": "none",
            "content": "",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/git/blobs/bigblob"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "bigblob",
            "encoding": "base64",
            "content": encoded(b"big\n"),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let content = client(&server)
        .get_blob_content(&repo(), "big.txt", "abc123")
        .await
        .unwrap();
    assert_eq!(content.as_deref(), Some("big\n"));
}

#[tokio::test]
async fn test_non_utf8_content_is_binary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "file",
            "sha": "png",
            "encoding": "base64",
            "content": encoded(&[0x89, 0x50, 0x4e, 0x47, 0xff, 0xfe]),
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_blob_content(&repo(), "logo.png", "abc123")
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Binary { .. }));
}

#[tokio::test]
async fn test_server_error_is_unreadable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/flaky.txt"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_blob_content(&repo(), "flaky.txt", "abc123")
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Unreadable { .. }));
}

#[tokio::test]
async fn test_create_tree_sends_null_sha_for_deletions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/git/trees"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "newtree" })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = vec![
        TreeEntry::blob("a.txt", "blob1", FileMode::Regular),
        TreeEntry::delete("gone.txt"),
        TreeEntry::blob("run.sh", "blob2", FileMode::Executable),
    ];
    let sha = client(&server)
        .create_tree(&repo(), &entries, "basetree")
        .await
        .unwrap();
    assert_eq!(sha, "newtree");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["base_tree"], "basetree");
    assert_eq!(body["tree"][0]["sha"], "blob1");
    assert_eq!(body["tree"][0]["mode"], "100644");
    assert!(body["tree"][1]["sha"].is_null());
    assert_eq!(body["tree"][2]["sha"], "blob2");
    assert_eq!(body["tree"][2]["mode"], "100755");
}

#[tokio::test]
async fn test_create_commit_has_two_parents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/git/commits"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "merge1" })))
        .mount(&server)
        .await;

    let sha = client(&server)
        .create_commit(&repo(), "tree1", "Merge", ["base1".into(), "head1".into()])
        .await
        .unwrap();
    assert_eq!(sha, "merge1");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["parents"], json!(["base1", "head1"]));
}

#[tokio::test]
async fn test_update_ref_fast_forwards_without_force() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/git/ref/heads/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": { "sha": "base1" } })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/acme/widgets/git/refs/heads/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": { "sha": "merge1" } })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server)
        .update_ref(&repo(), "main", "base1", "merge1")
        .await
        .unwrap();
    assert_eq!(outcome, RefUpdate::Updated);

    let requests = server.received_requests().await.unwrap();
    let patch = requests
        .iter()
        .find(|r| r.method.as_str() == "PATCH")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&patch.body).unwrap();
    assert_eq!(body, json!({ "sha": "merge1", "force": false }));
}

#[tokio::test]
async fn test_update_ref_refuses_stale_expectation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/git/ref/heads/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": { "sha": "moved" } })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/acme/widgets/git/refs/heads/main"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = client(&server)
        .update_ref(&repo(), "main", "base1", "merge1")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RefUpdate::Conflict {
            actual: "moved".into()
        }
    );
}

#[tokio::test]
async fn test_update_ref_rejected_fast_forward_is_conflict() {
    let server = MockServer::start().await;
    // The branch moves between the first read and the PATCH.
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/git/ref/heads/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": { "sha": "base1" } })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/git/ref/heads/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": { "sha": "moved" } })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/acme/widgets/git/refs/heads/main"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "Update is not a fast forward" })),
        )
        .mount(&server)
        .await;

    let outcome = client(&server)
        .update_ref(&repo(), "main", "base1", "merge1")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RefUpdate::Conflict {
            actual: "moved".into()
        }
    );
}

#[tokio::test]
async fn test_update_ref_unprocessable_with_unmoved_branch_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/git/ref/heads/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": { "sha": "base1" } })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/acme/widgets/git/refs/heads/main"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "Object does not exist" })),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .update_ref(&repo(), "main", "base1", "missing")
        .await
        .unwrap_err();
    assert!(
        matches!(err, GitHubError::ApiError { status: 422, ref body } if body.contains("Object does not exist"))
    );
}

#[tokio::test]
async fn test_auth_and_rate_limit_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/git/blobs"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/acme/widgets/commits/.+$"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1700000000"),
        )
        .mount(&server)
        .await;

    let gh = client(&server);
    let err = gh.create_blob(&repo(), "x").await.unwrap_err();
    assert!(matches!(err, GitHubError::AuthenticationFailed(ref m) if m.contains("Bad credentials")));

    let err = gh.compare(&repo(), "main", "feature").await.unwrap_err();
    assert!(matches!(err, GitHubError::RateLimited { ref reset_at } if reset_at == "1700000000"));
}

#[tokio::test]
async fn test_with_token_overrides_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/git/blobs"))
        .and(wiremock::matchers::header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "b1" })))
        .expect(1)
        .mount(&server)
        .await;

    let sha = client(&server)
        .with_token("user-token")
        .create_blob(&repo(), "hello\n")
        .await
        .unwrap();
    assert_eq!(sha, "b1");
}
