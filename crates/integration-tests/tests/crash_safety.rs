//! Crash-safety of the atomic publication protocol

mod harness;

use std::path::PathBuf;

use harness::config::test_config;
use harness::mock_upstream::MockUpstream;
use harness::server::TestServer;
use infergate_proxy::Mode;
use serde_json::Value;

fn chat_body() -> Value {
    serde_json::json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": "Hi"}]
    })
}

/// Published entry directories under the two-level fan-out
fn entry_dirs(root: &std::path::Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for bucket in std::fs::read_dir(root).unwrap().flatten() {
        if !bucket.path().is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(bucket.path()).unwrap().flatten() {
            dirs.push(entry.path());
        }
    }
    dirs
}

#[tokio::test]
async fn half_written_entry_is_invisible_and_re_recorded() {
    let mock = MockUpstream::start().await.unwrap();
    let cache = tempfile::tempdir().unwrap();
    let config = test_config(&mock.base_url(), cache.path());

    {
        let server = TestServer::start(&config, Mode::RecordAndReplay).await.unwrap();
        let response = server
            .client()
            .post(server.url("/v1/chat/completions"))
            .json(&chat_body())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
    assert_eq!(mock.completion_count(), 1);

    // Rewind the publication: pretend the process died before the final
    // rename, leaving only the temp directory behind
    let dirs = entry_dirs(cache.path());
    assert_eq!(dirs.len(), 1);
    let published = &dirs[0];
    let tmp = published.with_file_name(format!(
        "{}.tmp",
        published.file_name().unwrap().to_str().unwrap()
    ));
    std::fs::rename(published, &tmp).unwrap();

    let server = TestServer::start(&config, Mode::RecordAndReplay).await.unwrap();

    let entries: Vec<Value> = server
        .client()
        .get(server.url("/api/cache"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(entries.is_empty(), "the half-written entry must not surface");

    // The same request is a miss again and triggers a fresh upstream call
    let response = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(mock.completion_count(), 2);
}
