//! Replay-only mode behavior

mod harness;

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

#[tokio::test]
async fn miss_returns_frozen_404_and_never_contacts_upstream() {
    let mock = MockUpstream::start().await.unwrap();
    let cache = tempfile::tempdir().unwrap();
    let config = test_config(&mock.base_url(), cache.path());
    let server = TestServer::start(&config, Mode::ReplayOnly).await.unwrap();

    let response = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["error"], "cache_miss");
    assert_eq!(
        json["message"],
        "No cached entry for this request; replay-only mode."
    );
    assert_eq!(json["id"].as_str().map(str::len), Some(64));

    assert_eq!(mock.request_count(), 0, "replay-only mode must never contact upstream");
}

#[tokio::test]
async fn replays_entries_recorded_in_a_previous_run() {
    let mock = MockUpstream::start().await.unwrap();
    let cache = tempfile::tempdir().unwrap();
    let config = test_config(&mock.base_url(), cache.path());

    let recorded_bytes = {
        let recorder = TestServer::start(&config, Mode::RecordAndReplay).await.unwrap();
        recorder
            .client()
            .post(recorder.url("/v1/chat/completions"))
            .json(&chat_body())
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
    };
    assert_eq!(mock.completion_count(), 1);

    let replayer = TestServer::start(&config, Mode::ReplayOnly).await.unwrap();

    let replayed = replayer
        .client()
        .post(replayer.url("/v1/chat/completions"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(replayed.status(), 200);
    assert_eq!(replayed.bytes().await.unwrap(), recorded_bytes);

    // A different prompt is still a miss
    let miss = replayer
        .client()
        .post(replayer.url("/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Something else"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(miss.status(), 404);

    assert_eq!(mock.completion_count(), 1);
}
