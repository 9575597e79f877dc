//! End-to-end gateway scenarios over the full router

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum_test::TestServer;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use aog::models::{ProviderStatus, ServiceSource};
use aog::scheduler::ServeOutcome;
use aog::web::build_router;

const BASE: &str = "/aog/v0.2";

#[tokio::test]
async fn install_local_chat_creates_bound_provider() {
    let (_root, state) = common::test_state().await;
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server
        .post(&format!("{BASE}/service/install"))
        .json(&json!({"service_name": "chat"}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["provider_name"], "local_ollama_chat");
    assert_eq!(body["data"]["service_source"], "local");
    assert_eq!(body["data"]["flavor"], "ollama");
    assert_eq!(body["data"]["auth_type"], "none");

    let services: Value = server.get(&format!("{BASE}/service")).await.json();
    let chat = services["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "chat")
        .expect("chat service listed");
    assert_eq!(chat["hybrid_policy"], "default");
    assert_eq!(chat["local_provider"], "local_ollama_chat");
}

#[tokio::test]
async fn always_remote_sends_every_request_remote() {
    let (_root, state) = common::test_state().await;
    let counter = Arc::new(AtomicUsize::new(0));
    let upstream = common::spawn_upstream(common::openai_chat_upstream(counter.clone())).await;

    let server = TestServer::new(build_router(state.clone())).unwrap();
    server
        .post(&format!("{BASE}/service_provider"))
        .json(&json!({
            "provider_name": "remote_openai_chat",
            "service_name": "chat",
            "service_source": "remote",
            "flavor": "openai",
            "url": format!("{upstream}/v1/chat/completions"),
            "auth_type": "apikey",
            "auth_key": "sk-test",
        }))
        .await
        .assert_status_ok();
    server
        .put(&format!("{BASE}/service"))
        .json(&json!({"service_name": "chat", "hybrid_policy": "always_remote"}))
        .await
        .assert_status_ok();

    let rounds = 25;
    for _ in 0..rounds {
        let response = server
            .post(&format!("{BASE}/services/chat"))
            .json(&json!({"messages": [{"role": "user", "content": "ping"}]}))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"]["message"]["content"], "pong");
    }
    assert_eq!(counter.load(Ordering::SeqCst), rounds);
}

#[tokio::test]
async fn local_failures_flip_routing_to_remote() {
    let (_root, state) = common::test_state().await;
    let counter = Arc::new(AtomicUsize::new(0));
    let upstream = common::spawn_upstream(common::openai_chat_upstream(counter.clone())).await;

    let server = TestServer::new(build_router(state.clone())).unwrap();
    // A local provider whose engine is absent, plus a healthy remote.
    server
        .post(&format!("{BASE}/service/install"))
        .json(&json!({"service_name": "chat"}))
        .await
        .assert_status_ok();
    server
        .post(&format!("{BASE}/service_provider"))
        .json(&json!({
            "provider_name": "remote_openai_chat",
            "service_name": "chat",
            "service_source": "remote",
            "flavor": "openai",
            "url": format!("{upstream}/v1/chat/completions"),
            "auth_type": "apikey",
            "auth_key": "sk-test",
        }))
        .await
        .assert_status_ok();

    // Policy `default`, small payload: local is preferred, fails (engine
    // absent), and each request fails over to the remote.
    let payload = json!({"messages": [{"role": "user", "content": "hi"}]});
    for _ in 0..3 {
        let response = server
            .post(&format!("{BASE}/services/chat"))
            .json(&payload)
            .await;
        response.assert_status_ok();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 3);

    // Three consecutive failures marked the local provider unhealthy, so
    // routing now prefers remote outright.
    assert_eq!(
        state.registry.status("local_ollama_chat").await,
        ProviderStatus::Unhealthy
    );
    let predicted = state
        .scheduler
        .predict_source("chat", &payload)
        .await
        .unwrap();
    assert_eq!(predicted, ServiceSource::Remote);

    // One observed success flips the provider back; routing returns local.
    state.registry.record_success("local_ollama_chat").await;
    let predicted = state
        .scheduler
        .predict_source("chat", &payload)
        .await
        .unwrap();
    assert_eq!(predicted, ServiceSource::Local);
}

#[tokio::test]
async fn big_payloads_prefer_remote_under_default_policy() {
    let (_root, state) = common::test_state().await;
    let server = TestServer::new(build_router(state.clone())).unwrap();
    server
        .post(&format!("{BASE}/service/install"))
        .json(&json!({"service_name": "chat"}))
        .await
        .assert_status_ok();
    server
        .post(&format!("{BASE}/service_provider"))
        .json(&json!({
            "provider_name": "remote_openai_chat",
            "service_name": "chat",
            "service_source": "remote",
            "flavor": "openai",
            "url": "https://api.example.com/v1/chat/completions",
            "auth_type": "apikey",
            "auth_key": "sk-test",
        }))
        .await
        .assert_status_ok();

    let small = json!({"messages": [{"role": "user", "content": "hi"}]});
    let big = json!({"messages": [{"role": "user", "content": "A".repeat(1024 * 1024)}]});
    assert_eq!(
        state.scheduler.predict_source("chat", &small).await.unwrap(),
        ServiceSource::Local
    );
    assert_eq!(
        state.scheduler.predict_source("chat", &big).await.unwrap(),
        ServiceSource::Remote
    );
}

#[tokio::test]
async fn system_scope_provider_cannot_be_deleted() {
    let (_root, state) = common::test_state().await;
    let server = TestServer::new(build_router(state)).unwrap();
    server
        .post(&format!("{BASE}/service/install"))
        .json(&json!({"service_name": "chat"}))
        .await
        .assert_status_ok();

    let response = server
        .delete(&format!("{BASE}/service_provider"))
        .json(&json!({"provider_name": "local_ollama_chat"}))
        .await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["business_code"], 20004);

    // Still listed afterwards.
    let providers: Value = server.get(&format!("{BASE}/service_provider")).await.json();
    assert!(
        providers["data"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p["provider_name"] == "local_ollama_chat")
    );
}

#[tokio::test]
async fn update_with_empty_fields_keeps_stored_values() {
    let (_root, state) = common::test_state().await;
    let server = TestServer::new(build_router(state)).unwrap();
    server
        .post(&format!("{BASE}/service_provider"))
        .json(&json!({
            "provider_name": "remote_openai_chat",
            "service_name": "chat",
            "service_source": "remote",
            "flavor": "openai",
            "url": "https://api.example.com/v1/chat/completions",
            "auth_type": "apikey",
            "auth_key": "sk-original",
            "desc": "primary remote",
        }))
        .await
        .assert_status_ok();

    // Empty strings in a put must not clear what is stored.
    server
        .put(&format!("{BASE}/service_provider"))
        .json(&json!({
            "provider_name": "remote_openai_chat",
            "service_name": "chat",
            "service_source": "remote",
            "flavor": "",
            "url": "",
            "auth_type": "apikey",
            "auth_key": "",
            "desc": "",
        }))
        .await
        .assert_status_ok();

    let providers: Value = server.get(&format!("{BASE}/service_provider")).await.json();
    let provider = providers["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["provider_name"] == "remote_openai_chat")
        .unwrap()
        .clone();
    assert_eq!(provider["url"], "https://api.example.com/v1/chat/completions");
    assert_eq!(provider["flavor"], "openai");
    assert_eq!(provider["auth_key"], "sk-original");
    assert_eq!(provider["desc"], "primary remote");
}

#[tokio::test]
async fn export_import_round_trip_is_idempotent() {
    let (_root, state) = common::test_state().await;
    let server = TestServer::new(build_router(state)).unwrap();
    server
        .post(&format!("{BASE}/service_provider"))
        .json(&json!({
            "provider_name": "remote_openai_chat",
            "service_name": "chat",
            "service_source": "remote",
            "flavor": "openai",
            "url": "https://api.example.com/v1/chat/completions",
            "auth_type": "apikey",
            "auth_key": "sk-test",
        }))
        .await
        .assert_status_ok();
    server
        .put(&format!("{BASE}/service"))
        .json(&json!({"service_name": "chat", "hybrid_policy": "always_remote"}))
        .await
        .assert_status_ok();

    let exported: Value = server
        .post(&format!("{BASE}/service/export"))
        .await
        .json();
    let document = exported["data"].clone();

    // Import the export twice; the state must be stable.
    for _ in 0..2 {
        server
            .post(&format!("{BASE}/service/import"))
            .json(&document)
            .await
            .assert_status_ok();
    }

    let re_exported: Value = server
        .post(&format!("{BASE}/service/export"))
        .await
        .json();
    assert_eq!(re_exported["data"], document);
}

#[tokio::test]
async fn streamed_chat_relays_translated_frames() {
    use axum::response::sse::{Event, Sse};
    use futures_util::stream;

    let (_root, state) = common::test_state().await;

    // An upstream that streams two OpenAI-style deltas then [DONE].
    let upstream_router = axum::Router::new().route(
        "/v1/chat/completions",
        axum::routing::post(|| async {
            let frames = vec![
                json!({"model": "m", "choices": [{"delta": {"content": "he"}}]}),
                json!({"model": "m", "choices": [{"delta": {"content": "llo"}, "finish_reason": "stop"}]}),
            ];
            let mut events: Vec<Result<Event, std::convert::Infallible>> = frames
                .into_iter()
                .map(|frame| Ok(Event::default().data(frame.to_string())))
                .collect();
            events.push(Ok(Event::default().data("[DONE]")));
            Sse::new(stream::iter(events))
        }),
    );
    let upstream = common::spawn_upstream(upstream_router).await;

    let server = TestServer::new(build_router(state.clone())).unwrap();
    server
        .post(&format!("{BASE}/service_provider"))
        .json(&json!({
            "provider_name": "remote_openai_chat",
            "service_name": "chat",
            "service_source": "remote",
            "flavor": "openai",
            "url": format!("{upstream}/v1/chat/completions"),
            "auth_type": "apikey",
            "auth_key": "sk-test",
        }))
        .await
        .assert_status_ok();

    // Drive the scheduler directly so the frames can be inspected.
    let outcome = state
        .scheduler
        .serve(
            "chat",
            json!({"messages": [{"role": "user", "content": "hi"}], "stream": true}),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let ServeOutcome::Stream { frames, .. } = outcome else {
        panic!("expected a stream");
    };
    let frames: Vec<_> = futures_util::StreamExt::collect::<Vec<_>>(frames)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    // [DONE] was dropped by the chain; deltas were translated to the
    // gateway schema in upstream order.
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["message"]["content"], "he");
    assert_eq!(frames[0]["done"], false);
    assert_eq!(frames[1]["message"]["content"], "llo");
    assert_eq!(frames[1]["done"], true);
}

#[tokio::test]
async fn unknown_service_is_rejected_at_the_gateway() {
    let (_root, state) = common::test_state().await;
    let server = TestServer::new(build_router(state)).unwrap();
    let response = server
        .post(&format!("{BASE}/services/translate"))
        .json(&json!({}))
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["business_code"], 10001);
}

#[tokio::test]
async fn policy_survives_round_trip_to_listing() {
    let (_root, state) = common::test_state().await;
    let server = TestServer::new(build_router(state)).unwrap();

    // text-to-image seeds as always_remote; others as default.
    let services: Value = server.get(&format!("{BASE}/service")).await.json();
    for service in services["data"].as_array().unwrap() {
        let expected = if service["name"] == "text-to-image" {
            "always_remote"
        } else {
            "default"
        };
        assert_eq!(
            service["hybrid_policy"], expected,
            "policy mismatch for {}",
            service["name"]
        );
    }
}
