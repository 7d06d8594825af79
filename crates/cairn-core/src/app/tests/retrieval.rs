use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde_json::json;

use super::support::*;
use crate::app::{RetrievalConfig, RetrievalError, RetrievalGateway};
use crate::domain::{ErrorCode, GatewayError, RetrievalOptions};
use crate::ports::{IdGenerator, ManualClock, UlidGenerator};

fn gateway_with(
    worker: &Arc<FakeGateway>,
    clock: &Arc<ManualClock>,
    config: RetrievalConfig,
) -> RetrievalGateway {
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(clock)));
    RetrievalGateway::new(worker.clone(), clock.clone(), ids, config)
}

fn no_hits() -> GatewayReply {
    Ok(json!({ "entries": [] }))
}

#[tokio::test]
async fn eleventh_request_in_a_minute_is_rate_limited() {
    let worker = Arc::new(FakeGateway::replying(no_hits()));
    let clock = Arc::new(ManualClock::new(epoch()));
    let retrieval = gateway_with(&worker, &clock, RetrievalConfig::default());

    for _ in 0..10 {
        retrieval.search("rust", RetrievalOptions::default()).await.unwrap();
    }
    let err = retrieval.search("rust", RetrievalOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RateLimitExceeded);
    assert!(matches!(
        err,
        RetrievalError::RateLimitExceeded { limit: 10, retry_after_ms: 60_000 }
    ));
    assert_eq!(worker.calls(), 10);

    clock.advance(ChronoDuration::seconds(61));
    retrieval.search("rust", RetrievalOptions::default()).await.unwrap();
    assert_eq!(retrieval.stats().window_count, 1);
}

#[tokio::test]
async fn queue_beyond_capacity_is_rejected() {
    let worker = Arc::new(FakeGateway::holding());
    let clock = Arc::new(ManualClock::new(epoch()));
    let config = RetrievalConfig {
        rate_per_minute: 30,
        ..RetrievalConfig::default()
    };
    let retrieval = gateway_with(&worker, &clock, config);

    let mut tickets = Vec::new();
    for i in 0..7 {
        tickets.push(retrieval.retrieve(&format!("q{i}"), RetrievalOptions::default()).unwrap());
    }
    let err = retrieval.retrieve("q7", RetrievalOptions::default()).unwrap_err();
    assert_eq!(err, RetrievalError::QueueFull { max_queue_size: 5 });

    let stats = retrieval.stats();
    assert_eq!((stats.in_flight, stats.queued, stats.window_count), (2, 5, 2));

    // 1 つ終われば次が dispatch される
    assert!(worker.wait_calls(2, SETTLE).await);
    let first = tickets.remove(0);
    let key = first.request_id().to_string();
    assert!(worker.held_keys().contains(&key));
    assert!(worker.release(&key, no_hits()));
    first.wait().await.unwrap();

    assert!(worker.wait_calls(3, SETTLE).await);
    assert_eq!(retrieval.stats().queued, 4);
    assert_eq!(worker.max_in_flight(), 2);
}

#[tokio::test]
async fn queued_requests_drain_within_the_concurrency_limit() {
    let worker = Arc::new(FakeGateway::holding());
    let clock = Arc::new(ManualClock::new(epoch()));
    let retrieval = gateway_with(&worker, &clock, RetrievalConfig::default());

    let tickets: Vec<_> = (0..5)
        .map(|i| retrieval.retrieve(&format!("q{i}"), RetrievalOptions::default()).unwrap())
        .collect();

    for (n, ticket) in tickets.into_iter().enumerate() {
        assert!(worker.wait_calls((n + 2).min(5), SETTLE).await);
        assert!(worker.release(&ticket.request_id().to_string(), no_hits()));
        ticket.wait().await.unwrap();
    }
    assert_eq!(worker.max_in_flight(), 2);
    let stats = retrieval.stats();
    assert_eq!((stats.in_flight, stats.queued), (0, 0));
}

#[tokio::test]
async fn blank_query_is_invalid() {
    let worker = Arc::new(FakeGateway::replying(no_hits()));
    let clock = Arc::new(ManualClock::new(epoch()));
    let retrieval = gateway_with(&worker, &clock, RetrievalConfig::default());

    let err = retrieval.retrieve("   ", RetrievalOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    assert_eq!(retrieval.stats().window_count, 0);
}

#[tokio::test]
async fn timeouts_are_classified_as_retrieval_timeout() {
    let clock = Arc::new(ManualClock::new(epoch()));

    let worker = Arc::new(FakeGateway::replying(Err(GatewayError::new(
        "LLM_TIMED_OUT",
        "model did not answer",
    ))));
    let retrieval = gateway_with(&worker, &clock, RetrievalConfig::default());
    let err = retrieval.search("rust", RetrievalOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RetrievalTimeout);

    let worker = Arc::new(FakeGateway::holding());
    let config = RetrievalConfig {
        timeout_ms: 30,
        ..RetrievalConfig::default()
    };
    let retrieval = gateway_with(&worker, &clock, config);
    let err = retrieval.search("rust", RetrievalOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RetrievalTimeout);
    assert_eq!(retrieval.stats().in_flight, 0);
}

#[tokio::test]
async fn other_failures_are_retrieval_failed() {
    let clock = Arc::new(ManualClock::new(epoch()));

    let worker = Arc::new(FakeGateway::replying(Err(GatewayError::new("GRAPH_ERROR", "x"))));
    let retrieval = gateway_with(&worker, &clock, RetrievalConfig::default());
    let err = retrieval.search("rust", RetrievalOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RetrievalFailed);

    let worker = Arc::new(FakeGateway::replying(Ok(json!({"entries": "nope"}))));
    let retrieval = gateway_with(&worker, &clock, RetrievalConfig::default());
    let err = retrieval.search("rust", RetrievalOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RetrievalFailed);
}

#[tokio::test]
async fn unhealthy_worker_fails_without_a_call() {
    let worker = Arc::new(FakeGateway::replying(no_hits()));
    worker.set_healthy(false);
    let clock = Arc::new(ManualClock::new(epoch()));
    let retrieval = gateway_with(&worker, &clock, RetrievalConfig::default());

    let err = retrieval.search("rust", RetrievalOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RetrievalFailed);
    assert_eq!(worker.calls(), 0);
}

#[tokio::test]
async fn results_are_ranked_and_limited() {
    let worker = Arc::new(FakeGateway::replying(Ok(json!({"entries": [
        {"id": "low", "text": "aaaa", "score": 0.1},
        {"id": "top", "text": "bbbb", "score": 0.9},
        {"id": "mid", "text": "cccc", "score": 0.5},
    ]}))));
    let clock = Arc::new(ManualClock::new(epoch()));
    let retrieval = gateway_with(&worker, &clock, RetrievalConfig::default());

    let options = RetrievalOptions::default()
        .with_max_results(2)
        .with_dataset("notes");
    let response = retrieval.search("rust", options).await.unwrap();
    let ids: Vec<_> = response.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["top", "mid"]);

    let (method, params) = worker.requests().remove(0);
    assert_eq!(method, "search");
    assert_eq!(params["query"], "rust");
    assert_eq!(params["request_id"], response.request_id.to_string());
}

#[tokio::test]
async fn configuration_is_clamped_to_ceilings() {
    let worker = Arc::new(FakeGateway::replying(no_hits()));
    let clock = Arc::new(ManualClock::new(epoch()));
    let config = RetrievalConfig {
        max_concurrent: 9,
        rate_per_minute: 100,
        max_queue_size: 0,
        timeout_ms: 1_000,
    };
    let retrieval = gateway_with(&worker, &clock, config);

    assert_eq!(retrieval.config().max_concurrent, 5);
    assert_eq!(retrieval.config().rate_per_minute, 30);
    assert_eq!(retrieval.config().max_queue_size, 1);
    assert_eq!(retrieval.config().timeout(), Duration::from_secs(1));
}
