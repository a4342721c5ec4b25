//! Batch fan-out tests: ordering, size guard, timeouts, concurrency bound.

use super::{users_router, users_unit};
use crate::{
    BatchCall, BatchConfig, CallOptions, Context, ErrorCode, Procedure, Procedures, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_batch_mixes_successes_and_failures_positionally() {
    // One good call, one unknown path: both slots filled, aligned to input.
    let router = users_router();
    let results = router
        .batch(
            vec![
                BatchCall::new("users.get", json!({"id": "1"})),
                BatchCall::new("unknown.path", json!({})),
            ],
            Context::detached(),
        )
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap()["id"], "1");
    assert_eq!(results[1].as_ref().unwrap_err().code, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_oversized_batch_yields_single_error_element() {
    let router = users_router();
    let calls: Vec<BatchCall> = (0..10)
        .map(|i| BatchCall::new("users.get", json!({"id": i.to_string()})))
        .collect();

    let config = BatchConfig::new().with_max_batch_size(5);
    let results = router
        .batch_with(calls, Context::detached(), &CallOptions::new(), &config)
        .await;

    assert_eq!(results.len(), 1);
    let err = results[0].as_ref().unwrap_err();
    assert_eq!(err.code, ErrorCode::BatchTooLarge);
    assert!(err.message.contains("10"));
}

#[tokio::test]
async fn test_batch_at_size_limit_passes() {
    let router = users_router();
    let calls: Vec<BatchCall> = (0..5)
        .map(|i| BatchCall::new("users.get", json!({"id": i.to_string()})))
        .collect();

    let config = BatchConfig::new().with_max_batch_size(5);
    let results = router
        .batch_with(calls, Context::detached(), &CallOptions::new(), &config)
        .await;
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn test_empty_batch_yields_empty_results() {
    let router = users_router();
    let results = router.batch(Vec::new(), Context::detached()).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_results_are_in_input_order_regardless_of_completion() {
    // Handlers sleep inversely to their index, so later calls finish first.
    let unit = Procedures::builder("sleepy")
        .procedure(Procedure::query("nap").handler(
            |input: serde_json::Value, _ctx: Context| async move {
                let idx = input["idx"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(idx * 10))).await;
                Ok(json!(idx))
            },
        ))
        .build()
        .unwrap();
    let router = Router::builder().mount("sleepy", unit).build().unwrap();

    let calls: Vec<BatchCall> = (0..4)
        .map(|i| BatchCall::new("sleepy.nap", json!({"idx": i})))
        .collect();
    let results = router.batch(calls, Context::detached()).await;

    let order: Vec<u64> = results
        .iter()
        .map(|r| r.as_ref().unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_timed_out_call_fills_its_slot_and_others_continue() {
    let unit = Procedures::builder("mixed")
        .procedure(Procedure::query("fast").handler(
            |_input: serde_json::Value, _ctx: Context| async move { Ok(json!("fast")) },
        ))
        .procedure(Procedure::query("slow").handler(
            |_input: serde_json::Value, _ctx: Context| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!("slow"))
            },
        ))
        .build()
        .unwrap();
    let router = Router::builder().mount("mixed", unit).build().unwrap();

    let config = BatchConfig::new().with_timeout(Duration::from_millis(100));
    let results = router
        .batch_with(
            vec![
                BatchCall::new("mixed.fast", json!({})),
                BatchCall::new("mixed.slow", json!({})),
                BatchCall::new("mixed.fast", json!({})),
            ],
            Context::detached(),
            &CallOptions::new(),
            &config,
        )
        .await;

    assert_eq!(results[0].as_ref().unwrap(), &json!("fast"));
    let err = results[1].as_ref().unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
    assert_eq!(err.message, "Procedure timed out");
    assert_eq!(err.path.as_deref(), Some("mixed.slow"));
    assert_eq!(results[2].as_ref().unwrap(), &json!("fast"));
}

#[tokio::test]
async fn test_concurrency_stays_within_bound() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (current2, peak2) = (current.clone(), peak.clone());

    let unit = Procedures::builder("gauge")
        .procedure(Procedure::query("probe").handler(
            move |_input: serde_json::Value, _ctx: Context| {
                let current = current2.clone();
                let peak = peak2.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(null))
                }
            },
        ))
        .build()
        .unwrap();
    let router = Router::builder().mount("gauge", unit).build().unwrap();

    let config = BatchConfig::new().with_max_concurrency(3).with_max_batch_size(50);
    let calls: Vec<BatchCall> = (0..12)
        .map(|_| BatchCall::new("gauge.probe", json!({})))
        .collect();
    let results = router
        .batch_with(calls, Context::detached(), &CallOptions::new(), &config)
        .await;

    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(
        peak.load(Ordering::SeqCst) <= 3,
        "peak in-flight {} exceeded the bound",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_batch_calls_resolve_aliases() {
    let router = Router::builder()
        .mount("users", users_unit())
        .alias("getUsers", "users.list")
        .build()
        .unwrap();

    let results = router
        .batch(
            vec![BatchCall::new("getUsers", json!({}))],
            Context::detached(),
        )
        .await;
    assert!(results[0].is_ok());
}

#[tokio::test]
async fn test_batch_call_options_apply_per_call() {
    let router = users_router();
    let opts = CallOptions::new().before_hook(|ctx: Context, _input, _def| async move {
        Ok(ctx.assign("batch_tagged", json!(true)))
    });

    let results = router
        .batch_with(
            vec![BatchCall::new("users.list", json!({}))],
            Context::detached(),
            &opts,
            &BatchConfig::default(),
        )
        .await;
    assert!(results[0].is_ok());
}
