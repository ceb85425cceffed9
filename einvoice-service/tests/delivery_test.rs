mod common;

use common::{order_json, test_config, TestApp};
use einvoice_service::adapters::{MockAdapter, MockErrorAdapter};
use einvoice_service::cli::{run_list, run_retry, ListArgs, RetryArgs};
use einvoice_service::AppState;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn failed_submission(app: &TestApp) -> Value {
    let response = app.submit("doomed-1", &order_json()).await;
    assert_eq!(response.status().as_u16(), 502);
    response.json().await.unwrap()
}

#[tokio::test]
async fn exhausted_retries_land_in_dlq() {
    let app = TestApp::spawn_with_adapter(Arc::new(MockErrorAdapter)).await;

    let body = failed_submission(&app).await;

    assert_eq!(body["error"], "delivery_failed");
    assert_eq!(app.adapter.sends(), 5);

    let items = app.state.dlq.list(None, None).await.unwrap();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.tenant, "__default__");
    assert_eq!(item.payload.adapter, "mock_error");
    assert!(item.payload.ubl_xml.contains("INV-2024-001"));
    assert_eq!(body["details"], item.invoice_id.as_str());

    let status: Value = app.get_invoice(&item.invoice_id).await.json().await.unwrap();
    assert_eq!(status["status"], "error");
    assert_eq!(status["attempts"], 5);
    assert!(status["lastError"].as_str().unwrap().contains("mock_error"));
}

#[tokio::test]
async fn failed_submission_is_not_cached() {
    let app = TestApp::spawn_with_adapter(Arc::new(MockErrorAdapter)).await;

    failed_submission(&app).await;
    failed_submission(&app).await;

    assert_eq!(app.adapter.sends(), 10);
    assert_eq!(app.state.dlq.list(None, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn dlq_list_prints_one_line_per_item() {
    let app = TestApp::spawn_with_adapter(Arc::new(MockErrorAdapter)).await;
    failed_submission(&app).await;

    let mut out = Vec::new();
    let count = run_list(&app.state.dlq, &ListArgs::default(), &mut out)
        .await
        .unwrap();

    assert_eq!(count, 1);
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains("__default__"));

    let mut out = Vec::new();
    let args = ListArgs {
        tenant: Some("other".to_string()),
        limit: None,
    };
    assert_eq!(run_list(&app.state.dlq, &args, &mut out).await.unwrap(), 0);
}

#[tokio::test]
async fn dlq_retry_redelivers_and_clears_entries() {
    let app = TestApp::spawn_with_adapter(Arc::new(MockErrorAdapter)).await;
    failed_submission(&app).await;
    let invoice_id = app.state.dlq.list(None, None).await.unwrap()[0]
        .invoice_id
        .clone();

    // Still failing: the entry stays and no new one is written.
    let mut out = Vec::new();
    let summary = run_retry(&app.state, &RetryArgs::default(), &mut out).await.unwrap();
    assert_eq!(summary.selected, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(app.state.dlq.list(None, None).await.unwrap().len(), 1);

    // Dry run touches nothing.
    let dry = RetryArgs {
        dry_run: true,
        ..RetryArgs::default()
    };
    let summary = run_retry(&app.state, &dry, &mut Vec::new()).await.unwrap();
    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.failed, 0);

    // A working adapter over the same data directory.
    let state = AppState::build(
        test_config(app.data_dir.path()),
        Arc::new(MockAdapter::new()),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let summary = run_retry(&state, &RetryArgs::default(), &mut Vec::new()).await.unwrap();
    assert_eq!(summary.delivered, 1);
    assert!(state.dlq.list(None, None).await.unwrap().is_empty());

    let status = state.status.get("__default__", &invoice_id).unwrap();
    assert_eq!(status.provider_id.as_deref(), Some(format!("mock-{invoice_id}").as_str()));
}

#[tokio::test]
async fn dlq_retry_filters_by_id() {
    let app = TestApp::spawn_with_adapter(Arc::new(MockErrorAdapter)).await;
    failed_submission(&app).await;

    let args = RetryArgs {
        ids: vec!["no-such-id".to_string()],
        ..RetryArgs::default()
    };
    let summary = run_retry(&app.state, &args, &mut Vec::new()).await.unwrap();

    assert_eq!(summary.selected, 0);
    assert_eq!(app.adapter.sends(), 5);
}
