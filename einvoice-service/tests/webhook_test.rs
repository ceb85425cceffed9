mod common;

use common::{now_secs, order_json, TestApp, AP_WEBHOOK_SECRET};
use einvoice_service::models::DeliveryStatus;
use serde_json::{json, Value};

/// Submit an order through the mock adapter and return (invoiceId, providerId).
async fn submitted(app: &TestApp, key: &str) -> (String, String) {
    let body: Value = app.submit(key, &order_json()).await.json().await.unwrap();
    (
        body["invoiceId"].as_str().unwrap().to_string(),
        body["documentId"].as_str().unwrap().to_string(),
    )
}

fn stored_status(app: &TestApp, invoice_id: &str) -> DeliveryStatus {
    app.state.status.get("__default__", invoice_id).unwrap().status
}

#[tokio::test]
async fn signed_ap_event_updates_status() {
    let app = TestApp::spawn().await;
    let (invoice_id, provider_id) = submitted(&app, "wh-1").await;

    let event = json!({ "invoiceId": invoice_id, "providerId": provider_id, "status": "delivered" });
    let response = app
        .post_ap_event("evt-1", &event, Some(now_secs()), AP_WEBHOOK_SECRET)
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["status"], "delivered");
    assert_eq!(stored_status(&app, &invoice_id), DeliveryStatus::Delivered);
}

#[tokio::test]
async fn bad_signature_is_rejected_without_mutation() {
    let app = TestApp::spawn().await;
    let (invoice_id, provider_id) = submitted(&app, "wh-2").await;

    let event = json!({ "invoiceId": invoice_id, "providerId": provider_id, "status": "delivered" });
    let response = app
        .post_ap_event("evt-2", &event, Some(now_secs()), "wrong-secret")
        .await;

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_signature");
    assert_eq!(stored_status(&app, &invoice_id), DeliveryStatus::Queued);

    // The rejected event id was not burned.
    let response = app
        .post_ap_event("evt-2", &event, Some(now_secs()), AP_WEBHOOK_SECRET)
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn stale_and_missing_timestamps_are_rejected() {
    let app = TestApp::spawn().await;
    let (invoice_id, provider_id) = submitted(&app, "wh-3").await;
    let event = json!({ "invoiceId": invoice_id, "providerId": provider_id, "status": "delivered" });

    let ten_minutes_ago = (chrono::Utc::now().timestamp() - 600).to_string();
    let stale = app
        .post_ap_event("evt-3", &event, Some(ten_minutes_ago), AP_WEBHOOK_SECRET)
        .await;
    assert_eq!(stale.status().as_u16(), 401);
    let body: Value = stale.json().await.unwrap();
    assert_eq!(body["error"], "stale_event");

    let missing = app
        .post_ap_event("evt-3", &event, None, AP_WEBHOOK_SECRET)
        .await;
    assert_eq!(missing.status().as_u16(), 400);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "invalid_event_timestamp");

    assert_eq!(stored_status(&app, &invoice_id), DeliveryStatus::Queued);
}

#[tokio::test]
async fn millisecond_and_rfc3339_timestamps_are_accepted() {
    let app = TestApp::spawn().await;
    let (invoice_id, provider_id) = submitted(&app, "wh-4").await;

    let sent = json!({ "invoiceId": invoice_id, "providerId": provider_id, "status": "sent" });
    let millis = chrono::Utc::now().timestamp_millis().to_string();
    let response = app
        .post_ap_event("evt-4a", &sent, Some(millis), AP_WEBHOOK_SECRET)
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let delivered = json!({ "invoiceId": invoice_id, "providerId": provider_id, "status": "delivered" });
    let rfc3339 = chrono::Utc::now().to_rfc3339();
    let response = app
        .post_ap_event("evt-4b", &delivered, Some(rfc3339), AP_WEBHOOK_SECRET)
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(stored_status(&app, &invoice_id), DeliveryStatus::Delivered);
}

#[tokio::test]
async fn duplicate_event_id_is_acknowledged_once() {
    let app = TestApp::spawn().await;
    let (invoice_id, provider_id) = submitted(&app, "wh-5").await;

    let delivered = json!({ "invoiceId": invoice_id, "providerId": provider_id, "status": "delivered" });
    let first = app
        .post_ap_event("evt-5", &delivered, Some(now_secs()), AP_WEBHOOK_SECRET)
        .await;
    assert_eq!(first.status().as_u16(), 200);

    let errored = json!({ "invoiceId": invoice_id, "providerId": provider_id, "status": "error", "error": "late" });
    let second = app
        .post_ap_event("evt-5", &errored, Some(now_secs()), AP_WEBHOOK_SECRET)
        .await;
    assert_eq!(second.status().as_u16(), 200);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["duplicate"], true);
    assert_eq!(stored_status(&app, &invoice_id), DeliveryStatus::Delivered);
}

#[tokio::test]
async fn delivered_is_not_downgraded_by_new_events() {
    let app = TestApp::spawn().await;
    let (invoice_id, provider_id) = submitted(&app, "wh-6").await;

    for (event_id, status) in [("evt-6a", "delivered"), ("evt-6b", "sent")] {
        let event = json!({ "invoiceId": invoice_id, "providerId": provider_id, "status": status });
        let response = app
            .post_ap_event(event_id, &event, Some(now_secs()), AP_WEBHOOK_SECRET)
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    assert_eq!(stored_status(&app, &invoice_id), DeliveryStatus::Delivered);
}

#[tokio::test]
async fn ap_event_with_unknown_status_is_rejected() {
    let app = TestApp::spawn().await;

    let event = json!({ "invoiceId": "inv-x", "providerId": "p-x", "status": "teleported" });
    let response = app
        .post_ap_event("evt-7", &event, Some(now_secs()), AP_WEBHOOK_SECRET)
        .await;

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_payload");
}

#[tokio::test]
async fn scrada_status_event_is_matched_by_document_id() {
    let app = TestApp::spawn().await;
    let (invoice_id, document_id) = submitted(&app, "wh-8").await;

    let event = json!({
        "id": "scrada-evt-1",
        "topic": "peppolOutboundDocument/statusUpdate",
        "data": { "documentId": document_id, "status": "Sent to Peppol" }
    });
    let response = app.post_scrada_event(&event, now_secs()).await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(stored_status(&app, &invoice_id), DeliveryStatus::Sent);

    let event = json!({
        "id": "scrada-evt-2",
        "topic": "peppolOutboundDocument/statusUpdate",
        "data": { "documentId": document_id, "status": "Delivered" }
    });
    let response = app.post_scrada_event(&event, now_secs()).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "delivered");
    assert_eq!(stored_status(&app, &invoice_id), DeliveryStatus::Delivered);

    let duplicate = app.post_scrada_event(&event, now_secs()).await;
    let body: Value = duplicate.json().await.unwrap();
    assert_eq!(body["duplicate"], true);
}

#[tokio::test]
async fn scrada_events_for_other_topics_or_documents_are_ignored() {
    let app = TestApp::spawn().await;

    let other_topic = json!({ "id": "e1", "topic": "something/else", "data": {} });
    let body: Value = app
        .post_scrada_event(&other_topic, now_secs())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["ignored"], true);

    let unknown = json!({
        "id": "e2",
        "topic": "peppolOutboundDocument/statusUpdate",
        "data": { "documentId": "nobody", "status": "Delivered" }
    });
    let body: Value = app
        .post_scrada_event(&unknown, now_secs())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["ignored"], true);
}
