use axum::{routing::get, Router};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::sync::{Arc, Once};

use server::metrics;
use server::rest::{create_router, AppState};
use server::store::{DeviceStore, MemStore, PresetStore};

static INIT: Once = Once::new();

/// Spawns the service on an ephemeral port over a fresh in-memory store and
/// returns its base URL.
async fn spawn_server() -> String {
    INIT.call_once(metrics::init_metrics);

    let store = Arc::new(MemStore::new());
    let devices: Arc<dyn DeviceStore> = store.clone();
    let presets: Arc<dyn PresetStore> = store;

    let app = Router::new()
        .route("/metrics", get(|| async { metrics::gather_metrics() }))
        .merge(create_router(AppState { devices, presets }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn ident(rb: RequestBuilder, user: &str, role: &str) -> RequestBuilder {
    rb.header("x-user-id", user)
        .header("x-user-email", format!("{user}@example.com"))
        .header("x-user-role", role)
}

async fn register_device(base: &str, client: &Client, user: &str, client_id: &str) -> Value {
    let response = ident(client.post(format!("{base}/api/v1/devices")), user, "member")
        .json(&json!({"title": "Porch", "mqtt_client_id": client_id,
            "mqtt_username": "u", "mqtt_password": "p", "ip_address": "10.0.0.5"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_register_and_read_device() {
    let base = spawn_server().await;
    let client = Client::new();

    let body = register_device(&base, &client, "alice", "wled-aa01").await;
    assert_eq!(body["owner"], "alice");
    assert_eq!(body["status"], "published");
    assert_eq!(body["mqtt_username"], "u");
    assert_eq!(body["allowed_users"], json!(["alice@example.com"]));
    let id = body["id"].as_str().unwrap().to_string();

    // Owner read: full body with credentials.
    let owner: Value = ident(
        client.get(format!("{base}/api/v1/devices/{id}")),
        "alice",
        "member",
    )
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(owner["mqtt_password"], "p");

    // Anonymous read: redacted to id and client id.
    let anon: Value = client
        .get(format!("{base}/api/v1/devices/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(anon.as_object().unwrap().len(), 2);
    assert_eq!(anon["mqtt_client_id"], "wled-aa01");

    // Authenticated stranger: denied.
    let response = ident(
        client.get(format!("{base}/api/v1/devices/{id}")),
        "carol",
        "member",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "rest_forbidden");
    assert_eq!(err["data"]["status"], 403);
}

#[tokio::test]
async fn test_anonymous_cannot_register() {
    let base = spawn_server().await;
    let client = Client::new();

    let response = client
        .post(format!("{base}/api/v1/devices"))
        .json(&json!({"mqtt_client_id": "wled-aa01"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "rest_forbidden");
}

#[tokio::test]
async fn test_missing_and_duplicate_client_id() {
    let base = spawn_server().await;
    let client = Client::new();

    let response = ident(client.post(format!("{base}/api/v1/devices")), "alice", "member")
        .json(&json!({"title": "Porch"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "missing_mqtt_client_id");

    let first = register_device(&base, &client, "alice", "wled-aa01").await;

    let response = ident(client.post(format!("{base}/api/v1/devices")), "bob", "member")
        .json(&json!({"mqtt_client_id": "wled-aa01"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "duplicate_mqtt_client_id");

    // Deleting the holder frees the client id.
    let id = first["id"].as_str().unwrap();
    let response = ident(
        client.delete(format!("{base}/api/v1/devices/{id}")),
        "alice",
        "member",
    )
    .send()
    .await
    .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["deleted"], true);

    register_device(&base, &client, "bob", "wled-aa01").await;
}

#[tokio::test]
async fn test_malformed_body_reports_invalid_param() {
    let base = spawn_server().await;
    let client = Client::new();

    // Truncated JSON body.
    let response = ident(client.post(format!("{base}/api/v1/devices")), "alice", "member")
        .header("content-type", "application/json")
        .body("{\"mqtt_client_id\": \"wled-aa01\"")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "rest_invalid_param");
    assert_eq!(err["data"]["status"], 400);

    // Mistyped field on the state endpoint.
    let body = register_device(&base, &client, "alice", "wled-aa01").await;
    let id = body["id"].as_str().unwrap();
    let response = ident(
        client.post(format!("{base}/api/v1/devices/{id}/state")),
        "alice",
        "member",
    )
    .json(&json!({"bri": "x"}))
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "rest_invalid_param");
}

#[tokio::test]
async fn test_state_endpoint_flow() {
    let base = spawn_server().await;
    let client = Client::new();

    let body = register_device(&base, &client, "alice", "wled-aa01").await;
    let id = body["id"].as_str().unwrap().to_string();

    // Share with bob.
    ident(
        client.patch(format!("{base}/api/v1/devices/{id}")),
        "alice",
        "member",
    )
    .json(&json!({"allowed_users": ["alice@example.com", "bob@example.com"]}))
    .send()
    .await
    .unwrap();

    // Allowed user pushes state; the response echoes the applied fields.
    let push = |user: &'static str, payload: Value| {
        let client = client.clone();
        let url = format!("{base}/api/v1/devices/{id}/state");
        async move {
            ident(client.post(url), user, "member")
                .json(&payload)
                .send()
                .await
                .unwrap()
        }
    };

    let response = push("bob", json!({"on": true, "bri": 128})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let first: Value = response.json().await.unwrap();
    assert_eq!(first["success"], true);
    assert_eq!(first["updated"], json!({"on": true, "bri": 128}));

    // Idempotent: same payload, same echo, same stored state.
    let second: Value = push("bob", json!({"on": true, "bri": 128}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first, second);

    // Stranger and anonymous are rejected.
    let response = push("carol", json!({"on": false})).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = client
        .post(format!("{base}/api/v1/devices/{id}/state"))
        .json(&json!({"on": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Out-of-range brightness is rejected and nothing is applied.
    let response = push("bob", json!({"on": false, "bri": 256})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "rest_invalid_param");

    let device: Value = ident(
        client.get(format!("{base}/api/v1/devices/{id}")),
        "alice",
        "member",
    )
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(device["on"], true);
    assert_eq!(device["bri"], 128);
}

#[tokio::test]
async fn test_email_less_accounts_share_no_access() {
    let base = spawn_server().await;
    let client = Client::new();

    // Identity without an email: the creator gets no allow-list entry.
    let response = client
        .post(format!("{base}/api/v1/devices"))
        .header("x-user-id", "alice")
        .header("x-user-role", "member")
        .json(&json!({"mqtt_client_id": "wled-aa01"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["allowed_users"], json!([]));
    let id = body["id"].as_str().unwrap().to_string();

    // A different email-less account is still a stranger to the device.
    let response = client
        .post(format!("{base}/api/v1/devices/{id}/state"))
        .header("x-user-id", "mallory")
        .header("x-user-role", "member")
        .json(&json!({"on": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .get(format!("{base}/api/v1/devices/{id}"))
        .header("x-user-id", "mallory")
        .header("x-user-role", "member")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_state_fields_are_ignored() {
    let base = spawn_server().await;
    let client = Client::new();

    let body = register_device(&base, &client, "alice", "wled-aa01").await;
    let id = body["id"].as_str().unwrap();

    let response = ident(
        client.post(format!("{base}/api/v1/devices/{id}/state")),
        "alice",
        "member",
    )
    .json(&json!({"on": true, "seg": [{"col": [[255, 0, 0]]}], "transition": 7}))
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["updated"], json!({"on": true}));
}

#[tokio::test]
async fn test_device_listing_scopes() {
    let base = spawn_server().await;
    let client = Client::new();

    register_device(&base, &client, "alice", "wled-aa01").await;
    let response = ident(client.post(format!("{base}/api/v1/devices")), "alice", "member")
        .json(&json!({"mqtt_client_id": "wled-aa02", "status": "private"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let shared = ident(client.post(format!("{base}/api/v1/devices")), "bob", "member")
        .json(&json!({"mqtt_client_id": "wled-bb01",
            "allowed_users": ["alice@example.com"], "mqtt_password": "secret"}))
        .send()
        .await
        .unwrap();
    assert_eq!(shared.status(), StatusCode::CREATED);

    // Anonymous: published devices only, every entry redacted.
    let anon: Value = client
        .get(format!("{base}/api/v1/devices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(anon["total"], 2);
    for entry in anon["data"].as_array().unwrap() {
        assert_eq!(entry.as_object().unwrap().len(), 2);
    }

    // Alice: her two plus bob's shared one; shared entry has no credentials.
    let alice: Value = ident(client.get(format!("{base}/api/v1/devices")), "alice", "member")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alice["total"], 3);
    let shared_entry = alice["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["mqtt_client_id"] == "wled-bb01")
        .unwrap();
    assert!(shared_entry.get("mqtt_password").is_none());

    // Bob sees only his own.
    let bob: Value = ident(client.get(format!("{base}/api/v1/devices")), "bob", "member")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bob["total"], 1);
}

#[tokio::test]
async fn test_preset_lifecycle() {
    let base = spawn_server().await;
    let client = Client::new();

    // Requested public visibility is overridden to private.
    let response = ident(client.post(format!("{base}/api/v1/presets")), "alice", "member")
        .json(&json!({"title": "Sunset", "visibility": "public", "fx": 12,
            "sx": 128, "ix": 200, "on": true,
            "colors": ["FF8800", "220011"], "icon_name": "waves"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let preset: Value = response.json().await.unwrap();
    assert_eq!(preset["visibility"], "private");
    assert_eq!(preset["owner"], "alice");
    assert_eq!(preset["fx"], 12);
    let id = preset["id"].as_str().unwrap().to_string();

    // Private: hidden from others.
    let response = ident(
        client.get(format!("{base}/api/v1/presets/{id}")),
        "bob",
        "member",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Owner publishes it.
    let response = ident(
        client.patch(format!("{base}/api/v1/presets/{id}")),
        "alice",
        "member",
    )
    .json(&json!({"visibility": "public"}))
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listed: Value = client
        .get(format!("{base}/api/v1/presets"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["data"][0]["title"], "Sunset");

    // Out-of-range effect id on update is rejected.
    let response = ident(
        client.patch(format!("{base}/api/v1/presets/{id}")),
        "alice",
        "member",
    )
    .json(&json!({"fx": 201}))
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Delete, then reads are 404.
    let response = ident(
        client.delete(format!("{base}/api/v1/presets/{id}")),
        "alice",
        "member",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = ident(
        client.get(format!("{base}/api/v1/presets/{id}")),
        "alice",
        "member",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "rest_post_invalid_id");
}

#[tokio::test]
async fn test_malformed_id_reads_as_not_found() {
    let base = spawn_server().await;
    let client = Client::new();

    let response = client
        .get(format!("{base}/api/v1/devices/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["code"], "rest_post_invalid_id");
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let base = spawn_server().await;
    let client = Client::new();

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    register_device(&base, &client, "alice", "wled-metrics").await;

    let metrics_text = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics_text.contains("wled_devices_created_total"));
}
