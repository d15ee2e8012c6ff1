use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use actions::{
    DebugTrigger, EventPollerConfig, HttpScriptStore, Notification, NotificationChannel, ScriptStore,
    StoreError, spawn_event_poller,
};
use axum::{
    Json, Router,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

#[derive(Clone, Default)]
struct MockBackend {
    commands: Arc<Mutex<Vec<Value>>>,
    uploads: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
    pending_events: Arc<Mutex<Vec<Value>>>,
    poll_keys_issued: Arc<Mutex<u32>>,
    expire_first_key: Arc<AtomicBool>,
}

impl MockBackend {
    fn commands(&self) -> Vec<Value> {
        self.commands.lock().expect("commands lock").clone()
    }

    fn keys_issued(&self) -> u32 {
        *self.poll_keys_issued.lock().expect("keys lock")
    }

    fn push_event(&self, event: Value) {
        self.pending_events.lock().expect("events lock").push(event);
    }
}

async fn spawn_backend(backend: MockBackend) -> (SocketAddr, JoinHandle<()>) {
    let app = Router::new()
        .route("/command", post(handle_command))
        .route("/upload", post(handle_upload))
        .route("/download", get(handle_download))
        .route("/registerpoll", post(handle_register_poll))
        .route("/poll", post(handle_poll))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock backend should run");
    });
    (addr, handle)
}

fn ok(data: Value) -> Response {
    Json(json!({ "error": false, "message": null, "data": data })).into_response()
}

async fn handle_command(State(backend): State<MockBackend>, Json(request): Json<Value>) -> Response {
    backend
        .commands
        .lock()
        .expect("commands lock")
        .push(request.clone());
    let script = request["params"]["script"].as_str().unwrap_or_default();

    match request["command"].as_str().unwrap_or_default() {
        "get_module_config" => ok(json!({
            "scripts": [
                { "name": "door.py", "lastexecution": 1700000000, "disabled": false },
                { "name": "alarm.py", "lastexecution": null, "disabled": true }
            ]
        })),
        "get_script" => ok(json!({ "visual": null, "header": null, "code": "print(1)" })),
        "save_script" if script == "locked.py" => {
            Json(json!({ "error": true, "message": "script is locked" })).into_response()
        }
        "rename_script" if request["params"]["new_script"] == "taken.py" => {
            Json(json!({ "error": true })).into_response()
        }
        "save_script" | "disable_script" | "rename_script" => ok(Value::Null),
        "delete_script" => (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded").into_response(),
        "debug_script" => ok(json!({ "correlation_id": "run-42" })),
        "download_script" => ok(json!({ "filepath": format!("/tmp/actions/{script}") })),
        _ => Json(json!({ "error": true })).into_response(),
    }
}

async fn handle_upload(State(backend): State<MockBackend>, mut multipart: Multipart) -> Response {
    let mut fields = HashMap::new();
    let mut file = None;
    while let Some(field) = multipart.next_field().await.expect("multipart should parse") {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(ToOwned::to_owned);
        let bytes = field.bytes().await.expect("field should be readable");
        match file_name {
            Some(file_name) => file = Some((file_name, bytes.to_vec())),
            None => {
                fields.insert(name, String::from_utf8_lossy(&bytes).into_owned());
            }
        }
    }
    let Some((file_name, content)) = file else {
        return Json(json!({ "error": true, "message": "missing file" })).into_response();
    };
    let command = format!(
        "{}@{}",
        fields.get("command").cloned().unwrap_or_default(),
        fields.get("to").cloned().unwrap_or_default()
    );
    backend
        .uploads
        .lock()
        .expect("uploads lock")
        .push((command, file_name, content));
    ok(Value::Null)
}

async fn handle_download(Query(query): Query<HashMap<String, String>>) -> Response {
    match query.get("filepath").map(String::as_str) {
        Some("/tmp/actions/door.py") => "print('downloaded')\n".into_response(),
        _ => (StatusCode::NOT_FOUND, "no such file").into_response(),
    }
}

async fn handle_register_poll(State(backend): State<MockBackend>) -> Response {
    let issued = {
        let mut issued = backend.poll_keys_issued.lock().expect("keys lock");
        *issued += 1;
        *issued
    };
    Json(json!({ "pollKey": format!("key-{issued}") })).into_response()
}

async fn handle_poll(State(backend): State<MockBackend>, Json(request): Json<Value>) -> Response {
    let key = request["pollKey"].as_str().unwrap_or_default();
    if key.is_empty() {
        return Json(json!({ "error": true, "message": "unknown poll key" })).into_response();
    }
    if key == "key-1" && backend.expire_first_key.load(Ordering::SeqCst) {
        return Json(json!({ "error": true, "message": "poll key expired" })).into_response();
    }
    let events: Vec<Value> = backend
        .pending_events
        .lock()
        .expect("events lock")
        .drain(..)
        .collect();
    Json(json!({ "error": false, "events": events, "poll_interval_ms": 100 })).into_response()
}

fn store_for(addr: SocketAddr) -> HttpScriptStore {
    HttpScriptStore::with_base_url(reqwest::Client::new(), &format!("http://{addr}/"))
}

#[tokio::test]
async fn commands_are_sent_in_the_module_envelope() {
    let backend = MockBackend::default();
    let (addr, handle) = spawn_backend(backend.clone()).await;
    let store = store_for(addr);
    assert_eq!(store.base_url(), format!("http://{addr}"));

    let config = store.module_config().await.expect("config should load");
    assert_eq!(config.scripts.len(), 2);
    assert_eq!(config.scripts[0].last_execution, Some(1_700_000_000));
    assert!(config.scripts[1].disabled);

    store
        .save_script("door.py", "manual", "", "print(2)")
        .await
        .expect("save should work");
    let commands = backend.commands();
    assert_eq!(commands[1]["command"], "save_script");
    assert_eq!(commands[1]["to"], "actions");
    assert_eq!(
        commands[1]["params"],
        json!({ "script": "door.py", "editor": "manual", "header": "", "code": "print(2)" })
    );

    handle.abort();
}

#[tokio::test]
async fn script_content_with_null_fields_decodes() {
    let (addr, handle) = spawn_backend(MockBackend::default()).await;
    let content = store_for(addr)
        .get_script("door.py")
        .await
        .expect("script should load");
    assert_eq!(content.editor, None);
    assert_eq!(content.header, "");
    assert_eq!(content.code, "print(1)");
    handle.abort();
}

#[tokio::test]
async fn backend_errors_map_to_store_errors() {
    let (addr, handle) = spawn_backend(MockBackend::default()).await;
    let store = store_for(addr);

    let err = store
        .save_script("locked.py", "manual", "", "")
        .await
        .expect_err("locked script");
    assert!(matches!(err, StoreError::Rejected(ref message) if message == "script is locked"));

    let err = store.delete_script("door.py").await.expect_err("500");
    assert!(matches!(err, StoreError::Status { status: 500, ref body } if body == "backend exploded"));

    handle.abort();
}

#[tokio::test]
async fn rejected_command_without_message_names_the_command() {
    let (addr, handle) = spawn_backend(MockBackend::default()).await;

    let err = store_for(addr)
        .rename_script("door.py", "taken.py")
        .await
        .expect_err("target is taken");
    assert_eq!(err.to_string(), "rename_script failed");

    handle.abort();
}

#[tokio::test]
async fn debug_run_returns_the_backend_correlation_id() {
    let backend = MockBackend::default();
    let (addr, handle) = spawn_backend(backend.clone()).await;
    let store = store_for(addr);

    let trigger = DebugTrigger {
        event_name: "device.update".to_string(),
        event_values: json!({ "device_uuid": "abc" }),
    };
    let correlation_id = store
        .run_script_for_debug("door.py", Some(&trigger))
        .await
        .expect("run should be accepted");
    assert_eq!(correlation_id.as_str(), "run-42");

    let commands = backend.commands();
    assert_eq!(commands[0]["command"], "debug_script");
    assert_eq!(commands[0]["params"]["event_name"], "device.update");
    assert_eq!(commands[0]["params"]["event_values"]["device_uuid"], "abc");

    store
        .run_script_for_debug("door.py", None)
        .await
        .expect("run without trigger should be accepted");
    assert_eq!(backend.commands()[1]["params"]["event_name"], Value::Null);

    handle.abort();
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = store_for(addr)
        .module_config()
        .await
        .expect_err("nothing is listening");
    assert!(matches!(err, StoreError::Transport(_)));
}

#[tokio::test]
async fn upload_sends_multipart_form() {
    let backend = MockBackend::default();
    let (addr, handle) = spawn_backend(backend.clone()).await;

    store_for(addr)
        .upload_script("lights.py", b"print('on')".to_vec())
        .await
        .expect("upload should work");
    let uploads = backend.uploads.lock().expect("uploads lock").clone();
    assert_eq!(
        uploads,
        vec![(
            "add_script@actions".to_string(),
            "lights.py".to_string(),
            b"print('on')".to_vec()
        )]
    );

    handle.abort();
}

#[tokio::test]
async fn download_follows_the_returned_file_path() {
    let (addr, handle) = spawn_backend(MockBackend::default()).await;
    let store = store_for(addr);

    let bytes = store
        .download_script("door.py")
        .await
        .expect("download should work");
    assert_eq!(bytes, b"print('downloaded')\n".to_vec());

    let err = store
        .download_script("ghost.py")
        .await
        .expect_err("unknown file");
    assert!(matches!(err, StoreError::Status { status: 404, .. }));

    handle.abort();
}

#[tokio::test]
async fn poller_routes_backend_events_to_subscribers() {
    let backend = MockBackend::default();
    let (addr, handle) = spawn_backend(backend.clone()).await;
    let channel = NotificationChannel::new();
    let mut subscription = channel.subscribe("run-42".into());

    backend.push_event(json!({ "event": "system.device.update", "params": {} }));
    backend.push_event(json!({
        "event": "actions.debug.message",
        "correlation_id": "run-42",
        "params": { "message": "hello", "level": "INFO", "timestamp": 3 }
    }));
    backend.push_event(json!({ "event": "actions.debug.message", "params": {} }));
    backend.push_event(json!({ "event": "actions.debug.end", "correlation_id": "run-42" }));

    let poller = spawn_event_poller(
        reqwest::Client::new(),
        Arc::clone(&channel),
        EventPollerConfig {
            base_url: format!("http://{addr}"),
            poll_interval_ms: 100,
            request_timeout_ms: 1_000,
        },
    );

    let first = tokio::time::timeout(Duration::from_secs(3), subscription.recv())
        .await
        .expect("output should arrive");
    match first {
        Some(Notification::Output { payload, .. }) => assert_eq!(payload["message"], "hello"),
        other => panic!("unexpected notification: {other:?}"),
    }
    let second = tokio::time::timeout(Duration::from_secs(3), subscription.recv())
        .await
        .expect("end should arrive");
    assert_eq!(
        second,
        Some(Notification::End {
            correlation_id: "run-42".into()
        })
    );
    assert_eq!(channel.metrics().unroutable, 1);
    assert!(channel.metrics().polls_succeeded >= 1);
    assert_eq!(channel.metrics().polls_failed, 0);
    assert_eq!(backend.keys_issued(), 1);

    poller.abort();
    handle.abort();
}

#[tokio::test]
async fn poller_registers_again_after_the_key_is_rejected() {
    let backend = MockBackend::default();
    backend.expire_first_key.store(true, Ordering::SeqCst);
    let (addr, handle) = spawn_backend(backend.clone()).await;
    let channel = NotificationChannel::new();
    let mut subscription = channel.subscribe("run-7".into());

    backend.push_event(json!({ "event": "system.device.update", "correlation_id": 7, "params": {} }));
    backend.push_event(json!({ "event": "actions.debug.end", "correlation_id": "run-7" }));

    let poller = spawn_event_poller(
        reqwest::Client::new(),
        Arc::clone(&channel),
        EventPollerConfig {
            base_url: format!("http://{addr}"),
            poll_interval_ms: 100,
            request_timeout_ms: 1_000,
        },
    );

    let end = tokio::time::timeout(Duration::from_secs(3), subscription.recv())
        .await
        .expect("end should arrive on the second key");
    assert_eq!(
        end,
        Some(Notification::End {
            correlation_id: "run-7".into()
        })
    );
    assert_eq!(backend.keys_issued(), 2);
    let metrics = channel.metrics();
    assert!(metrics.polls_failed >= 1);
    assert!(metrics.polls_succeeded >= 1);
    assert_eq!(metrics.unroutable, 0);

    poller.abort();
    handle.abort();
}
