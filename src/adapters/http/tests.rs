use super::*;
use crate::adapters::persistence::JsonlArchive;
use crate::domain::{OperationStatus, Role, Topic};
use crate::ports::KvStore;
use crate::test_support::{AUTH_MARKER, MemoryStore, MockFactory, group, message};
use crate::usecases::{
    ArchiveSettings, AuthSettings, MonitorSettings, SessionStore, SessionStoreSettings,
};
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    tmp: tempfile::TempDir,
    app: Router,
    state: AppState,
    factory: MockFactory,
    admin: String,
    operator: String,
}

async fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let sessions = Arc::new(SessionStore::new(
        tmp.path().join("sessions"),
        SessionStoreSettings::default(),
    ));
    std::fs::create_dir_all(sessions.dir()).unwrap();
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
    let factory = MockFactory::default();
    let settings = CoreSettings {
        auth: AuthSettings {
            code_timeout: Duration::from_secs(5),
            retention: Duration::from_secs(60),
        },
        archive: ArchiveSettings {
            download_concurrency: 2,
            page_delay: Duration::ZERO,
        },
        monitor: MonitorSettings {
            cycle: Duration::from_millis(50),
            downloads_dir: tmp.path().join("downloads"),
            download_concurrency: 2,
        },
        event_capacity: 64,
    };
    let state = AppState::build(
        store,
        sessions,
        Arc::new(factory.clone()),
        Arc::new(JsonlArchive::new(tmp.path().join("archive"))),
        settings,
    );
    let admin = state.tokens.initialize().await.unwrap().unwrap();
    let (operator, _) = state
        .tokens
        .create("operator", Role::User, None)
        .await
        .unwrap();
    let app = create_router(state.clone(), &["*".to_string()]);
    Harness {
        tmp,
        app,
        state,
        factory,
        admin,
        operator,
    }
}

impl Harness {
    async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(v) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Mark `nickname` as a known, already signed-in account.
    async fn authorized_user(&self, nickname: &str) {
        self.state
            .users
            .save_phone(nickname, "+391234567")
            .await
            .unwrap();
        let path = self
            .tmp
            .path()
            .join("sessions")
            .join(format!("{}.session", nickname));
        std::fs::write(path, AUTH_MARKER).unwrap();
    }

    async fn wait_operation(&self, id: &str, wanted: &str) -> Value {
        let uri = format!("/api/operations/{}", id);
        for _ in 0..300 {
            let (_, body) = self.call("GET", &uri, Some(&self.operator), None).await;
            if body["status"] == wanted {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("operation {} never reached {}", id, wanted);
    }
}

#[tokio::test]
async fn status_is_public() {
    let h = harness().await;
    let (status, body) = h.call("GET", "/api/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "online");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let h = harness().await;
    let (status, body) = h.call("GET", "/api/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = h.call("GET", "/api/users", Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/users")
        .header(auth::TOKEN_HEADER, h.operator.as_str())
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn token_management_is_admin_only() {
    let h = harness().await;
    let body = json!({ "username": "viewer", "role": "user", "expiration_days": 7 });
    let (status, _) = h
        .call("POST", "/api/tokens", Some(&h.operator), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = h.call("POST", "/api/tokens", Some(&h.admin), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["role"], "user");
    assert!(created["expiration"].is_string());
    let viewer = created["token"].as_str().unwrap().to_string();
    let (status, _) = h.call("GET", "/api/operations", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .call("POST", "/api/tokens", Some(&h.admin), Some(json!({ "username": "x", "role": "root" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h.call("DELETE", "/api/tokens/admin", Some(&h.admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = h.call("DELETE", "/api/tokens/ghost", Some(&h.admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h.call("DELETE", "/api/tokens/viewer", Some(&h.admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.call("GET", "/api/operations", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authentication_flow_over_http() {
    let h = harness().await;
    let (status, started) = h
        .call(
            "POST",
            "/api/users/authenticate",
            Some(&h.operator),
            Some(json!({ "nickname": "alice", "phone": "+391234567" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "pending");
    let auth_id = started["auth_id"].as_str().unwrap().to_string();

    let status_uri = format!("/api/users/authenticate/{}/status", auth_id);
    let mut phase = Value::Null;
    for _ in 0..300 {
        let (_, body) = h.call("GET", &status_uri, Some(&h.operator), None).await;
        phase = body["status"].clone();
        if phase == "code_sent" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(phase, "code_sent");

    let code_uri = format!("/api/users/authenticate/{}/code", auth_id);
    let (status, body) = h
        .call("POST", &code_uri, Some(&h.operator), Some(json!({ "code": "12345" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processing");

    let (status, body) = h
        .call("POST", &code_uri, Some(&h.operator), Some(json!({ "code": "12345" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["status"].is_string());

    for _ in 0..300 {
        let (_, body) = h.call("GET", &status_uri, Some(&h.operator), None).await;
        if body["status"] == "authenticated" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let (_, body) = h.call("GET", &status_uri, Some(&h.operator), None).await;
    assert_eq!(body["status"], "authenticated");
    assert_eq!(body["nickname"], "alice");
    assert_eq!(*h.factory.telegram.codes.lock().unwrap(), vec!["12345".to_string()]);

    let mut listed = false;
    for _ in 0..100 {
        let (_, users) = h.call("GET", "/api/users", Some(&h.operator), None).await;
        if users["users"][0]["nickname"] == "alice" {
            listed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(listed);
}

#[tokio::test]
async fn bad_requests_are_rejected_before_any_work() {
    let h = harness().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/users/authenticate")
        .header(AUTHORIZATION, format!("Bearer {}", h.operator))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, body) = h
        .call(
            "POST",
            "/api/users/authenticate",
            Some(&h.operator),
            Some(json!({ "nickname": "alice" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");

    let (status, _) = h
        .call(
            "POST",
            "/api/users/authenticate/auth-missing/code",
            Some(&h.operator),
            Some(json!({ "code": "1" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h
        .call("GET", "/api/operations/nothing", Some(&h.operator), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h.call("DELETE", "/api/users/ghost", Some(&h.operator), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.state.registry.list().await.is_empty());
}

#[tokio::test]
async fn adding_a_user_requires_a_signed_in_session() {
    let h = harness().await;
    let user = json!({ "nickname": "frank", "phone": "+391234567" });

    let (status, body) = h
        .call("POST", "/api/users", Some(&h.operator), Some(user.clone()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");

    let session = h.tmp.path().join("sessions").join("frank.session");
    std::fs::write(session, AUTH_MARKER).unwrap();
    let (status, body) = h
        .call("POST", "/api/users", Some(&h.operator), Some(user))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["nickname"], "frank");

    let (_, list) = h.call("GET", "/api/users", Some(&h.operator), None).await;
    assert_eq!(list["users"][0]["phone"], "+391234567");

    let (status, _) = h
        .call("POST", "/api/users", None, Some(json!({ "nickname": "x", "phone": "+391234567" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn group_link_over_http() {
    let h = harness().await;
    h.authorized_user("alice").await;
    let mut public = group(-1002, "Announcements");
    public.username = Some("rust_news".into());
    h.factory
        .telegram
        .set_groups(vec![group(-1001, "Rustaceans"), public]);
    h.call("GET", "/api/groups", Some(&h.operator), None).await;

    let (status, body) = h
        .call("GET", "/api/groups/-1002/link", Some(&h.operator), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "group_id": -1002, "link": "https://t.me/rust_news" }));

    let (_, body) = h
        .call("GET", "/api/groups/-1001/link", Some(&h.operator), None)
        .await;
    assert_eq!(body["link"], "https://t.me/+invite1001");

    let (status, _) = h
        .call("GET", "/api/groups/5/link", Some(&h.operator), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = h
        .call("GET", "/api/groups/abc/link", Some(&h.operator), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");
}

#[tokio::test]
async fn archive_download_over_http() {
    let h = harness().await;
    h.authorized_user("alice").await;
    h.factory.telegram.set_groups(vec![group(-1001, "Rustaceans")]);
    h.factory
        .telegram
        .push_messages(-1001, (1..=30).map(|id| message(-1001, id, id % 10 == 0)).collect());

    let (status, body) = h.call("GET", "/api/groups", Some(&h.operator), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["groups"][0]["name"], "Rustaceans");
    assert_eq!(body["groups"][0]["user"], "alice");

    let (status, _) = h
        .call(
            "POST",
            "/api/archives",
            Some(&h.operator),
            Some(json!({ "user": "alice", "group_id": 77 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, started) = h
        .call(
            "POST",
            "/api/archives",
            Some(&h.operator),
            Some(json!({ "user": "alice", "group_id": "-1001" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["status"], "started");
    let id = started["operation_id"].as_str().unwrap().to_string();

    let done = h.wait_operation(&id, "completed").await;
    assert_eq!(done["metadata"]["messages"], "30");
    assert_eq!(done["metadata"]["media_downloaded"], "3");

    let (_, list) = h.call("GET", "/api/archives", Some(&h.operator), None).await;
    assert_eq!(list["operations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn monitoring_start_and_stop_over_http() {
    let h = harness().await;
    h.authorized_user("alice").await;

    let (status, started) = h
        .call(
            "POST",
            "/api/monitoring",
            Some(&h.operator),
            Some(json!({ "user": "alice" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = started["instance_id"].as_str().unwrap().to_string();
    h.wait_operation(&id, OperationStatus::Active.as_str()).await;

    let (_, listed) = h.call("GET", "/api/monitoring", Some(&h.operator), None).await;
    assert_eq!(listed["instances"][&id]["status"], "active");
    assert_eq!(listed["running"], json!([id.clone()]));

    let uri = format!("/api/monitoring/{}", id);
    let (status, body) = h.call("DELETE", &uri, Some(&h.operator), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopping");
    h.wait_operation(&id, "stopped").await;

    let (status, body) = h.call("DELETE", &uri, Some(&h.operator), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "stopped");

    let (status, _) = h
        .call("DELETE", "/api/monitoring/mon-unknown", Some(&h.operator), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn monitoring_accepts_an_empty_body() {
    let h = harness().await;
    h.authorized_user("alice").await;
    let (status, started) = h.call("POST", "/api/monitoring", Some(&h.operator), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = started["instance_id"].as_str().unwrap().to_string();
    h.wait_operation(&id, "active").await;
    h.state.monitor.stop(&id).await.unwrap();
    h.wait_operation(&id, "stopped").await;
}

#[tokio::test]
async fn event_stream_filters_by_topic() {
    let h = harness().await;
    let (status, _) = h
        .call("GET", "/api/events?topic=bogus", Some(&h.operator), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .uri("/api/events?topic=monitoring_status")
        .header(AUTHORIZATION, format!("Bearer {}", h.operator))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    h.state
        .events
        .publish(Topic::AuthStatus, json!({ "auth_id": "auth-1" }));
    h.state.events.publish(
        Topic::MonitoringStatus,
        json!({ "instance_id": "mon-1", "status": "active" }),
    );

    let mut stream = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("monitoring_status"));
    assert!(text.contains("mon-1"));
    assert!(text.contains("timestamp"));
    assert!(!text.contains("auth-1"));
}
