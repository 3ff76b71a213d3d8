//! In-process agent backend and gateway for integration tests

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use story_gateway::GatewayConfig;

pub const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";
pub const WALLET: &str = "0x2222222222222222222222222222222222222222";

/// A request the mock backend received
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub body: Value,
    pub authorization: Option<String>,
}

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockState {
    fn record(&self, path: &str, headers: &HeaderMap, body: &Value) {
        self.requests.lock().unwrap().push(Recorded {
            path: path.to_string(),
            body: body.clone(),
            authorization: headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
    }
}

/// Mock agent backend listening on an ephemeral port
pub struct MockBackend {
    pub url: String,
    state: MockState,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = MockState::default();
        let router = Router::new()
            .route("/api/chat", post(chat))
            .route("/api/transaction", post(transaction))
            .route("/api/interrupt/confirm", post(confirm))
            .with_state(state.clone());
        let url = serve(router).await;
        Self { url, state }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn last(&self, path: &str) -> Recorded {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.path == path)
            .unwrap_or_else(|| panic!("no request to {path}"))
    }
}

/// Serve `router` on 127.0.0.1 with an ephemeral port, returning its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Start a gateway in front of `backend_url`.
pub async fn start_gateway(backend_url: &str, mock_fallback: bool) -> String {
    let config = GatewayConfig {
        backend_url: backend_url.to_string(),
        mock_fallback,
        connect_timeout_secs: 2,
        ..Default::default()
    };
    serve(story_gateway::server::app(config).unwrap()).await
}

fn text_stream(conversation_id: &str, chunks: Vec<Bytes>, endless: bool) -> Response {
    let body = stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
    let body = if endless {
        Body::from_stream(body.chain(stream::pending()))
    } else {
        Body::from_stream(body)
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, "text/plain; charset=utf-8".parse().unwrap());
    if let Ok(value) = conversation_id.parse() {
        headers.insert("x-conversation-id", value);
    }
    response
}

/// 200 announcing JSON with a body that does not parse.
fn garbled_json() -> Response {
    ([(CONTENT_TYPE, "application/json")], "{\"content\": ").into_response()
}

fn chunks(parts: &[&str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::from(p.to_string())).collect()
}

/// Chat behavior is picked by the forwarded message text.
async fn chat(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("/api/chat", &headers, &body);
    let conversation_id = body["conversation_id"].as_str().unwrap_or_default().to_string();
    let message = body["message"].as_str().unwrap_or_default().to_string();

    match message.as_str() {
        "json" => Json(json!({
            "content": "Plain JSON answer",
            "conversation_id": conversation_id,
        }))
        .into_response(),
        "fail" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "agent crashed"})),
        )
            .into_response(),
        "interrupt" => {
            let marker = format!(
                r#"[INTERRUPT]{{"interrupt_id":"int-1","message":"Send 1 IP?","action":"send_ip","transaction":{{"to":"{RECIPIENT}","value":"1000000000000000000"}}}}[/INTERRUPT]"#
            );
            let (head, tail) = marker.split_at(5);
            text_stream(
                &conversation_id,
                chunks(&["Preparing transfer. ", head, tail, " Waiting for you."]),
                false,
            )
        }
        "transaction" => {
            let marker = format!(
                r#"[TRANSACTION]{{"to":"{RECIPIENT}","value":"250000000000000000","chainId":1315}}[/TRANSACTION]"#
            );
            let (head, tail) = marker.split_at(marker.len() - 4);
            text_stream(&conversation_id, chunks(&["Sign this: ", head, tail]), false)
        }
        "intent" => {
            let intent =
                story_gateway::client::intent::create_transaction_intent(RECIPIENT, "0.5", None);
            text_stream(
                &conversation_id,
                chunks(&["Here you go.\n", intent.as_str()]),
                false,
            )
        }
        "utf8" => {
            let bytes = "Café ☕".as_bytes();
            text_stream(
                &conversation_id,
                vec![
                    Bytes::copy_from_slice(&bytes[..4]),
                    Bytes::copy_from_slice(&bytes[4..]),
                ],
                false,
            )
        }
        "slow" => text_stream(&conversation_id, chunks(&["Thinking"]), true),
        "rethread" => text_stream("backend-thread", chunks(&["New thread"]), false),
        "garbled" => garbled_json(),
        "fragile" => text_stream(
            &conversation_id,
            chunks(&[
                "Hold on. ",
                r#"[INTERRUPT]{"interrupt_id":"int-down","message":"Proceed?"}[/INTERRUPT]"#,
            ]),
            false,
        ),
        other => {
            let reply = format!("Echo: {other}");
            let (head, tail) = reply.split_at(reply.len() / 2);
            text_stream(&conversation_id, chunks(&[head, tail]), false)
        }
    }
}

async fn transaction(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("/api/transaction", &headers, &body);

    if body["amount"] == "999" {
        return (StatusCode::UNPROCESSABLE_ENTITY, "insufficient funds").into_response();
    }
    if body["amount"] == "garbled" {
        return garbled_json();
    }
    Json(json!({
        "transaction": {
            "to": body["to_address"],
            "value": "1000000000000000000",
            "chainId": 1315
        }
    }))
    .into_response()
}

async fn confirm(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("/api/interrupt/confirm", &headers, &body);

    if body["interrupt_id"] == "int-down" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "down").into_response();
    }

    let message = if body["confirmed"] == true {
        "Transfer confirmed, please sign it in your wallet."
    } else {
        "Transfer cancelled."
    };
    Json(json!({
        "message": message,
        "conversation_id": body["conversation_id"],
    }))
    .into_response()
}
