//! End-to-end sessions over in-memory pairs and real WebSocket connections.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use interconnect_session::errors::{INTERNAL_ERROR, INTERNAL_ERROR_MESSAGE, METHOD_NOT_FOUND};
use interconnect_session::{
    AnyValue, Endpoint, FaultSink, HandlerError, HandlerFault, IntoSession, MemoryTransceiver,
    Schema, SessionError, SessionManager, SessionOptions, Shape, StructuredError,
    WebSocketTransceiver,
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingSink {
    faults: Mutex<Vec<HandlerFault>>,
}

impl FaultSink for RecordingSink {
    fn report(&self, fault: &HandlerFault) {
        self.faults.lock().push(fault.clone());
    }
}

#[derive(Debug, Deserialize)]
struct GetServer {
    id: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Server {
    id: String,
    status: String,
}

fn server_endpoint() -> Endpoint {
    Endpoint::new()
        .request(
            "servers.get",
            Schema::<GetServer>::new(),
            |input: GetServer, _session| async move {
                if input.id == "missing" {
                    return Err(HandlerError::from(
                        StructuredError::new(404, "server not found")
                            .with_data(json!({"id": input.id})),
                    ));
                }
                Ok(Server {
                    id: input.id,
                    status: "running".into(),
                })
            },
        )
        .request("servers.crash", AnyValue, |_input: Value, _session| async move {
            Err::<Value, _>(HandlerError::internal("pool exhausted: 10/10 connections in use"))
        })
        .request(
            "system/echo",
            AnyValue,
            |input: Value, _session| async move { Ok(input) },
        )
}

#[tokio::test]
async fn memory_pair_round_trip_with_typed_result() {
    let (client_t, server_t) = MemoryTransceiver::pair();
    let _server = server_endpoint().connect(server_t);
    let client = client_t.into_session();

    let server: Server = client
        .request_validated(
            "servers.get",
            json!({"id": "srv_1"}),
            &Schema::<Server>::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        server,
        Server {
            id: "srv_1".into(),
            status: "running".into()
        }
    );
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn echo_preserves_json_payloads() {
    let (client_t, server_t) = MemoryTransceiver::pair();
    let _server = server_endpoint().connect(server_t);
    let client = client_t.into_session();

    for payload in [
        json!(null),
        json!(0),
        json!(-1.5),
        json!("ünïcødé"),
        json!([1, [2, [3]]]),
        json!({"nested": {"list": [true, false, null]}}),
    ] {
        let echoed = client.request("system/echo", payload.clone()).await.unwrap();
        assert_eq!(echoed, payload);
    }
}

#[tokio::test]
async fn declared_and_internal_errors_cross_the_wire_differently() {
    let sink = Arc::new(RecordingSink::default());
    let (client_t, server_t) = MemoryTransceiver::pair();
    let server = SessionManager::new(
        Arc::new(server_t),
        SessionOptions::default().with_fault_sink(sink.clone()),
    );
    let _server = server_endpoint().connect(server);
    let client = client_t.into_session();

    let err = client
        .request("servers.get", json!({"id": "missing"}))
        .await
        .unwrap_err();
    assert_matches!(err, SessionError::Remote(e) if e.code == 404 && e.data == Some(json!({"id": "missing"})));

    let err = client
        .request("servers.crash", json!({"attempt": 1}))
        .await
        .unwrap_err();
    let remote = err.as_remote().unwrap();
    assert_eq!(remote.code, INTERNAL_ERROR);
    assert_eq!(remote.message, INTERNAL_ERROR_MESSAGE);
    assert!(!remote.message.contains("pool exhausted"));

    let faults = sink.faults.lock().clone();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].method, "servers.crash");
    assert_eq!(faults[0].params, json!({"attempt": 1}));
    assert!(faults[0].error.contains("pool exhausted"));

    let err = client.request("servers.delete", json!({})).await.unwrap_err();
    assert_matches!(err, SessionError::Remote(e) if e.code == METHOD_NOT_FOUND);
}

#[tokio::test]
async fn concurrent_requests_are_correlated() {
    let (client_t, server_t) = MemoryTransceiver::pair();
    let server = server_t.into_session();
    server.on_request("slow_echo", |params: Value, _session| async move {
        let delay = params["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(params["n"].clone())
    });
    let client = client_t.clone().into_session();

    let calls = (0..20_u64).map(|n| {
        let client = client.clone();
        async move {
            let delay = (20 - n) * 2;
            let got = client
                .request("slow_echo", json!({"n": n, "delay_ms": delay}))
                .await
                .unwrap();
            assert_eq!(got, json!(n));
        }
    });
    timeout(TIMEOUT, futures::future::join_all(calls))
        .await
        .unwrap();
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client_t.listener_count(), 1);
}

#[tokio::test]
async fn closing_one_end_fails_the_other_ends_pending_requests() {
    let (client_t, server_t) = MemoryTransceiver::pair();
    let server = server_t.into_session();
    server.on_request("never", |_params, _session| async move {
        std::future::pending::<()>().await;
        Ok(Value::Null)
    });
    let client = client_t.into_session();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.request("never", json!(null)).await }
    });
    while client.pending_requests() == 0 {
        tokio::task::yield_now().await;
    }
    server.close().await.unwrap();
    assert_matches!(timeout(TIMEOUT, call).await.unwrap().unwrap(), Err(SessionError::Closed));
    assert!(client.is_closed());
}

#[tokio::test]
async fn invalid_request_params_are_rejected_before_the_handler() {
    let (client_t, server_t) = MemoryTransceiver::pair();
    let called = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&called);
    let endpoint = Endpoint::new().request(
        "deploy",
        Shape::object()
            .required("image", Shape::String)
            .optional("args", Shape::array(Shape::String))
            .build(),
        move |_input: Value, _session| {
            let flag = Arc::clone(&flag);
            async move {
                *flag.lock() = true;
                Ok(json!("deployed"))
            }
        },
    );
    let _server = endpoint.connect(server_t);
    let client = client_t.into_session();

    let err = client
        .request("deploy", json!({"image": "nginx", "args": ["-p", 80]}))
        .await
        .unwrap_err();
    let remote = err.as_remote().unwrap();
    assert_eq!(remote.code, -32602);
    assert_eq!(
        remote.message,
        "Invalid params for method deploy: $.args[1]: expected string, received number"
    );
    assert!(!*called.lock());
}

async fn ws_server(endpoint: Endpoint) -> String {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", tcp.local_addr().unwrap());
    drop(tokio::spawn(async move {
        while let Ok((stream, _)) = tcp.accept().await {
            let endpoint = endpoint.clone();
            drop(tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    let _session = endpoint.connect(WebSocketTransceiver::from_stream(ws));
                }
            }));
        }
    }));
    url
}

#[tokio::test]
async fn websocket_round_trip() {
    let url = ws_server(server_endpoint()).await;
    let client = WebSocketTransceiver::connect(&url)
        .await
        .unwrap()
        .into_session();

    let result = timeout(TIMEOUT, client.request("servers.get", json!({"id": "srv_9"})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, json!({"id": "srv_9", "status": "running"}));

    let err = timeout(TIMEOUT, client.request("nope", json!(null)))
        .await
        .unwrap()
        .unwrap_err();
    assert_matches!(err, SessionError::Remote(e) if e.code == METHOD_NOT_FOUND);

    client.close().await.unwrap();
    assert!(client.is_closed());
    assert_matches!(client.request("servers.get", json!({"id": "x"})).await, Err(SessionError::Closed));
}

#[tokio::test]
async fn websocket_server_can_notify_client() {
    let endpoint = Endpoint::new().request(
        "subscribe",
        AnyValue,
        |topic: Value, session: SessionManager| async move {
            session
                .notify("event", json!({"topic": topic, "seq": 1}))
                .await
                .map(|()| json!({"subscribed": true}))
                .map_err(HandlerError::from)
        },
    );
    let url = ws_server(endpoint).await;
    let client = WebSocketTransceiver::connect(&url)
        .await
        .unwrap()
        .into_session();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    client.on_notification("event", move |params: Value, _session| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(params);
            Ok(())
        }
    });

    let ack = timeout(TIMEOUT, client.request("subscribe", json!("deployments")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack, json!({"subscribed": true}));
    let event = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event, json!({"topic": "deployments", "seq": 1}));
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let (client_t, _silent) = MemoryTransceiver::pair();
    let client = SessionManager::new(
        Arc::new(client_t.clone()),
        SessionOptions::default().with_request_timeout(Duration::from_millis(50)),
    );
    let err = client
        .request("servers.get", json!({"id": "srv_1"}))
        .await
        .unwrap_err();
    assert_matches!(err, SessionError::Timeout { timeout_ms: 50, .. });
    assert_eq!(client_t.listener_count(), 1);
}
