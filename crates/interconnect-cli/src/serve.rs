//! `serve`: the demo interconnect (WebSocket) and batch (HTTP) servers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use interconnect_rpc::BatchRouter;
use interconnect_session::{
    AnyValue, Endpoint, SessionManager, SessionOptions, Shape, WebSocketTransceiver,
};
use interconnect_settings::{ServerSettings, SessionSettings};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Methods served to every WebSocket session.
pub fn demo_endpoint() -> Endpoint {
    Endpoint::new()
        .request("system/ping", AnyValue, |_params: Value, _session| async move {
            Ok(json!("pong"))
        })
        .request("system/echo", AnyValue, |params: Value, _session| async move {
            Ok(params)
        })
        .notification(
            "system/log",
            Shape::object()
                .required("line", Shape::String)
                .optional("level", Shape::one_of(["debug", "info", "warn", "error"]))
                .build(),
            |params: Value, _session| async move {
                let line = params["line"].as_str().unwrap_or_default();
                let level = params["level"].as_str().unwrap_or("info");
                info!(%level, line, "remote log");
                Ok(())
            },
        )
}

/// Calls served over HTTP.
pub fn demo_router() -> BatchRouter {
    BatchRouter::new()
        .handler("system:ping", |_payload| async move { Ok(json!("pong")) })
        .handler("system:echo", |payload| async move { Ok(payload) })
}

/// Bind both servers from settings and run them until Ctrl-C.
pub async fn run(server: &ServerSettings, session: &SessionSettings) -> Result<()> {
    let ws_addr = format!("{}:{}", server.host, server.ws_port);
    let http_addr = format!("{}:{}", server.host, server.http_port);
    let ws_listener = TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("Failed to bind {ws_addr}"))?;
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind {http_addr}"))?;
    info!(
        ws = %ws_listener.local_addr()?,
        http = %http_listener.local_addr()?,
        rpc_path = %server.rpc_path,
        "interconnect servers listening"
    );

    let token = CancellationToken::new();
    let servers = tokio::spawn(serve_until(
        ws_listener,
        http_listener,
        server.rpc_path.clone(),
        session.clone(),
        token.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down...");
    token.cancel();
    servers.await.context("server task panicked")?
}

/// Serve sessions and batches on the given listeners until `token` is cancelled.
///
/// Every accepted connection gets its own session options, so request ids
/// carry a per-connection root. Open sessions are closed on cancellation;
/// the HTTP server drains in-flight batches before returning.
pub async fn serve_until(
    ws_listener: TcpListener,
    http_listener: TcpListener,
    rpc_path: String,
    session: SessionSettings,
    token: CancellationToken,
) -> Result<()> {
    let sessions = tokio::spawn(accept_sessions(
        ws_listener,
        demo_endpoint(),
        session,
        token.clone(),
    ));

    let http_token = token.clone();
    let app = demo_router().into_router(&rpc_path);
    let http = axum::serve(http_listener, app)
        .with_graceful_shutdown(async move { http_token.cancelled().await })
        .await;

    sessions.await.context("session listener panicked")?;
    http.context("batch server failed")
}

async fn accept_sessions(
    listener: TcpListener,
    endpoint: Endpoint,
    settings: SessionSettings,
    token: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        drop(tokio::spawn(run_session(
            stream,
            peer,
            endpoint.clone(),
            SessionOptions::from_settings(&settings),
            token.clone(),
        )));
    }
    debug!("session listener stopped");
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    endpoint: Endpoint,
    options: SessionOptions,
    token: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let transceiver = WebSocketTransceiver::from_stream(ws);
    let session = endpoint.connect(SessionManager::new(Arc::new(transceiver), options));
    info!(%peer, "session opened");

    let closed = Arc::new(Notify::new());
    let notify = Arc::clone(&closed);
    let subscription = session.on_close(move || notify.notify_one());

    tokio::select! {
        () = closed.notified() => {}
        () = token.cancelled() => {
            if let Err(e) = session.close().await {
                warn!(%peer, error = %e, "closing session failed");
            }
        }
    }
    subscription.cancel();
    info!(%peer, "session closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use interconnect_rpc::{CallMultiplexer, CallRequest, HttpTransport, RetryPolicy, RpcClient};
    use interconnect_session::IntoSession;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn start() -> (String, String, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let ws = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}", ws.local_addr().unwrap());
        let rpc_url = format!("http://{}/rpc", http.local_addr().unwrap());
        let token = CancellationToken::new();
        let handle = tokio::spawn(serve_until(
            ws,
            http,
            "/rpc".into(),
            SessionSettings::default(),
            token.clone(),
        ));
        (ws_url, rpc_url, token, handle)
    }

    #[tokio::test]
    async fn serves_sessions_and_batches_until_cancelled() {
        let (ws_url, rpc_url, token, handle) = start().await;

        let session = WebSocketTransceiver::connect(&ws_url)
            .await
            .unwrap()
            .into_session();
        let pong = tokio::time::timeout(TIMEOUT, session.request("system/ping", Value::Null))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pong, json!("pong"));
        let echoed = session.request("system/echo", json!({"a": [1, 2]})).await.unwrap();
        assert_eq!(echoed, json!({"a": [1, 2]}));
        session
            .notify("system/log", json!({"line": "hello", "level": "info"}))
            .await
            .unwrap();

        let client = RpcClient::new(
            CallMultiplexer::new(
                Arc::new(HttpTransport::new(TIMEOUT).unwrap()),
                Duration::ZERO,
            ),
            RetryPolicy::default(),
        );
        let response = client
            .call(CallRequest::new(rpc_url, "system:echo", json!("hi")))
            .await
            .unwrap();
        assert_eq!(response.data, json!("hi"));

        token.cancel();
        tokio::time::timeout(TIMEOUT, handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // the server side closed the session on shutdown
        tokio::time::timeout(TIMEOUT, async {
            while !session.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn demo_methods() {
        assert_eq!(
            demo_endpoint().methods(),
            vec!["system/echo", "system/log", "system/ping"]
        );
        assert_eq!(demo_router().names(), vec!["system:echo", "system:ping"]);
    }
}
