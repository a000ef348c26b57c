//! The control-plane HTTP server: `/file/reload`, `/tunnel`,
//! `/tunnel/connection`, `/ws/logs`.
//!
//! Grounded on `pymock/main.py`'s second Tornado `Application` (the
//! control plane listens on its own port, separate from the mock
//! listener) and `pymock/wshandler.py` for `/ws/logs`. Basic auth gating
//! via the `-p` CLI flag mirrors Tornado's `@tornado.web.authenticated`-
//! style guard used there.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use http::{HeaderMap, Method, Request, Response, StatusCode};
use hyper::{Body, Server};
use hyper::service::{make_service_fn, service_fn};
use serde::Serialize;
use serde_json::json;

use crate::config::normalize_path;
use crate::error::ControlPlaneError;
use crate::forward::ForwardClient;
use crate::logging::WsLogLayer;
use crate::registry::TunnelRegistry;
use crate::reload::{self, ReloadTarget};
use crate::rules::RuleTableHandle;
use crate::store::Store;
use crate::tunnel::TunnelState;

pub struct ControlPlane {
    pub rules: RuleTableHandle,
    pub tunnels: Arc<TunnelRegistry>,
    pub base_dir: PathBuf,
    pub store: Store,
    pub ws_logs: WsLogLayer,
    pub password: Option<String>,
    pub client: Arc<ForwardClient>,
}

/// Serves the control plane on `addr` until the process exits.
pub async fn serve(addr: SocketAddr, state: Arc<ControlPlane>) -> hyper::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(dispatch(req, state).await) }
            }))
        }
    });
    tracing::info!(%addr, "control plane started");
    Server::bind(&addr).serve(make_svc).await
}

fn unauthorized() -> Response<Body> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("www-authenticate", "Basic realm=\"relaymock\"")
        .body(Body::from("unauthorized"))
        .unwrap()
}

fn check_auth(headers: &HeaderMap, password: &Option<String>) -> bool {
    let Some(expected) = password else {
        return true;
    };
    let Some(header) = headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    use base64::Engine;
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(text) = String::from_utf8(decoded) else {
        return false;
    };
    match text.split_once(':') {
        Some((_user, pass)) => pass == expected,
        None => text == *expected,
    }
}

async fn dispatch(req: Request<Body>, state: Arc<ControlPlane>) -> Response<Body> {
    if !check_auth(req.headers(), &state.password) {
        return unauthorized();
    }

    let (parts, body) = req.into_parts();
    let query = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect::<std::collections::HashMap<_, _>>())
        .unwrap_or_default();

    let result = match (parts.method.clone(), parts.uri.path()) {
        (Method::POST, "/file/reload") => handle_reload(&state, &query).await,
        (Method::GET, "/tunnel") => Ok(handle_tunnel_list(&state)),
        (Method::POST, "/tunnel") => handle_tunnel_action(&state, &query).await,
        (Method::GET, "/tunnel/connection") => handle_connection_list(&state, &query),
        (Method::POST, "/tunnel/connection") => handle_connection_action(&state, &query),
        (Method::GET, "/ws/logs") => return handle_ws_logs(parts, body, state).await,
        _ => Err(ControlPlaneError::NotFound("no such control-plane route".into())),
    };

    match result {
        Ok(resp) => resp,
        Err(err) => json_error(err),
    }
}

fn json_error(err: ControlPlaneError) -> Response<Body> {
    let status = err.status();
    let body = json!({ "error": err.to_string() });
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_ok<T: Serialize>(value: &T) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(value).unwrap_or_default()))
        .unwrap()
}

/// `POST /file/reload?path=P` (spec §4.9/§6): the response body is the
/// literal message `reload::classify`/`reload::apply` implies, not a JSON
/// envelope — `"config file reloaded"`, `"processor file reloaded"`,
/// `"controller file reloaded"`, or `"unregistered file, ignore"`.
async fn handle_reload(
    state: &Arc<ControlPlane>,
    query: &std::collections::HashMap<String, String>,
) -> Result<Response<Body>, ControlPlaneError> {
    let raw_path = query
        .get("path")
        .ok_or(ControlPlaneError::MissingArgument("path"))?;
    let normalized = normalize_path(raw_path);
    let config_path = reload::config_path(&state.base_dir);
    let config = crate::config::load_config(&config_path)
        .map_err(|e| ControlPlaneError::BadRequest(e.to_string()))?;
    let target = reload::classify(&normalized, &config);

    if target == ReloadTarget::Unregistered {
        return Ok(plain_text("unregistered file, ignore"));
    }

    reload::apply(
        target,
        &config_path,
        &state.base_dir,
        &state.rules,
        &state.tunnels,
        state.store.clone(),
        state.client.clone(),
    )
    .await
    .map_err(|e| ControlPlaneError::BadRequest(e.to_string()))?;

    let message = match target {
        ReloadTarget::Config => "config file reloaded",
        ReloadTarget::MockHandler => "processor file reloaded",
        ReloadTarget::TunnelController => "controller file reloaded",
        ReloadTarget::Unregistered => unreachable!("handled above"),
    };
    Ok(plain_text(message))
}

fn plain_text(body: &'static str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain")
        .body(Body::from(body))
        .unwrap()
}

#[derive(Serialize)]
struct TunnelView {
    port: u16,
    dest_host: String,
    dest_port: u16,
    status: String,
}

fn state_name(state: TunnelState) -> &'static str {
    match state {
        TunnelState::Stopped => "stopped",
        TunnelState::Starting => "starting",
        TunnelState::Started => "started",
        TunnelState::Stopping => "stopping",
    }
}

fn handle_tunnel_list(state: &Arc<ControlPlane>) -> Response<Body> {
    let views: Vec<TunnelView> = state
        .tunnels
        .list()
        .into_iter()
        .map(|t| TunnelView {
            port: t.port,
            dest_host: t.dest_host,
            dest_port: t.dest_port,
            status: state_name(t.state).to_string(),
        })
        .collect();
    json_ok(&views)
}

async fn handle_tunnel_action(
    state: &Arc<ControlPlane>,
    query: &std::collections::HashMap<String, String>,
) -> Result<Response<Body>, ControlPlaneError> {
    let port: u16 = query
        .get("port")
        .ok_or(ControlPlaneError::MissingArgument("port"))?
        .parse()
        .map_err(|_| ControlPlaneError::BadRequest("port must be a u16".into()))?;
    let action = query
        .get("action")
        .ok_or(ControlPlaneError::MissingArgument("action"))?;
    match action.as_str() {
        "start" => state.tunnels.start(port).await?,
        "stop" => state.tunnels.stop(port).await?,
        other => return Err(ControlPlaneError::BadRequest(format!("unknown action `{other}`"))),
    }
    Ok(json_ok(&json!({ "ok": true })))
}

fn handle_connection_list(
    state: &Arc<ControlPlane>,
    query: &std::collections::HashMap<String, String>,
) -> Result<Response<Body>, ControlPlaneError> {
    let port: u16 = query
        .get("port")
        .ok_or(ControlPlaneError::MissingArgument("port"))?
        .parse()
        .map_err(|_| ControlPlaneError::BadRequest("port must be a u16".into()))?;
    let tunnel = state
        .tunnels
        .get(port)
        .ok_or_else(|| ControlPlaneError::NotFound(format!("no tunnel on port {port}")))?;
    let connections: Vec<_> = tunnel
        .connections_info()
        .into_iter()
        .map(|c| json!({ "conn_id": c.id, "peer_ip": c.peer.ip().to_string(), "peer_port": c.peer.port() }))
        .collect();
    Ok(json_ok(&connections))
}

fn handle_connection_action(
    state: &Arc<ControlPlane>,
    query: &std::collections::HashMap<String, String>,
) -> Result<Response<Body>, ControlPlaneError> {
    let port: u16 = query
        .get("port")
        .ok_or(ControlPlaneError::MissingArgument("port"))?
        .parse()
        .map_err(|_| ControlPlaneError::BadRequest("port must be a u16".into()))?;
    let conn_id = query
        .get("conn_id")
        .ok_or(ControlPlaneError::MissingArgument("conn_id"))?;
    let action = query
        .get("action")
        .ok_or(ControlPlaneError::MissingArgument("action"))?;
    let tunnel = state
        .tunnels
        .get(port)
        .ok_or_else(|| ControlPlaneError::NotFound(format!("no tunnel on port {port}")))?;
    let reset = match action.as_str() {
        "close" => false,
        "reset" => true,
        other => return Err(ControlPlaneError::BadRequest(format!("unknown action `{other}`"))),
    };
    if !tunnel.close_connection(conn_id, reset) {
        return Err(ControlPlaneError::NotFound(format!("no connection `{conn_id}` on port {port}")));
    }
    Ok(json_ok(&json!({ "ok": true })))
}

async fn handle_ws_logs(
    parts: http::request::Parts,
    body: Body,
    state: Arc<ControlPlane>,
) -> Response<Body> {
    let req = Request::from_parts(parts, body);
    match hyper_tungstenite_upgrade(req, state).await {
        Ok(resp) => resp,
        Err(resp) => resp,
    }
}

/// Upgrades the connection to a websocket and streams JSON log lines to
/// the client until it disconnects.
async fn hyper_tungstenite_upgrade(
    req: Request<Body>,
    state: Arc<ControlPlane>,
) -> Result<Response<Body>, Response<Body>> {
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    let key = req
        .headers()
        .get("sec-websocket-key")
        .cloned()
        .ok_or_else(|| json_error(ControlPlaneError::BadRequest("missing websocket key".into())))?;
    let accept = tokio_tungstenite::tungstenite::handshake::derive_accept_key(key.as_bytes());

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(http::header::CONNECTION, "Upgrade")
        .header(http::header::UPGRADE, "websocket")
        .header("sec-websocket-accept", accept)
        .body(Body::empty())
        .unwrap();

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                stream_logs(ws, state).await;
            }
            Err(err) => tracing::warn!(%err, "websocket upgrade failed"),
        }
    });

    Ok(response)
}

async fn stream_logs(
    mut ws: tokio_tungstenite::WebSocketStream<hyper::upgrade::Upgraded>,
    state: Arc<ControlPlane>,
) {
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    let mut rx = state.ws_logs.subscribe();
    loop {
        match rx.recv().await {
            Ok(line) => {
                if ws.send(Message::Text(line)).await.is_err() {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
