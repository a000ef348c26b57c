//! C1 — dynamic handler and tunnel-controller artifact loading.
//!
//! Grounded on `pymock/config.py`'s `_load_item`/`load_mock_processor`/
//! `load_tunnel_controller`, which `exec()` a `.py` file and pull a named
//! symbol out of its namespace. Rust has no equivalent of `exec()` against
//! the running process, so artifacts here are Rhai scripts (the scripting
//! precedent for this crate's dependency stack comes from
//! `apollographql-router`'s use of `rhai` for request-processing hooks);
//! loading a script is the analogue of `exec()`, and calling its
//! `processor`/`on_connected`/`on_input`/`on_output` functions is the
//! analogue of instantiating the named class.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use rhai::{Dynamic, Engine, Scope, AST};

use crate::context::RequestContext;
use crate::error::{ConfigError, HandlerException, HandlerHttpError};
use crate::forward::{self, ForwardClient, ForwardOptions};
use crate::store::Store;

/// Marker `throw`n by the `fail(status, message)` native function to
/// signal a deliberate HTTP error rather than a script bug. Carries the
/// status code so the catch site can reconstruct a [`HandlerHttpError`]
/// instead of logging a [`HandlerException`].
const FAIL_MARKER: &str = "__relaymock_fail__";

/// A loaded, ready-to-run handler artifact (one `.rhai` file, spec §6
/// `mock[].file`). Compiled once at load/reload time; `call` re-evaluates
/// against a fresh [`Scope`] per request, mirroring the Python version's
/// per-request instantiation.
pub struct Handler {
    path: PathBuf,
    ast: AST,
    engine: Arc<Engine>,
    client: Arc<ForwardClient>,
}

/// A loaded tunnel controller artifact (spec §6 `tunnel.mappings[].controller`,
/// §4.1). Exposes up to three entry points; any that the script omits are
/// treated as no-ops.
pub struct ControllerFactory {
    path: PathBuf,
    ast: AST,
    engine: Arc<Engine>,
}

fn build_engine(_store: Store) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);

    engine.register_fn("fail", |status: i64, message: &str| -> Result<(), Box<rhai::EvalAltResult>> {
        Err(format!("{FAIL_MARKER}:{status}:{message}").into())
    });

    engine
        .register_type_with_name::<ScriptContext>("RequestContext")
        .register_fn("method", ScriptContext::method)
        .register_fn("path", ScriptContext::path)
        .register_fn("uri", ScriptContext::uri)
        .register_fn("header", ScriptContext::header)
        .register_fn("query_argument", ScriptContext::query_argument)
        .register_fn("query_argument", ScriptContext::query_argument_default)
        .register_fn("body_argument", ScriptContext::body_argument)
        .register_fn("request_body", ScriptContext::request_body)
        .register_fn("set_header", ScriptContext::set_header)
        .register_fn("add_header", ScriptContext::add_header)
        .register_fn("set_status", ScriptContext::set_status)
        .register_fn("set_body", ScriptContext::set_body)
        .register_fn("record", ScriptContext::record)
        .register_fn("forward", ScriptContext::forward)
        .register_fn("forward", ScriptContext::forward_default_port)
        .register_fn("forward", ScriptContext::forward_host_only)
        .register_fn("flush", ScriptContext::flush)
        .register_fn("close_socket", ScriptContext::close_socket)
        .register_fn("close_socket_nolinger", ScriptContext::close_socket_nolinger)
        .register_fn("store_get", ScriptContext::store_get)
        .register_fn("store_put", ScriptContext::store_put);

    engine
        .register_type_with_name::<ScriptConnection>("Connection")
        .register_get("conn_id", |c: &mut ScriptConnection| c.conn_id.clone())
        .register_get("peer_ip", |c: &mut ScriptConnection| c.peer.ip().to_string())
        .register_get("peer_port", |c: &mut ScriptConnection| c.peer.port() as i64)
        .register_get("tunnel", |c: &mut ScriptConnection| c.tunnel_port as i64);

    engine
}

impl Handler {
    /// Loads `path` as a Rhai handler artifact. Fails fast (spec §6:
    /// "missing required field or unreadable/invalid file is a fatal
    /// error at load") if the file cannot be read or does not parse, or
    /// if it defines neither `processor` nor `handle`.
    pub fn load(path: &Path, store: Store, client: Arc<ForwardClient>) -> Result<Handler, ConfigError> {
        let engine = build_engine(store);
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let ast = engine
            .compile(&source)
            .map_err(|e| ConfigError::InvalidArtifact {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if !ast.iter_functions().any(|f| f.name == "processor") {
            return Err(ConfigError::MissingSymbol {
                path: path.display().to_string(),
                symbol: "processor",
            });
        }
        Ok(Handler {
            path: path.to_path_buf(),
            ast,
            engine: Arc::new(engine),
            client,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `processor(ctx)` for one request. Evaluated on a blocking
    /// thread (spec: handler scripts may call back into async operations
    /// such as `forward`/`flush`, which are bridged via
    /// `tokio::runtime::Handle::block_on` from inside registered native
    /// functions — valid because this call itself never runs on a runtime
    /// worker thread).
    pub async fn call(
        &self,
        ctx: Arc<RequestContext>,
    ) -> Result<(), HandlerOutcome> {
        let ast = self.ast.clone();
        let engine = self.engine.clone();
        let handle = tokio::runtime::Handle::current();
        let script_ctx = ScriptContext::new(ctx, handle, self.client.clone());
        let result = tokio::task::spawn_blocking(move || {
            let mut scope = Scope::new();
            engine.call_fn::<Dynamic>(&mut scope, &ast, "processor", (script_ctx,))
        })
        .await
        .map_err(|e| HandlerOutcome::Exception(HandlerException(e.to_string())))?;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(classify_eval_error(*err)),
        }
    }
}

impl ControllerFactory {
    pub fn load(path: &Path, store: Store) -> Result<ControllerFactory, ConfigError> {
        let engine = build_engine(store);
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let ast = engine
            .compile(&source)
            .map_err(|e| ConfigError::InvalidArtifact {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(ControllerFactory {
            path: path.to_path_buf(),
            ast,
            engine: Arc::new(engine),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn call_optional(&self, name: &str, args: impl rhai::FuncArgs) {
        if !self.ast.iter_functions().any(|f| f.name == name) {
            return;
        }
        let mut scope = Scope::new();
        if let Err(e) = self
            .engine
            .call_fn::<Dynamic>(&mut scope, &self.ast, name, args)
        {
            tracing::warn!(controller = %self.path.display(), function = name, error = %e, "controller hook failed");
        }
    }

    pub fn on_connected(&self, conn: ScriptConnection) {
        self.call_optional("on_connected", (conn,));
    }

    pub fn on_input(&self, conn: ScriptConnection, data: Vec<u8>) {
        self.call_optional("on_input", (conn, data_to_dynamic(data)));
    }

    pub fn on_output(&self, conn: ScriptConnection, data: Vec<u8>) {
        self.call_optional("on_output", (conn, data_to_dynamic(data)));
    }
}

fn data_to_dynamic(data: Vec<u8>) -> rhai::Blob {
    data
}

/// Builds the forward target URL (spec §4.5): scheme + host + `:port`
/// (omitted when it matches the scheme's default) + the current
/// (post-strip) request URI.
fn forward_url(host: &str, port: u16, is_https: bool, uri: &str) -> String {
    let scheme = if is_https { "https" } else { "http" };
    let default_port = if is_https { 443 } else { 80 };
    if port == default_port {
        format!("{scheme}://{host}{uri}")
    } else {
        format!("{scheme}://{host}:{port}{uri}")
    }
}

/// What happened when a handler script ran.
#[derive(Debug)]
pub enum HandlerOutcome {
    Http(HandlerHttpError),
    Exception(HandlerException),
}

fn classify_eval_error(err: rhai::EvalAltResult) -> HandlerOutcome {
    if let rhai::EvalAltResult::ErrorRuntime(value, _) = &err {
        if let Some(text) = value.clone().into_string().ok() {
            if let Some(rest) = text.strip_prefix(&format!("{FAIL_MARKER}:")) {
                if let Some((status, message)) = rest.split_once(':') {
                    if let Ok(code) = status.parse::<u16>() {
                        if let Ok(status) = http::StatusCode::from_u16(code) {
                            return HandlerOutcome::Http(HandlerHttpError {
                                status,
                                log_message: Some(message.to_string()),
                            });
                        }
                    }
                }
            }
        }
    }
    HandlerOutcome::Exception(HandlerException(err.to_string()))
}

/// The object handed to `processor(ctx)` scripts. Wraps the async
/// [`RequestContext`] API with blocking equivalents callable from Rhai.
#[derive(Clone)]
pub struct ScriptContext {
    ctx: Arc<RequestContext>,
    handle: tokio::runtime::Handle,
    client: Arc<ForwardClient>,
}

impl ScriptContext {
    fn new(ctx: Arc<RequestContext>, handle: tokio::runtime::Handle, client: Arc<ForwardClient>) -> Self {
        ScriptContext { ctx, handle, client }
    }

    pub fn method(&mut self) -> String {
        self.ctx.method().to_string()
    }

    pub fn path(&mut self) -> String {
        self.ctx.path()
    }

    pub fn uri(&mut self) -> String {
        self.ctx.uri()
    }

    pub fn header(&mut self, name: &str) -> Dynamic {
        match self.ctx.header(name) {
            Some(v) => v.into(),
            None => Dynamic::UNIT,
        }
    }

    pub fn query_argument(&mut self, name: &str) -> Dynamic {
        self.ctx
            .get_query_argument(name, None)
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT)
    }

    pub fn query_argument_default(&mut self, name: &str, default: &str) -> String {
        self.ctx
            .get_query_argument(name, Some(default.to_string()))
            .unwrap_or_else(|_| default.to_string())
    }

    pub fn body_argument(&mut self, name: &str) -> Dynamic {
        let ctx = self.ctx.clone();
        let name = name.to_string();
        self.handle
            .clone()
            .block_on(async move { ctx.get_body_argument(&name, None).await })
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT)
    }

    pub fn request_body(&mut self) -> rhai::Blob {
        let ctx = self.ctx.clone();
        let bytes = self.handle.clone().block_on(async move { ctx.request_body().await });
        bytes.to_vec()
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.ctx.set_header(name, value);
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.ctx.add_header(name, value);
    }

    pub fn set_status(&mut self, code: i64) {
        self.ctx.set_status(code as u16);
    }

    pub fn set_body(&mut self, body: &str) {
        self.ctx.set_body_text(body);
    }

    pub fn record(&mut self) {
        self.ctx.record();
    }

    /// `forward(host, port, is_https, streaming_request, streaming_response)`
    /// (spec §4.3/§4.5). Builds the upstream URL from `host`/`port`/
    /// `is_https` and the current (post-strip) request URI, then relays
    /// the request via the forwarding client. Raises a Rhai runtime error
    /// on transport-level failure; an HTTP error status from upstream is
    /// not an error here, it is simply written through as the response.
    pub fn forward(
        &mut self,
        host: &str,
        port: i64,
        is_https: bool,
        streaming_request: bool,
        streaming_response: bool,
    ) -> Result<(), Box<rhai::EvalAltResult>> {
        let ctx = self.ctx.clone();
        let client = self.client.clone();
        let url = forward_url(host, port as u16, is_https, &ctx.uri());
        let opts = ForwardOptions {
            streaming_request,
            streaming_response,
        };
        self.handle
            .clone()
            .block_on(async move { forward::forward(&client, &ctx, &url, opts).await })
            .map_err(|e| format!("forward failed: {e}").into())
    }

    /// `forward(host, port)`: no TLS, no streaming either direction.
    pub fn forward_default_port(&mut self, host: &str, port: i64) -> Result<(), Box<rhai::EvalAltResult>> {
        self.forward(host, port, false, false, false)
    }

    /// `forward(host)`: plain HTTP on port 80, no streaming either direction.
    pub fn forward_host_only(&mut self, host: &str) -> Result<(), Box<rhai::EvalAltResult>> {
        self.forward(host, 80, false, false, false)
    }

    pub fn flush(&mut self) {
        let ctx = self.ctx.clone();
        self.handle.clone().block_on(async move { ctx.finish().await });
    }

    pub fn close_socket(&mut self) {
        self.ctx.close_socket(false);
    }

    pub fn close_socket_nolinger(&mut self) {
        self.ctx.close_socket(true);
    }

    pub fn store_get(&mut self, key: &str) -> Dynamic {
        self.ctx.store.get(key, None, None)
    }

    pub fn store_put(&mut self, key: &str, value: Dynamic) {
        self.ctx.store.put(key.to_string(), value, None);
    }
}

/// The object handed to `on_connected`/`on_input`/`on_output` tunnel
/// controller hooks (spec §4.1 "Controller", constructed with "the
/// connection handle (exposes `conn_id`, `peer_ip`, `peer_port`,
/// `tunnel`)"). Unlike `ScriptContext`, it only ever observes traffic — it
/// has no way to mutate the bytes being forwarded (spec invariant: "the
/// controller never mutates payload").
#[derive(Clone)]
pub struct ScriptConnection {
    pub conn_id: String,
    pub peer: SocketAddr,
    pub tunnel_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    fn test_client() -> Arc<ForwardClient> {
        Arc::new(hyper::Client::new())
    }

    #[tokio::test]
    async fn missing_processor_is_rejected_at_load() {
        let f = write_script("fn other() { }");
        let err = Handler::load(f.path(), Store::new(), test_client());
        assert!(matches!(err, Err(ConfigError::MissingSymbol { .. })));
    }

    #[tokio::test]
    async fn handler_sets_status_and_body() {
        let f = write_script(
            r#"
            fn processor(ctx) {
                ctx.set_status(201);
                ctx.set_body("created");
            }
            "#,
        );
        let handler = Handler::load(f.path(), Store::new(), test_client()).unwrap();
        let (close_tx, _rx) = tokio::sync::watch::channel(None);
        let (ctx, _chunk_tx, _header_rx) = RequestContext::new(
            http::Method::POST,
            "/x".into(),
            "/x".into(),
            http::HeaderMap::new(),
            std::collections::HashMap::new(),
            Store::new(),
            close_tx,
        );
        handler.call(ctx.clone()).await.unwrap();
        assert_eq!(ctx.status(), http::StatusCode::CREATED);
        assert_eq!(
            ctx.response_body_snapshot().unwrap(),
            Bytes::from_static(b"created")
        );
    }

    #[tokio::test]
    async fn fail_produces_http_error_outcome() {
        let f = write_script(
            r#"
            fn processor(ctx) {
                fail(404, "nope");
            }
            "#,
        );
        let handler = Handler::load(f.path(), Store::new(), test_client()).unwrap();
        let (close_tx, _rx) = tokio::sync::watch::channel(None);
        let (ctx, _chunk_tx, _header_rx) = RequestContext::new(
            http::Method::GET,
            "/x".into(),
            "/x".into(),
            http::HeaderMap::new(),
            std::collections::HashMap::new(),
            Store::new(),
            close_tx,
        );
        let outcome = handler.call(ctx).await.unwrap_err();
        match outcome {
            HandlerOutcome::Http(e) => assert_eq!(e.status, http::StatusCode::NOT_FOUND),
            HandlerOutcome::Exception(e) => panic!("expected Http outcome, got {e}"),
        }
    }

    #[tokio::test]
    async fn forward_relays_the_upstream_response() {
        use std::convert::Infallible;
        use hyper::service::{make_service_fn, service_fn};
        use hyper::{Body, Response, Server};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let make_svc = make_service_fn(|_conn| async {
            Ok::<_, Infallible>(service_fn(|_req: hyper::Request<Body>| async {
                Ok::<_, Infallible>(Response::new(Body::from("upstream-body")))
            }))
        });
        let server = Server::from_tcp(listener).unwrap().serve(make_svc);
        tokio::spawn(server);

        let f = write_script(&format!(
            r#"
            fn processor(ctx) {{
                ctx.forward("127.0.0.1", {});
            }}
            "#,
            addr.port()
        ));
        let handler = Handler::load(f.path(), Store::new(), test_client()).unwrap();
        let (close_tx, _rx) = tokio::sync::watch::channel(None);
        let (ctx, _chunk_tx, _header_rx) = RequestContext::new(
            http::Method::GET,
            "/x".into(),
            "/x".into(),
            http::HeaderMap::new(),
            std::collections::HashMap::new(),
            Store::new(),
            close_tx,
        );
        handler.call(ctx.clone()).await.unwrap();
        assert_eq!(ctx.status(), http::StatusCode::OK);
        assert_eq!(
            ctx.response_body_snapshot().unwrap(),
            Bytes::from_static(b"upstream-body")
        );
    }
}
