//! Logging setup, plus the `tracing_subscriber::Layer` that fans log
//! records out to `/ws/logs` clients.
//!
//! Grounded on `pymock/wshandler.py::LogWebSocketHandler`, which installs
//! a `logging.Handler` that pushes every record to connected websockets.
//! The Rust equivalent is a `tracing_subscriber::Layer`; the transport is
//! `tracing-subscriber`'s `env-filter` (for `--verbose`) plus a
//! `tokio::sync::broadcast` channel capped at 100 in flight, matching the
//! bounded-queue-with-drop behavior spec'd for the chunk queue elsewhere
//! in this crate.

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Bound on in-flight log lines buffered for `/ws/logs` subscribers before
/// the oldest is dropped (spec: same capacity as the request chunk queue).
pub const LOG_BROADCAST_CAPACITY: usize = 100;

/// Installs the global `tracing` subscriber: an `env-filter` driven by
/// `--verbose`/`RUST_LOG`, formatted output on stderr, plus the websocket
/// fan-out layer. Returns the layer itself so `/ws/logs` connections can
/// each call `subscribe()` on it later.
pub fn init(verbose: bool) -> WsLogLayer {
    use tracing_subscriber::prelude::*;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let (ws_layer, _rx) = WsLogLayer::new(LOG_BROADCAST_CAPACITY);
    let layer_for_registry = ws_layer.clone();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(layer_for_registry)
        .init();

    ws_layer
}

#[derive(Clone)]
pub struct WsLogLayer {
    tx: tokio::sync::broadcast::Sender<String>,
}

impl WsLogLayer {
    pub fn new(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<String>) {
        let (tx, rx) = tokio::sync::broadcast::channel(capacity);
        (WsLogLayer { tx }, rx)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

#[derive(Default)]
struct JsonVisitor {
    fields: Map<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }
}

impl<S> Layer<S> for WsLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        let mut line = Map::new();
        line.insert("level".into(), Value::String(metadata.level().to_string()));
        line.insert("target".into(), Value::String(metadata.target().to_string()));
        line.insert("fields".into(), Value::Object(visitor.fields));
        if let Ok(text) = serde_json::to_string(&Value::Object(line)) {
            // No subscribers is the common case; a send error there is
            // expected and not worth reporting.
            let _ = self.tx.send(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_receives_nothing_until_an_event_fires() {
        let (layer, mut rx) = WsLogLayer::new(4);
        let _ = layer.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
