use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;

use crate::identity::IdentityStore;

pub const EVENT_SOURCE: &str = "openprose-mcp";

/// Usage event envelope, serialized as the POST body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub event: String,
    pub properties: Map<String, Value>,
}

/// Destination for usage events.
///
/// `dispatch` hands the event off and returns immediately. Implementations
/// must not block the caller and must swallow delivery failures.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait TelemetrySink: Send + Sync {
    fn dispatch(&self, event: TelemetryEvent);

    /// Wait up to `timeout` for deliveries still in flight. Only short-lived
    /// callers (one-shot CLI commands) need this; the tool path never awaits it.
    fn flush<'a>(&'a self, _timeout: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(std::future::ready(()))
    }
}

/// POSTs events to the analytics endpoint from background tasks.
pub struct HttpSink {
    http: reqwest::Client,
    endpoint: String,
    in_flight: Mutex<JoinSet<()>>,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }
}

impl TelemetrySink for HttpSink {
    fn dispatch(&self, event: TelemetryEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(event = %event.event, "No async runtime, telemetry dropped");
            return;
        };
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return;
        };

        // Reap finished deliveries so a long-running server does not accumulate them.
        while in_flight.try_join_next().is_some() {}

        let request = self.http.post(&self.endpoint).json(&event);
        let name = event.event;
        in_flight.spawn_on(
            async move {
                match request.send().await {
                    Ok(resp) => {
                        tracing::debug!(event = %name, status = %resp.status(), "Telemetry sent")
                    }
                    Err(e) => tracing::debug!(event = %name, error = %e, "Telemetry dropped"),
                }
            },
            &runtime,
        );
    }

    fn flush<'a>(&'a self, timeout: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut pending = match self.in_flight.lock() {
                Ok(mut in_flight) => std::mem::take(&mut *in_flight),
                Err(_) => return,
            };
            let drained = tokio::time::timeout(timeout, async {
                while pending.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::debug!(remaining = pending.len(), "Telemetry flush timed out");
            }
        })
    }
}

/// Keeps every dispatched event in memory. For tests.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for RecordingSink {
    fn dispatch(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Best-effort usage reporting gated on the install's telemetry flag.
pub struct TelemetryEmitter {
    store: Arc<IdentityStore>,
    sink: Arc<dyn TelemetrySink>,
}

impl TelemetryEmitter {
    pub fn new(store: Arc<IdentityStore>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self { store, sink }
    }

    /// Record `event` with extra `properties`. No-op when telemetry is disabled
    /// or the identity state is degraded.
    pub async fn emit(&self, event: &str, properties: Map<String, Value>) {
        let state = self.store.load().await.into_state();
        if !state.telemetry.is_enabled() {
            tracing::debug!(event, "Telemetry disabled, event skipped");
            return;
        }

        let mut envelope = Map::new();
        envelope.insert("user_id".into(), Value::String(state.user_id));
        envelope.insert("session_id".into(), Value::String(state.session_id));
        envelope.insert("source".into(), Value::String(EVENT_SOURCE.into()));
        envelope.insert(
            "plugin_version".into(),
            Value::String(env!("CARGO_PKG_VERSION").into()),
        );
        envelope.extend(properties);

        self.sink.dispatch(TelemetryEvent {
            event: event.into(),
            properties: envelope,
        });
    }

    /// Wait up to `timeout` for events still being delivered.
    pub async fn flush(&self, timeout: Duration) {
        self.sink.flush(timeout).await;
    }
}
