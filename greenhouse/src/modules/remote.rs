/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Remote status link to a ground station over HTTP.
//!
//! Every request is a JSON `POST` to `<root_url>/<device_id>/<command>`:
//!
//! | Command | Sent from | Body |
//! |---|---|---|
//! | `connect` | `setup` | status snapshot |
//! | `update` | `update` | status snapshot; the reply maps command names to payloads |
//! | `disconnect` | `destroy` | status snapshot |
//! | `telemetry` | bus delivery | event fields plus `origin` and `time` |
//! | `media` | bus delivery | `name`, latin-1 `data`, `time`, `origin` |
//!
//! Commands in an `update` reply go through [`Board::dispatch`] in name
//! order.  Bus deliveries are handed to a forwarder task through a bounded
//! channel, so the sink hooks never wait on the network.
//!
//! [`Board::dispatch`]: crate::board::Board::dispatch

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::config::RemoteStatusConfig;
use crate::module::{Context, MediaSink, Module, StatusMap, TelemetrySink};
use crate::telemetry::{MediaEvent, TelemetryEvent};

/// Bus events waiting for the forwarder; further events are dropped.
const FORWARD_QUEUE: usize = 256;

const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Host name used as device id when none is configured.
fn host_name() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "greenhouse".to_owned())
}

/// Commands carried by an `update` reply, as `(name, payload)` pairs.
///
/// An empty reply carries none.  String payloads are taken verbatim, `null`
/// becomes an empty payload, anything else its JSON text.
pub fn parse_commands(reply: &str) -> Result<Vec<(String, String)>, serde_json::Error> {
    if reply.trim().is_empty() {
        return Ok(Vec::new());
    }
    let commands: Map<String, JsonValue> = serde_json::from_str(reply)?;
    Ok(commands
        .into_iter()
        .map(|(name, payload)| {
            let payload = match payload {
                JsonValue::String(s) => s,
                JsonValue::Null => String::new(),
                other => other.to_string(),
            };
            (name, payload)
        })
        .collect())
}

/// Latin-1 view of arbitrary bytes: every byte maps to one char.
fn latin1(data: &[u8]) -> String {
    data.iter().copied().map(char::from).collect()
}

// ── HTTP endpoint ─────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
}

impl Endpoint {
    async fn post(&self, command: &str, body: &JsonValue, deadline: Duration) -> Result<Response> {
        let url = format!("{}/{}", self.base_url, command);
        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(deadline)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        response
            .error_for_status()
            .with_context(|| format!("POST {url} rejected"))
    }
}

#[derive(Debug, Default)]
struct ForwardStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

enum Forward {
    Telemetry(JsonValue),
    Media(JsonValue),
}

// ── Module ────────────────────────────────────────────────────────────────────

pub struct RemoteStatusModule {
    endpoint: Endpoint,
    device_id: String,
    timeout: Duration,
    stats: Arc<ForwardStats>,
    forward_tx: mpsc::Sender<Forward>,
    /// Held until `setup` hands it to the forwarder.
    forward_rx: Mutex<Option<mpsc::Receiver<Forward>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteStatusModule {
    pub const NAME: &'static str = "remote";

    pub fn new(config: &RemoteStatusConfig) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(config.timeout)
            .with_context(|| format!("invalid remote timeout {}", config.timeout))?;
        let client = Client::builder()
            .timeout(timeout * 2)
            .build()
            .context("cannot build HTTP client")?;

        let device_id = config.device_id.clone().unwrap_or_else(host_name);
        let root = config.root_url.trim_end_matches('/');
        let root = if root.contains("://") {
            root.to_owned()
        } else {
            format!("http://{root}")
        };
        let (forward_tx, forward_rx) = mpsc::channel(FORWARD_QUEUE);

        Ok(Self {
            endpoint: Endpoint {
                client,
                base_url: format!("{root}/{device_id}"),
            },
            device_id,
            timeout,
            stats: Arc::new(ForwardStats::default()),
            forward_tx,
            forward_rx: Mutex::new(Some(forward_rx)),
            worker: Mutex::new(None),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn forward(&self, item: Forward) -> Result<()> {
        self.forward_tx.try_send(item).map_err(|e| {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => anyhow!("remote forward queue full"),
                mpsc::error::TrySendError::Closed(_) => anyhow!("remote forwarder stopped"),
            }
        })
    }
}

async fn run_forwarder(
    endpoint: Endpoint,
    mut rx: mpsc::Receiver<Forward>,
    stats: Arc<ForwardStats>,
    deadline: Duration,
    shutdown: CancellationToken,
) {
    debug!("Remote forwarder started");
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let result = match &item {
            Forward::Telemetry(body) => endpoint.post("telemetry", body, deadline).await,
            Forward::Media(body) => endpoint.post("media", body, deadline * 2).await,
        };
        match result {
            Ok(_) => {
                stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Remote forward failed: {:#}", e);
            }
        }
    }
    debug!("Remote forwarder stopped");
}

#[async_trait]
impl Module for RemoteStatusModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn setup(&self, ctx: &Context) -> Result<()> {
        self.endpoint
            .post("connect", &ctx.board().status_snapshot(), self.timeout)
            .await?;
        info!("Connected to {} as {}", self.endpoint.base_url, self.device_id);

        if let Some(rx) = lock(&self.forward_rx).take() {
            let handle = tokio::spawn(run_forwarder(
                self.endpoint.clone(),
                rx,
                Arc::clone(&self.stats),
                self.timeout,
                ctx.board().shutdown_token(),
            ));
            *lock(&self.worker) = Some(handle);
        }
        Ok(())
    }

    async fn update(&self, _t: f64, ctx: &Context) -> Result<()> {
        let status = ctx.board().status_snapshot();
        debug!("Status: {}", status);
        let reply = self
            .endpoint
            .post("update", &status, self.timeout)
            .await?
            .text()
            .await
            .context("cannot read update reply")?;

        let commands = match parse_commands(&reply) {
            Ok(commands) => commands,
            Err(e) => {
                error!("Error parsing commands: {} ({:?})", e, reply);
                return Ok(());
            }
        };
        if !commands.is_empty() {
            let names: Vec<_> = commands.iter().map(|(name, _)| name.as_str()).collect();
            info!("Received commands: {:?}", names);
        }
        for (name, payload) in commands {
            ctx.board().dispatch(&name, &payload).await;
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        // No context at shutdown, so only this module's own status goes out.
        let body = json!({ "device_id": self.device_id, "modules": { (Self::NAME): self.status() } });
        let result = self.endpoint.post("disconnect", &body, self.timeout).await;

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if timeout(WORKER_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("Remote forwarder did not stop in time");
            }
        }
        result.map(|_| ())
    }

    fn status(&self) -> StatusMap {
        let mut map = StatusMap::new();
        map.insert("root_url".into(), json!(self.endpoint.base_url));
        map.insert("device_id".into(), json!(self.device_id));
        map.insert("forwarded".into(), json!(self.stats.forwarded.load(Ordering::Relaxed)));
        map.insert("dropped".into(), json!(self.stats.dropped.load(Ordering::Relaxed)));
        map.insert("failed".into(), json!(self.stats.failed.load(Ordering::Relaxed)));
        map
    }

    fn as_telemetry_sink(&self) -> Option<&dyn TelemetrySink> {
        Some(self)
    }

    fn as_media_sink(&self) -> Option<&dyn MediaSink> {
        Some(self)
    }
}

impl TelemetrySink for RemoteStatusModule {
    fn receive_telemetry(&self, event: &TelemetryEvent) -> Result<()> {
        let mut body = Map::new();
        for (field, value) in &event.fields {
            body.insert(field.clone(), serde_json::to_value(value)?);
        }
        body.insert("origin".into(), json!(event.origin.name()));
        body.insert("time".into(), json!(event.time));
        self.forward(Forward::Telemetry(JsonValue::Object(body)))
    }
}

impl MediaSink for RemoteStatusModule {
    fn receive_media(&self, event: &MediaEvent) -> Result<()> {
        let body = json!({
            "name": event.name,
            "data": latin1(&event.data),
            "time": clock::now_or_zero(),
            "origin": event.origin.name(),
        });
        self.forward(Forward::Media(body))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use axum::extract::{Path as UrlPath, State};
    use axum::routing::post;
    use axum::{Json, Router};

    use crate::board::{Board, GitIdentity};
    use crate::config::BoardSettings;

    /// Ground station stand-in recording every request.
    #[derive(Clone, Default)]
    struct Ground {
        calls: Arc<Mutex<Vec<(String, String, JsonValue)>>>,
        replies: Arc<Mutex<VecDeque<String>>>,
    }

    impl Ground {
        fn calls(&self) -> Vec<(String, String, JsonValue)> {
            self.calls.lock().unwrap().clone()
        }

        fn commands(&self) -> Vec<String> {
            self.calls().into_iter().map(|(_, c, _)| c).collect()
        }

        async fn wait_for(&self, command: &str) -> JsonValue {
            for _ in 0..100 {
                if let Some((_, _, body)) = self.calls().into_iter().find(|(_, c, _)| c == command) {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("no {command} request, got {:?}", self.commands());
        }
    }

    async fn record(
        State(ground): State<Ground>,
        UrlPath((device, command)): UrlPath<(String, String)>,
        Json(body): Json<JsonValue>,
    ) -> String {
        ground.calls.lock().unwrap().push((device, command.clone(), body));
        if command == "update" {
            ground.replies.lock().unwrap().pop_front().unwrap_or_default()
        } else {
            String::new()
        }
    }

    async fn serve(ground: Ground) -> String {
        let app = Router::new()
            .route("/{device}/{command}", post(record))
            .with_state(ground);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr.to_string()
    }

    fn config(root_url: String) -> RemoteStatusConfig {
        RemoteStatusConfig {
            update_frequency: 1.0,
            root_url,
            device_id: Some("gh-test".into()),
            timeout: 2.0,
        }
    }

    fn board(dir: &std::path::Path, remote: Arc<RemoteStatusModule>) -> (Board, Context) {
        let settings = BoardSettings {
            data_location: dir.join("data"),
            ..BoardSettings::default()
        };
        let board = Board::builder(settings)
            .register(remote, 1.0)
            .git_identity(GitIdentity::unknown())
            .build()
            .unwrap();
        let ctx = Context::new(board.clone(), board.slots()[0].origin().clone());
        (board, ctx)
    }

    // ── reply parsing ─────────────────────────────────────────────────────────

    #[test]
    fn reply_payloads_are_flattened_to_text() {
        let commands = parse_commands(r#"{"quit": 3600, "camera": "plant", "abort_quit": null}"#).unwrap();
        assert_eq!(
            commands,
            vec![
                ("abort_quit".to_owned(), String::new()),
                ("camera".to_owned(), "plant".to_owned()),
                ("quit".to_owned(), "3600".to_owned()),
            ]
        );
        assert!(parse_commands("").unwrap().is_empty());
        assert!(parse_commands("[1, 2]").is_err());
    }

    #[test]
    fn media_bytes_survive_latin1() {
        let data = [0x00, b'a', 0xff];
        let text = latin1(&data);
        let back: Vec<u8> = text.chars().map(|c| c as u8).collect();
        assert_eq!(back, data);
    }

    // ── link ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn lifecycle_pushes_status_and_routes_commands() {
        let dir = tempfile::tempdir().unwrap();
        let ground = Ground::default();
        ground
            .replies
            .lock()
            .unwrap()
            .push_back(r#"{"quit": 3600}"#.into());
        let url = serve(ground.clone()).await;
        let remote = Arc::new(RemoteStatusModule::new(&config(url)).unwrap());
        let (board, ctx) = board(dir.path(), Arc::clone(&remote));

        remote.setup(&ctx).await.unwrap();
        let connect = ground.wait_for("connect").await;
        assert!(connect["modules"]["remote"].is_object());
        assert_eq!(ground.calls()[0].0, "gh-test");

        remote.update(10.0, &ctx).await.unwrap();
        assert!(board.quit_time().is_some());

        board.shutdown();
        remote.destroy().await.unwrap();
        assert_eq!(ground.commands(), ["connect", "update", "disconnect"]);
    }

    #[tokio::test]
    async fn bus_events_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let ground = Ground::default();
        let url = serve(ground.clone()).await;
        let remote = Arc::new(RemoteStatusModule::new(&config(url)).unwrap());
        let (board, ctx) = board(dir.path(), Arc::clone(&remote));
        remote.setup(&ctx).await.unwrap();

        let event = TelemetryEvent::new(board.origin().clone(), 5.0).with("x", 1.5);
        assert_eq!(board.publish_telemetry(&event), 1);
        let media = MediaEvent::new(board.origin().clone(), "a.bin", vec![0xff, b'a']);
        assert_eq!(board.publish_media(&media), 1);

        let telemetry = ground.wait_for("telemetry").await;
        assert_eq!(telemetry, json!({ "x": 1.5, "origin": "main", "time": 5.0 }));
        let media = ground.wait_for("media").await;
        assert_eq!(media["name"], "a.bin");
        assert_eq!(media["data"], "\u{ff}a");
        assert_eq!(media["origin"], "main");

        for _ in 0..50 {
            if remote.status()["forwarded"] == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remote.status()["forwarded"], 2);

        board.shutdown();
        remote.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn garbled_reply_is_logged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ground = Ground::default();
        ground.replies.lock().unwrap().push_back("<html>".into());
        let url = serve(ground.clone()).await;
        let remote = Arc::new(RemoteStatusModule::new(&config(url)).unwrap());
        let (board, ctx) = board(dir.path(), Arc::clone(&remote));

        remote.update(10.0, &ctx).await.unwrap();
        assert_eq!(board.quit_time(), None);
    }

    #[tokio::test]
    async fn unreachable_ground_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        // Bind and drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let remote = Arc::new(RemoteStatusModule::new(&config(format!("127.0.0.1:{port}"))).unwrap());
        let (_board, ctx) = board(dir.path(), Arc::clone(&remote));

        assert!(remote.setup(&ctx).await.is_err());
    }
}
