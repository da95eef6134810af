//! Async request/response client for the slipway daemon.
//!
//! One connection carries any number of overlapping requests. Each request
//! gets a numeric id and a slot in the pending map; a reader task routes
//! every response line to its slot. The connection is opened lazily,
//! launching the daemon through the [`DaemonSupervisor`] when the socket
//! does not answer, and reopened after it drops or a request times out.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use interprocess::local_socket::tokio::{prelude::*, RecvHalf, SendHalf, Stream};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::IpcCodec;
use super::daemon::DaemonSupervisor;
use super::endpoint::Endpoint;
use super::protocol::{peek_id, Body, Command, Handle, Health, Report, Request, Response};
use crate::config::Settings;
use crate::{AppError, Result};

type Reply = oneshot::Sender<Result<Response>>;

/// Outstanding requests of one connection, ordered by id.
#[derive(Debug, Clone, Default)]
struct Pending(Arc<Mutex<BTreeMap<u64, Reply>>>);

impl Pending {
    fn insert(&self, id: u64, reply: Reply) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, reply);
    }

    fn remove(&self, id: u64) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Slot for a response carrying `id`, or the oldest slot when the
    /// daemon did not echo one.
    fn take(&self, id: Option<u64>) -> Option<Reply> {
        let mut map = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match id {
            Some(id) => map.remove(&id),
            None => map.pop_first().map(|(_, reply)| reply),
        }
    }

    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn fail_all(&self, reason: &str) {
        let drained = std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner));
        for (_, reply) in drained {
            let _ = reply.send(Err(AppError::Transport(reason.to_owned())));
        }
    }
}

/// Live connection: write half plus the task reading responses.
struct Connection {
    writer: SendHalf,
    pending: Pending,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn start(stream: Stream) -> Self {
        let (recv, writer) = stream.split();
        let pending = Pending::default();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(
            read_responses(recv, pending.clone(), Arc::clone(&alive))
                .instrument(info_span!("ipc_reader")),
        );
        Self {
            writer,
            pending,
            alive,
            reader,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.pending)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.pending.fail_all("connection closed");
    }
}

async fn read_responses(recv: RecvHalf, pending: Pending, alive: Arc<AtomicBool>) {
    let mut frames = FramedRead::new(recv, IpcCodec::new());

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let id = peek_id(line);
                let outcome = Response::parse(line);
                match pending.take(id) {
                    Some(reply) => {
                        let _ = reply.send(outcome);
                    }
                    None => debug!(?id, "dropping daemon response with no waiting request"),
                }
            }
            Err(err) => {
                warn!(%err, "daemon connection read failed");
                break;
            }
        }
    }

    alive.store(false, Ordering::Release);
    pending.fail_all("connection closed by daemon");
    debug!("daemon connection closed");
}

/// Client for the daemon serving one context home.
#[derive(Debug)]
pub struct IpcClient {
    endpoint: Endpoint,
    daemon: Option<Arc<DaemonSupervisor>>,
    request_timeout: Duration,
    next_id: AtomicU64,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl IpcClient {
    /// Client for `endpoint` that never launches the daemon itself.
    #[must_use]
    pub fn new(endpoint: Endpoint, request_timeout: Duration) -> Self {
        Self {
            endpoint,
            daemon: None,
            request_timeout,
            next_id: AtomicU64::new(1),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    /// Launch the daemon through `daemon` when the socket does not answer.
    #[must_use]
    pub fn with_daemon(mut self, daemon: Arc<DaemonSupervisor>) -> Self {
        self.daemon = Some(daemon);
        self
    }

    /// Client for the daemon of `settings.home`.
    ///
    /// Launch-on-demand is disabled when the daemon executable cannot be
    /// located.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let client = Self::new(
            Endpoint::for_home(&settings.home),
            settings.request_timeout(),
        );
        match DaemonSupervisor::from_settings(settings) {
            Ok(daemon) => client.with_daemon(Arc::new(daemon)),
            Err(err) => {
                warn!(%err, "daemon launch on demand disabled");
                client
            }
        }
    }

    /// Daemon endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the daemon socket currently accepts connections.
    ///
    /// Never launches the daemon.
    pub async fn health_check(&self) -> bool {
        {
            let slot = self.connection.lock().await;
            if slot.as_ref().is_some_and(Connection::is_alive) {
                return true;
            }
        }
        match self.endpoint.to_name() {
            Ok(name) => Stream::connect(name).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Drop the current connection, failing its pending requests.
    pub async fn disconnect(&self) {
        self.connection.lock().await.take();
    }

    /// Stop every tunnel.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol`, or `Daemon`.
    pub async fn unplug_all(&self) -> Result<()> {
        self.perform(Command::Unplug, None).await.map(drop)
    }

    /// Start every autostart tunnel.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol`, or `Daemon`.
    pub async fn engage_all(&self) -> Result<()> {
        self.perform(Command::Engage, None).await.map(drop)
    }

    /// Make the daemon re-read the context.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol`, or `Daemon`.
    pub async fn adjust_all(&self) -> Result<()> {
        self.perform(Command::Adjust, None).await.map(drop)
    }

    /// Health of every service.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol`, or `Daemon`.
    pub async fn status_all(&self) -> Result<Vec<Health>> {
        match self.perform(Command::Status, None).await? {
            Body::Health(health) => Ok(health.into_vec()),
            _ => Ok(Vec::new()),
        }
    }

    /// Health plus tunnels of every service.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol`, or `Daemon`.
    pub async fn review_all(&self) -> Result<Vec<Report>> {
        match self.perform(Command::Review, None).await? {
            Body::Report(reports) => Ok(reports.into_vec()),
            _ => Ok(Vec::new()),
        }
    }

    /// Stop the tunnels of one service.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol`, or `Daemon`.
    pub async fn unplug_service(&self, handle: &Handle) -> Result<()> {
        self.perform(Command::Unplug, Some(handle)).await.map(drop)
    }

    /// Start the tunnels of one service.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol`, or `Daemon`.
    pub async fn engage_service(&self, handle: &Handle) -> Result<()> {
        self.perform(Command::Engage, Some(handle)).await.map(drop)
    }

    /// Make the daemon re-read one service.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol`, or `Daemon`.
    pub async fn adjust_service(&self, handle: &Handle) -> Result<()> {
        self.perform(Command::Adjust, Some(handle)).await.map(drop)
    }

    /// Health of one service.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol` (including a missing payload), or `Daemon`.
    pub async fn status_service(&self, handle: &Handle) -> Result<Health> {
        match self.perform(Command::Status, Some(handle)).await? {
            Body::Health(health) => health.into_single(),
            _ => Err(AppError::Protocol(format!("no health returned for {handle}"))),
        }
    }

    /// Health plus tunnels of one service.
    ///
    /// # Errors
    ///
    /// `Transport`, `Protocol` (including a missing payload), or `Daemon`.
    pub async fn review_service(&self, handle: &Handle) -> Result<Report> {
        match self.perform(Command::Review, Some(handle)).await? {
            Body::Report(reports) => reports.into_single(),
            _ => Err(AppError::Protocol(format!("no report returned for {handle}"))),
        }
    }

    /// Send one command and validate the answer.
    async fn perform(&self, action: Command, handle: Option<&Handle>) -> Result<Body> {
        let response = self.request(action, handle).await?;

        if let Body::Failed(message) = response.body {
            return Err(AppError::Daemon(message));
        }
        if response.action != action {
            return Err(AppError::Protocol(format!(
                "invalid response: expected action {}, got {}",
                u8::from(action),
                u8::from(response.action)
            )));
        }
        Ok(response.body)
    }

    async fn request(&self, action: Command, handle: Option<&Handle>) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("ipc_request", id, action = u8::from(action));

        async move {
            let request = Request {
                id: Some(id),
                action,
                handle: handle.cloned(),
            };
            let mut frame = BytesMut::new();
            IpcCodec::new().encode(serde_json::to_string(&request)?, &mut frame)?;

            let (reply, response) = oneshot::channel();
            let pending = {
                let mut slot = self.connection.lock().await;
                let connection = self.connected(&mut slot).await?;
                connection.pending.insert(id, reply);

                if let Err(err) = connection.writer.write_all(&frame).await {
                    connection.pending.remove(id);
                    slot.take();
                    return Err(AppError::Transport(format!(
                        "failed to write to {}: {err}",
                        self.endpoint
                    )));
                }
                connection.pending.clone()
            };

            match tokio::time::timeout(self.request_timeout, response).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(AppError::Transport(
                    "connection closed before a response arrived".into(),
                )),
                Err(_) => {
                    pending.remove(id);
                    // A late answer without an id would be taken as the
                    // reply to the next request, so the stream is abandoned.
                    let mut slot = self.connection.lock().await;
                    if slot.as_ref().is_some_and(|current| current.pending.same(&pending)) {
                        warn!("request timed out, dropping connection");
                        slot.take();
                    }
                    Err(AppError::Transport(format!(
                        "no response within {} ms",
                        self.request_timeout.as_millis()
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Current connection, reconnecting if it is absent or dead.
    async fn connected<'a>(&self, slot: &'a mut Option<Connection>) -> Result<&'a mut Connection> {
        let usable = slot.as_ref().is_some_and(Connection::is_alive);
        if !usable {
            *slot = Some(self.connect().await?);
        }
        slot.as_mut()
            .ok_or_else(|| AppError::Transport("connection unavailable".into()))
    }

    async fn connect(&self) -> Result<Connection> {
        let first = match self.open().await {
            Ok(stream) => return Ok(Connection::start(stream)),
            Err(err) => err,
        };

        let Some(daemon) = &self.daemon else {
            return Err(AppError::Transport(format!(
                "failed to connect to {}: {first}",
                self.endpoint
            )));
        };

        info!(endpoint = %self.endpoint, %first, "daemon unreachable, launching");
        daemon.launch()?;

        let policy = *daemon.policy();
        let mut last = first;
        for attempt in 0..policy.attempts {
            tokio::time::sleep(policy.delay(attempt)).await;
            match self.open().await {
                Ok(stream) => {
                    info!(endpoint = %self.endpoint, attempt, "connected to daemon");
                    return Ok(Connection::start(stream));
                }
                Err(err) => {
                    debug!(attempt, %err, "daemon not accepting connections yet");
                    last = err;
                }
            }
        }

        Err(AppError::Transport(format!(
            "daemon did not accept connections at {} after {} attempts: {last}",
            self.endpoint, policy.attempts
        )))
    }

    async fn open(&self) -> std::result::Result<Stream, String> {
        let name = self.endpoint.to_name().map_err(|err| err.to_string())?;
        Stream::connect(name).await.map_err(|err| err.to_string())
    }
}
