//! Wire types of the slipway daemon protocol.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"id": 7, "action": 5}
//! {"id": 8, "action": 2, "handle": {"pier": "owner/host", "service": "web"}}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"id": 7, "action": 5, "report": [{"pier": "owner/host", "service": "web", "state": 3, "message": "", "tunnels": [{"pier": "peer/box", "pid": 4242}]}]}
//! {"action": 2, "error": "unknown service"}
//! ```
//!
//! `id` is optional in responses; the daemon answers in request order, so a
//! response without one belongs to the oldest outstanding request.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Daemon command, encoded as an integer `action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Command {
    /// Stop tunnels.
    Unplug = 1,
    /// Start tunnels.
    Engage = 2,
    /// Re-read the context and reconcile tunnels with it.
    Adjust = 3,
    /// Query service health.
    Status = 4,
    /// Query service health plus live tunnels.
    Review = 5,
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Unplug),
            2 => Ok(Self::Engage),
            3 => Ok(Self::Adjust),
            4 => Ok(Self::Status),
            5 => Ok(Self::Review),
            other => Err(AppError::Protocol(format!("invalid command: {other}"))),
        }
    }
}

/// Tunnel state of one service as reported by the daemon.
///
/// The boundary between `Lonely` and `Burden` is the daemon's call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ServiceState {
    /// Not running.
    #[default]
    Asleep = 0,
    /// Failed.
    Broken = 1,
    /// Running, no peer connected yet.
    Lonely = 2,
    /// Actively relaying.
    Burden = 3,
}

impl From<ServiceState> for u8 {
    fn from(state: ServiceState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for ServiceState {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Asleep),
            1 => Ok(Self::Broken),
            2 => Ok(Self::Lonely),
            3 => Ok(Self::Burden),
            other => Err(AppError::Protocol(format!("invalid service state: {other}"))),
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Asleep => "asleep",
            Self::Broken => "broken",
            Self::Lonely => "lonely",
            Self::Burden => "burden",
        };
        f.write_str(label)
    }
}

/// Addresses one service of one pier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    /// Owning pier id.
    pub pier: String,
    /// Service name.
    pub service: String,
}

impl Handle {
    /// Build a handle.
    #[must_use]
    pub fn new(pier: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            pier: pier.into(),
            service: service.into(),
        }
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.pier, self.service)
    }
}

/// Health of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Owning pier id.
    pub pier: String,
    /// Service name.
    pub service: String,
    /// Tunnel state.
    pub state: ServiceState,
    /// Daemon-provided detail, usually the last error.
    #[serde(default)]
    pub message: String,
}

impl Health {
    /// Handle of the service this entry describes.
    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle::new(self.pier.clone(), self.service.clone())
    }
}

/// One live relayed connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    /// Peer pier id.
    pub pier: String,
    /// Relay process id.
    pub pid: u32,
}

/// Health plus live tunnels; tunnels are present only while relaying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Health part.
    #[serde(flatten)]
    pub health: Health,
    /// Live tunnels.
    #[serde(default)]
    pub tunnels: Vec<Tunnel>,
}

/// A payload that is either one object or an array of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Single object, the answer to a request with a handle.
    One(T),
    /// Array, the answer to a request without a handle.
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Flatten into a list.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }

    /// Exactly one item.
    ///
    /// # Errors
    ///
    /// `AppError::Protocol` if the payload holds zero or several items.
    pub fn into_single(self) -> Result<T> {
        match self {
            Self::One(item) => Ok(item),
            Self::Many(items) => {
                let count = items.len();
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(item), None) => Ok(item),
                    _ => Err(AppError::Protocol(format!(
                        "expected one entry, got {count}"
                    ))),
                }
            }
        }
    }
}

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id echoed by the daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Command.
    pub action: Command,
    /// Target service; absent means all services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<Handle>,
}

/// Validated response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Plain acknowledgement.
    Ack,
    /// The daemon reported an error.
    Failed(String),
    /// Answer to `Status`.
    Health(OneOrMany<Health>),
    /// Answer to `Review`.
    Report(OneOrMany<Report>),
}

/// Validated inbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Echoed correlation id, if the daemon supports it.
    pub id: Option<u64>,
    /// Command being answered.
    pub action: Command,
    /// Payload.
    pub body: Body,
}

/// Raw response envelope as it appears on the wire.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<u64>,
    action: u8,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    health: Option<OneOrMany<Health>>,
    #[serde(default)]
    report: Option<OneOrMany<Report>>,
}

impl Response {
    /// Parse and validate one response line.
    ///
    /// # Errors
    ///
    /// `AppError::Protocol` for malformed JSON, schema mismatches, or an
    /// unknown action.
    pub fn parse(line: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(line)
            .map_err(|err| AppError::Protocol(format!("invalid json received: {err}")))?;
        let action = Command::try_from(envelope.action)?;

        let body = match (envelope.error, envelope.health, envelope.report) {
            (Some(error), _, _) if !error.is_empty() => Body::Failed(error),
            (_, Some(health), _) if action == Command::Status => Body::Health(health),
            (_, _, Some(report)) if action == Command::Review => Body::Report(report),
            _ => Body::Ack,
        };

        Ok(Self {
            id: envelope.id,
            action,
            body,
        })
    }
}

/// Best-effort extraction of the correlation id from a line that may not
/// pass full validation, so the failure reaches the right caller.
#[must_use]
pub fn peek_id(line: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}
