//! Error taxonomy surfaced by the correlation core.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::msg::{BleUuid, MsgBase, MsgOp, MsgType};

/// Which side of an exchange carried a failing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Acknowledgement of a request.
    Response,
    /// Unsolicited or streamed event.
    Event,
}

impl fmt::Display for Direction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Response => "response",
            Self::Event => "event",
        };
        formatter.write_str(label)
    }
}

/// Failures raised by the byte transport to the bridge.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Missing Content-Length header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// Invalid header format.
    #[error("invalid header format")]
    InvalidHeader,

    /// The bridge executable could not be started.
    #[error("failed to start bridge {command}: {source}")]
    Spawn {
        /// Command that was run.
        command: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The bridge link has not been started or was already stopped.
    #[error("bridge link is not running")]
    NotRunning,
}

/// Errors returned by dispatcher registration and blocking operations.
///
/// The type is cheap to clone so one failure can be handed to every waiter
/// blocked on a broken link.
#[derive(Debug, Clone, Error)]
pub enum BleError {
    /// An inbound record could not be decoded.
    #[error("malformed BLE record: {source}")]
    Decode {
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The header named an op/type pair with no known record body.
    #[error("unrecognised op+type pair: {op}, {ty}")]
    UnrecognisedPair {
        /// Op carried by the record.
        op: MsgOp,
        /// Type carried by the record.
        ty: MsgType,
    },

    /// A listener already covers part of the requested identity.
    #[error("duplicate BLE listener; old={existing} new={requested}")]
    RegistrationConflict {
        /// Identity of the registration that overlaps.
        existing: MsgBase,
        /// Identity that was rejected.
        requested: MsgBase,
    },

    /// A sequence-keyed identity also named concrete class fields.
    #[error("invalid listener identity {identity}; concrete seq with non-wild fields")]
    InvalidIdentity {
        /// Rejected identity.
        identity: MsgBase,
    },

    /// A request could not be serialised.
    #[error("failed to encode BLE request: {source}")]
    Encode {
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// Transmitting a request failed.
    #[error("transport error: {source}")]
    Transport {
        /// Underlying transport failure.
        #[source]
        source: Arc<TransportError>,
    },

    /// The link to the bridge failed or closed after requests were sent.
    #[error("BLE link failure: {reason}")]
    Link {
        /// Description of the failure.
        reason: String,
    },

    /// A correlated record carried a host-stack error status.
    #[error("BLE {direction} {ty} failed with status {status}")]
    Status {
        /// Record direction.
        direction: Direction,
        /// Command or event type.
        ty: MsgType,
        /// Host-stack status code.
        status: i32,
    },

    /// No terminal record arrived in time.
    #[error("timed out waiting for BLE {ty}")]
    Timeout {
        /// Command that timed out.
        ty: MsgType,
    },

    /// Service discovery completed without finding the requested service.
    #[error("peer doesn't support required service: {uuid} (status {status})")]
    ServiceUnsupported {
        /// Service that was searched for.
        uuid: BleUuid,
        /// Completion status reported by the host.
        status: i32,
    },

    /// The wait was cancelled through the listener's abort signal.
    #[error("BLE {ty} aborted")]
    Aborted {
        /// Command that was aborted.
        ty: MsgType,
    },

    /// The connection-result indicator was dropped before reporting.
    #[error("connection attempt abandoned before a result was reported")]
    ConnectAbandoned,
}

impl BleError {
    /// Builds a status error.
    #[must_use]
    pub fn status(direction: Direction, ty: MsgType, status: i32) -> Self {
        Self::Status {
            direction,
            ty,
            status,
        }
    }

    /// Builds a timeout error tagged with the issuing command.
    #[must_use]
    pub fn timeout(ty: MsgType) -> Self {
        Self::Timeout { ty }
    }

    /// Builds a link failure.
    #[must_use]
    pub fn link(reason: impl Into<String>) -> Self {
        Self::Link {
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(source: serde_json::Error) -> Self {
        Self::Decode {
            source: Arc::new(source),
        }
    }

    pub(crate) fn encode(source: serde_json::Error) -> Self {
        Self::Encode {
            source: Arc::new(source),
        }
    }

    /// Whether the error was produced by an elapsed response timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<TransportError> for BleError {
    fn from(source: TransportError) -> Self {
        Self::Transport {
            source: Arc::new(source),
        }
    }
}
