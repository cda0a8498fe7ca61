//! Request/response correlation for a BLE host bridge.
#![deny(missing_docs)]
//!
//! A bridge process drives the radio and exchanges JSON records with its
//! client over a framed byte stream. Replies and events arrive asynchronously
//! and must be matched back to the blocked caller that issued the request. The
//! [`BleDispatcher`] routes each inbound record to a [`BleListener`] keyed by
//! sequence number or by record class, the [`protocol`] functions interpret
//! those records for each command, and [`SingleResource`] serialises access to
//! roles that only one caller may hold. [`BleXport`] ties these together
//! around a spawned bridge process.

mod dispatch;
mod errors;
pub mod msg;
pub mod protocol;
mod sres;
pub mod telemetry;
mod transport;
mod xport;

#[cfg(test)]
mod tests;

pub use dispatch::{
    AbortSignal, BleDispatcher, BleListener, ListenerEvent, ListenerGuard, RECORD_CAPACITY,
};
pub use errors::{BleError, Direction, TransportError};
pub use sres::{SingleResource, SrWait};
pub use transport::{FrameReader, FrameWriter, Transmit};
pub use xport::{BleXport, ConnectParams, ScanParams, pump};
