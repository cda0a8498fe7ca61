//! Request and record bodies exchanged with the bridge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{MsgOp, MsgType, Seq};

/// A request the client can transmit.
pub trait BleRequest: Serialize {
    /// Type code written into the request header.
    const TYPE: MsgType;

    /// Correlation number the bridge echoes in its replies.
    fn seq(&self) -> Seq;
}

/// Attribute UUID, either the 16-bit SIG-assigned form or a full 128-bit
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BleUuid {
    /// 16-bit assigned number.
    Uuid16(u16),
    /// 128-bit UUID in canonical textual form.
    Uuid128(String),
}

impl fmt::Display for BleUuid {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid16(value) => write!(formatter, "0x{value:04x}"),
            Self::Uuid128(value) => formatter.write_str(value),
        }
    }
}

/// Six-octet device address written as `xx:xx:xx:xx:xx:xx`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BleAddr([u8; 6]);

impl BleAddr {
    /// Builds an address from its octets in display order.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Octets in display order.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

/// Errors raised while parsing a [`BleAddr`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid BLE address '{0}'")]
pub struct BleAddrParseError(String);

impl FromStr for BleAddr {
    type Err = BleAddrParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || BleAddrParseError(input.to_string());
        let mut octets = [0_u8; 6];
        let mut parts = input.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for BleAddr {
    type Error = BleAddrParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BleAddr> for String {
    fn from(value: BleAddr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BleAddr {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, f] = self.0;
        write!(formatter, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{f:02x}")
    }
}

/// A discovered primary service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleSvc {
    /// First attribute handle in the service.
    pub start_handle: u16,
    /// Last attribute handle in the service.
    pub end_handle: u16,
    /// Service UUID.
    pub uuid: BleUuid,
}

/// A discovered characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleChr {
    /// Handle of the characteristic declaration.
    pub def_handle: u16,
    /// Handle of the characteristic value.
    pub val_handle: u16,
    /// Property bit field.
    pub properties: u8,
    /// Characteristic UUID.
    pub uuid: BleUuid,
}

macro_rules! request {
    (
        $(#[$meta:meta])*
        $name:ident => $ty:ident { $($(#[$fmeta:meta])* $field:ident: $fty:ty,)* }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct $name {
            /// Correlation number.
            pub seq: Seq,
            $($(#[$fmeta])* pub $field: $fty,)*
        }

        impl BleRequest for $name {
            const TYPE: MsgType = MsgType::$ty;

            fn seq(&self) -> Seq {
                self.seq
            }
        }
    };
}

request! {
    /// Asks whether the host and controller are synchronised.
    SyncReq => Sync {}
}

request! {
    /// Initiates a connection to a peer.
    ConnectReq => Connect {
        /// Own address type.
        own_addr_type: u8,
        /// Peer address type.
        peer_addr_type: u8,
        /// Peer address.
        peer_addr: BleAddr,
        /// Milliseconds the controller keeps trying.
        duration_ms: u32,
    }
}

request! {
    /// Terminates an established connection.
    TerminateReq => Terminate {
        /// Connection to drop.
        conn_handle: u16,
        /// HCI reason code sent to the peer.
        hci_reason: u8,
    }
}

request! {
    /// Cancels a pending connection attempt.
    ConnCancelReq => ConnCancel {}
}

request! {
    /// Discovers one primary service by UUID.
    DiscSvcUuidReq => DiscSvcUuid {
        /// Connection to query.
        conn_handle: u16,
        /// Service to look for.
        uuid: BleUuid,
    }
}

request! {
    /// Discovers every characteristic in a handle range.
    DiscAllChrsReq => DiscAllChrs {
        /// Connection to query.
        conn_handle: u16,
        /// First handle of the range.
        start_handle: u16,
        /// Last handle of the range.
        end_handle: u16,
    }
}

request! {
    /// Writes an attribute without requesting a response.
    WriteCmdReq => WriteCmd {
        /// Connection to write on.
        conn_handle: u16,
        /// Attribute to write.
        attr_handle: u16,
        /// Value bytes.
        data: Vec<u8>,
    }
}

request! {
    /// Starts an ATT MTU exchange.
    ExchangeMtuReq => ExchangeMtu {
        /// Connection to negotiate on.
        conn_handle: u16,
    }
}

request! {
    /// Starts a discovery scan.
    ScanReq => Scan {
        /// Own address type.
        own_addr_type: u8,
        /// Scan duration in milliseconds; non-positive scans forever.
        duration_ms: i32,
        /// Scan interval in 0.625 ms units.
        itvl: u16,
        /// Scan window in 0.625 ms units.
        window: u16,
        /// Advertising filter policy.
        filter_policy: u8,
        /// Limited discovery only.
        limited: bool,
        /// Passive scanning.
        passive: bool,
        /// Drop duplicate reports in the controller.
        filter_duplicates: bool,
    }
}

request! {
    /// Stops an active scan.
    ScanCancelReq => ScanCancel {}
}

/// Acknowledgement body carrying only a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StatusRsp {
    /// Host status; zero on success.
    pub status: i32,
}

/// Generic error response emitted for unparseable requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrRsp {
    /// Host status.
    pub status: i32,
    /// Bridge-supplied description.
    #[serde(default)]
    pub msg: String,
}

/// Reply to [`SyncReq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SyncRsp {
    /// Whether the host is synchronised.
    pub synced: bool,
}

/// Host synchronisation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SyncEvt {
    /// Whether the host is synchronised.
    pub synced: bool,
}

/// A connection attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConnectEvt {
    /// Host status; zero when the link is up.
    pub status: i32,
    /// Handle of the new connection.
    #[serde(default)]
    pub conn_handle: u16,
}

/// A connection dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DisconnectEvt {
    /// Host reason code.
    pub reason: i32,
    /// Handle of the dropped connection.
    pub conn_handle: u16,
}

/// One step of service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscSvcEvt {
    /// Zero for a discovered service, [`super::ERR_CODE_EDONE`] at the end.
    pub status: i32,
    /// The discovered service, when `status` is zero.
    #[serde(rename = "service", default)]
    pub svc: Option<BleSvc>,
}

/// One step of characteristic discovery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscChrEvt {
    /// Zero for a discovered characteristic, [`super::ERR_CODE_EDONE`] at the end.
    pub status: i32,
    /// The discovered characteristic, when `status` is zero.
    #[serde(rename = "characteristic", default)]
    pub chr: Option<BleChr>,
}

/// A notification or indication arrived.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotifyRxEvt {
    /// Connection it arrived on.
    pub conn_handle: u16,
    /// Attribute that changed.
    pub attr_handle: u16,
    /// Whether the peer requested confirmation.
    #[serde(default)]
    pub indication: bool,
    /// Attribute value.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// The ATT MTU changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MtuChangeEvt {
    /// Connection the MTU applies to.
    #[serde(default)]
    pub conn_handle: u16,
    /// Host status; zero on success.
    pub status: i32,
    /// Negotiated MTU.
    #[serde(default)]
    pub mtu: u16,
}

/// An advertising report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScanEvt {
    /// Advertising PDU type.
    #[serde(default)]
    pub event_type: u8,
    /// Advertiser address type.
    #[serde(default)]
    pub addr_type: u8,
    /// Advertiser address.
    pub addr: BleAddr,
    /// Received signal strength.
    #[serde(default)]
    pub rssi: i8,
    /// Advertising payload.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Every record the bridge can send, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleMsg {
    /// Generic error response.
    ErrRsp(ErrRsp),
    /// Reply to a sync query.
    SyncRsp(SyncRsp),
    /// Acknowledges a connect request.
    ConnectRsp(StatusRsp),
    /// Acknowledges a terminate request.
    TerminateRsp(StatusRsp),
    /// Acknowledges a connection cancel.
    ConnCancelRsp(StatusRsp),
    /// Acknowledges service discovery by UUID.
    DiscSvcUuidRsp(StatusRsp),
    /// Acknowledges characteristic discovery.
    DiscAllChrsRsp(StatusRsp),
    /// Acknowledges characteristic discovery by UUID.
    DiscChrUuidRsp(StatusRsp),
    /// Acknowledges an unacknowledged write.
    WriteCmdRsp(StatusRsp),
    /// Acknowledges an MTU exchange.
    ExchangeMtuRsp(StatusRsp),
    /// Acknowledges a scan request.
    ScanRsp(StatusRsp),
    /// Acknowledges a scan cancel.
    ScanCancelRsp(StatusRsp),
    /// Host synchronisation changed.
    SyncEvt(SyncEvt),
    /// A connection attempt finished.
    ConnectEvt(ConnectEvt),
    /// A connection dropped.
    DisconnectEvt(DisconnectEvt),
    /// Service discovery progress.
    DiscSvcEvt(DiscSvcEvt),
    /// Characteristic discovery progress.
    DiscChrEvt(DiscChrEvt),
    /// Notification received.
    NotifyRxEvt(NotifyRxEvt),
    /// MTU changed.
    MtuChangeEvt(MtuChangeEvt),
    /// Advertising report.
    ScanEvt(ScanEvt),
}

impl BleMsg {
    /// Type code of the record.
    #[must_use]
    pub const fn msg_type(&self) -> MsgType {
        match self {
            Self::ErrRsp(_) => MsgType::Err,
            Self::SyncRsp(_) => MsgType::Sync,
            Self::ConnectRsp(_) => MsgType::Connect,
            Self::TerminateRsp(_) => MsgType::Terminate,
            Self::ConnCancelRsp(_) => MsgType::ConnCancel,
            Self::DiscSvcUuidRsp(_) => MsgType::DiscSvcUuid,
            Self::DiscAllChrsRsp(_) => MsgType::DiscAllChrs,
            Self::DiscChrUuidRsp(_) => MsgType::DiscChrUuid,
            Self::WriteCmdRsp(_) => MsgType::WriteCmd,
            Self::ExchangeMtuRsp(_) => MsgType::ExchangeMtu,
            Self::ScanRsp(_) => MsgType::Scan,
            Self::ScanCancelRsp(_) => MsgType::ScanCancel,
            Self::SyncEvt(_) => MsgType::SyncEvt,
            Self::ConnectEvt(_) => MsgType::ConnectEvt,
            Self::DisconnectEvt(_) => MsgType::DisconnectEvt,
            Self::DiscSvcEvt(_) => MsgType::DiscSvcEvt,
            Self::DiscChrEvt(_) => MsgType::DiscChrEvt,
            Self::NotifyRxEvt(_) => MsgType::NotifyRxEvt,
            Self::MtuChangeEvt(_) => MsgType::MtuChangeEvt,
            Self::ScanEvt(_) => MsgType::ScanEvt,
        }
    }

    /// Op code of the record.
    #[must_use]
    pub const fn op(&self) -> MsgOp {
        match self {
            Self::SyncEvt(_)
            | Self::ConnectEvt(_)
            | Self::DisconnectEvt(_)
            | Self::DiscSvcEvt(_)
            | Self::DiscChrEvt(_)
            | Self::NotifyRxEvt(_)
            | Self::MtuChangeEvt(_)
            | Self::ScanEvt(_) => MsgOp::Event,
            _ => MsgOp::Response,
        }
    }

    /// Status carried by this record when it acknowledges a `ty` request.
    #[must_use]
    pub fn ack_status(&self, ty: MsgType) -> Option<i32> {
        match self {
            Self::ConnectRsp(rsp)
            | Self::TerminateRsp(rsp)
            | Self::ConnCancelRsp(rsp)
            | Self::DiscSvcUuidRsp(rsp)
            | Self::DiscAllChrsRsp(rsp)
            | Self::DiscChrUuidRsp(rsp)
            | Self::WriteCmdRsp(rsp)
            | Self::ExchangeMtuRsp(rsp)
            | Self::ScanRsp(rsp)
            | Self::ScanCancelRsp(rsp)
                if self.msg_type() == ty =>
            {
                Some(rsp.status)
            }
            _ => None,
        }
    }
}
