//! Wire vocabulary for the bridge protocol: record identities, op and type
//! codes, sequence numbers, and record bodies.

mod codec;
mod records;

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

pub use codec::{decode_base, decode_msg, encode};
pub use records::{
    BleAddr, BleAddrParseError, BleChr, BleMsg, BleRequest, BleSvc, BleUuid, ConnCancelReq,
    ConnectEvt, ConnectReq, DisconnectEvt, DiscAllChrsReq, DiscChrEvt, DiscSvcEvt,
    DiscSvcUuidReq, ErrRsp, ExchangeMtuReq, MtuChangeEvt, NotifyRxEvt, ScanCancelReq, ScanEvt,
    ScanReq, StatusRsp, SyncEvt, SyncReq, SyncRsp, TerminateReq, WriteCmdReq,
};

/// Per-request correlation number.
pub type Seq = i64;

/// Host status reported when a streamed enumeration has finished.
pub const ERR_CODE_EDONE: i32 = 14;

static NEXT_SEQ: AtomicI64 = AtomicI64::new(1);

/// Allocates a sequence number unique among outstanding requests.
///
/// Numbers are monotonically increasing and thread-safe.
#[must_use]
pub fn next_seq() -> Seq {
    NEXT_SEQ.fetch_add(1, Ordering::SeqCst)
}

/// Error returned when a wire integer names no known op or type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} code {value}")]
pub struct UnknownCode {
    kind: &'static str,
    value: i64,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Wire integer for this code.
            #[must_use]
            pub const fn code(self) -> i64 {
                match self {
                    $(Self::$variant => $value,)+
                }
            }

            /// Lower-case name used in logs and errors.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl TryFrom<i64> for $name {
            type Error = UnknownCode;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(UnknownCode { kind: $kind, value }),
                }
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value.code()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Coarse message class.
    MsgOp ("op") {
        /// Sent by the client.
        Request = 0 => "request",
        /// Acknowledges a request.
        Response = 1 => "response",
        /// Unsolicited or streamed notification.
        Event = 2 => "event",
    }
}

wire_enum! {
    /// Specific command or event kind.
    MsgType ("type") {
        /// Generic error response.
        Err = 1 => "err",
        /// Host/controller synchronisation query.
        Sync = 2 => "sync",
        /// Connection initiation.
        Connect = 3 => "connect",
        /// Connection termination.
        Terminate = 4 => "terminate",
        /// Discover every primary service.
        DiscAllSvcs = 5 => "disc_all_svcs",
        /// Discover a primary service by UUID.
        DiscSvcUuid = 6 => "disc_svc_uuid",
        /// Discover every characteristic in a handle range.
        DiscAllChrs = 7 => "disc_all_chrs",
        /// Discover characteristics by UUID.
        DiscChrUuid = 8 => "disc_chr_uuid",
        /// Acknowledged attribute write.
        Write = 9 => "write",
        /// Unacknowledged attribute write.
        WriteCmd = 10 => "write_cmd",
        /// ATT MTU exchange.
        ExchangeMtu = 11 => "exchange_mtu",
        /// Random address generation.
        GenRandAddr = 12 => "gen_rand_addr",
        /// Random address assignment.
        SetRandAddr = 13 => "set_rand_addr",
        /// Cancel a pending connection attempt.
        ConnCancel = 14 => "conn_cancel",
        /// Start scanning.
        Scan = 15 => "scan",
        /// Stop scanning.
        ScanCancel = 16 => "scan_cancel",
        /// Host synchronisation changed.
        SyncEvt = 2049 => "sync_evt",
        /// Connection attempt finished.
        ConnectEvt = 2050 => "connect_evt",
        /// Connection dropped.
        DisconnectEvt = 2051 => "disconnect_evt",
        /// One discovered service, or end of discovery.
        DiscSvcEvt = 2052 => "disc_svc_evt",
        /// One discovered characteristic, or end of discovery.
        DiscChrEvt = 2053 => "disc_chr_evt",
        /// Acknowledged write completed.
        WriteAckEvt = 2054 => "write_ack_evt",
        /// Notification or indication received.
        NotifyRxEvt = 2055 => "notify_rx_evt",
        /// ATT MTU changed.
        MtuChangeEvt = 2056 => "mtu_change_evt",
        /// Advertising report received while scanning.
        ScanEvt = 2057 => "scan_evt",
    }
}

/// Correlation identity carried by every record.
///
/// `None` in any field is a wildcard that matches every value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MsgBase {
    /// Message class.
    pub op: Option<MsgOp>,
    /// Command or event kind.
    pub ty: Option<MsgType>,
    /// Request correlation number.
    pub seq: Option<Seq>,
    /// Connection the record concerns.
    pub conn_handle: Option<u16>,
}

impl MsgBase {
    /// Identity matching only records that echo `seq`.
    #[must_use]
    pub const fn for_seq(seq: Seq) -> Self {
        Self {
            op: None,
            ty: None,
            seq: Some(seq),
            conn_handle: None,
        }
    }

    /// Identity for a standing subscription to a class of records.
    #[must_use]
    pub const fn for_class(
        op: Option<MsgOp>,
        ty: Option<MsgType>,
        conn_handle: Option<u16>,
    ) -> Self {
        Self {
            op,
            ty,
            seq: None,
            conn_handle,
        }
    }

    /// Wildcard-aware class comparison; `seq` is not considered.
    #[must_use]
    pub fn matches_class(&self, other: &Self) -> bool {
        fn field<T: PartialEq>(left: Option<T>, right: Option<T>) -> bool {
            match (left, right) {
                (Some(left), Some(right)) => left == right,
                _ => true,
            }
        }

        field(self.op, other.op)
            && field(self.ty, other.ty)
            && field(self.conn_handle, other.conn_handle)
    }
}

impl fmt::Display for MsgBase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn wild<T: fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "*".to_string(), |value| value.to_string())
        }

        write!(
            formatter,
            "op={} type={} seq={} conn_handle={}",
            wild(self.op),
            wild(self.ty),
            wild(self.seq),
            wild(self.conn_handle)
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, MsgOp::Request)]
    #[case(1, MsgOp::Response)]
    #[case(2, MsgOp::Event)]
    fn op_codes_map_to_variants(#[case] code: i64, #[case] expected: MsgOp) {
        assert_eq!(MsgOp::try_from(code), Ok(expected));
    }

    #[rstest]
    fn unknown_type_code_is_rejected() {
        let error = MsgType::try_from(999).expect_err("999 is not a type");
        assert_eq!(error.to_string(), "unknown type code 999");
    }

    #[rstest]
    fn sequence_numbers_increase() {
        let first = next_seq();
        let second = next_seq();

        assert!(second > first);
    }

    #[rstest]
    #[case(MsgBase::for_class(None, Some(MsgType::DiscSvcEvt), None), true)]
    #[case(MsgBase::for_class(Some(MsgOp::Event), None, Some(3)), true)]
    #[case(MsgBase::for_class(Some(MsgOp::Response), None, None), false)]
    #[case(MsgBase::for_class(None, None, Some(4)), false)]
    fn class_matching_treats_none_as_wildcard(#[case] candidate: MsgBase, #[case] expected: bool) {
        let record = MsgBase {
            op: Some(MsgOp::Event),
            ty: Some(MsgType::DiscSvcEvt),
            seq: Some(12),
            conn_handle: Some(3),
        };

        assert_eq!(candidate.matches_class(&record), expected);
    }

    #[rstest]
    fn identity_display_marks_wildcards() {
        let base = MsgBase::for_seq(5);

        assert_eq!(base.to_string(), "op=* type=* seq=5 conn_handle=*");
    }
}
