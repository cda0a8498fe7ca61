//! JSON encoding of requests and two-stage decoding of inbound records.

use serde::{Deserialize, Serialize};

use super::records::{BleMsg, BleRequest};
use super::{MsgBase, MsgOp, MsgType, Seq};
use crate::errors::BleError;

/// Decodes a record body once its header has been identified.
type Decoder = fn(&[u8]) -> serde_json::Result<BleMsg>;

#[derive(Debug, Deserialize)]
struct Header {
    op: MsgOp,
    #[serde(rename = "type")]
    ty: MsgType,
    #[serde(default)]
    seq: Option<Seq>,
    #[serde(default)]
    conn_handle: Option<u16>,
}

impl Header {
    fn into_base(self) -> MsgBase {
        MsgBase {
            op: Some(self.op),
            ty: Some(self.ty),
            seq: self.seq,
            conn_handle: self.conn_handle,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, R> {
    op: MsgOp,
    #[serde(rename = "type")]
    ty: MsgType,
    #[serde(flatten)]
    body: &'a R,
}

/// Serialises a request together with its `op`/`type` header.
///
/// # Errors
///
/// Returns [`BleError::Encode`] if serialisation fails.
pub fn encode<R: BleRequest>(request: &R) -> Result<Vec<u8>, BleError> {
    let envelope = Envelope {
        op: MsgOp::Request,
        ty: R::TYPE,
        body: request,
    };
    serde_json::to_vec(&envelope).map_err(BleError::encode)
}

/// Decodes only the identity header of a record.
///
/// # Errors
///
/// Returns [`BleError::Decode`] when the header is malformed or names an
/// unknown op or type code.
pub fn decode_base(data: &[u8]) -> Result<MsgBase, BleError> {
    decode_header(data).map(Header::into_base)
}

/// Decodes a full record.
///
/// # Errors
///
/// Returns [`BleError::Decode`] for malformed input and
/// [`BleError::UnrecognisedPair`] when no body decoder exists for the header.
pub fn decode_msg(data: &[u8]) -> Result<(MsgBase, BleMsg), BleError> {
    let header = decode_header(data)?;
    let decoder = decoder_for(header.op, header.ty).ok_or(BleError::UnrecognisedPair {
        op: header.op,
        ty: header.ty,
    })?;
    let msg = decoder(data).map_err(BleError::decode)?;
    Ok((header.into_base(), msg))
}

fn decode_header(data: &[u8]) -> Result<Header, BleError> {
    serde_json::from_slice(data).map_err(BleError::decode)
}

fn decoder_for(op: MsgOp, ty: MsgType) -> Option<Decoder> {
    use serde_json::from_slice;
    use MsgOp::{Event, Response};

    let decoder: Decoder = match (op, ty) {
        (Response, MsgType::Err) => |data| from_slice(data).map(BleMsg::ErrRsp),
        (Response, MsgType::Sync) => |data| from_slice(data).map(BleMsg::SyncRsp),
        (Response, MsgType::Connect) => |data| from_slice(data).map(BleMsg::ConnectRsp),
        (Response, MsgType::Terminate) => |data| from_slice(data).map(BleMsg::TerminateRsp),
        (Response, MsgType::ConnCancel) => |data| from_slice(data).map(BleMsg::ConnCancelRsp),
        (Response, MsgType::DiscSvcUuid) => |data| from_slice(data).map(BleMsg::DiscSvcUuidRsp),
        (Response, MsgType::DiscAllChrs) => |data| from_slice(data).map(BleMsg::DiscAllChrsRsp),
        (Response, MsgType::DiscChrUuid) => |data| from_slice(data).map(BleMsg::DiscChrUuidRsp),
        (Response, MsgType::WriteCmd) => |data| from_slice(data).map(BleMsg::WriteCmdRsp),
        (Response, MsgType::ExchangeMtu) => |data| from_slice(data).map(BleMsg::ExchangeMtuRsp),
        (Response, MsgType::Scan) => |data| from_slice(data).map(BleMsg::ScanRsp),
        (Response, MsgType::ScanCancel) => |data| from_slice(data).map(BleMsg::ScanCancelRsp),
        (Event, MsgType::SyncEvt) => |data| from_slice(data).map(BleMsg::SyncEvt),
        (Event, MsgType::ConnectEvt) => |data| from_slice(data).map(BleMsg::ConnectEvt),
        (Event, MsgType::DisconnectEvt) => |data| from_slice(data).map(BleMsg::DisconnectEvt),
        (Event, MsgType::DiscSvcEvt) => |data| from_slice(data).map(BleMsg::DiscSvcEvt),
        (Event, MsgType::DiscChrEvt) => |data| from_slice(data).map(BleMsg::DiscChrEvt),
        (Event, MsgType::NotifyRxEvt) => |data| from_slice(data).map(BleMsg::NotifyRxEvt),
        (Event, MsgType::MtuChangeEvt) => |data| from_slice(data).map(BleMsg::MtuChangeEvt),
        (Event, MsgType::ScanEvt) => |data| from_slice(data).map(BleMsg::ScanEvt),
        _ => return None,
    };
    Some(decoder)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::Value;

    use super::*;
    use crate::msg::{BleSvc, BleUuid, DiscSvcEvt, ExchangeMtuReq, StatusRsp, WriteCmdReq};

    #[rstest]
    fn encodes_request_with_header() {
        let request = ExchangeMtuReq {
            seq: 9,
            conn_handle: 2,
        };
        let bytes = encode(&request).expect("encode failed");
        let value: Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(value["op"], 0);
        assert_eq!(value["type"], 11);
        assert_eq!(value["seq"], 9);
        assert_eq!(value["conn_handle"], 2);
    }

    #[rstest]
    fn encodes_payload_bytes_as_array() {
        let request = WriteCmdReq {
            seq: 1,
            conn_handle: 1,
            attr_handle: 0x12,
            data: vec![1, 2, 3],
        };
        let bytes = encode(&request).expect("encode failed");
        let value: Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(value["data"], serde_json::json!([1, 2, 3]));
    }

    #[rstest]
    fn decodes_header_without_optional_fields() {
        let base = decode_base(br#"{"op":1,"type":4}"#).expect("header decodes");

        assert_eq!(base.op, Some(MsgOp::Response));
        assert_eq!(base.ty, Some(MsgType::Terminate));
        assert_eq!(base.seq, None);
        assert_eq!(base.conn_handle, None);
    }

    #[rstest]
    fn decodes_full_record() {
        let data = br#"{"op":2,"type":2052,"seq":4,"conn_handle":1,"status":0,
            "service":{"start_handle":1,"end_handle":9,"uuid":6154}}"#;
        let (base, msg) = decode_msg(data).expect("record decodes");

        assert_eq!(base.seq, Some(4));
        assert_eq!(base.conn_handle, Some(1));
        assert_eq!(
            msg,
            BleMsg::DiscSvcEvt(DiscSvcEvt {
                status: 0,
                svc: Some(BleSvc {
                    start_handle: 1,
                    end_handle: 9,
                    uuid: BleUuid::Uuid16(0x180a),
                }),
            })
        );
    }

    #[rstest]
    fn decodes_status_response() {
        let (_, msg) = decode_msg(br#"{"op":1,"type":10,"seq":2,"status":6}"#)
            .expect("record decodes");

        assert_eq!(msg, BleMsg::WriteCmdRsp(StatusRsp { status: 6 }));
    }

    #[rstest]
    #[case(br#"{"op":0,"type":4,"seq":1}"#)]
    #[case(br#"{"op":2,"type":4,"seq":1}"#)]
    fn rejects_pairs_without_decoder(#[case] data: &[u8]) {
        let error = decode_msg(data).expect_err("pair has no decoder");
        assert!(matches!(error, BleError::UnrecognisedPair { .. }));
    }

    #[rstest]
    #[case(b"not json")]
    #[case(br#"{"op":7,"type":4}"#)]
    #[case(br#"{"op":1,"type":4,"seq":1}"#)]
    fn rejects_malformed_records(#[case] data: &[u8]) {
        let error = decode_msg(data).expect_err("record is malformed");
        assert!(matches!(error, BleError::Decode { .. }));
    }
}
