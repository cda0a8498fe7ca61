//! Blocking per-command protocols.
//!
//! Every protocol transmits its request and then consumes the listener's
//! queues until a terminal record, a broadcast error, or the response timeout.
//! The timeout is re-armed after every record, so it bounds inactivity rather
//! than total duration. Records of unexpected types are skipped.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use tracing::debug;

use crate::dispatch::{AbortSignal, BleListener, ListenerEvent};
use crate::errors::{BleError, Direction};
use crate::msg::{
    self, BleChr, BleMsg, BleRequest, BleSvc, ConnCancelReq, ConnectReq, DiscAllChrsReq,
    DiscSvcUuidReq, ERR_CODE_EDONE, ExchangeMtuReq, MsgType, ScanCancelReq, ScanEvt, ScanReq,
    SyncReq, TerminateReq, WriteCmdReq,
};
use crate::transport::Transmit;

/// Log target for protocol activity.
pub(crate) const PROTOCOL_TARGET: &str = "nmble::protocol";

enum Step<T> {
    Continue,
    Done(Result<T, BleError>),
}

fn transmit<L, R>(link: &L, request: &R) -> Result<(), BleError>
where
    L: Transmit + ?Sized,
    R: BleRequest,
{
    let payload = msg::encode(request)?;

    debug!(
        target: PROTOCOL_TARGET,
        ty = %R::TYPE,
        seq = request.seq(),
        "transmitting request"
    );

    link.tx(&payload)?;
    Ok(())
}

fn wait_loop<T>(
    listener: &BleListener,
    ty: MsgType,
    timeout: Duration,
    mut on_record: impl FnMut(BleMsg) -> Step<T>,
) -> Result<T, BleError> {
    loop {
        match listener.wait(timeout) {
            ListenerEvent::Error(error) => return Err(error),
            ListenerEvent::Record(record) => {
                if let Step::Done(result) = on_record(record) {
                    return result;
                }
            }
            ListenerEvent::Aborted => return Err(BleError::Aborted { ty }),
            ListenerEvent::TimedOut => {
                debug!(
                    target: PROTOCOL_TARGET,
                    ty = %ty,
                    acked = listener.acked(),
                    "timed out waiting for response"
                );
                return Err(BleError::timeout(ty));
            }
        }
    }
}

/// Marks the acknowledgement seen; a nonzero status ends the wait.
fn acknowledge<T>(listener: &BleListener, ty: MsgType, status: i32) -> Step<T> {
    listener.set_acked();
    if status == 0 {
        Step::Continue
    } else {
        Step::Done(Err(BleError::status(Direction::Response, ty, status)))
    }
}

/// Protocol for commands whose acknowledgement is the whole answer.
fn ack_only<L, R>(
    link: &L,
    listener: &BleListener,
    request: &R,
    timeout: Duration,
) -> Result<(), BleError>
where
    L: Transmit + ?Sized,
    R: BleRequest,
{
    transmit(link, request)?;
    wait_loop(listener, R::TYPE, timeout, |record| {
        match record.ack_status(R::TYPE) {
            Some(status) => match acknowledge(listener, R::TYPE, status) {
                Step::Continue => Step::Done(Ok(())),
                done => done,
            },
            None => Step::Continue,
        }
    })
}

/// Queries whether the bridge's host stack is synchronised with its controller.
///
/// # Errors
///
/// Returns transport, link and timeout failures.
pub fn sync<L: Transmit + ?Sized>(
    link: &L,
    listener: &BleListener,
    request: &SyncReq,
    timeout: Duration,
) -> Result<bool, BleError> {
    transmit(link, request)?;
    wait_loop(listener, MsgType::Sync, timeout, |record| match record {
        BleMsg::SyncRsp(rsp) => {
            listener.set_acked();
            Step::Done(Ok(rsp.synced))
        }
        _ => Step::Continue,
    })
}

/// Waits on a class listener until the host reports it is synchronised.
///
/// # Errors
///
/// Returns link and timeout failures.
pub fn await_sync(listener: &BleListener, timeout: Duration) -> Result<(), BleError> {
    wait_loop(listener, MsgType::SyncEvt, timeout, |record| match record {
        BleMsg::SyncEvt(evt) if evt.synced => Step::Done(Ok(())),
        _ => Step::Continue,
    })
}

/// Sends a connect request and blocks on `outcome`.
///
/// The outcome channel is fed by whoever observes the connection result;
/// this protocol does not consume a listener itself.
///
/// # Errors
///
/// Returns transport failures, the error carried by `outcome`, or
/// [`BleError::ConnectAbandoned`] if the sender is dropped without reporting.
pub fn connect<L, T>(
    link: &L,
    request: &ConnectReq,
    outcome: &Receiver<Result<T, BleError>>,
) -> Result<T, BleError>
where
    L: Transmit + ?Sized,
{
    transmit(link, request)?;
    outcome.recv().map_err(|_| BleError::ConnectAbandoned)?
}

/// Follows a connect request's acknowledgement and connection event.
///
/// Returns the new connection handle.
///
/// # Errors
///
/// Returns status, link and timeout failures.
pub fn await_connection(listener: &BleListener, timeout: Duration) -> Result<u16, BleError> {
    wait_loop(listener, MsgType::Connect, timeout, |record| match record {
        BleMsg::ConnectRsp(rsp) => acknowledge(listener, MsgType::Connect, rsp.status),
        BleMsg::ConnectEvt(evt) if evt.status == 0 => Step::Done(Ok(evt.conn_handle)),
        BleMsg::ConnectEvt(evt) => Step::Done(Err(BleError::status(
            Direction::Event,
            MsgType::ConnectEvt,
            evt.status,
        ))),
        _ => Step::Continue,
    })
}

/// Terminates a connection.
///
/// # Errors
///
/// Returns transport, status, link and timeout failures.
pub fn terminate<L: Transmit + ?Sized>(
    link: &L,
    listener: &BleListener,
    request: &TerminateReq,
    timeout: Duration,
) -> Result<(), BleError> {
    ack_only(link, listener, request, timeout)
}

/// Cancels a pending connection attempt.
///
/// # Errors
///
/// Returns transport, status, link and timeout failures.
pub fn conn_cancel<L: Transmit + ?Sized>(
    link: &L,
    listener: &BleListener,
    request: &ConnCancelReq,
    timeout: Duration,
) -> Result<(), BleError> {
    ack_only(link, listener, request, timeout)
}

/// Writes an attribute without response.
///
/// # Errors
///
/// Returns transport, status, link and timeout failures.
pub fn write_cmd<L: Transmit + ?Sized>(
    link: &L,
    listener: &BleListener,
    request: &WriteCmdReq,
    timeout: Duration,
) -> Result<(), BleError> {
    ack_only(link, listener, request, timeout)
}

/// Stops an active scan.
///
/// # Errors
///
/// Returns transport, status, link and timeout failures.
pub fn scan_cancel<L: Transmit + ?Sized>(
    link: &L,
    listener: &BleListener,
    request: &ScanCancelReq,
    timeout: Duration,
) -> Result<(), BleError> {
    ack_only(link, listener, request, timeout)
}

/// Discovers the service with the requested UUID.
///
/// The last service reported before discovery completes is returned.
///
/// # Errors
///
/// Returns [`BleError::ServiceUnsupported`] when discovery completes without
/// reporting a service, plus transport, status, link and timeout failures.
pub fn disc_svc_uuid<L: Transmit + ?Sized>(
    link: &L,
    listener: &BleListener,
    request: &DiscSvcUuidReq,
    timeout: Duration,
) -> Result<BleSvc, BleError> {
    transmit(link, request)?;

    let mut candidate: Option<BleSvc> = None;
    wait_loop(listener, MsgType::DiscSvcUuid, timeout, |record| match record {
        BleMsg::DiscSvcUuidRsp(rsp) => acknowledge(listener, MsgType::DiscSvcUuid, rsp.status),
        BleMsg::DiscSvcEvt(evt) => match evt.status {
            0 => {
                if let Some(svc) = evt.svc {
                    candidate = Some(svc);
                }
                Step::Continue
            }
            ERR_CODE_EDONE => Step::Done(candidate.take().ok_or_else(|| {
                BleError::ServiceUnsupported {
                    uuid: request.uuid.clone(),
                    status: evt.status,
                }
            })),
            status => Step::Done(Err(BleError::status(
                Direction::Event,
                MsgType::DiscSvcEvt,
                status,
            ))),
        },
        _ => Step::Continue,
    })
}

/// Discovers every characteristic in the requested handle range, in the
/// order the host reports them.
///
/// # Errors
///
/// Returns transport, status, link and timeout failures.
pub fn disc_all_chrs<L: Transmit + ?Sized>(
    link: &L,
    listener: &BleListener,
    request: &DiscAllChrsReq,
    timeout: Duration,
) -> Result<Vec<BleChr>, BleError> {
    transmit(link, request)?;

    let mut chrs = Vec::new();
    wait_loop(listener, MsgType::DiscAllChrs, timeout, |record| match record {
        BleMsg::DiscAllChrsRsp(rsp) => acknowledge(listener, MsgType::DiscAllChrs, rsp.status),
        BleMsg::DiscChrEvt(evt) => match evt.status {
            0 => {
                chrs.extend(evt.chr);
                Step::Continue
            }
            ERR_CODE_EDONE => Step::Done(Ok(std::mem::take(&mut chrs))),
            status => Step::Done(Err(BleError::status(
                Direction::Event,
                MsgType::DiscChrEvt,
                status,
            ))),
        },
        _ => Step::Continue,
    })
}

/// Negotiates the ATT MTU and returns the agreed value.
///
/// # Errors
///
/// Returns transport, status, link and timeout failures.
pub fn exchange_mtu<L: Transmit + ?Sized>(
    link: &L,
    listener: &BleListener,
    request: &ExchangeMtuReq,
    timeout: Duration,
) -> Result<u16, BleError> {
    transmit(link, request)?;
    wait_loop(listener, MsgType::ExchangeMtu, timeout, |record| match record {
        BleMsg::ExchangeMtuRsp(rsp) => acknowledge(listener, MsgType::ExchangeMtu, rsp.status),
        BleMsg::MtuChangeEvt(evt) if evt.status == 0 => Step::Done(Ok(evt.mtu)),
        BleMsg::MtuChangeEvt(evt) => Step::Done(Err(BleError::status(
            Direction::Event,
            MsgType::MtuChangeEvt,
            evt.status,
        ))),
        _ => Step::Continue,
    })
}

/// Scans until `abort` fires, handing every advertising report to
/// `on_report`.
///
/// # Errors
///
/// Returns transport, status, link and timeout failures. Aborting is not an
/// error.
pub fn scan<L, F>(
    link: &L,
    listener: &Arc<BleListener>,
    request: &ScanReq,
    abort: &AbortSignal,
    timeout: Duration,
    mut on_report: F,
) -> Result<(), BleError>
where
    L: Transmit + ?Sized,
    F: FnMut(&ScanEvt),
{
    abort.attach(listener);
    transmit(link, request)?;

    let outcome = wait_loop(listener, MsgType::Scan, timeout, |record| match record {
        BleMsg::ScanRsp(rsp) => acknowledge(listener, MsgType::Scan, rsp.status),
        BleMsg::ScanEvt(evt) => {
            on_report(&evt);
            Step::Continue
        }
        _ => Step::Continue,
    });

    match outcome {
        Err(BleError::Aborted { .. }) => {
            debug!(target: PROTOCOL_TARGET, seq = request.seq, "scan aborted");
            Ok(())
        }
        other => other,
    }
}
