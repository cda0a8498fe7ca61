//! Owner of the bridge process and entry point for every BLE command.
//!
//! [`BleXport`] spawns the bridge, pumps its output into a [`BleDispatcher`],
//! and runs one blocking protocol per command. Each command gets a fresh
//! sequence number and a listener registered only for the duration of the
//! call.

mod process;
mod state;

use std::io::Read;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nmble_config::Config;
use tracing::{debug, info, warn};

use self::state::XportState;
use crate::dispatch::{AbortSignal, BleDispatcher, BleListener};
use crate::errors::{BleError, TransportError};
use crate::msg::{
    BleAddr, BleChr, BleSvc, BleUuid, ConnCancelReq, ConnectReq, DiscAllChrsReq, DiscSvcUuidReq,
    ExchangeMtuReq, MsgBase, MsgOp, MsgType, ScanCancelReq, ScanEvt, ScanReq, Seq, SyncReq,
    TerminateReq, WriteCmdReq, next_seq,
};
use crate::protocol;
use crate::sres::{SingleResource, SrWait};
use crate::transport::{FrameReader, FrameWriter, Transmit};

/// Log target for transport lifecycle events.
pub(crate) const XPORT_TARGET: &str = "nmble::xport";

/// Parameters for [`BleXport::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Own address type.
    pub own_addr_type: u8,
    /// Peer address type.
    pub peer_addr_type: u8,
    /// Peer address.
    pub peer_addr: BleAddr,
    /// Milliseconds the controller keeps trying.
    pub duration_ms: u32,
}

/// Parameters for [`BleXport::scan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanParams {
    /// Own address type.
    pub own_addr_type: u8,
    /// Scan duration in milliseconds; non-positive scans forever.
    pub duration_ms: i32,
    /// Scan interval in 0.625 ms units.
    pub itvl: u16,
    /// Scan window in 0.625 ms units.
    pub window: u16,
    /// Advertising filter policy.
    pub filter_policy: u8,
    /// Limited discovery only.
    pub limited: bool,
    /// Passive scanning.
    pub passive: bool,
    /// Drop duplicate reports in the controller.
    pub filter_duplicates: bool,
}

/// Writer half of the bridge link, shared with the reader thread.
type LinkSlot = Arc<Mutex<Option<Arc<dyn Transmit>>>>;

/// Client-side transport to a BLE bridge process.
pub struct BleXport {
    config: Config,
    dispatcher: Arc<BleDispatcher>,
    link: LinkSlot,
    state: Mutex<XportState>,
    master: SingleResource<u64>,
}

impl BleXport {
    /// Creates a transport that spawns the configured bridge on
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            dispatcher: Arc::new(BleDispatcher::new()),
            link: Arc::new(Mutex::new(None)),
            state: Mutex::new(XportState::NotStarted),
            master: SingleResource::new(),
        }
    }

    /// Creates a transport over an existing link.
    ///
    /// Inbound records must be fed into `dispatcher` by the caller, for
    /// example with [`pump`].
    #[must_use]
    pub fn with_link(
        config: Config,
        dispatcher: Arc<BleDispatcher>,
        link: Arc<dyn Transmit>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            link: Arc::new(Mutex::new(Some(link))),
            state: Mutex::new(XportState::NotStarted),
            master: SingleResource::new(),
        }
    }

    /// Dispatcher receiving the bridge's records.
    ///
    /// Standing subscriptions such as disconnect or notification listeners
    /// are registered here.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<BleDispatcher> {
        &self.dispatcher
    }

    /// Resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, XportState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<Arc<dyn Transmit>>> {
        self.link.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn link(&self) -> Result<Arc<dyn Transmit>, BleError> {
        self.lock_link()
            .clone()
            .ok_or_else(|| TransportError::NotRunning.into())
    }

    /// Spawns the bridge, starts pumping its output, and waits for the host
    /// stack to report it is synchronised.
    ///
    /// Calling `start` on a running transport does nothing. A bridge whose
    /// output stream has closed is reaped and replaced.
    ///
    /// # Errors
    ///
    /// Returns spawn failures and any failure of the initial sync. A failed
    /// sync stops the transport again.
    pub fn start(&self) -> Result<(), BleError> {
        {
            let mut state = self.lock_state();
            if state.is_running() {
                debug!(target: XPORT_TARGET, "transport already running");
                return Ok(());
            }
            if state.reap_exited() {
                info!(target: XPORT_TARGET, "previous bridge exited, restarting");
            }

            let bridge = process::spawn_bridge(&self.config)?;
            let writer: Arc<dyn Transmit> = Arc::new(FrameWriter::new(bridge.stdin));
            *self.lock_link() = Some(Arc::clone(&writer));
            let spawned = spawn_reader(
                bridge.stdout,
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.link),
                Arc::downgrade(&writer),
            );
            let reader = match spawned {
                Ok(reader) => reader,
                Err(error) => {
                    self.lock_link().take();
                    let mut child = bridge.child;
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(TransportError::Io(error).into());
                }
            };

            *state = XportState::Running {
                child: bridge.child,
                reader,
            };
        }

        if let Err(error) = self.sync() {
            warn!(target: XPORT_TARGET, error = %error, "initial sync failed");
            self.stop();
            return Err(error);
        }

        info!(target: XPORT_TARGET, "bridge started and synced");
        Ok(())
    }

    /// Waits until the bridge's host stack is synchronised with its
    /// controller.
    ///
    /// # Errors
    ///
    /// Returns transport, link and timeout failures.
    pub fn sync(&self) -> Result<(), BleError> {
        let sync_evt = self.dispatcher.guard(MsgBase::for_class(
            Some(MsgOp::Event),
            Some(MsgType::SyncEvt),
            None,
        ))?;

        let synced = self.exec(|link, listener, seq, timeout| {
            protocol::sync(link, listener, &SyncReq { seq }, timeout)
        })?;
        if synced {
            return Ok(());
        }

        info!(target: XPORT_TARGET, "waiting for host to sync");
        protocol::await_sync(sync_evt.listener(), self.config.response_timeout())
    }

    /// Closes the link and fails every blocked operation and gate waiter.
    ///
    /// The bridge gets a short grace period to exit before it is killed.
    pub fn stop(&self) {
        let closed = BleError::link("transport closed");

        self.lock_link().take();
        self.dispatcher.error_all(&closed);
        self.master.abort(&closed);

        let previous = std::mem::replace(&mut *self.lock_state(), XportState::Stopped);
        if let XportState::Running { mut child, reader } = previous {
            process::terminate_child(&mut child);
            if reader.join().is_err() {
                warn!(target: XPORT_TARGET, "reader thread panicked");
            }
        }

        info!(target: XPORT_TARGET, "transport stopped");
    }

    /// Runs `operation` with a fresh sequence number and a listener
    /// registered for it.
    fn exec<T>(
        &self,
        operation: impl FnOnce(
            &dyn Transmit,
            &Arc<BleListener>,
            Seq,
            Duration,
        ) -> Result<T, BleError>,
    ) -> Result<T, BleError> {
        let link = self.link()?;
        let seq = next_seq();
        let guard = self.dispatcher.guard(MsgBase::for_seq(seq))?;
        operation(&*link, guard.listener(), seq, self.config.response_timeout())
    }

    /// Connects to a peer and returns the connection handle.
    ///
    /// The wait for the connection event allows for the controller's own
    /// connection duration on top of the response timeout.
    ///
    /// # Errors
    ///
    /// Returns transport, status, link and timeout failures.
    pub fn connect(&self, params: &ConnectParams) -> Result<u16, BleError> {
        let link = self.link()?;
        let seq = next_seq();
        let guard = self.dispatcher.guard(MsgBase::for_seq(seq))?;
        let timeout =
            self.config.response_timeout() + Duration::from_millis(params.duration_ms.into());

        let (sender, outcome) = mpsc::channel();
        let listener = Arc::clone(guard.listener());
        let watcher = thread::Builder::new()
            .name("nmble-connect".to_string())
            .spawn(move || {
                let _ = sender.send(protocol::await_connection(&listener, timeout));
            })
            .map_err(TransportError::Io)?;

        let request = ConnectReq {
            seq,
            own_addr_type: params.own_addr_type,
            peer_addr_type: params.peer_addr_type,
            peer_addr: params.peer_addr,
            duration_ms: params.duration_ms,
        };
        let result = protocol::connect(&*link, &request, &outcome);

        guard.listener().abort();
        drop(guard);
        if watcher.join().is_err() {
            warn!(target: XPORT_TARGET, "connect watcher panicked");
        }

        if let Ok(conn_handle) = &result {
            info!(target: XPORT_TARGET, conn_handle, peer = %params.peer_addr, "connected");
        }
        result
    }

    /// Terminates a connection.
    ///
    /// # Errors
    ///
    /// Returns transport, status, link and timeout failures.
    pub fn terminate(&self, conn_handle: u16, hci_reason: u8) -> Result<(), BleError> {
        self.exec(|link, listener, seq, timeout| {
            let request = TerminateReq {
                seq,
                conn_handle,
                hci_reason,
            };
            protocol::terminate(link, listener, &request, timeout)
        })
    }

    /// Cancels a pending connection attempt.
    ///
    /// # Errors
    ///
    /// Returns transport, status, link and timeout failures.
    pub fn conn_cancel(&self) -> Result<(), BleError> {
        self.exec(|link, listener, seq, timeout| {
            protocol::conn_cancel(link, listener, &ConnCancelReq { seq }, timeout)
        })
    }

    /// Discovers the service with the given UUID.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::ServiceUnsupported`] when the peer lacks the
    /// service, plus transport, status, link and timeout failures.
    pub fn disc_svc_uuid(&self, conn_handle: u16, uuid: BleUuid) -> Result<BleSvc, BleError> {
        self.exec(|link, listener, seq, timeout| {
            let request = DiscSvcUuidReq {
                seq,
                conn_handle,
                uuid,
            };
            protocol::disc_svc_uuid(link, listener, &request, timeout)
        })
    }

    /// Discovers every characteristic between two handles.
    ///
    /// # Errors
    ///
    /// Returns transport, status, link and timeout failures.
    pub fn disc_all_chrs(
        &self,
        conn_handle: u16,
        start_handle: u16,
        end_handle: u16,
    ) -> Result<Vec<BleChr>, BleError> {
        self.exec(|link, listener, seq, timeout| {
            let request = DiscAllChrsReq {
                seq,
                conn_handle,
                start_handle,
                end_handle,
            };
            protocol::disc_all_chrs(link, listener, &request, timeout)
        })
    }

    /// Writes an attribute without response.
    ///
    /// # Errors
    ///
    /// Returns transport, status, link and timeout failures.
    pub fn write_cmd(
        &self,
        conn_handle: u16,
        attr_handle: u16,
        data: Vec<u8>,
    ) -> Result<(), BleError> {
        self.exec(|link, listener, seq, timeout| {
            let request = WriteCmdReq {
                seq,
                conn_handle,
                attr_handle,
                data,
            };
            protocol::write_cmd(link, listener, &request, timeout)
        })
    }

    /// Negotiates the ATT MTU of a connection.
    ///
    /// # Errors
    ///
    /// Returns transport, status, link and timeout failures.
    pub fn exchange_mtu(&self, conn_handle: u16) -> Result<u16, BleError> {
        self.exec(|link, listener, seq, timeout| {
            protocol::exchange_mtu(link, listener, &ExchangeMtuReq { seq, conn_handle }, timeout)
        })
    }

    /// Scans until `abort` fires, reporting every advertisement.
    ///
    /// # Errors
    ///
    /// Returns transport, status, link and timeout failures.
    pub fn scan<F>(
        &self,
        params: ScanParams,
        abort: &AbortSignal,
        on_report: F,
    ) -> Result<(), BleError>
    where
        F: FnMut(&ScanEvt),
    {
        self.exec(|link, listener, seq, timeout| {
            let request = ScanReq {
                seq,
                own_addr_type: params.own_addr_type,
                duration_ms: params.duration_ms,
                itvl: params.itvl,
                window: params.window,
                filter_policy: params.filter_policy,
                limited: params.limited,
                passive: params.passive,
                filter_duplicates: params.filter_duplicates,
            };
            protocol::scan(link, listener, &request, abort, timeout, on_report)
        })
    }

    /// Stops an active scan.
    ///
    /// # Errors
    ///
    /// Returns transport, status, link and timeout failures.
    pub fn scan_cancel(&self) -> Result<(), BleError> {
        self.exec(|link, listener, seq, timeout| {
            protocol::scan_cancel(link, listener, &ScanCancelReq { seq }, timeout)
        })
    }

    /// Requests the master role on behalf of `token`.
    ///
    /// Only one caller may drive connection establishment at a time.
    pub fn acquire_master(&self, token: u64) -> Arc<SrWait> {
        self.master.acquire(token)
    }

    /// Releases the master role; returns `true` when a waiter took it over.
    ///
    /// # Panics
    ///
    /// Panics when the master role is not held.
    pub fn release_master(&self) -> bool {
        self.master.release()
    }

    /// Withdraws `token` from the master queue, failing its wait with `error`.
    pub fn stop_waiting_master(&self, token: u64, error: BleError) -> bool {
        self.master.stop_waiting(&token, error)
    }
}

impl Drop for BleXport {
    fn drop(&mut self) {
        self.lock_link().take();
        let previous = std::mem::replace(&mut *self.lock_state(), XportState::Stopped);
        if let XportState::Running { mut child, reader } = previous {
            if let Err(error) = child.kill() {
                warn!(
                    target: XPORT_TARGET,
                    error = %error,
                    "failed to kill bridge process on drop"
                );
            } else {
                let _ = child.wait();
                let _ = reader.join();
            }
        }
    }
}

impl std::fmt::Debug for BleXport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.lock_state() {
            XportState::NotStarted => "not_started".to_string(),
            XportState::Running { child, reader } if reader.is_finished() => {
                format!("exited (pid: {})", child.id())
            }
            XportState::Running { child, .. } => format!("running (pid: {})", child.id()),
            XportState::Stopped => "stopped".to_string(),
        };

        f.debug_struct("BleXport")
            .field("state", &state)
            .field("listeners", &self.dispatcher.listener_count())
            .finish_non_exhaustive()
    }
}

/// Feeds every frame from `reader` into `dispatcher` until the stream fails.
///
/// End of stream and read failures are broadcast to every registered
/// listener as a link error.
pub fn pump<R: Read>(mut reader: FrameReader<R>, dispatcher: &BleDispatcher) {
    loop {
        match reader.receive() {
            Ok(frame) => dispatcher.dispatch(&frame),
            Err(error) => {
                warn!(target: XPORT_TARGET, error = %error, "bridge link closed");
                dispatcher.error_all(&BleError::link(format!("bridge link closed: {error}")));
                return;
            }
        }
    }
}

/// Starts the thread pumping bridge output into `dispatcher`.
///
/// When the stream closes the thread clears `slot`, unless it already holds
/// a different writer, so later commands fail with
/// [`TransportError::NotRunning`].
pub(crate) fn spawn_reader<R>(
    stdout: R,
    dispatcher: Arc<BleDispatcher>,
    slot: LinkSlot,
    writer: Weak<dyn Transmit>,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("nmble-reader".to_string())
        .spawn(move || {
            pump(FrameReader::new(stdout), &dispatcher);
            let Some(writer) = writer.upgrade() else {
                return;
            };
            let mut link = slot.lock().unwrap_or_else(|poison| poison.into_inner());
            if link
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &writer))
            {
                link.take();
                debug!(target: XPORT_TARGET, "link cleared after bridge output closed");
            }
        })
}
