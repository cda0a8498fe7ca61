//! Rendezvous point between the inbound dispatcher and one blocked operation.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use crate::errors::BleError;
use crate::msg::BleMsg;

/// Records a listener buffers before the dispatcher has to wait.
pub const RECORD_CAPACITY: usize = 16;

/// Outcome of one [`BleListener::wait`] call.
#[derive(Debug)]
pub enum ListenerEvent {
    /// A failure broadcast to every listener.
    Error(BleError),
    /// The next correlated record.
    Record(BleMsg),
    /// The owner's abort signal fired.
    Aborted,
    /// Nothing arrived before the deadline.
    TimedOut,
}

#[derive(Debug, Default)]
struct Mailbox {
    records: VecDeque<BleMsg>,
    error: Option<BleError>,
    acked: bool,
    aborted: bool,
    closed: bool,
}

/// Per-operation mailbox holding a bounded record queue and a one-slot error
/// queue.
///
/// The dispatcher is the only writer of the record queue. Error delivery comes
/// from [`BleDispatcher::error_all`](super::BleDispatcher::error_all).
#[derive(Debug)]
pub struct BleListener {
    mailbox: Mutex<Mailbox>,
    changed: Condvar,
    capacity: usize,
}

impl Default for BleListener {
    fn default() -> Self {
        Self::new()
    }
}

impl BleListener {
    /// Creates a listener with the standard record capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(RECORD_CAPACITY)
    }

    /// Creates a listener buffering at most `capacity` records.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mailbox: Mutex::new(Mailbox::default()),
            changed: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Queues a record, waiting while the queue is full.
    ///
    /// Returns `false` when the listener was closed before space became
    /// available; the record is then discarded.
    pub(crate) fn deliver(&self, msg: BleMsg) -> bool {
        let mut mailbox = self.lock();
        while mailbox.records.len() >= self.capacity && !mailbox.closed {
            mailbox = self
                .changed
                .wait(mailbox)
                .unwrap_or_else(|poison| poison.into_inner());
        }
        if mailbox.closed {
            return false;
        }
        mailbox.records.push_back(msg);
        self.changed.notify_all();
        true
    }

    /// Places `error` in the error slot unless one is already pending.
    pub(crate) fn fail(&self, error: BleError) -> bool {
        let mut mailbox = self.lock();
        if mailbox.error.is_some() {
            return false;
        }
        mailbox.error = Some(error);
        self.changed.notify_all();
        true
    }

    /// Wakes the owner with [`ListenerEvent::Aborted`].
    pub fn abort(&self) {
        let mut mailbox = self.lock();
        mailbox.aborted = true;
        self.changed.notify_all();
    }

    /// Marks the listener deregistered and releases a blocked dispatcher.
    pub(crate) fn close(&self) {
        let mut mailbox = self.lock();
        mailbox.closed = true;
        self.changed.notify_all();
    }

    /// Records that the request's acknowledgement arrived.
    pub fn set_acked(&self) {
        self.lock().acked = true;
    }

    /// Whether the request's acknowledgement has arrived.
    #[must_use]
    pub fn acked(&self) -> bool {
        self.lock().acked
    }

    /// Number of records waiting to be consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().records.len()
    }

    /// Blocks until an event is ready or `timeout` elapses.
    ///
    /// When several sources are ready at once the error wins, then the oldest
    /// record, then the abort signal.
    pub fn wait(&self, timeout: Duration) -> ListenerEvent {
        let deadline = Instant::now() + timeout;
        let mut mailbox = self.lock();
        loop {
            if let Some(error) = mailbox.error.take() {
                return ListenerEvent::Error(error);
            }
            if let Some(msg) = mailbox.records.pop_front() {
                self.changed.notify_all();
                return ListenerEvent::Record(msg);
            }
            if mailbox.aborted {
                return ListenerEvent::Aborted;
            }
            let now = Instant::now();
            if now >= deadline {
                return ListenerEvent::TimedOut;
            }
            mailbox = self
                .changed
                .wait_timeout(mailbox, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poison| poison.into_inner().0);
        }
    }
}

/// External cancellation handle for long-running waits such as scans.
///
/// The signal may fire before the listener it guards exists; attaching a
/// listener afterwards aborts it immediately.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    inner: Arc<Mutex<AbortState>>,
}

#[derive(Debug, Default)]
struct AbortState {
    fired: bool,
    listener: Option<Weak<BleListener>>,
}

impl AbortSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal, waking the attached listener if any.
    pub fn trigger(&self) {
        let listener = {
            let mut state = self
                .inner
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            state.fired = true;
            state.listener.as_ref().and_then(Weak::upgrade)
        };
        if let Some(listener) = listener {
            listener.abort();
        }
    }

    /// Whether [`trigger`](Self::trigger) has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .fired
    }

    pub(crate) fn attach(&self, listener: &Arc<BleListener>) {
        let fired = {
            let mut state = self
                .inner
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            state.listener = Some(Arc::downgrade(listener));
            state.fired
        };
        if fired {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rstest::rstest;

    use super::*;
    use crate::msg::{MsgType, StatusRsp};

    fn ack(status: i32) -> BleMsg {
        BleMsg::WriteCmdRsp(StatusRsp { status })
    }

    #[rstest]
    fn times_out_when_nothing_arrives() {
        let listener = BleListener::new();

        assert!(matches!(
            listener.wait(Duration::from_millis(10)),
            ListenerEvent::TimedOut
        ));
    }

    #[rstest]
    fn records_are_returned_in_arrival_order() {
        let listener = BleListener::new();
        assert!(listener.deliver(ack(1)));
        assert!(listener.deliver(ack(2)));

        for expected in [1, 2] {
            match listener.wait(Duration::from_millis(10)) {
                ListenerEvent::Record(msg) => {
                    assert_eq!(msg.ack_status(MsgType::WriteCmd), Some(expected));
                }
                other => panic!("expected record, got {other:?}"),
            }
        }
    }

    #[rstest]
    fn error_takes_precedence_over_records_and_abort() {
        let listener = BleListener::new();
        assert!(listener.deliver(ack(0)));
        listener.abort();
        assert!(listener.fail(BleError::link("closed")));

        assert!(matches!(
            listener.wait(Duration::from_millis(10)),
            ListenerEvent::Error(BleError::Link { .. })
        ));
        assert!(matches!(
            listener.wait(Duration::from_millis(10)),
            ListenerEvent::Record(_)
        ));
        assert!(matches!(
            listener.wait(Duration::from_millis(10)),
            ListenerEvent::Aborted
        ));
    }

    #[rstest]
    fn error_slot_holds_a_single_error() {
        let listener = BleListener::new();

        assert!(listener.fail(BleError::link("first")));
        assert!(!listener.fail(BleError::link("second")));
        match listener.wait(Duration::from_millis(10)) {
            ListenerEvent::Error(BleError::Link { reason }) => assert_eq!(reason, "first"),
            other => panic!("expected first error, got {other:?}"),
        }
    }

    #[rstest]
    fn full_queue_blocks_until_consumed() {
        let listener = Arc::new(BleListener::with_capacity(1));
        assert!(listener.deliver(ack(1)));

        let producer = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.deliver(ack(2)))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(listener.pending(), 1);

        assert!(matches!(
            listener.wait(Duration::from_millis(10)),
            ListenerEvent::Record(_)
        ));
        assert!(producer.join().expect("producer panicked"));
        assert_eq!(listener.pending(), 1);
    }

    #[rstest]
    fn closing_releases_a_blocked_producer() {
        let listener = Arc::new(BleListener::with_capacity(1));
        assert!(listener.deliver(ack(1)));

        let producer = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.deliver(ack(2)))
        };
        thread::sleep(Duration::from_millis(20));
        listener.close();

        assert!(!producer.join().expect("producer panicked"));
    }

    #[rstest]
    fn abort_signal_fired_before_attach_still_aborts() {
        let signal = AbortSignal::new();
        signal.trigger();
        let listener = Arc::new(BleListener::new());
        signal.attach(&listener);

        assert!(signal.is_triggered());
        assert!(matches!(
            listener.wait(Duration::from_millis(10)),
            ListenerEvent::Aborted
        ));
    }

    #[rstest]
    fn acked_flag_is_sticky() {
        let listener = BleListener::new();
        assert!(!listener.acked());

        listener.set_acked();

        assert!(listener.acked());
    }
}
