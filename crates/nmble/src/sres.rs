//! Single-holder gate with FIFO hand-off.
//!
//! A [`SingleResource`] has at most one holder. Acquiring while it is held
//! queues the caller; releasing hands the resource straight to the oldest
//! waiter without passing through the free state.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::errors::BleError;

/// One-shot completion slot returned by [`SingleResource::acquire`].
///
/// Resolves to `Ok(())` when the caller becomes the holder, or to the error
/// passed to [`SingleResource::stop_waiting`] or [`SingleResource::abort`].
#[derive(Debug, Default)]
pub struct SrWait {
    slot: Mutex<Option<Result<(), BleError>>>,
    ready: Condvar,
}

impl SrWait {
    fn resolved(result: Result<(), BleError>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Some(result)),
            ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Result<(), BleError>>> {
        self.slot.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn complete(&self, result: Result<(), BleError>) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(result);
            self.ready.notify_all();
        }
    }

    /// Blocks until the acquisition resolves.
    ///
    /// # Errors
    ///
    /// Returns the error the waiter was cancelled with.
    pub fn wait(&self) -> Result<(), BleError> {
        let mut slot = self.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    /// Blocks for at most `timeout`; `None` means still pending.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), BleError>> {
        let slot = self.lock();
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |slot| slot.is_none())
            .unwrap_or_else(|poison| poison.into_inner());
        slot.clone()
    }

    /// The outcome, if already resolved.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<(), BleError>> {
        self.lock().clone()
    }
}

#[derive(Debug)]
struct SrState<T> {
    acquired: bool,
    waiters: VecDeque<(T, Arc<SrWait>)>,
}

/// Mutual-exclusion gate whose waiters are identified by a caller token.
#[derive(Debug)]
pub struct SingleResource<T> {
    state: Mutex<SrState<T>>,
}

impl<T> Default for SingleResource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleResource<T> {
    /// Creates a free gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SrState {
                acquired: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SrState<T>> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Requests the resource on behalf of `token`.
    ///
    /// When the gate is free the returned slot is already resolved and the
    /// caller holds the resource. Otherwise the caller is queued behind every
    /// earlier waiter.
    pub fn acquire(&self, token: T) -> Arc<SrWait> {
        let mut state = self.lock();
        if !state.acquired {
            state.acquired = true;
            return SrWait::resolved(Ok(()));
        }

        let wait = Arc::new(SrWait::default());
        state.waiters.push_back((token, Arc::clone(&wait)));
        wait
    }

    /// Gives up the resource, handing it to the oldest waiter if any.
    ///
    /// Returns `true` when a waiter was promoted to holder.
    ///
    /// # Panics
    ///
    /// Panics when the resource is not held; that is a caller bug.
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        if !state.acquired {
            drop(state);
            panic!("SingleResource release without acquire");
        }

        match state.waiters.pop_front() {
            Some((_, next)) => {
                drop(state);
                next.complete(Ok(()));
                true
            }
            None => {
                state.acquired = false;
                false
            }
        }
    }

    /// Fails every queued waiter with `error`.
    ///
    /// The held flag is left as it is: a current holder keeps the resource
    /// and must still release it.
    pub fn abort(&self, error: &BleError) {
        let waiters: Vec<_> = self.lock().waiters.drain(..).collect();
        for (_, wait) in waiters {
            wait.complete(Err(error.clone()));
        }
    }

    /// Whether the resource currently has a holder.
    #[must_use]
    pub fn acquired(&self) -> bool {
        self.lock().acquired
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }
}

impl<T: PartialEq> SingleResource<T> {
    /// Removes the first waiter queued under `token` and fails it with
    /// `error`.
    ///
    /// Returns `false` when no such waiter is queued; the call is then a
    /// no-op. The current holder is never affected.
    pub fn stop_waiting(&self, token: &T, error: BleError) -> bool {
        let wait = {
            let mut state = self.lock();
            let Some(index) = state.waiters.iter().position(|(queued, _)| queued == token) else {
                return false;
            };
            state.waiters.remove(index).map(|(_, wait)| wait)
        };

        match wait {
            Some(wait) => {
                wait.complete(Err(error));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn gate() -> SingleResource<u32> {
        SingleResource::new()
    }

    fn pending(wait: &SrWait) -> bool {
        wait.try_result().is_none()
    }

    #[rstest]
    fn free_gate_grants_immediately(gate: SingleResource<u32>) {
        let wait = gate.acquire(1);

        assert!(matches!(wait.try_result(), Some(Ok(()))));
        assert!(gate.acquired());
    }

    #[rstest]
    fn waiters_are_granted_in_arrival_order(gate: SingleResource<u32>) {
        let _holder = gate.acquire(1);
        let second = gate.acquire(2);
        let third = gate.acquire(3);

        assert!(gate.release());
        assert!(matches!(second.try_result(), Some(Ok(()))));
        assert!(pending(&third));
        assert!(gate.acquired());

        assert!(gate.release());
        assert!(matches!(third.try_result(), Some(Ok(()))));

        assert!(!gate.release());
        assert!(!gate.acquired());
    }

    #[rstest]
    fn concurrent_acquirers_are_granted_in_queue_order() {
        let gate = Arc::new(SingleResource::new());
        let _holder = gate.acquire(0_u32);
        let (queued_tx, queued_rx) = std::sync::mpsc::channel();
        let (granted_tx, granted_rx) = std::sync::mpsc::channel();

        let workers: Vec<_> = (1..=4_u32)
            .map(|token| {
                let gate = Arc::clone(&gate);
                let queued_tx = queued_tx.clone();
                let granted_tx = granted_tx.clone();
                let worker = std::thread::spawn(move || {
                    let wait = gate.acquire(token);
                    queued_tx.send(token).expect("queue report");
                    let result = wait.wait();
                    granted_tx.send((token, result.is_ok())).expect("grant report");
                });
                assert_eq!(queued_rx.recv().expect("worker queued"), token);
                worker
            })
            .collect();
        assert_eq!(gate.waiting(), 4);

        let mut order = Vec::new();
        for _ in 0..4 {
            assert!(gate.release());
            order.push(granted_rx.recv().expect("worker granted"));
        }
        for worker in workers {
            worker.join().expect("worker thread");
        }

        assert_eq!(order, vec![(1, true), (2, true), (3, true), (4, true)]);
        assert!(gate.acquired());
        assert!(!gate.release());
    }

    #[rstest]
    fn stop_waiting_removes_only_the_named_waiter(gate: SingleResource<u32>) {
        let _holder = gate.acquire(1);
        let second = gate.acquire(2);
        let third = gate.acquire(3);

        assert!(gate.stop_waiting(&2, BleError::link("cancelled")));

        assert!(matches!(second.try_result(), Some(Err(BleError::Link { .. }))));
        assert!(pending(&third));
        assert_eq!(gate.waiting(), 1);

        assert!(gate.release());
        assert!(matches!(third.try_result(), Some(Ok(()))));
    }

    #[rstest]
    fn stop_waiting_for_unknown_token_is_a_no_op(gate: SingleResource<u32>) {
        let _holder = gate.acquire(1);

        assert!(!gate.stop_waiting(&9, BleError::link("cancelled")));
        assert!(gate.acquired());
    }

    #[rstest]
    fn abort_fails_waiters_and_keeps_holder(gate: SingleResource<u32>) {
        let _holder = gate.acquire(1);
        let second = gate.acquire(2);

        gate.abort(&BleError::link("closing"));

        assert!(matches!(second.try_result(), Some(Err(BleError::Link { .. }))));
        assert!(gate.acquired());
        assert_eq!(gate.waiting(), 0);
    }

    #[rstest]
    #[should_panic(expected = "SingleResource release without acquire")]
    fn release_without_holder_panics(gate: SingleResource<u32>) {
        let _ = gate.release();
    }

    #[rstest]
    fn blocked_waiter_wakes_on_release(gate: SingleResource<u32>) {
        let _holder = gate.acquire(1);
        let second = gate.acquire(2);
        let waiter = {
            let second = Arc::clone(&second);
            std::thread::spawn(move || second.wait())
        };

        assert!(second.wait_timeout(Duration::from_millis(20)).is_none());
        assert!(gate.release());

        let result = waiter.join().expect("waiter thread");
        assert!(result.is_ok());
    }
}
