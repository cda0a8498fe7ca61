//! Lifecycle state of the bridge process.

use std::process::Child;
use std::thread::JoinHandle;

use tracing::warn;

use super::{XPORT_TARGET, process};

/// Where the transport is in its start/stop lifecycle.
pub(super) enum XportState {
    /// `start` has not been called.
    NotStarted,
    /// The bridge is running and its output is being pumped.
    Running {
        /// Bridge process handle.
        child: Child,
        /// Thread feeding bridge output into the dispatcher.
        reader: JoinHandle<()>,
    },
    /// The transport has been stopped.
    Stopped,
}

impl XportState {
    /// Whether a bridge is running and its output is still being read.
    pub(super) fn is_running(&self) -> bool {
        matches!(self, Self::Running { reader, .. } if !reader.is_finished())
    }

    /// Reaps a bridge whose reader thread has finished and moves to
    /// `Stopped`.
    ///
    /// Returns `false`, leaving the state untouched, when there is nothing
    /// to reap.
    pub(super) fn reap_exited(&mut self) -> bool {
        if !matches!(self, Self::Running { reader, .. } if reader.is_finished()) {
            return false;
        }
        if let Self::Running { mut child, reader } = std::mem::replace(self, Self::Stopped) {
            process::terminate_child(&mut child);
            if reader.join().is_err() {
                warn!(target: XPORT_TARGET, "reader thread panicked");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::process::{Command, Stdio};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    fn exited_child() -> Child {
        let mut child = Command::new("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn true");
        child.wait().expect("child exits");
        child
    }

    fn wait_until_finished(reader: &JoinHandle<()>) {
        while !reader.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[rstest]
    fn finished_reader_is_reaped_into_stopped() {
        let reader = thread::spawn(|| {});
        wait_until_finished(&reader);
        let mut state = XportState::Running {
            child: exited_child(),
            reader,
        };

        assert!(!state.is_running());
        assert!(state.reap_exited());
        assert!(matches!(state, XportState::Stopped));
        assert!(!state.reap_exited());
    }

    #[rstest]
    fn live_reader_is_left_running() {
        let (release, hold) = mpsc::channel::<()>();
        let reader = thread::spawn(move || {
            let _ = hold.recv();
        });
        let mut state = XportState::Running {
            child: exited_child(),
            reader,
        };

        assert!(state.is_running());
        assert!(!state.reap_exited());

        drop(release);
        if let XportState::Running { reader, .. } = &state {
            wait_until_finished(reader);
        }
        assert!(state.reap_exited());
    }

    #[rstest]
    #[case(XportState::NotStarted)]
    #[case(XportState::Stopped)]
    fn idle_states_have_nothing_to_reap(#[case] mut state: XportState) {
        assert!(!state.is_running());
        assert!(!state.reap_exited());
    }
}
