//! Message correlation: listeners and the dispatcher that feeds them.

mod dispatcher;
mod listener;

pub use dispatcher::{BleDispatcher, ListenerGuard};
pub use listener::{AbortSignal, BleListener, ListenerEvent, RECORD_CAPACITY};
