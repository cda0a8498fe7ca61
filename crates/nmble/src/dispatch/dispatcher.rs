//! Routes inbound records to the listener waiting for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::listener::BleListener;
use crate::errors::BleError;
use crate::msg::{self, MsgBase, Seq};

/// Log target for dispatcher activity.
pub(crate) const DISPATCH_TARGET: &str = "nmble::dispatch";

#[derive(Debug, Default)]
struct Registry {
    seq_map: HashMap<Seq, Arc<BleListener>>,
    base_map: Vec<(MsgBase, Arc<BleListener>)>,
}

impl Registry {
    fn find_base_listener(&self, base: &MsgBase) -> Option<(MsgBase, &Arc<BleListener>)> {
        self.base_map
            .iter()
            .find(|(key, _)| key.matches_class(base))
            .map(|(key, listener)| (*key, listener))
    }

    fn find_dup_listener(&self, base: &MsgBase) -> Option<MsgBase> {
        match base.seq {
            Some(seq) => self.seq_map.get(&seq).map(|_| MsgBase::for_seq(seq)),
            None => self.find_base_listener(base).map(|(key, _)| key),
        }
    }

    fn find_listener(&self, base: &MsgBase) -> Option<&Arc<BleListener>> {
        if let Some(listener) = base.seq.and_then(|seq| self.seq_map.get(&seq)) {
            return Some(listener);
        }
        self.find_base_listener(base).map(|(_, listener)| listener)
    }

    fn remove(&mut self, base: &MsgBase) -> Option<Arc<BleListener>> {
        if let Some(seq) = base.seq {
            if let Some(listener) = self.seq_map.remove(&seq) {
                return Some(listener);
            }
        }
        let index = self.base_map.iter().position(|(key, _)| key == base)?;
        Some(self.base_map.remove(index).1)
    }

    fn snapshot(&self) -> Vec<Arc<BleListener>> {
        self.seq_map
            .values()
            .chain(self.base_map.iter().map(|(_, listener)| listener))
            .cloned()
            .collect()
    }
}

/// Owns the set of live listeners and delivers decoded records to them.
///
/// Registrations keyed by a concrete sequence number represent one
/// outstanding request. Registrations keyed by op, type and connection handle
/// represent standing subscriptions. All registry access is serialised by one
/// internal lock; deliveries happen outside it.
#[derive(Debug, Default)]
pub struct BleDispatcher {
    registry: Mutex<Registry>,
}

impl BleDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Registers `listener` under `base`.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::RegistrationConflict`] when an existing
    /// registration overlaps `base`, and [`BleError::InvalidIdentity`] when
    /// `base` pairs a concrete sequence number with other concrete fields.
    pub fn add_listener(&self, base: MsgBase, listener: Arc<BleListener>) -> Result<(), BleError> {
        let mut registry = self.lock();

        if let Some(existing) = registry.find_dup_listener(&base) {
            return Err(BleError::RegistrationConflict {
                existing,
                requested: base,
            });
        }

        match base.seq {
            Some(seq) => {
                if base.op.is_some() || base.ty.is_some() || base.conn_handle.is_some() {
                    return Err(BleError::InvalidIdentity { identity: base });
                }
                registry.seq_map.insert(seq, listener);
            }
            None => registry.base_map.push((base, listener)),
        }

        debug!(target: DISPATCH_TARGET, identity = %base, "listener registered");
        Ok(())
    }

    /// Removes the registration for `base` and closes its listener.
    ///
    /// Sequence lookups take priority over class lookups. Returns `None`
    /// when nothing was registered under `base`.
    pub fn remove_listener(&self, base: &MsgBase) -> Option<Arc<BleListener>> {
        let removed = self.lock().remove(base);
        if let Some(listener) = &removed {
            listener.close();
            debug!(target: DISPATCH_TARGET, identity = %base, "listener removed");
        }
        removed
    }

    /// Number of live registrations.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let registry = self.lock();
        registry.seq_map.len() + registry.base_map.len()
    }

    /// Decodes `data` and hands the record to its listener.
    ///
    /// Malformed records, unknown op/type pairs and records nobody is waiting
    /// for are logged and dropped. Delivery waits while the listener's queue
    /// is full and gives up once that listener is removed.
    pub fn dispatch(&self, data: &[u8]) {
        let (base, msg) = match msg::decode_msg(data) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, error = %error, "BLE dispatch error");
                return;
            }
        };

        let listener = self.lock().find_listener(&base).cloned();
        let Some(listener) = listener else {
            debug!(target: DISPATCH_TARGET, identity = %base, "no BLE listener");
            return;
        };

        if !listener.deliver(msg) {
            debug!(
                target: DISPATCH_TARGET,
                identity = %base,
                "listener removed before delivery; record dropped"
            );
        }
    }

    /// Delivers `error` once to every listener registered at call time.
    pub fn error_all(&self, error: &BleError) {
        let listeners = self.lock().snapshot();

        debug!(
            target: DISPATCH_TARGET,
            listeners = listeners.len(),
            error = %error,
            "broadcasting error to listeners"
        );

        for listener in listeners {
            listener.fail(error.clone());
        }
    }

    /// Registers a listener that is removed again when the guard drops.
    ///
    /// # Errors
    ///
    /// Propagates registration failures from
    /// [`add_listener`](Self::add_listener).
    pub fn guard(&self, base: MsgBase) -> Result<ListenerGuard<'_>, BleError> {
        let listener = Arc::new(BleListener::new());
        self.add_listener(base, Arc::clone(&listener))?;
        Ok(ListenerGuard {
            dispatcher: self,
            base,
            listener,
        })
    }
}

/// Scoped registration returned by [`BleDispatcher::guard`].
#[derive(Debug)]
pub struct ListenerGuard<'a> {
    dispatcher: &'a BleDispatcher,
    base: MsgBase,
    listener: Arc<BleListener>,
}

impl ListenerGuard<'_> {
    /// The guarded listener.
    #[must_use]
    pub fn listener(&self) -> &Arc<BleListener> {
        &self.listener
    }

    /// Identity the listener is registered under.
    #[must_use]
    pub fn base(&self) -> MsgBase {
        self.base
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.remove_listener(&self.base);
    }
}
