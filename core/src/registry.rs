//! Process-wide set of live sessions, used to interrupt every in-flight call
//! at once (typically from a shutdown hook).
//!
//! # Lifecycle
//! The process registry is created on first use by `SessionRegistry::global`.
//! A session joins it when its native handle is opened and leaves it when the
//! handle is destroyed, through the RAII `Registration` returned by
//! `register`. Members are held weakly; the registry never keeps a session's
//! state alive. `interrupt_all_sessions` is meant to be called once the host
//! starts shutting down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::interrupt::{InterruptReason, TransferState};

static GLOBAL: OnceLock<Arc<SessionRegistry>> = OnceLock::new();

/// Mutex-guarded collection of weak references to session transfer state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    members: Mutex<HashMap<u64, Weak<TransferState>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every session created with `Session::new`.
    pub fn global() -> &'static Arc<SessionRegistry> {
        GLOBAL.get_or_init(|| Arc::new(SessionRegistry::new()))
    }

    /// Add `state` to the registry until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, state: &Arc<TransferState>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.members.lock().insert(id, Arc::downgrade(state));
        Registration {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Flip the interrupt flag of every live member. Returns how many
    /// members were signalled.
    pub fn interrupt_all(&self) -> usize {
        let members = self.members.lock();
        let mut signalled = 0;
        for state in members.values().filter_map(Weak::upgrade) {
            state.interrupt(InterruptReason::Abort);
            signalled += 1;
        }
        debug!(signalled, "interrupted all registered sessions");
        signalled
    }

    /// Number of registered members, including ones whose state has
    /// already been dropped but whose guard has not.
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unregister(&self, id: u64) {
        self.members.lock().remove(&id);
    }
}

/// Shutdown hook: interrupt every session registered with the process
/// registry.
pub fn interrupt_all_sessions() -> usize {
    SessionRegistry::global().interrupt_all()
}

/// Membership of one session in a registry; leaving is automatic on drop.
#[derive(Debug)]
pub struct Registration {
    id: u64,
    registry: Weak<SessionRegistry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}
