//! Run session calls on tokio's blocking pool.
//!
//! # Design
//! The transport blocks its thread for the whole call, so each call is
//! handed to `spawn_blocking` while the async caller awaits the join handle.
//! The future owns an `UnblockGuard`: if it is dropped before the call
//! finishes (task cancelled, `select!` lost, timeout elapsed), the guard
//! marks the call cancelled and flips the session's interrupt flag. The
//! blocking call then aborts at its next progress callback, and a call that
//! has not started yet never reaches the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Error;
use crate::interrupt::InterruptHandle;
use crate::request::RequestDescriptor;
use crate::response::Response;
use crate::session::{cancelled_before_start, Session};
use crate::transport::{ResultCode, Transport};

/// Shareable async front for one `Session`. Calls are serialized.
pub struct AsyncSession<T: Transport> {
    inner: Arc<Mutex<Session<T>>>,
    interrupt: InterruptHandle,
}

impl<T: Transport> Clone for AsyncSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            interrupt: self.interrupt.clone(),
        }
    }
}

impl<T> AsyncSession<T>
where
    T: Transport + 'static,
{
    pub fn new(session: Session<T>) -> Self {
        let interrupt = session.interrupt_handle();
        Self {
            inner: Arc::new(Mutex::new(session)),
            interrupt,
        }
    }

    /// Bind and execute `request` off the async executor.
    pub async fn request(&self, request: RequestDescriptor) -> Result<Response, Error> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut guard = UnblockGuard {
            cancelled: Arc::clone(&cancelled),
            interrupt: self.interrupt.clone(),
            armed: true,
        };
        let inner = Arc::clone(&self.inner);

        let joined = tokio::task::spawn_blocking(move || {
            let mut session = inner.lock();
            if cancelled.load(Ordering::SeqCst) {
                return Err(cancelled_before_start());
            }
            session.bind(&request)?;
            session.execute_unless(|| cancelled.load(Ordering::SeqCst))
        })
        .await;
        guard.armed = false;

        match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(Error::from_code(
                ResultCode::ABORTED_BY_CALLBACK,
                "blocking pool shut down",
            )),
        }
    }

    /// Interrupt whatever call is in flight.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run `f` against the session, waiting for any in-flight call.
    /// Meant for configuration calls such as `set_debug_sink`.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

struct UnblockGuard {
    cancelled: Arc<AtomicBool>,
    interrupt: InterruptHandle,
    armed: bool,
}

impl Drop for UnblockGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("async call dropped, interrupting blocking transfer");
            self.cancelled.store(true, Ordering::SeqCst);
            self.interrupt.interrupt();
        }
    }
}
