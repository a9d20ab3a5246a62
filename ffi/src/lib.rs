//! C-ABI wrapper around `tether-core`.
//!
//! # Overview
//! Exposes sessions backed by the ureq transport through `extern "C"`
//! functions so any language with a C FFI can run HTTP calls, interrupt
//! them from another thread and read the results without touching Rust
//! types.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - A session is an opaque `FfiSession*`; a call is described by a plain
//!   `FfiRequest` the caller owns and answered by an `FfiResult` the library
//!   owns.
//! - Interrupt handles are separate opaque objects, so another thread can
//!   abort a call while `tether_session_execute` is blocked.
//! - The C caller owns all returned pointers and must call the matching
//!   `tether_*_free` function to release them.

pub mod types;

use std::any::Any;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use tether_core::{interrupt_all_sessions, Error, Session, UreqTransport};

use types::*;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic in tether".to_string())
}

/// Optional path argument; null means "none".
fn optional_path(path: *const c_char) -> Result<Option<PathBuf>, FfiErrorKind> {
    if path.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(path) }
        .to_str()
        .map(|path| Some(PathBuf::from(path)))
        .map_err(|_| FfiErrorKind::InvalidRequest)
}

fn error_kind(result: Result<(), Error>) -> FfiErrorKind {
    match result {
        Ok(()) => FfiErrorKind::Ok,
        Err(err) => FfiErrorKind::from(&err),
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Create a new session registered for `tether_interrupt_all`.
///
/// Returns null if an internal panic occurs. The caller must free the
/// returned pointer with `tether_session_free`.
#[unsafe(no_mangle)]
pub extern "C" fn tether_session_new() -> *mut FfiSession {
    catch_unwind(|| {
        let session = Session::new(UreqTransport::new());
        Box::into_raw(Box::new(FfiSession { inner: session }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a session created by `tether_session_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn tether_session_free(session: *mut FfiSession) {
    if !session.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(session) });
        }));
    }
}

/// Recycle the session's native handle. Cookie and debug settings stay.
#[unsafe(no_mangle)]
pub extern "C" fn tether_session_reset(session: *mut FfiSession) -> FfiErrorKind {
    if session.is_null() {
        return FfiErrorKind::NullArg;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let session = unsafe { &mut *session };
        error_kind(session.inner.reset())
    }))
    .unwrap_or(FfiErrorKind::Panic)
}

// ---------------------------------------------------------------------------
// Session settings
// ---------------------------------------------------------------------------

/// Write the wire trace of every later call to `path`, or to stderr when
/// `path` is null.
#[unsafe(no_mangle)]
pub extern "C" fn tether_session_set_debug_file(
    session: *mut FfiSession,
    path: *const c_char,
) -> FfiErrorKind {
    if session.is_null() {
        return FfiErrorKind::NullArg;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let session = unsafe { &mut *session };
        match optional_path(path) {
            Ok(path) => error_kind(session.inner.set_debug_sink(path.as_deref())),
            Err(kind) => kind,
        }
    }))
    .unwrap_or(FfiErrorKind::Panic)
}

/// Keep cookies across calls: in memory when `path` is null, else in the
/// cookie jar file at `path`.
#[unsafe(no_mangle)]
pub extern "C" fn tether_session_handle_cookies(
    session: *mut FfiSession,
    path: *const c_char,
) -> FfiErrorKind {
    if session.is_null() {
        return FfiErrorKind::NullArg;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let session = unsafe { &mut *session };
        match optional_path(path) {
            Ok(path) => error_kind(session.inner.enable_cookie_persistence(path.as_deref())),
            Err(kind) => kind,
        }
    }))
    .unwrap_or(FfiErrorKind::Panic)
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// Bind `request` to the session and perform it, blocking until the call
/// finishes, fails or is interrupted.
///
/// Never returns null. Free the result with `tether_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn tether_session_execute(
    session: *mut FfiSession,
    request: *const FfiRequest,
) -> *mut FfiResult {
    if session.is_null() {
        return FfiResult::null_arg("session");
    }
    if request.is_null() {
        return FfiResult::null_arg("request");
    }
    catch_unwind(AssertUnwindSafe(|| {
        let session = unsafe { &mut *session };
        let descriptor = match unsafe { (*request).to_descriptor() } {
            Ok(descriptor) => descriptor,
            Err(message) => return FfiResult::invalid_request(&message),
        };
        match session.inner.request(&descriptor) {
            Ok(response) => FfiResult::ok(response),
            Err(err) => FfiResult::from_error(&err),
        }
    }))
    .unwrap_or_else(|payload| FfiResult::panic(&panic_message(payload)))
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

/// Get a handle that interrupts `session` from any thread. It stays valid
/// after the session is freed. Free it with `tether_interrupt_handle_free`.
#[unsafe(no_mangle)]
pub extern "C" fn tether_session_interrupt_handle(
    session: *const FfiSession,
) -> *mut FfiInterruptHandle {
    if session.is_null() {
        return std::ptr::null_mut();
    }
    catch_unwind(AssertUnwindSafe(|| {
        let session = unsafe { &*session };
        let handle = session.inner.interrupt_handle();
        Box::into_raw(Box::new(FfiInterruptHandle { inner: handle }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Abort the call in flight on the handle's session, if any.
#[unsafe(no_mangle)]
pub extern "C" fn tether_interrupt(handle: *const FfiInterruptHandle) {
    if !handle.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            unsafe { &*handle }.inner.interrupt();
        }));
    }
}

/// Free an interrupt handle. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn tether_interrupt_handle_free(handle: *mut FfiInterruptHandle) {
    if !handle.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(handle) });
        }));
    }
}

/// Interrupt every live session. Returns how many were signalled.
#[unsafe(no_mangle)]
pub extern "C" fn tether_interrupt_all() -> u32 {
    catch_unwind(|| u32::try_from(interrupt_all_sessions()).unwrap_or(u32::MAX)).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a result returned by `tether_session_execute`. Safe to call with
/// null.
#[unsafe(no_mangle)]
pub extern "C" fn tether_free_result(result: *mut FfiResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let mut result = unsafe { Box::from_raw(result) };
        if !result.error_message.is_null() {
            drop(unsafe { CString::from_raw(result.error_message) });
        }
        if !result.effective_url.is_null() {
            drop(unsafe { CString::from_raw(result.effective_url) });
        }
        unsafe {
            result.headers.release();
            result.body.release();
        }
    }));
}
