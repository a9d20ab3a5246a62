//! `Session`: the execution controller.
//!
//! # State machine
//! ```text
//! Idle ──bind──► Bound ──execute──► Performing ──► Completed ─┐
//!   ▲   (config error: reset, stay Idle)         ├─► Failed ────┼─► CleanedUp ─► Idle
//!   │                                            └─► Interrupted┘
//!   └───────────────────────────────────────────────────────────────────────────┘
//! ```
//! Cleanup is owned by the `InFlight` guard created before the transfer
//! starts: whatever path leaves `execute` (success, classified error,
//! a failure while building the response, or a panic) drops the guard,
//! which resets the handle exactly once.
//!
//! The native handle, its connections and its cookies are reused across
//! calls; only `reset` recycles them.

use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::binder;
use crate::buffer::GrowableBuffer;
use crate::config::SessionConfig;
use crate::error::{ConfigError, Error};
use crate::handle::{DebugSink, TransportHandle};
use crate::interrupt::{InterruptHandle, InterruptReason, Progress};
use crate::registry::SessionRegistry;
use crate::request::RequestDescriptor;
use crate::response::{self, Response};
use crate::transport::{OptionKey, ResultCode, Transport};
use crate::util;

/// Where a call currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Bound,
    Performing,
    Completed,
    Failed,
    Interrupted,
    CleanedUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CookieStore {
    Memory,
    Jar(PathBuf),
}

/// One logical client: a reusable transport handle plus its header and
/// body buffers. At most one call is in flight at a time.
pub struct Session<T: Transport> {
    id: Uuid,
    handle: TransportHandle<T>,
    header_buffer: GrowableBuffer,
    body_buffer: GrowableBuffer,
    cookies: Option<CookieStore>,
    default_charset: Option<String>,
    bound_url: String,
    phase: Phase,
}

impl<T: Transport> Session<T> {
    /// Session registered with the process-wide registry.
    pub fn new(transport: T) -> Self {
        Self::with_registry(transport, Arc::clone(SessionRegistry::global()))
    }

    pub fn with_registry(transport: T, registry: Arc<SessionRegistry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: TransportHandle::new(transport, registry),
            header_buffer: GrowableBuffer::new(),
            body_buffer: GrowableBuffer::new(),
            cookies: None,
            default_charset: None,
            bound_url: String::new(),
            phase: Phase::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn handle(&self) -> &TransportHandle<T> {
        &self.handle
    }

    /// Configure the handle for `request`. A configuration error leaves the
    /// session idle with a clean handle and never reaches the transport.
    pub fn bind(&mut self, request: &RequestDescriptor) -> Result<(), Error> {
        if self.phase == Phase::Bound {
            self.handle.reset();
            self.phase = Phase::Idle;
        }
        if let Err(err) = self.apply(request) {
            debug!(session = %self.id, error = %err, "bind failed");
            self.handle.reset();
            self.phase = Phase::Idle;
            return Err(err);
        }
        self.bound_url = request.url.clone().unwrap_or_default();
        self.phase = Phase::Bound;
        debug!(session = %self.id, method = %request.method(), url = %self.bound_url, "bound");
        Ok(())
    }

    fn apply(&mut self, request: &RequestDescriptor) -> Result<(), Error> {
        binder::bind(&mut self.handle, request)?;
        match &self.cookies {
            None => {}
            Some(CookieStore::Memory) => {
                self.handle.set_option(OptionKey::CookieFile, "")?;
            }
            Some(CookieStore::Jar(path)) => {
                let path = path.to_string_lossy().into_owned();
                self.handle.set_option(OptionKey::CookieFile, path.as_str())?;
                self.handle.set_option(OptionKey::CookieJar, path)?;
            }
        }
        Ok(())
    }

    /// Perform the bound call. Cleanup runs before this returns, whatever
    /// the outcome.
    pub fn execute(&mut self) -> Result<Response, Error> {
        self.execute_unless(|| false)
    }

    /// `execute`, abandoned before the transport is reached when
    /// `cancelled` holds once the interrupt flag has been cleared.
    pub(crate) fn execute_unless(
        &mut self,
        cancelled: impl FnOnce() -> bool,
    ) -> Result<Response, Error> {
        if self.phase != Phase::Bound {
            return Err(ConfigError::NotBound.into());
        }
        let Session {
            id,
            handle,
            header_buffer,
            body_buffer,
            cookies,
            default_charset,
            bound_url,
            phase,
        } = self;
        let mut call = InFlight {
            handle,
            phase,
            session: *id,
        };

        call.state().clear_interrupt();
        call.state().reset_progress();
        if cancelled() {
            call.enter(Phase::Interrupted);
            return Err(cancelled_before_start());
        }

        header_buffer.clear();
        body_buffer.clear();
        call.enter(Phase::Performing);
        let code = match call.perform(header_buffer, body_buffer) {
            Ok(code) => code,
            Err(err) => {
                call.enter(Phase::Failed);
                return Err(err);
            }
        };

        if code.is_ok() {
            call.enter(Phase::Completed);
            if matches!(cookies, Some(CookieStore::Jar(_))) {
                if let Err(err) = call.set_option(OptionKey::CookieList, "FLUSH") {
                    warn!(session = %id, error = %err, "unable to flush cookie jar");
                }
            }
            let body = (!call.has_download_file()).then(|| body_buffer.to_owned_bytes());
            let handle: &TransportHandle<T> = &call;
            Ok(response::build(
                |key| handle.info(key),
                bound_url,
                header_buffer.to_owned_bytes(),
                body,
                default_charset.clone(),
            ))
        } else if code == ResultCode::ABORTED_BY_CALLBACK {
            call.enter(Phase::Interrupted);
            let message = match call.state().interrupt_reason() {
                Some(InterruptReason::DownloadOverflow) => "download byte limit exceeded",
                _ => "operation aborted by interrupt",
            };
            Err(Error::from_code(code, message))
        } else {
            call.enter(Phase::Failed);
            Err(Error::from_code(code, call.error_message()))
        }
    }

    /// `bind` followed by `execute`.
    pub fn request(&mut self, request: &RequestDescriptor) -> Result<Response, Error> {
        self.bind(request)?;
        self.execute()
    }

    /// Ask the in-flight call, if any, to abort.
    pub fn interrupt(&self) {
        self.handle.state().interrupt(InterruptReason::Abort);
    }

    /// Handle for interrupting this session from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.handle.interrupt_handle()
    }

    pub fn progress(&self) -> Progress {
        self.handle.state().progress()
    }

    /// Destroy the native handle and open a fresh one. Drops connections,
    /// cookies held in memory and the debug sink.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.header_buffer.clear();
        self.body_buffer.clear();
        self.phase = Phase::Idle;
        self.handle.recycle()?;
        debug!(session = %self.id, "handle recycled");
        Ok(())
    }

    /// Write the transport's wire trace to `path`, or to stderr for `None`.
    pub fn set_debug_sink(&mut self, path: Option<&Path>) -> Result<(), Error> {
        let sink = match path {
            Some(path) => {
                DebugSink::File(File::create(path).map_err(|err| ConfigError::file(path, err))?)
            }
            None => DebugSink::Stderr,
        };
        self.handle.set_debug_sink(Some(sink));
        Ok(())
    }

    pub fn disable_debug_sink(&mut self) {
        self.handle.set_debug_sink(None);
    }

    /// Keep cookies across calls: in memory for `None`, else read from and
    /// flushed to the jar file at `path` after every successful call.
    pub fn enable_cookie_persistence(&mut self, path: Option<&Path>) -> Result<(), Error> {
        let store = match path {
            Some(path) => {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|err| ConfigError::file(path, err))?;
                CookieStore::Jar(path.to_path_buf())
            }
            None => CookieStore::Memory,
        };
        self.cookies = Some(store);
        Ok(())
    }

    /// Charset reported by responses whose `Content-Type` names none.
    pub fn set_default_charset(&mut self, charset: Option<String>) {
        self.default_charset = charset;
    }

    /// Adopt the settings of `config` that outlive a single call. Per-call
    /// defaults reach the transport through `SessionConfig::request`.
    pub fn apply_config(&mut self, config: &SessionConfig) {
        self.set_default_charset(config.default_response_charset.clone());
    }

    /// `application/x-www-form-urlencoded` body for `fields`.
    pub fn url_encoded_form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> String
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        util::url_encoded_form(fields)
    }
}

pub(crate) fn cancelled_before_start() -> Error {
    Error::from_code(
        ResultCode::ABORTED_BY_CALLBACK,
        "call cancelled before it started",
    )
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// The in-flight call. Dropping it is the only way a call ends, and it
/// always resets the handle.
struct InFlight<'a, T: Transport> {
    handle: &'a mut TransportHandle<T>,
    phase: &'a mut Phase,
    session: Uuid,
}

impl<T: Transport> InFlight<'_, T> {
    fn enter(&mut self, phase: Phase) {
        *self.phase = phase;
        debug!(session = %self.session, ?phase, "call phase");
    }
}

impl<T: Transport> Deref for InFlight<'_, T> {
    type Target = TransportHandle<T>;

    fn deref(&self) -> &Self::Target {
        self.handle
    }
}

impl<T: Transport> DerefMut for InFlight<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle
    }
}

impl<T: Transport> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        self.handle.reset();
        self.enter(Phase::CleanedUp);
        *self.phase = Phase::Idle;
    }
}
