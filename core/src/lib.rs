//! Blocking HTTP request execution on top of a reusable transport handle.
//!
//! # Overview
//! A `Session` owns one native transport handle and drives it through a
//! strict per-call lifecycle: a `RequestDescriptor` is bound onto the handle
//! as a sequence of typed options, the transfer is performed with header and
//! body data streamed into growable buffers, the outcome is classified into
//! a `Response` or an `Error`, and the handle is reset for the next call.
//!
//! # Design
//! - The transport sits behind the `Transport` / `NativeHandle` traits; the
//!   bundled implementation is `UreqTransport` (feature `ureq`).
//! - Cleanup is tied to a guard's `Drop`, so every exit path of `execute`
//!   resets the handle exactly once.
//! - Interrupts are cooperative: a shared flag is checked at every progress
//!   callback and aborts the transfer with `ErrorKind::Aborted`.
//! - `SessionRegistry` tracks live sessions weakly so shutdown can interrupt
//!   them all.
//! - `AsyncSession` (feature `tokio`) moves calls onto the blocking pool and
//!   interrupts them when the awaiting future is dropped.

#[cfg(feature = "tokio")]
pub mod background;
pub mod binder;
pub mod buffer;
pub mod config;
#[cfg(feature = "ureq")]
mod cookies;
pub mod error;
pub mod handle;
pub mod interrupt;
pub mod registry;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;
#[cfg(feature = "ureq")]
pub mod ureq_transport;
pub mod util;

#[cfg(feature = "tokio")]
pub use background::AsyncSession;
pub use buffer::GrowableBuffer;
pub use config::SessionConfig;
pub use error::{ConfigError, Error, ErrorKind};
pub use interrupt::{InterruptHandle, Progress};
pub use registry::{interrupt_all_sessions, SessionRegistry};
pub use request::{
    AuthType, Body, ClientCert, Credentials, HttpVersion, LowSpeed, Method, Multipart, ProxyType,
    RequestDescriptor, TlsVersion,
};
pub use response::Response;
pub use session::{Phase, Session};
pub use transport::{InfoKey, InfoValue, NativeHandle, OptionKey, OptionValue, ResultCode, Transport};
#[cfg(feature = "ureq")]
pub use ureq_transport::UreqTransport;
