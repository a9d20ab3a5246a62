//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Inputs (`FfiRequest`, `FfiHeader`) are borrowed views the C caller owns;
//! the library only reads them for the duration of a call. Outputs
//! (`FfiResult` and everything it points to) are allocated here and must be
//! released with `tether_free_result`. Conversion code lives here to keep
//! `lib.rs` focused on the `extern "C"` surface.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::time::Duration;

use tether_core::{
    Body, Error, ErrorKind, InterruptHandle, Method, RequestDescriptor, Response, Session,
    UreqTransport,
};

/// Opaque handle to a session. C callers receive a pointer to this and pass
/// it back into every session function.
pub struct FfiSession {
    pub(crate) inner: Session<UreqTransport>,
}

/// Opaque handle for interrupting a session from another thread.
pub struct FfiInterruptHandle {
    pub(crate) inner: InterruptHandle,
}

// ---------------------------------------------------------------------------
// Request input (caller-owned, read only)
// ---------------------------------------------------------------------------

/// HTTP method as a C enum. `Custom` takes its verb from
/// `FfiRequest::custom_method`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Patch = 3,
    Delete = 4,
    Head = 5,
    Custom = 6,
}

/// A single request header as a key-value pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// One HTTP call described as C-compatible plain data.
///
/// Null pointers and zero values mean "not set". `body` (with `body_len`)
/// and `upload_file` are alternative body sources; setting both is an
/// error. `max_redirects` below zero leaves redirect handling at the
/// transport default.
#[repr(C)]
pub struct FfiRequest {
    pub method: FfiMethod,
    pub custom_method: *const c_char,
    pub url: *const c_char,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body: *const u8,
    pub body_len: usize,
    pub upload_file: *const c_char,
    pub download_file: *const c_char,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_redirects: i32,
    pub insecure: bool,
    pub cacert: *const c_char,
    pub tls_version: *const c_char,
    pub http_version: *const c_char,
    pub force_ipv4: bool,
    pub automatic_content_decoding: bool,
    pub download_byte_limit: u64,
}

/// Read an optional C string field.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn optional_str(ptr: *const c_char, field: &str) -> Result<Option<String>, String> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|value| Some(value.to_string()))
        .map_err(|_| format!("{field} is not valid UTF-8"))
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

impl FfiRequest {
    /// Build the descriptor this request describes.
    ///
    /// # Safety
    /// Every non-null pointer must be valid for reads: strings
    /// NUL-terminated, `headers` for `headers_len` entries, `body` for
    /// `body_len` bytes.
    pub(crate) unsafe fn to_descriptor(&self) -> Result<RequestDescriptor, String> {
        let method = match self.method {
            FfiMethod::Get => Method::Get,
            FfiMethod::Post => Method::Post,
            FfiMethod::Put => Method::Put,
            FfiMethod::Patch => Method::Patch,
            FfiMethod::Delete => Method::Delete,
            FfiMethod::Head => Method::Head,
            FfiMethod::Custom => {
                let verb = unsafe { optional_str(self.custom_method, "custom_method") }?
                    .ok_or_else(|| "custom_method is required for Custom".to_string())?;
                Method::Custom(verb)
            }
        };

        let mut request = RequestDescriptor {
            method: Some(method),
            url: unsafe { optional_str(self.url, "url") }?,
            ..RequestDescriptor::default()
        };

        if !self.headers.is_null() {
            let headers =
                unsafe { std::slice::from_raw_parts(self.headers, self.headers_len as usize) };
            for header in headers {
                let key = unsafe { optional_str(header.key, "header key") }?.unwrap_or_default();
                let value =
                    unsafe { optional_str(header.value, "header value") }?.unwrap_or_default();
                request.headers.push((key, value));
            }
        }

        let upload = unsafe { optional_str(self.upload_file, "upload_file") }?;
        request.body = match (self.body.is_null(), upload) {
            (false, Some(_)) => {
                return Err("body and upload_file are mutually exclusive".to_string())
            }
            (false, None) => {
                let bytes = unsafe { std::slice::from_raw_parts(self.body, self.body_len) };
                Some(Body::Bytes(bytes.to_vec()))
            }
            (true, Some(path)) => Some(Body::File(PathBuf::from(path))),
            (true, None) => None,
        };
        request.download_to =
            unsafe { optional_str(self.download_file, "download_file") }?.map(PathBuf::from);

        request.timeout = millis(self.timeout_ms);
        request.connect_timeout = millis(self.connect_timeout_ms);
        request.max_redirects = u32::try_from(self.max_redirects).ok();
        request.insecure = self.insecure;
        request.cacert = unsafe { optional_str(self.cacert, "cacert") }?.map(PathBuf::from);
        request.tls_version = unsafe { optional_str(self.tls_version, "tls_version") }?;
        request.http_version = unsafe { optional_str(self.http_version, "http_version") }?;
        request.force_ipv4 = self.force_ipv4;
        request.automatic_content_decoding = self.automatic_content_decoding;
        request.download_byte_limit =
            (self.download_byte_limit > 0).then_some(self.download_byte_limit);
        Ok(request)
    }
}

impl Default for FfiRequest {
    fn default() -> Self {
        Self {
            method: FfiMethod::Get,
            custom_method: std::ptr::null(),
            url: std::ptr::null(),
            headers: std::ptr::null(),
            headers_len: 0,
            body: std::ptr::null(),
            body_len: 0,
            upload_file: std::ptr::null(),
            download_file: std::ptr::null(),
            timeout_ms: 0,
            connect_timeout_ms: 0,
            max_redirects: -1,
            insecure: false,
            cacert: std::ptr::null(),
            tls_version: std::ptr::null(),
            http_version: std::ptr::null(),
            force_ipv4: false,
            automatic_content_decoding: false,
            download_byte_limit: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Outcome category of an FFI call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorKind {
    Ok = 0,
    UnsupportedProtocol = 1,
    MalformedUrl = 2,
    HostResolutionFailed = 3,
    ConnectionFailed = 4,
    PartialFile = 5,
    Timeout = 6,
    TooManyRedirects = 7,
    Aborted = 8,
    UnsupportedTlsVersion = 9,
    UnsupportedHttpVersion = 10,
    UnsupportedFeature = 11,
    Generic = 12,
    /// The request was rejected before any network activity.
    InvalidRequest = 13,
    NullArg = 14,
    Panic = 15,
}

impl From<&Error> for FfiErrorKind {
    fn from(err: &Error) -> Self {
        match err.kind() {
            ErrorKind::UnsupportedProtocol => FfiErrorKind::UnsupportedProtocol,
            ErrorKind::MalformedUrl => FfiErrorKind::MalformedUrl,
            ErrorKind::HostResolutionFailed => FfiErrorKind::HostResolutionFailed,
            ErrorKind::ConnectionFailed => FfiErrorKind::ConnectionFailed,
            ErrorKind::PartialFile => FfiErrorKind::PartialFile,
            ErrorKind::Timeout => FfiErrorKind::Timeout,
            ErrorKind::TooManyRedirects => FfiErrorKind::TooManyRedirects,
            ErrorKind::Aborted => FfiErrorKind::Aborted,
            ErrorKind::UnsupportedTlsVersion => FfiErrorKind::UnsupportedTlsVersion,
            ErrorKind::UnsupportedHttpVersion => FfiErrorKind::UnsupportedHttpVersion,
            ErrorKind::UnsupportedFeature => FfiErrorKind::UnsupportedFeature,
            ErrorKind::Generic if err.is_config() => FfiErrorKind::InvalidRequest,
            ErrorKind::Generic => FfiErrorKind::Generic,
        }
    }
}

/// Owned byte buffer handed to C. `data` is null when `len` is zero.
#[repr(C)]
pub struct FfiBytes {
    pub data: *mut u8,
    pub len: usize,
}

impl FfiBytes {
    pub(crate) fn empty() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }

    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        let boxed = bytes.into_boxed_slice();
        let len = boxed.len();
        Self {
            data: Box::into_raw(boxed).cast::<u8>(),
            len,
        }
    }

    /// # Safety
    /// Must come from `from_vec` and not have been released before.
    pub(crate) unsafe fn release(&mut self) {
        if !self.data.is_null() {
            let slice = std::ptr::slice_from_raw_parts_mut(self.data, self.len);
            drop(unsafe { Box::from_raw(slice) });
        }
        *self = Self::empty();
    }
}

/// Result envelope for `tether_session_execute`.
///
/// On success `error_kind` is `Ok`, `error_message` is null and the response
/// fields are filled; `has_body` is false when the body went to a file. On
/// failure `error_kind` names the category, `error_message` is a
/// human-readable C string and the response fields are empty.
///
/// The result and every pointer in it are released together by
/// `tether_free_result`; never free a field on its own.
#[repr(C)]
pub struct FfiResult {
    pub error_kind: FfiErrorKind,
    pub error_message: *mut c_char,
    pub status: u16,
    pub effective_url: *mut c_char,
    pub redirect_count: u32,
    pub headers: FfiBytes,
    pub body: FfiBytes,
    pub has_body: bool,
}

/// Heap C string from arbitrary text; interior NULs are dropped.
pub(crate) fn c_string(text: impl Into<Vec<u8>>) -> *mut c_char {
    let cstring = CString::new(text).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|byte| *byte != 0);
        CString::new(bytes).unwrap_or_default()
    });
    cstring.into_raw()
}

impl FfiResult {
    fn failure(error_kind: FfiErrorKind, message: &str) -> *mut Self {
        Box::into_raw(Box::new(FfiResult {
            error_kind,
            error_message: c_string(message),
            status: 0,
            effective_url: std::ptr::null_mut(),
            redirect_count: 0,
            headers: FfiBytes::empty(),
            body: FfiBytes::empty(),
            has_body: false,
        }))
    }

    /// Build a success result from a response.
    pub(crate) fn ok(response: Response) -> *mut Self {
        let status = response.status();
        let effective_url = c_string(response.url());
        let redirect_count = response.redirect_count();
        let headers = FfiBytes::from_vec(response.raw_headers().to_vec());
        let body = response.into_body();
        let has_body = body.is_some();
        Box::into_raw(Box::new(FfiResult {
            error_kind: FfiErrorKind::Ok,
            error_message: std::ptr::null_mut(),
            status,
            effective_url,
            redirect_count,
            headers,
            body: body.map_or_else(FfiBytes::empty, FfiBytes::from_vec),
            has_body,
        }))
    }

    /// Build an error result from a session error.
    pub(crate) fn from_error(err: &Error) -> *mut Self {
        Self::failure(err.into(), &err.to_string())
    }

    /// Build an error result for a request the descriptor conversion rejected.
    pub(crate) fn invalid_request(message: &str) -> *mut Self {
        Self::failure(FfiErrorKind::InvalidRequest, message)
    }

    /// Build an error result for a null argument.
    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::failure(FfiErrorKind::NullArg, &format!("null argument: {name}"))
    }

    /// Build an error result for a caught panic.
    pub(crate) fn panic(message: &str) -> *mut Self {
        Self::failure(FfiErrorKind::Panic, message)
    }
}
