//! `TransportHandle`: one lazily opened native handle plus everything a call
//! attaches to it (header list, multipart form, open files, upload source,
//! progress policy).
//!
//! # Lifecycle
//! ```text
//! new ──ensure_open──► open ──set_option*──► perform ──reset──► open
//!                        │                                       │
//!                        └──────────── recycle / destroy ◄───────┘
//! ```
//! `reset` drops every per-call attachment and returns the native handle to
//! its defaults while keeping it (and its connections and cookies) alive.
//! `recycle` destroys the native handle and opens a fresh one. The handle is
//! registered with its `SessionRegistry` exactly while a native handle
//! exists.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::buffer::GrowableBuffer;
use crate::error::{ConfigError, Error};
use crate::interrupt::{InterruptHandle, InterruptReason, Progress, TransferState};
use crate::registry::{Registration, SessionRegistry};
use crate::request::ProgressObserver;
use crate::transport::{
    DebugKind, Feature, Form, InfoKey, InfoValue, NativeHandle, OptionKey, OptionValue,
    ResultCode, TransferIo, Transport,
};

/// Capacity of the diagnostic scratch buffer, terminator included.
pub const ERROR_BUFFER_SIZE: usize = 256;

/// Destination of the transport's verbose wire trace.
pub enum DebugSink {
    Stderr,
    File(File),
}

impl DebugSink {
    fn write_record(&mut self, kind: DebugKind, data: &[u8]) -> io::Result<()> {
        match self {
            DebugSink::Stderr => write_trace(&mut io::stderr().lock(), kind, data),
            DebugSink::File(file) => write_trace(file, kind, data),
        }
    }
}

impl fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugSink::Stderr => f.write_str("Stderr"),
            DebugSink::File(_) => f.write_str("File"),
        }
    }
}

fn write_trace(out: &mut dyn Write, kind: DebugKind, data: &[u8]) -> io::Result<()> {
    match kind {
        DebugKind::Text => {
            out.write_all(b"* ")?;
            out.write_all(data)
        }
        DebugKind::HeaderIn => {
            out.write_all(b"< ")?;
            out.write_all(data)
        }
        DebugKind::HeaderOut => {
            out.write_all(b"> ")?;
            out.write_all(data)
        }
        DebugKind::DataIn => writeln!(out, "{{ [{} bytes data]", data.len()),
        DebugKind::DataOut => writeln!(out, "}} [{} bytes data]", data.len()),
    }
}

/// Where upload bytes are read from during `perform`.
#[derive(Debug, Default)]
pub enum UploadSource {
    #[default]
    None,
    Bytes(Cursor<Vec<u8>>),
    File(File),
}

impl UploadSource {
    pub fn is_none(&self) -> bool {
        matches!(self, UploadSource::None)
    }
}

pub struct TransportHandle<T: Transport> {
    transport: T,
    native: Option<T::Handle>,
    error_buffer: String,
    headers: Option<Vec<String>>,
    form: Option<Form>,
    debug_sink: Option<DebugSink>,
    download_file: Option<File>,
    upload: UploadSource,
    observer: Option<ProgressObserver>,
    download_byte_limit: Option<u64>,
    state: Arc<TransferState>,
    registry: Arc<SessionRegistry>,
    registration: Option<Registration>,
}

impl<T: Transport> TransportHandle<T> {
    /// Nothing is opened until the first `ensure_open`.
    pub fn new(transport: T, registry: Arc<SessionRegistry>) -> Self {
        Self {
            transport,
            native: None,
            error_buffer: String::with_capacity(ERROR_BUFFER_SIZE),
            headers: None,
            form: None,
            debug_sink: None,
            download_file: None,
            upload: UploadSource::None,
            observer: None,
            download_byte_limit: None,
            state: Arc::new(TransferState::new()),
            registry,
            registration: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.native.is_some()
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.transport.supports(feature)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open the native handle if needed and apply the session-wide
    /// defaults. Idempotent.
    pub fn ensure_open(&mut self) -> Result<(), Error> {
        if self.native.is_some() {
            return Ok(());
        }
        let native = self
            .transport
            .open()
            .map_err(|code| Error::from_code(code, "unable to allocate a transport handle"))?;
        self.native = Some(native);
        self.apply_defaults()?;
        self.registration = Some(self.registry.register(&self.state));
        Ok(())
    }

    fn apply_defaults(&mut self) -> Result<(), Error> {
        self.set_option(OptionKey::NoSignal, 1i64)?;
        self.set_option(OptionKey::NoProgress, 0i64)?;
        Ok(())
    }

    /// Apply one option, after checking its value against the key's kind.
    pub fn set_option(
        &mut self,
        key: OptionKey,
        value: impl Into<OptionValue>,
    ) -> Result<(), Error> {
        let value = value.into();
        if value.kind() != key.kind() {
            return Err(ConfigError::OptionKind {
                option: key.name(),
                expected: key.kind(),
                found: value.kind(),
            }
            .into());
        }
        self.ensure_open()?;
        trace!(option = key.name(), "set option");
        match self.native.as_mut() {
            Some(native) => native.set_option(key, value).map_err(Error::from),
            None => Err(Error::from_code(ResultCode::OUT_OF_MEMORY, "")),
        }
    }

    /// Read back an introspection field; `None` before any transfer.
    pub fn info(&self, key: InfoKey) -> Option<InfoValue> {
        self.native.as_ref().and_then(|native| native.info(key))
    }

    pub fn info_by_name(&self, name: &str) -> Result<Option<InfoValue>, ConfigError> {
        Ok(self.info(InfoKey::from_name(name)?))
    }

    /// Diagnostic text the transport left for the last failing call.
    pub fn error_message(&self) -> &str {
        &self.error_buffer
    }

    /// Attach the header list; it stays owned here until `reset`.
    pub fn set_header_list(&mut self, headers: Vec<String>) -> Result<(), Error> {
        self.set_option(OptionKey::HttpHeader, headers.clone())?;
        self.headers = Some(headers);
        Ok(())
    }

    pub fn header_list(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    pub fn set_form(&mut self, form: Form) -> Result<(), Error> {
        self.set_option(OptionKey::HttpPost, form.clone())?;
        self.form = Some(form);
        Ok(())
    }

    pub fn form(&self) -> Option<&Form> {
        self.form.as_ref()
    }

    /// Send the response body to `file` instead of the body buffer.
    pub fn set_download_file(&mut self, file: File) {
        self.download_file = Some(file);
    }

    pub fn has_download_file(&self) -> bool {
        self.download_file.is_some()
    }

    pub fn set_upload(&mut self, upload: UploadSource) {
        self.upload = upload;
    }

    pub fn has_upload(&self) -> bool {
        !self.upload.is_none()
    }

    pub fn set_progress_observer(&mut self, observer: Option<ProgressObserver>) {
        self.observer = observer;
    }

    pub fn set_download_byte_limit(&mut self, limit: Option<u64>) {
        self.download_byte_limit = limit;
    }

    /// Replace the debug sink. The previous sink, if any, is closed.
    pub fn set_debug_sink(&mut self, sink: Option<DebugSink>) {
        self.debug_sink = sink;
    }

    pub fn has_debug_sink(&self) -> bool {
        self.debug_sink.is_some()
    }

    pub fn state(&self) -> &Arc<TransferState> {
        &self.state
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle::new(Arc::clone(&self.state))
    }

    /// Run the transfer. Header bytes go to `header`; body bytes go to the
    /// download file when one is attached, else to `body`.
    pub fn perform(
        &mut self,
        header: &mut GrowableBuffer,
        body: &mut GrowableBuffer,
    ) -> Result<ResultCode, Error> {
        self.ensure_open()?;
        self.error_buffer.clear();

        let Self {
            native,
            error_buffer,
            debug_sink,
            download_file,
            upload,
            observer,
            download_byte_limit,
            state,
            ..
        } = self;
        let Some(native) = native.as_mut() else {
            return Err(Error::from_code(ResultCode::OUT_OF_MEMORY, ""));
        };

        let mut transfer = Transfer {
            header,
            body: match download_file.as_mut() {
                Some(file) => BodySink::File(file),
                None => BodySink::Memory(body),
            },
            upload,
            state: &**state,
            observer: observer.as_ref(),
            download_byte_limit: *download_byte_limit,
            debug_sink: debug_sink.as_mut(),
            error_buffer,
        };
        Ok(native.perform(&mut transfer))
    }

    /// Return to a clean per-call state: native options back to defaults,
    /// header list and form freed, files closed, upload source and progress
    /// policy dropped. Safe to call when nothing was attached.
    pub fn reset(&mut self) {
        self.headers = None;
        self.form = None;
        self.download_file = None;
        self.upload = UploadSource::None;
        self.observer = None;
        self.download_byte_limit = None;
        if let Some(native) = self.native.as_mut() {
            native.reset();
            if let Err(err) = self.apply_defaults() {
                warn!(error = %err, "unable to restore handle defaults after reset");
            }
        }
    }

    /// Destroy the native handle and open a new one. Connection and cookie
    /// state is lost; the debug sink is closed.
    pub fn recycle(&mut self) -> Result<(), Error> {
        self.destroy();
        self.ensure_open()
    }

    /// Release the native handle and close the debug sink. Idempotent.
    pub fn destroy(&mut self) {
        self.reset();
        self.native = None;
        self.registration = None;
        self.debug_sink = None;
        self.error_buffer.clear();
    }
}

impl<T: Transport> Drop for TransportHandle<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T: Transport> fmt::Debug for TransportHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("open", &self.is_open())
            .field("headers", &self.headers)
            .field("form", &self.form)
            .field("debug_sink", &self.debug_sink)
            .field("download_file", &self.download_file.is_some())
            .field("upload", &self.upload)
            .finish_non_exhaustive()
    }
}

enum BodySink<'a> {
    Memory(&'a mut GrowableBuffer),
    File(&'a mut File),
}

/// Callback context handed to the transport for the duration of `perform`.
struct Transfer<'a> {
    header: &'a mut GrowableBuffer,
    body: BodySink<'a>,
    upload: &'a mut UploadSource,
    state: &'a TransferState,
    observer: Option<&'a ProgressObserver>,
    download_byte_limit: Option<u64>,
    debug_sink: Option<&'a mut DebugSink>,
    error_buffer: &'a mut String,
}

impl TransferIo for Transfer<'_> {
    fn write_header(&mut self, data: &[u8]) -> usize {
        match self.header.append(data) {
            Ok(()) => data.len(),
            Err(_) => 0,
        }
    }

    fn write_body(&mut self, data: &[u8]) -> usize {
        match &mut self.body {
            BodySink::Memory(buffer) => match buffer.append(data) {
                Ok(()) => data.len(),
                Err(_) => 0,
            },
            BodySink::File(file) => match file.write_all(data) {
                Ok(()) => data.len(),
                Err(err) => {
                    warn!(error = %err, "unable to write downloaded body");
                    0
                }
            },
        }
    }

    fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut *self.upload {
            UploadSource::None => Ok(0),
            UploadSource::Bytes(cursor) => cursor.read(buf),
            UploadSource::File(file) => file.read(buf),
        }
    }

    fn progress(&mut self, progress: Progress) -> ControlFlow<()> {
        self.state.record_progress(progress);
        if let Some(observer) = self.observer {
            observer(progress);
        }
        if let Some(limit) = self.download_byte_limit {
            if progress.download_total.max(progress.download_now) > limit {
                self.state.interrupt(InterruptReason::DownloadOverflow);
            }
        }
        if self.state.is_interrupted() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn debug(&mut self, kind: DebugKind, data: &[u8]) {
        if let Some(sink) = self.debug_sink.as_mut() {
            if let Err(err) = sink.write_record(kind, data) {
                warn!(error = %err, "unable to write debug trace");
            }
        }
    }

    fn report_error(&mut self, message: &str) {
        self.error_buffer.clear();
        let mut end = message.len().min(ERROR_BUFFER_SIZE - 1);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        self.error_buffer.push_str(&message[..end]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        options: Vec<(OptionKey, OptionValue)>,
        resets: usize,
    }

    /// Native handle that replays a scripted transfer.
    struct ScriptedHandle {
        recorder: Arc<parking_lot::Mutex<Recorder>>,
        script: fn(&mut dyn TransferIo) -> ResultCode,
    }

    impl NativeHandle for ScriptedHandle {
        fn set_option(&mut self, key: OptionKey, value: OptionValue) -> Result<(), ConfigError> {
            self.recorder.lock().options.push((key, value));
            Ok(())
        }

        fn info(&self, key: InfoKey) -> Option<InfoValue> {
            match key {
                InfoKey::ResponseCode => Some(InfoValue::Int(200)),
                _ => None,
            }
        }

        fn perform(&mut self, io: &mut dyn TransferIo) -> ResultCode {
            (self.script)(io)
        }

        fn reset(&mut self) {
            let mut recorder = self.recorder.lock();
            recorder.options.clear();
            recorder.resets += 1;
        }
    }

    struct ScriptedTransport {
        recorder: Arc<parking_lot::Mutex<Recorder>>,
        opened: Arc<AtomicUsize>,
        script: fn(&mut dyn TransferIo) -> ResultCode,
    }

    impl Transport for ScriptedTransport {
        type Handle = ScriptedHandle;

        fn open(&self) -> Result<ScriptedHandle, ResultCode> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedHandle {
                recorder: Arc::clone(&self.recorder),
                script: self.script,
            })
        }

        fn supports(&self, _feature: Feature) -> bool {
            true
        }
    }

    fn handle_with(
        script: fn(&mut dyn TransferIo) -> ResultCode,
    ) -> (
        TransportHandle<ScriptedTransport>,
        Arc<parking_lot::Mutex<Recorder>>,
        Arc<AtomicUsize>,
    ) {
        let recorder = Arc::new(parking_lot::Mutex::new(Recorder::default()));
        let opened = Arc::new(AtomicUsize::new(0));
        let transport = ScriptedTransport {
            recorder: Arc::clone(&recorder),
            opened: Arc::clone(&opened),
            script,
        };
        let handle = TransportHandle::new(transport, Arc::new(SessionRegistry::new()));
        (handle, recorder, opened)
    }

    fn echo_upload(io: &mut dyn TransferIo) -> ResultCode {
        io.write_header(b"HTTP/1.1 200 OK\r\n\r\n");
        let mut buf = [0u8; 3];
        loop {
            match io.read_body(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    io.write_body(&buf[..n]);
                }
                Err(_) => return ResultCode::READ_ERROR,
            }
        }
        ResultCode::OK
    }

    #[test]
    fn open_is_lazy_and_idempotent() {
        let (mut handle, recorder, opened) = handle_with(echo_upload);
        assert!(!handle.is_open());
        handle.ensure_open().unwrap();
        handle.ensure_open().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        let options = &recorder.lock().options;
        assert!(options.contains(&(OptionKey::NoSignal, OptionValue::Int(1))));
        assert!(options.contains(&(OptionKey::NoProgress, OptionValue::Int(0))));
    }

    #[test]
    fn mismatched_option_kind_is_rejected() {
        let (mut handle, recorder, _) = handle_with(echo_upload);
        let err = handle.set_option(OptionKey::Timeout, "soon").unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::OptionKind { option: "TIMEOUT", .. })
        ));
        assert!(recorder.lock().options.is_empty());
    }

    #[test]
    fn upload_bytes_stream_through_callbacks() {
        let (mut handle, _, _) = handle_with(echo_upload);
        handle.set_upload(UploadSource::Bytes(Cursor::new(b"hello world".to_vec())));
        let mut header = GrowableBuffer::new();
        let mut body = GrowableBuffer::new();

        let code = handle.perform(&mut header, &mut body).unwrap();
        assert!(code.is_ok());
        assert_eq!(body.as_bytes(), b"hello world");
        assert!(header.as_bytes().starts_with(b"HTTP/1.1 200"));
    }

    #[test]
    fn download_file_bypasses_body_buffer() {
        let (mut handle, _, _) = handle_with(echo_upload);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        handle.set_download_file(File::create(&path).unwrap());
        handle.set_upload(UploadSource::Bytes(Cursor::new(b"to disk".to_vec())));
        let mut header = GrowableBuffer::new();
        let mut body = GrowableBuffer::new();

        handle.perform(&mut header, &mut body).unwrap();
        handle.reset();
        assert!(body.is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), b"to disk");
    }

    #[test]
    fn reset_drops_attachments_and_restores_defaults() {
        let (mut handle, recorder, _) = handle_with(echo_upload);
        handle
            .set_header_list(vec!["X-One: 1".to_string()])
            .unwrap();
        handle.set_form(Form::default()).unwrap();
        handle.set_upload(UploadSource::Bytes(Cursor::new(vec![1, 2, 3])));

        handle.reset();
        assert!(handle.header_list().is_none());
        assert!(handle.form().is_none());
        assert!(!handle.has_upload());
        let recorder = recorder.lock();
        assert_eq!(recorder.resets, 1);
        assert_eq!(recorder.options.len(), 2);
    }

    #[test]
    fn reset_before_open_is_harmless() {
        let (mut handle, recorder, opened) = handle_with(echo_upload);
        handle.reset();
        handle.destroy();
        assert_eq!(opened.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.lock().resets, 0);
    }

    #[test]
    fn recycle_opens_a_fresh_handle_and_keeps_registration() {
        let registry = Arc::new(SessionRegistry::new());
        let opened = Arc::new(AtomicUsize::new(0));
        let mut handle = TransportHandle::new(
            ScriptedTransport {
                recorder: Arc::new(parking_lot::Mutex::new(Recorder::default())),
                opened: Arc::clone(&opened),
                script: echo_upload,
            },
            Arc::clone(&registry),
        );

        handle.ensure_open().unwrap();
        assert_eq!(registry.len(), 1);
        handle.recycle().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
        drop(handle);
        assert!(registry.is_empty());
    }

    fn report_long_error(io: &mut dyn TransferIo) -> ResultCode {
        io.report_error(&"é".repeat(400));
        ResultCode(4242)
    }

    #[test]
    fn diagnostic_is_truncated_on_a_char_boundary() {
        let (mut handle, _, _) = handle_with(report_long_error);
        let code = handle
            .perform(&mut GrowableBuffer::new(), &mut GrowableBuffer::new())
            .unwrap();
        assert_eq!(code, ResultCode(4242));
        assert!(handle.error_message().len() < ERROR_BUFFER_SIZE);
        assert!(handle.error_message().starts_with('é'));
    }

    fn report_progress(io: &mut dyn TransferIo) -> ResultCode {
        let step = Progress {
            download_total: 0,
            download_now: 2048,
            ..Progress::default()
        };
        match io.progress(step) {
            ControlFlow::Break(()) => ResultCode::ABORTED_BY_CALLBACK,
            ControlFlow::Continue(()) => ResultCode::OK,
        }
    }

    #[test]
    fn download_limit_sets_overflow_reason() {
        let (mut handle, _, _) = handle_with(report_progress);
        handle.set_download_byte_limit(Some(1024));
        let code = handle
            .perform(&mut GrowableBuffer::new(), &mut GrowableBuffer::new())
            .unwrap();
        assert_eq!(code, ResultCode::ABORTED_BY_CALLBACK);
        assert_eq!(
            handle.state().interrupt_reason(),
            Some(InterruptReason::DownloadOverflow)
        );
        assert_eq!(handle.state().progress().download_now, 2048);
    }

    #[test]
    fn observer_sees_every_progress_report() {
        let (mut handle, _, _) = handle_with(report_progress);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        handle.set_progress_observer(Some(Arc::new(move |progress: Progress| {
            counter.store(progress.download_now as usize, Ordering::SeqCst);
        })));
        let code = handle
            .perform(&mut GrowableBuffer::new(), &mut GrowableBuffer::new())
            .unwrap();
        assert!(code.is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 2048);
    }

    #[test]
    fn interrupt_flag_breaks_progress() {
        let (mut handle, _, _) = handle_with(report_progress);
        handle.ensure_open().unwrap();
        handle.interrupt_handle().interrupt();
        let code = handle
            .perform(&mut GrowableBuffer::new(), &mut GrowableBuffer::new())
            .unwrap();
        assert_eq!(code, ResultCode::ABORTED_BY_CALLBACK);
    }
}
