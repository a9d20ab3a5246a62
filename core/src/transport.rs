//! The transport collaborator as a capability.
//!
//! # Design
//! The engine never speaks HTTP itself. It drives a `NativeHandle` through
//! three narrow channels:
//! - option-set calls, keyed by `OptionKey` and carrying a tagged
//!   `OptionValue` whose kind is checked against the key before it reaches
//!   the transport;
//! - a blocking `perform`, during which the transport calls back into the
//!   engine through `TransferIo` (header bytes, body bytes, upload reads,
//!   progress, debug trace, error text);
//! - introspection through `InfoKey` after the call.
//!
//! Result codes follow the numbering used by the classic easy-handle
//! libraries so that codes coming from such a backend pass through untouched.

use std::fmt;
use std::io;
use std::ops::ControlFlow;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::interrupt::Progress;

/// Outcome of `NativeHandle::perform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const OK: Self = Self(0);
    pub const UNSUPPORTED_PROTOCOL: Self = Self(1);
    pub const URL_MALFORMAT: Self = Self(3);
    pub const COULDNT_RESOLVE_PROXY: Self = Self(5);
    pub const COULDNT_RESOLVE_HOST: Self = Self(6);
    pub const COULDNT_CONNECT: Self = Self(7);
    pub const PARTIAL_FILE: Self = Self(18);
    pub const WRITE_ERROR: Self = Self(23);
    pub const READ_ERROR: Self = Self(26);
    pub const OUT_OF_MEMORY: Self = Self(27);
    pub const OPERATION_TIMEDOUT: Self = Self(28);
    pub const SSL_CONNECT_ERROR: Self = Self(35);
    pub const ABORTED_BY_CALLBACK: Self = Self(42);
    pub const TOO_MANY_REDIRECTS: Self = Self(47);
    pub const GOT_NOTHING: Self = Self(52);
    pub const SEND_ERROR: Self = Self(55);
    pub const RECV_ERROR: Self = Self(56);
    pub const PEER_FAILED_VERIFICATION: Self = Self(60);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Generic text for the code, used when the transport left no
    /// diagnostic of its own.
    pub fn description(self) -> &'static str {
        match self {
            Self::OK => "no error",
            Self::UNSUPPORTED_PROTOCOL => "unsupported protocol",
            Self::URL_MALFORMAT => "URL using bad/illegal format",
            Self::COULDNT_RESOLVE_PROXY => "could not resolve proxy name",
            Self::COULDNT_RESOLVE_HOST => "could not resolve host name",
            Self::COULDNT_CONNECT => "could not connect to server",
            Self::PARTIAL_FILE => "transferred a partial file",
            Self::WRITE_ERROR => "failed writing received data",
            Self::READ_ERROR => "failed reading upload data",
            Self::OUT_OF_MEMORY => "out of memory",
            Self::OPERATION_TIMEDOUT => "operation timed out",
            Self::SSL_CONNECT_ERROR => "TLS connect error",
            Self::ABORTED_BY_CALLBACK => "operation was aborted by an application callback",
            Self::TOO_MANY_REDIRECTS => "number of redirects hit maximum amount",
            Self::GOT_NOTHING => "server returned nothing",
            Self::SEND_ERROR => "failed sending data to the peer",
            Self::RECV_ERROR => "failure when receiving data from the peer",
            Self::PEER_FAILED_VERIFICATION => "peer certificate could not be verified",
            _ => "unknown transport error",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.description(), self.0)
    }
}

/// Bit set for `OptionKey::Protocols` and `OptionKey::RedirectProtocols`.
pub const PROTO_HTTP: i64 = 1 << 0;
pub const PROTO_HTTPS: i64 = 1 << 1;

/// Values for `OptionKey::IpResolve`.
pub const IPRESOLVE_WHATEVER: i64 = 0;
pub const IPRESOLVE_V4: i64 = 1;

/// The kind of value an option or info key carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Int,
    List,
    Form,
    Float,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Text => "text",
            ValueKind::Int => "integer",
            ValueKind::List => "list",
            ValueKind::Form => "form",
            ValueKind::Float => "float",
        };
        f.write_str(name)
    }
}

/// Every option the engine knows how to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    Url,
    CustomRequest,
    HttpGet,
    Post,
    Upload,
    NoBody,
    PostFieldSize,
    InFileSize,
    HttpHeader,
    HttpPost,
    AcceptEncoding,
    IpResolve,
    Protocols,
    RedirectProtocols,
    Timeout,
    ConnectTimeout,
    DnsCacheTimeout,
    LowSpeedLimit,
    LowSpeedTime,
    FollowLocation,
    MaxRedirects,
    Proxy,
    ProxyType,
    HttpAuth,
    UserPassword,
    IgnoreContentLength,
    SslVerifyPeer,
    SslVerifyHost,
    SslVersion,
    HttpVersion,
    SslCert,
    SslCertType,
    SslKeyPassword,
    CaInfo,
    BufferSize,
    Verbose,
    CookieFile,
    CookieJar,
    CookieList,
    NoSignal,
    NoProgress,
}

impl OptionKey {
    /// Static table of the value kind each key accepts.
    pub const fn kind(self) -> ValueKind {
        use OptionKey::*;
        match self {
            Url | CustomRequest | AcceptEncoding | Proxy | UserPassword | SslCert
            | SslCertType | SslKeyPassword | CaInfo | CookieFile | CookieJar | CookieList => {
                ValueKind::Text
            }
            HttpHeader => ValueKind::List,
            HttpPost => ValueKind::Form,
            HttpGet | Post | Upload | NoBody | PostFieldSize | InFileSize | IpResolve
            | Protocols | RedirectProtocols | Timeout | ConnectTimeout | DnsCacheTimeout
            | LowSpeedLimit | LowSpeedTime | FollowLocation | MaxRedirects | ProxyType
            | HttpAuth | IgnoreContentLength | SslVerifyPeer | SslVerifyHost | SslVersion
            | HttpVersion | BufferSize | Verbose | NoSignal | NoProgress => ValueKind::Int,
        }
    }

    pub const fn name(self) -> &'static str {
        use OptionKey::*;
        match self {
            Url => "URL",
            CustomRequest => "CUSTOMREQUEST",
            HttpGet => "HTTPGET",
            Post => "POST",
            Upload => "UPLOAD",
            NoBody => "NOBODY",
            PostFieldSize => "POSTFIELDSIZE",
            InFileSize => "INFILESIZE",
            HttpHeader => "HTTPHEADER",
            HttpPost => "HTTPPOST",
            AcceptEncoding => "ACCEPT_ENCODING",
            IpResolve => "IPRESOLVE",
            Protocols => "PROTOCOLS",
            RedirectProtocols => "REDIR_PROTOCOLS",
            Timeout => "TIMEOUT",
            ConnectTimeout => "CONNECTTIMEOUT",
            DnsCacheTimeout => "DNS_CACHE_TIMEOUT",
            LowSpeedLimit => "LOW_SPEED_LIMIT",
            LowSpeedTime => "LOW_SPEED_TIME",
            FollowLocation => "FOLLOWLOCATION",
            MaxRedirects => "MAXREDIRS",
            Proxy => "PROXY",
            ProxyType => "PROXYTYPE",
            HttpAuth => "HTTPAUTH",
            UserPassword => "USERPWD",
            IgnoreContentLength => "IGNORE_CONTENT_LENGTH",
            SslVerifyPeer => "SSL_VERIFYPEER",
            SslVerifyHost => "SSL_VERIFYHOST",
            SslVersion => "SSLVERSION",
            HttpVersion => "HTTP_VERSION",
            SslCert => "SSLCERT",
            SslCertType => "SSLCERTTYPE",
            SslKeyPassword => "SSLKEYPASSWD",
            CaInfo => "CAINFO",
            BufferSize => "BUFFERSIZE",
            Verbose => "VERBOSE",
            CookieFile => "COOKIEFILE",
            CookieJar => "COOKIEJAR",
            CookieList => "COOKIELIST",
            NoSignal => "NOSIGNAL",
            NoProgress => "NOPROGRESS",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One part of a multipart/form-data body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub content: FormContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormContent {
    Text(String),
    File(PathBuf),
}

/// A multipart form, in the order the parts are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    pub parts: Vec<FormPart>,
}

impl Form {
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Tagged option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Text(String),
    Int(i64),
    List(Vec<String>),
    Form(Form),
}

impl OptionValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            OptionValue::Text(_) => ValueKind::Text,
            OptionValue::Int(_) => ValueKind::Int,
            OptionValue::List(_) => ValueKind::List,
            OptionValue::Form(_) => ValueKind::Form,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OptionValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Int(i64::from(value))
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        OptionValue::List(value)
    }
}

impl From<Form> for OptionValue {
    fn from(value: Form) -> Self {
        OptionValue::Form(value)
    }
}

/// Introspection fields readable after `perform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKey {
    EffectiveUrl,
    ResponseCode,
    RedirectCount,
    ContentType,
    TotalTime,
    SizeDownload,
    SizeUpload,
}

impl InfoKey {
    pub const ALL: [InfoKey; 7] = [
        InfoKey::EffectiveUrl,
        InfoKey::ResponseCode,
        InfoKey::RedirectCount,
        InfoKey::ContentType,
        InfoKey::TotalTime,
        InfoKey::SizeDownload,
        InfoKey::SizeUpload,
    ];

    pub const fn kind(self) -> ValueKind {
        match self {
            InfoKey::EffectiveUrl | InfoKey::ContentType => ValueKind::Text,
            InfoKey::ResponseCode | InfoKey::RedirectCount => ValueKind::Int,
            InfoKey::TotalTime | InfoKey::SizeDownload | InfoKey::SizeUpload => ValueKind::Float,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            InfoKey::EffectiveUrl => "effective_url",
            InfoKey::ResponseCode => "response_code",
            InfoKey::RedirectCount => "redirect_count",
            InfoKey::ContentType => "content_type",
            InfoKey::TotalTime => "total_time",
            InfoKey::SizeDownload => "size_download",
            InfoKey::SizeUpload => "size_upload",
        }
    }

    /// Look a key up by name; unknown names are a configuration error.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == name)
            .ok_or_else(|| ConfigError::UnknownInfo(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl InfoValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            InfoValue::Text(_) => ValueKind::Text,
            InfoValue::Int(_) => ValueKind::Int,
            InfoValue::Float(_) => ValueKind::Float,
        }
    }
}

/// Category of a verbose trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugKind {
    Text,
    HeaderIn,
    HeaderOut,
    DataIn,
    DataOut,
}

/// Optional capabilities a transport build may lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Negotiating and transparently decoding compressed bodies.
    ContentDecoding,
}

/// Callbacks the engine implements and the transport invokes, synchronously
/// and on the calling thread, while `perform` runs.
pub trait TransferIo {
    /// Header bytes as received. Returning less than `data.len()` aborts
    /// the transfer with `WRITE_ERROR`.
    fn write_header(&mut self, data: &[u8]) -> usize;

    /// Body bytes as received; same contract as `write_header`.
    fn write_body(&mut self, data: &[u8]) -> usize;

    /// Fill `buf` with upload bytes. `Ok(0)` means end of input.
    fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Latest counters. `Break` tells the transport to abort immediately.
    fn progress(&mut self, progress: Progress) -> ControlFlow<()>;

    /// Verbose trace output, only emitted when `Verbose` is set.
    fn debug(&mut self, kind: DebugKind, data: &[u8]);

    /// Human-readable diagnostic for a failing result code.
    fn report_error(&mut self, message: &str);
}

/// Factory for native handles.
pub trait Transport: Send {
    type Handle: NativeHandle;

    /// Create a handle. Fails only when the backend cannot allocate one.
    fn open(&self) -> Result<Self::Handle, ResultCode>;

    fn supports(&self, feature: Feature) -> bool;
}

/// One native transfer handle. Dropping it releases the native resources.
pub trait NativeHandle: Send {
    fn set_option(&mut self, key: OptionKey, value: OptionValue) -> Result<(), ConfigError>;

    /// `None` when the field is not available (e.g. before any transfer).
    fn info(&self, key: InfoKey) -> Option<InfoValue>;

    fn perform(&mut self, io: &mut dyn TransferIo) -> ResultCode;

    /// Return every option to its default. Connection and cookie state may
    /// survive.
    fn reset(&mut self);
}
