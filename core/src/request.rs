//! The request descriptor: everything one call needs, as plain data.
//!
//! # Design
//! The descriptor is consumed read-only by the binder. Optional fields mean
//! "leave the transport default"; only the URL and, for uploading verbs, a
//! body are mandatory. Version tokens are kept as the caller's strings so an
//! unknown token is reported by the binder as a configuration error instead
//! of being rejected at construction.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::interrupt::Progress;

/// HTTP verb of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    /// Sent verbatim, e.g. `COPY` or `PROPFIND`.
    Custom(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Custom(verb) => verb,
        }
    }

    /// Case-insensitive parse; anything unrecognized becomes `Custom`.
    pub fn parse(verb: &str) -> Self {
        match verb.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            other => Method::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multipart form content: plain fields plus files, sent fields first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart {
    pub fields: Vec<(String, String)>,
    pub files: Vec<(String, PathBuf)>,
}

impl Multipart {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.files.is_empty()
    }
}

/// Where the request body comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Bytes(Vec<u8>),
    /// Streamed from the file at this path.
    File(PathBuf),
    Multipart(Multipart),
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Bytes(value.into_bytes())
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value)
    }
}

/// Proxy protocol, with the transport's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    Http,
    Http1_0,
    Socks4,
    Socks5,
    Socks4a,
    Socks5Hostname,
}

impl ProxyType {
    pub const fn code(self) -> i64 {
        match self {
            ProxyType::Http => 0,
            ProxyType::Http1_0 => 1,
            ProxyType::Socks4 => 4,
            ProxyType::Socks5 => 5,
            ProxyType::Socks4a => 6,
            ProxyType::Socks5Hostname => 7,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        [
            ProxyType::Http,
            ProxyType::Http1_0,
            ProxyType::Socks4,
            ProxyType::Socks5,
            ProxyType::Socks4a,
            ProxyType::Socks5Hostname,
        ]
        .into_iter()
        .find(|ty| ty.code() == code)
    }
}

/// Authentication scheme for `credentials`, as a bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    Basic,
    Digest,
    Any,
}

pub const AUTH_BASIC: i64 = 1 << 0;
pub const AUTH_DIGEST: i64 = 1 << 1;

impl AuthType {
    pub const fn mask(self) -> i64 {
        match self {
            AuthType::Basic => AUTH_BASIC,
            AuthType::Digest => AUTH_DIGEST,
            AuthType::Any => AUTH_BASIC | AUTH_DIGEST,
        }
    }
}

/// Minimum TLS version accepted by the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    SslV2,
    SslV3,
    TlsV1,
    TlsV1_0,
    TlsV1_1,
    TlsV1_2,
    TlsV1_3,
}

impl TlsVersion {
    const ALL: [TlsVersion; 7] = [
        TlsVersion::SslV2,
        TlsVersion::SslV3,
        TlsVersion::TlsV1,
        TlsVersion::TlsV1_0,
        TlsVersion::TlsV1_1,
        TlsVersion::TlsV1_2,
        TlsVersion::TlsV1_3,
    ];

    pub fn from_token(token: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|version| version.token() == token)
            .ok_or_else(|| ConfigError::UnsupportedTlsVersion(token.to_string()))
    }

    pub const fn token(self) -> &'static str {
        match self {
            TlsVersion::SslV2 => "SSLv2",
            TlsVersion::SslV3 => "SSLv3",
            TlsVersion::TlsV1 => "TLSv1",
            TlsVersion::TlsV1_0 => "TLSv1_0",
            TlsVersion::TlsV1_1 => "TLSv1_1",
            TlsVersion::TlsV1_2 => "TLSv1_2",
            TlsVersion::TlsV1_3 => "TLSv1_3",
        }
    }

    pub const fn code(self) -> i64 {
        match self {
            TlsVersion::TlsV1 => 1,
            TlsVersion::SslV2 => 2,
            TlsVersion::SslV3 => 3,
            TlsVersion::TlsV1_0 => 4,
            TlsVersion::TlsV1_1 => 5,
            TlsVersion::TlsV1_2 => 6,
            TlsVersion::TlsV1_3 => 7,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|version| version.code() == code)
    }
}

/// HTTP protocol version requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// Let the transport decide.
    None,
    Http1_0,
    Http1_1,
    Http2_0,
    Http2Tls,
    Http2PriorKnowledge,
}

impl HttpVersion {
    const ALL: [HttpVersion; 6] = [
        HttpVersion::None,
        HttpVersion::Http1_0,
        HttpVersion::Http1_1,
        HttpVersion::Http2_0,
        HttpVersion::Http2Tls,
        HttpVersion::Http2PriorKnowledge,
    ];

    pub fn from_token(token: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|version| version.token() == token)
            .ok_or_else(|| ConfigError::UnsupportedHttpVersion(token.to_string()))
    }

    pub const fn token(self) -> &'static str {
        match self {
            HttpVersion::None => "None",
            HttpVersion::Http1_0 => "HTTPv1_0",
            HttpVersion::Http1_1 => "HTTPv1_1",
            HttpVersion::Http2_0 => "HTTPv2_0",
            HttpVersion::Http2Tls => "HTTPv2_TLS",
            HttpVersion::Http2PriorKnowledge => "HTTPv2_PRIOR",
        }
    }

    pub const fn code(self) -> i64 {
        match self {
            HttpVersion::None => 0,
            HttpVersion::Http1_0 => 1,
            HttpVersion::Http1_1 => 2,
            HttpVersion::Http2_0 => 3,
            HttpVersion::Http2Tls => 4,
            HttpVersion::Http2PriorKnowledge => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|version| version.code() == code)
    }
}

/// Abort when throughput stays below `bytes_per_second` for `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowSpeed {
    pub bytes_per_second: u64,
    pub time: Duration,
}

/// Username and password, sent with the request's `auth_type`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub(crate) fn user_password(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Caller-supplied observer invoked from the progress callback.
pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

/// Client certificate settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCert {
    pub path: PathBuf,
    /// Certificate format token, e.g. `PEM`.
    pub cert_type: Option<String>,
    pub key_password: Option<String>,
}

/// Full description of one HTTP call.
#[derive(Clone, Default)]
pub struct RequestDescriptor {
    pub method: Option<Method>,
    pub url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    /// GET only: write the response body to this file instead of memory.
    pub download_to: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub dns_cache_timeout: Option<Duration>,
    pub low_speed: Option<LowSpeed>,
    /// `Some(0)` disables following redirects.
    pub max_redirects: Option<u32>,
    pub proxy: Option<String>,
    pub proxy_type: Option<ProxyType>,
    pub credentials: Option<Credentials>,
    pub auth_type: AuthType,
    pub ignore_content_length: bool,
    pub insecure: bool,
    pub cacert: Option<PathBuf>,
    pub tls_version: Option<String>,
    pub http_version: Option<String>,
    pub client_cert: Option<ClientCert>,
    pub buffer_size: Option<usize>,
    pub force_ipv4: bool,
    pub automatic_content_decoding: bool,
    pub download_byte_limit: Option<u64>,
    pub progress: Option<ProgressObserver>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Body>) -> Self {
        Self::new(Method::Post, url).body(body)
    }

    pub fn put(url: impl Into<String>, body: impl Into<Body>) -> Self {
        Self::new(Method::Put, url).body(body)
    }

    pub fn method(&self) -> Method {
        self.method.clone().unwrap_or(Method::Get)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn download_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_to = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn credentials(mut self, credentials: Credentials, auth_type: AuthType) -> Self {
        self.credentials = Some(credentials);
        self.auth_type = auth_type;
        self
    }

    pub fn download_byte_limit(mut self, limit: u64) -> Self {
        self.download_byte_limit = Some(limit);
        self
    }

    pub fn on_progress(mut self, observer: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("download_to", &self.download_to)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_redirects", &self.max_redirects)
            .field("proxy", &self.proxy)
            .field("credentials", &self.credentials)
            .field("insecure", &self.insecure)
            .field("download_byte_limit", &self.download_byte_limit)
            .field("progress", &self.progress.as_ref().map(|_| "<observer>"))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_parse_case_insensitively() {
        assert_eq!(Method::parse("get"), Method::Get);
        assert_eq!(Method::parse("Patch"), Method::Patch);
        assert_eq!(Method::parse("copy"), Method::Custom("COPY".into()));
        assert_eq!(Method::Custom("COPY".into()).as_str(), "COPY");
    }

    #[test]
    fn tls_tokens_map_to_codes() {
        assert_eq!(TlsVersion::from_token("TLSv1_2").unwrap(), TlsVersion::TlsV1_2);
        assert_eq!(TlsVersion::from_code(TlsVersion::TlsV1_3.code()), Some(TlsVersion::TlsV1_3));
        assert!(matches!(
            TlsVersion::from_token("TLSv9"),
            Err(ConfigError::UnsupportedTlsVersion(token)) if token == "TLSv9"
        ));
    }

    #[test]
    fn http_tokens_map_to_codes() {
        assert_eq!(HttpVersion::from_token("HTTPv1_1").unwrap(), HttpVersion::Http1_1);
        assert_eq!(HttpVersion::from_token("None").unwrap(), HttpVersion::None);
        assert!(matches!(
            HttpVersion::from_token("HTTPv3"),
            Err(ConfigError::UnsupportedHttpVersion(_))
        ));
    }

    #[test]
    fn proxy_codes_round_trip() {
        for ty in [ProxyType::Http, ProxyType::Socks5Hostname, ProxyType::Socks4a] {
            assert_eq!(ProxyType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(ProxyType::from_code(99), None);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("alice", "s3cret");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn descriptor_defaults_to_get() {
        let req = RequestDescriptor::default();
        assert_eq!(req.method(), Method::Get);
        assert!(req.url.is_none());
    }
}
