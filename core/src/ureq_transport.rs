//! Transport backed by `ureq`.
//!
//! # Design
//! Options are recorded per call and consumed by `perform`; `reset` clears
//! them but keeps the cached agent (and so its pooled connections) and the
//! cookie store. The agent is rebuilt only when a connection-level setting
//! (timeouts, proxy, IP family, TLS) changes between calls.
//!
//! Redirects are followed here rather than by `ureq` so that every hop's
//! header block reaches the header callback, the redirect count is exact
//! and each target is checked against the redirect protocol allow-list.
//!
//! Uploads are read completely through the read callback before the request
//! is sent and go out with an exact Content-Length, so an injected
//! `Transfer-Encoding: chunked` header is dropped.

use std::fs;
use std::io::{self, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::cookies::CookieStore;
use crate::error::ConfigError;
use crate::interrupt::Progress;
use crate::request::{HttpVersion, ProxyType, TlsVersion, AUTH_BASIC};
use crate::transport::{
    DebugKind, Feature, Form, FormContent, InfoKey, InfoValue, NativeHandle, OptionKey,
    OptionValue, ResultCode, TransferIo, Transport, IPRESOLVE_V4, PROTO_HTTP, PROTO_HTTPS,
};

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
const MIN_CHUNK_SIZE: usize = 1024;
const MAX_CHUNK_SIZE: usize = 512 * 1024;

/// Factory for `UreqHandle`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct UreqTransport;

impl UreqTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for UreqTransport {
    type Handle = UreqHandle;

    fn open(&self) -> Result<UreqHandle, ResultCode> {
        Ok(UreqHandle::default())
    }

    fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::ContentDecoding => true,
        }
    }
}

/// Settings baked into a `ureq::Agent`; a change forces a new agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AgentSettings {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    proxy: Option<String>,
    ipv4_only: bool,
    insecure: bool,
    cacert: Option<PathBuf>,
}

/// Options recorded since the last reset.
#[derive(Debug, Clone)]
struct CallOptions {
    url: Option<String>,
    custom_request: Option<String>,
    post: bool,
    upload: bool,
    no_body: bool,
    headers: Vec<String>,
    form: Option<Form>,
    accept_encoding: Option<String>,
    protocols: i64,
    redirect_protocols: i64,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    low_speed_limit: u64,
    low_speed_time: Duration,
    follow_location: bool,
    max_redirects: i64,
    proxy: Option<String>,
    proxy_type: ProxyType,
    http_auth: i64,
    user_password: Option<String>,
    verify_peer: bool,
    ipv4_only: bool,
    cacert: Option<PathBuf>,
    chunk_size: usize,
    verbose: bool,
    progress: bool,
    cookie_file: Option<String>,
    cookie_jar: Option<String>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            url: None,
            custom_request: None,
            post: false,
            upload: false,
            no_body: false,
            headers: Vec::new(),
            form: None,
            accept_encoding: None,
            protocols: PROTO_HTTP | PROTO_HTTPS,
            redirect_protocols: PROTO_HTTP | PROTO_HTTPS,
            timeout: None,
            connect_timeout: None,
            low_speed_limit: 0,
            low_speed_time: Duration::ZERO,
            follow_location: false,
            max_redirects: -1,
            proxy: None,
            proxy_type: ProxyType::Http,
            http_auth: AUTH_BASIC,
            user_password: None,
            verify_peer: true,
            ipv4_only: false,
            cacert: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verbose: false,
            progress: false,
            cookie_file: None,
            cookie_jar: None,
        }
    }
}

impl CallOptions {
    fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            proxy: self.proxy.as_ref().map(|proxy| self.proxy_url(proxy)),
            ipv4_only: self.ipv4_only,
            insecure: !self.verify_peer,
            cacert: self.cacert.clone(),
        }
    }

    fn proxy_url(&self, proxy: &str) -> String {
        if proxy.contains("://") {
            return proxy.to_string();
        }
        let scheme = match self.proxy_type {
            ProxyType::Http | ProxyType::Http1_0 => "http",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks4a => "socks4a",
            ProxyType::Socks5 => "socks5",
            ProxyType::Socks5Hostname => "socks5h",
        };
        format!("{scheme}://{proxy}")
    }

    fn method(&self) -> String {
        if let Some(custom) = &self.custom_request {
            return custom.clone();
        }
        if self.no_body {
            "HEAD".to_string()
        } else if self.post || self.form.is_some() {
            "POST".to_string()
        } else if self.upload {
            "PUT".to_string()
        } else {
            "GET".to_string()
        }
    }

    fn cookies_enabled(&self) -> bool {
        self.cookie_file.is_some() || self.cookie_jar.is_some()
    }
}

/// Introspection values of the last transfer.
#[derive(Debug, Clone, Default)]
struct TransferInfo {
    effective_url: Option<String>,
    response_code: Option<u16>,
    redirect_count: u32,
    content_type: Option<String>,
    total_time: Duration,
    size_download: u64,
    size_upload: u64,
}

#[derive(Debug)]
struct Failure {
    code: ResultCode,
    message: String,
}

impl Failure {
    fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn aborted() -> Self {
        Self::new(ResultCode::ABORTED_BY_CALLBACK, "Callback aborted")
    }
}

fn unsupported(what: &str) -> ConfigError {
    ConfigError::UnsupportedFeature(format!("{what} is not supported by the ureq transport"))
}

/// One reusable transfer handle.
#[derive(Default)]
pub struct UreqHandle {
    options: CallOptions,
    agent: Option<(AgentSettings, ureq::Agent)>,
    cookies: CookieStore,
    info: TransferInfo,
}

impl NativeHandle for UreqHandle {
    fn set_option(&mut self, key: OptionKey, value: OptionValue) -> Result<(), ConfigError> {
        if value.kind() != key.kind() {
            return Err(ConfigError::OptionKind {
                option: key.name(),
                expected: key.kind(),
                found: value.kind(),
            });
        }
        let int = value.as_int().unwrap_or_default();
        let flag = int != 0;
        let text = value.as_text().map(str::to_string);
        let options = &mut self.options;
        match key {
            OptionKey::Url => options.url = text,
            OptionKey::CustomRequest => options.custom_request = text,
            OptionKey::HttpGet => {
                if flag {
                    options.post = false;
                    options.upload = false;
                    options.no_body = false;
                }
            }
            OptionKey::Post => options.post = flag,
            OptionKey::Upload => options.upload = flag,
            OptionKey::NoBody => options.no_body = flag,
            OptionKey::PostFieldSize | OptionKey::InFileSize => {}
            OptionKey::HttpHeader => {
                if let OptionValue::List(list) = value {
                    options.headers = list;
                }
            }
            OptionKey::HttpPost => {
                if let OptionValue::Form(form) = value {
                    options.form = Some(form);
                }
            }
            OptionKey::AcceptEncoding => options.accept_encoding = text,
            OptionKey::IpResolve => options.ipv4_only = int == IPRESOLVE_V4,
            OptionKey::Protocols => options.protocols = int,
            OptionKey::RedirectProtocols => options.redirect_protocols = int,
            OptionKey::Timeout => options.timeout = positive_millis(int),
            OptionKey::ConnectTimeout => options.connect_timeout = positive_millis(int),
            OptionKey::DnsCacheTimeout => {}
            OptionKey::LowSpeedLimit => options.low_speed_limit = int.max(0).unsigned_abs(),
            OptionKey::LowSpeedTime => {
                options.low_speed_time = Duration::from_secs(int.max(0).unsigned_abs())
            }
            OptionKey::FollowLocation => options.follow_location = flag,
            OptionKey::MaxRedirects => options.max_redirects = int,
            OptionKey::Proxy => options.proxy = text.filter(|proxy| !proxy.is_empty()),
            OptionKey::ProxyType => {
                options.proxy_type = ProxyType::from_code(int).ok_or_else(|| {
                    ConfigError::UnsupportedFeature(format!("proxy type {int}"))
                })?
            }
            OptionKey::HttpAuth => {
                if int & AUTH_BASIC == 0 {
                    return Err(unsupported("digest-only authentication"));
                }
                options.http_auth = int;
            }
            OptionKey::UserPassword => options.user_password = text,
            OptionKey::IgnoreContentLength => {
                if flag {
                    return Err(unsupported("ignoring Content-Length"));
                }
            }
            OptionKey::SslVerifyPeer => options.verify_peer = flag,
            OptionKey::SslVerifyHost => {}
            OptionKey::SslVersion => {
                let version = TlsVersion::from_code(int)
                    .ok_or_else(|| ConfigError::UnsupportedTlsVersion(int.to_string()))?;
                if version < TlsVersion::TlsV1_2 {
                    return Err(ConfigError::UnsupportedTlsVersion(version.token().to_string()));
                }
            }
            OptionKey::HttpVersion => match HttpVersion::from_code(int) {
                Some(HttpVersion::None | HttpVersion::Http1_1) => {}
                Some(version) => {
                    return Err(ConfigError::UnsupportedHttpVersion(version.token().to_string()))
                }
                None => return Err(ConfigError::UnsupportedHttpVersion(int.to_string())),
            },
            OptionKey::SslCert => return Err(unsupported("client certificates")),
            OptionKey::SslCertType => {}
            OptionKey::SslKeyPassword => return Err(unsupported("encrypted client keys")),
            OptionKey::CaInfo => options.cacert = text.map(PathBuf::from),
            OptionKey::BufferSize => {
                let size = usize::try_from(int).unwrap_or(DEFAULT_CHUNK_SIZE);
                options.chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
            }
            OptionKey::Verbose => options.verbose = flag,
            OptionKey::CookieFile => {
                let path = text.unwrap_or_default();
                if !path.is_empty() {
                    self.cookies.load_file(Path::new(&path));
                }
                self.options.cookie_file = Some(path);
            }
            OptionKey::CookieJar => options.cookie_jar = text,
            OptionKey::CookieList => self.cookie_command(text.as_deref().unwrap_or_default()),
            OptionKey::NoSignal => {}
            OptionKey::NoProgress => options.progress = !flag,
        }
        Ok(())
    }

    fn info(&self, key: InfoKey) -> Option<InfoValue> {
        let info = &self.info;
        match key {
            InfoKey::EffectiveUrl => info.effective_url.clone().map(InfoValue::Text),
            InfoKey::ResponseCode => info.response_code.map(|code| InfoValue::Int(code.into())),
            InfoKey::RedirectCount => Some(InfoValue::Int(info.redirect_count.into())),
            InfoKey::ContentType => info.content_type.clone().map(InfoValue::Text),
            InfoKey::TotalTime => Some(InfoValue::Float(info.total_time.as_secs_f64())),
            InfoKey::SizeDownload => Some(InfoValue::Float(info.size_download as f64)),
            InfoKey::SizeUpload => Some(InfoValue::Float(info.size_upload as f64)),
        }
    }

    fn perform(&mut self, io: &mut dyn TransferIo) -> ResultCode {
        let started = Instant::now();
        self.info = TransferInfo::default();
        let outcome = self.run(io);
        self.info.total_time = started.elapsed();
        match outcome {
            Ok(()) => ResultCode::OK,
            Err(failure) => {
                debug!(code = failure.code.0, message = %failure.message, "transfer failed");
                io.report_error(&failure.message);
                failure.code
            }
        }
    }

    fn reset(&mut self) {
        self.options = CallOptions::default();
    }
}

impl UreqHandle {
    fn cookie_command(&mut self, command: &str) {
        match command {
            "FLUSH" => {
                if let Some(jar) = self.options.cookie_jar.as_deref() {
                    if let Err(err) = fs::write(jar, self.cookies.to_netscape()) {
                        debug!(error = %err, jar, "cookie jar flush failed");
                    }
                }
            }
            "ALL" | "SESS" => self.cookies.clear(),
            "RELOAD" => {
                if let Some(file) = self.options.cookie_file.clone() {
                    self.cookies.load_file(Path::new(&file));
                }
            }
            line => self.cookies.insert_netscape_line(line),
        }
    }

    fn agent(&mut self) -> Result<ureq::Agent, Failure> {
        let settings = self.options.agent_settings();
        if let Some((cached, agent)) = &self.agent {
            if *cached == settings {
                return Ok(agent.clone());
            }
        }
        let agent = build_agent(&settings)?;
        trace!(?settings, "built new agent");
        self.agent = Some((settings, agent.clone()));
        Ok(agent)
    }

    fn run(&mut self, io: &mut dyn TransferIo) -> Result<(), Failure> {
        let mut url = match self.options.url.as_deref() {
            Some(url) if !url.is_empty() => check_protocol(url, self.options.protocols)?,
            _ => return Err(Failure::new(ResultCode::URL_MALFORMAT, "No URL set")),
        };
        let agent = self.agent()?;

        let mut method = self.options.method();
        let (mut body, content_type) = self.request_body(io)?;
        let mut headers = self.request_headers(content_type);
        let original_host = url.host_str().map(str::to_ascii_lowercase);
        self.info.size_upload = body.as_ref().map_or(0, |body| body.len() as u64);

        let upload_total = self.info.size_upload;
        self.report_progress(
            io,
            Progress {
                upload_total,
                ..Progress::default()
            },
        )?;

        let mut redirects = 0u32;
        let response = loop {
            if url.host_str().map(str::to_ascii_lowercase) != original_host {
                headers.retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
            }
            if self.options.cookies_enabled() {
                headers.retain(|(name, _)| !name.eq_ignore_ascii_case("cookie"));
                if let Some(cookie) = self.cookies.header_for(&url) {
                    headers.push(("Cookie".to_string(), cookie));
                }
            }

            if self.options.verbose {
                let mut block = format!("{method} {url} HTTP/1.1\r\n");
                for (name, value) in &headers {
                    block.push_str(&format!("{name}: {value}\r\n"));
                }
                block.push_str("\r\n");
                io.debug(DebugKind::HeaderOut, block.as_bytes());
            }

            let response = send(&agent, &method, url.as_str(), &headers, body.as_deref())?;
            self.report_progress(
                io,
                Progress {
                    upload_total,
                    upload_now: upload_total,
                    ..Progress::default()
                },
            )?;

            let status = response.status().as_u16();
            let block = header_block(&response);
            if self.options.verbose {
                io.debug(DebugKind::HeaderIn, block.as_bytes());
            }
            if io.write_header(block.as_bytes()) != block.len() {
                return Err(Failure::new(
                    ResultCode::WRITE_ERROR,
                    "Failed writing header",
                ));
            }
            if self.options.cookies_enabled() {
                for value in response.headers().get_all("set-cookie") {
                    self.cookies
                        .store(&url, &String::from_utf8_lossy(value.as_bytes()));
                }
            }

            let location = response
                .headers()
                .get("location")
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
            let redirect = matches!(status, 301 | 302 | 303 | 307 | 308);
            match location {
                Some(location) if redirect && self.options.follow_location => {
                    let max = self.options.max_redirects;
                    if max >= 0 && i64::from(redirects) >= max {
                        return Err(Failure::new(
                            ResultCode::TOO_MANY_REDIRECTS,
                            format!("Maximum ({max}) redirects followed"),
                        ));
                    }
                    let target = resolve_location(&url, &location)?;
                    check_protocol(target.as_str(), self.options.redirect_protocols)?;
                    trace!(from = %url, to = %target, status, "following redirect");
                    if (status == 303 && method != "HEAD")
                        || (matches!(status, 301 | 302) && method == "POST")
                    {
                        method = "GET".to_string();
                        body = None;
                        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
                    }
                    url = target;
                    redirects += 1;
                    self.info.redirect_count = redirects;
                }
                _ => break response,
            }
        };

        self.info.effective_url = Some(url.into());
        self.info.response_code = Some(response.status().as_u16());
        self.info.content_type = response
            .headers()
            .get("content-type")
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
        let download_total = response
            .headers()
            .get("content-length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);

        if method == "HEAD" {
            return Ok(());
        }
        self.read_response_body(io, response, download_total, upload_total)
    }

    fn read_response_body(
        &mut self,
        io: &mut dyn TransferIo,
        response: ureq::http::Response<ureq::Body>,
        download_total: u64,
        upload_total: u64,
    ) -> Result<(), Failure> {
        let mut reader = response.into_body().into_reader();
        let mut chunk = vec![0u8; self.options.chunk_size];
        let mut low_speed = LowSpeedWindow::new(
            self.options.low_speed_limit,
            self.options.low_speed_time,
        );
        let mut downloaded = 0u64;
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_io_error(&err)),
            };
            let data = &chunk[..read];
            if self.options.verbose {
                io.debug(DebugKind::DataIn, data);
            }
            if io.write_body(data) != read {
                return Err(Failure::new(
                    ResultCode::WRITE_ERROR,
                    "Failure writing output to destination",
                ));
            }
            downloaded += read as u64;
            self.info.size_download = downloaded;
            self.report_progress(
                io,
                Progress {
                    download_total,
                    download_now: downloaded,
                    upload_total,
                    upload_now: upload_total,
                },
            )?;
            low_speed.record(read as u64)?;
        }
        Ok(())
    }

    fn report_progress(&self, io: &mut dyn TransferIo, progress: Progress) -> Result<(), Failure> {
        if !self.options.progress {
            return Ok(());
        }
        match io.progress(progress) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(()) => Err(Failure::aborted()),
        }
    }

    /// The body to send and, for multipart forms, its content type.
    fn request_body(
        &self,
        io: &mut dyn TransferIo,
    ) -> Result<(Option<Vec<u8>>, Option<String>), Failure> {
        if let Some(form) = &self.options.form {
            let boundary = format!("------------------------{}", Uuid::new_v4().simple());
            let body = encode_multipart(form, &boundary)?;
            return Ok((
                Some(body),
                Some(format!("multipart/form-data; boundary={boundary}")),
            ));
        }
        if !(self.options.post || self.options.upload) {
            return Ok((None, None));
        }
        let mut body = Vec::new();
        let mut chunk = vec![0u8; self.options.chunk_size];
        loop {
            match io.read_body(&mut chunk) {
                Ok(0) => break,
                Ok(read) => body.extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(Failure::new(
                        ResultCode::READ_ERROR,
                        format!("Failed reading upload data: {err}"),
                    ))
                }
            }
        }
        Ok((Some(body), None))
    }

    fn request_headers(&self, content_type: Option<String>) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .options
            .headers
            .iter()
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                let (name, value) = (name.trim(), value.trim());
                let chunked = name.eq_ignore_ascii_case("transfer-encoding")
                    && value.eq_ignore_ascii_case("chunked");
                (!value.is_empty() && !chunked).then(|| (name.to_string(), value.to_string()))
            })
            .collect();
        let has = |headers: &[(String, String)], wanted: &str| {
            headers.iter().any(|(name, _)| name.eq_ignore_ascii_case(wanted))
        };
        if let Some(content_type) = content_type {
            headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
            headers.push(("Content-Type".to_string(), content_type));
        } else if self.options.post && !has(&headers, "content-type") {
            headers.push((
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ));
        }
        // Empty means every encoding ureq decodes, which it advertises itself.
        if !has(&headers, "accept-encoding") {
            match self.options.accept_encoding.as_deref() {
                Some("") => {}
                Some(encoding) => {
                    headers.push(("Accept-Encoding".to_string(), encoding.to_string()))
                }
                None => headers.push(("Accept-Encoding".to_string(), "identity".to_string())),
            }
        }
        if let Some(credentials) = &self.options.user_password {
            if self.options.http_auth & AUTH_BASIC != 0 && !has(&headers, "authorization") {
                headers.push((
                    "Authorization".to_string(),
                    format!("Basic {}", STANDARD.encode(credentials)),
                ));
            }
        }
        headers
    }
}

fn positive_millis(value: i64) -> Option<Duration> {
    u64::try_from(value)
        .ok()
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
}

fn build_agent(settings: &AgentSettings) -> Result<ureq::Agent, Failure> {
    let mut tls = ureq::tls::TlsConfig::builder().disable_verification(settings.insecure);
    if let Some(path) = &settings.cacert {
        let pem = fs::read(path).map_err(|err| {
            Failure::new(
                ResultCode::SSL_CONNECT_ERROR,
                format!("error reading CA certificate {}: {err}", path.display()),
            )
        })?;
        let certs: Vec<_> = ureq::tls::parse_pem(&pem)
            .filter_map(|item| match item {
                Ok(ureq::tls::PemItem::Certificate(cert)) => Some(cert.to_owned()),
                _ => None,
            })
            .collect();
        tls = tls.root_certs(ureq::tls::RootCerts::new_with_certs(&certs));
    }

    let mut config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .max_redirects_will_error(false)
        .allow_non_standard_methods(true)
        .timeout_global(settings.timeout)
        .timeout_connect(settings.connect_timeout)
        .tls_config(tls.build());
    if settings.ipv4_only {
        config = config.ip_family(ureq::config::IpFamily::Ipv4Only);
    }
    if let Some(proxy) = &settings.proxy {
        let proxy = ureq::Proxy::new(proxy).map_err(|err| {
            Failure::new(ResultCode::COULDNT_RESOLVE_PROXY, err.to_string())
        })?;
        config = config.proxy(Some(proxy));
    }
    Ok(config.build().new_agent())
}

fn send(
    agent: &ureq::Agent,
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: Option<&[u8]>,
) -> Result<ureq::http::Response<ureq::Body>, Failure> {
    let mut builder = ureq::http::Request::builder().method(method).uri(url);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let malformed = |err: ureq::http::Error| Failure::new(ResultCode::URL_MALFORMAT, err.to_string());
    let sent = match body {
        Some(body) => agent.run(builder.body(body).map_err(malformed)?),
        None => agent.run(builder.body(()).map_err(malformed)?),
    };
    sent.map_err(map_ureq_error)
}

fn map_ureq_error(err: ureq::Error) -> Failure {
    let code = match &err {
        ureq::Error::HostNotFound => ResultCode::COULDNT_RESOLVE_HOST,
        ureq::Error::ConnectionFailed => ResultCode::COULDNT_CONNECT,
        ureq::Error::Timeout(_) => ResultCode::OPERATION_TIMEDOUT,
        ureq::Error::TooManyRedirects => ResultCode::TOO_MANY_REDIRECTS,
        ureq::Error::BadUri(_) => ResultCode::URL_MALFORMAT,
        ureq::Error::Io(io) => return map_io_error(io),
        _ => ResultCode::RECV_ERROR,
    };
    Failure::new(code, err.to_string())
}

fn map_io_error(err: &io::Error) -> Failure {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ResultCode::OPERATION_TIMEDOUT,
        io::ErrorKind::ConnectionRefused => ResultCode::COULDNT_CONNECT,
        io::ErrorKind::UnexpectedEof => ResultCode::PARTIAL_FILE,
        _ => ResultCode::RECV_ERROR,
    };
    Failure::new(code, err.to_string())
}

fn header_block(response: &ureq::http::Response<ureq::Body>) -> String {
    let status = response.status();
    let mut block = format!(
        "{:?} {} {}\r\n",
        response.version(),
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in response.headers() {
        block.push_str(&format!(
            "{}: {}\r\n",
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes())
        ));
    }
    block.push_str("\r\n");
    block
}

/// Parse `url` and check its scheme against the `allowed` protocol mask.
fn check_protocol(url: &str, allowed: i64) -> Result<Url, Failure> {
    let parsed = Url::parse(url).map_err(|err| {
        Failure::new(
            ResultCode::URL_MALFORMAT,
            format!("URL using bad/illegal format or missing URL: {url} ({err})"),
        )
    })?;
    let bit = match parsed.scheme() {
        "http" => PROTO_HTTP,
        "https" => PROTO_HTTPS,
        other => {
            return Err(Failure::new(
                ResultCode::UNSUPPORTED_PROTOCOL,
                format!("Protocol \"{other}\" not supported or disabled"),
            ))
        }
    };
    if allowed & bit == 0 {
        return Err(Failure::new(
            ResultCode::UNSUPPORTED_PROTOCOL,
            format!("Protocol \"{}\" disabled", parsed.scheme()),
        ));
    }
    Ok(parsed)
}

/// Resolve a `Location` value against the URL it was received from.
fn resolve_location(base: &Url, location: &str) -> Result<Url, Failure> {
    base.join(location).map_err(|err| {
        Failure::new(
            ResultCode::URL_MALFORMAT,
            format!("invalid redirect location {location:?}: {err}"),
        )
    })
}

fn encode_multipart(form: &Form, boundary: &str) -> Result<Vec<u8>, Failure> {
    let mut body = Vec::new();
    for part in &form.parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match &part.content {
            FormContent::Text(value) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                        part.name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            FormContent::File(path) => {
                let contents = fs::read(path).map_err(|err| {
                    Failure::new(
                        ResultCode::READ_ERROR,
                        format!("can't open file {}: {err}", path.display()),
                    )
                })?;
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        part.name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&contents);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(body)
}

/// Abort when throughput stays under `limit` bytes/s for a whole window.
struct LowSpeedWindow {
    limit: u64,
    window: Duration,
    started: Instant,
    bytes: u64,
}

impl LowSpeedWindow {
    fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            started: Instant::now(),
            bytes: 0,
        }
    }

    fn record(&mut self, bytes: u64) -> Result<(), Failure> {
        if self.limit == 0 || self.window.is_zero() {
            return Ok(());
        }
        self.bytes += bytes;
        let elapsed = self.started.elapsed();
        if elapsed < self.window {
            return Ok(());
        }
        let rate = self.bytes as f64 / elapsed.as_secs_f64();
        if rate < self.limit as f64 {
            return Err(Failure::new(
                ResultCode::OPERATION_TIMEDOUT,
                format!(
                    "Operation too slow. Less than {} bytes/sec transferred the last {} seconds",
                    self.limit,
                    self.window.as_secs()
                ),
            ));
        }
        self.started = Instant::now();
        self.bytes = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(base: &str, location: &str) -> String {
        resolve_location(&Url::parse(base).unwrap(), location)
            .unwrap()
            .into()
    }

    #[test]
    fn locations_resolve_against_the_request_url() {
        let base = "http://host:8080/a/b?x=1";
        assert_eq!(resolved(base, "https://other/"), "https://other/");
        assert_eq!(resolved(base, "/test"), "http://host:8080/test");
        assert_eq!(resolved(base, "c"), "http://host:8080/a/c");
        assert_eq!(resolved(base, "?y=2"), "http://host:8080/a/b?y=2");
        assert_eq!(resolved(base, "//cdn/x"), "http://cdn/x");
        assert_eq!(resolved("http://host", "next"), "http://host/next");
    }

    #[test]
    fn dot_segments_in_locations_are_normalized() {
        assert_eq!(resolved("http://host/a/b/c", "../x"), "http://host/a/x");
        assert_eq!(resolved("http://host/a/b/c", "./y/../z"), "http://host/a/b/z");
        assert_eq!(resolved("http://host/a", "../../../top"), "http://host/top");
    }

    #[test]
    fn protocol_allow_list_blocks_other_schemes() {
        assert!(check_protocol("http://a/", PROTO_HTTP | PROTO_HTTPS).is_ok());
        let failure = check_protocol("smtp://mail/", PROTO_HTTP | PROTO_HTTPS).unwrap_err();
        assert_eq!(failure.code, ResultCode::UNSUPPORTED_PROTOCOL);
        let failure = check_protocol("https://a/", PROTO_HTTP).unwrap_err();
        assert_eq!(failure.code, ResultCode::UNSUPPORTED_PROTOCOL);
        let failure = check_protocol("not a url", PROTO_HTTP).unwrap_err();
        assert_eq!(failure.code, ResultCode::URL_MALFORMAT);
    }

    #[test]
    fn unsupported_capabilities_are_rejected_at_set_time() {
        let mut handle = UreqHandle::default();
        let old_tls = TlsVersion::TlsV1_1.code();
        assert!(matches!(
            handle.set_option(OptionKey::SslVersion, OptionValue::Int(old_tls)),
            Err(ConfigError::UnsupportedTlsVersion(token)) if token == "TLSv1_1"
        ));
        assert!(handle
            .set_option(OptionKey::SslVersion, OptionValue::Int(TlsVersion::TlsV1_2.code()))
            .is_ok());
        assert!(matches!(
            handle.set_option(
                OptionKey::HttpVersion,
                OptionValue::Int(HttpVersion::Http2_0.code())
            ),
            Err(ConfigError::UnsupportedHttpVersion(_))
        ));
        assert!(matches!(
            handle.set_option(OptionKey::HttpAuth, OptionValue::Int(crate::request::AUTH_DIGEST)),
            Err(ConfigError::UnsupportedFeature(_))
        ));
        assert!(handle
            .set_option(OptionKey::SslCert, OptionValue::Text("client.pem".into()))
            .is_err());
    }

    #[test]
    fn method_follows_flags() {
        let mut handle = UreqHandle::default();
        assert_eq!(handle.options.method(), "GET");
        handle.set_option(OptionKey::Post, OptionValue::Int(1)).unwrap();
        assert_eq!(handle.options.method(), "POST");
        handle
            .set_option(OptionKey::CustomRequest, OptionValue::Text("PATCH".into()))
            .unwrap();
        assert_eq!(handle.options.method(), "PATCH");
        handle.reset();
        handle.set_option(OptionKey::NoBody, OptionValue::Int(1)).unwrap();
        assert_eq!(handle.options.method(), "HEAD");
    }

    #[test]
    fn chunked_header_is_dropped_and_basic_auth_added() {
        let mut handle = UreqHandle::default();
        handle
            .set_option(
                OptionKey::HttpHeader,
                OptionValue::List(vec![
                    "Transfer-Encoding: chunked".into(),
                    "X-Keep: yes".into(),
                ]),
            )
            .unwrap();
        handle
            .set_option(OptionKey::UserPassword, OptionValue::Text("u:p".into()))
            .unwrap();
        let headers = handle.request_headers(None);
        assert_eq!(
            headers,
            [
                ("X-Keep".to_string(), "yes".to_string()),
                ("Accept-Encoding".to_string(), "identity".to_string()),
                ("Authorization".to_string(), "Basic dTpw".to_string()),
            ]
        );
    }

    #[test]
    fn content_decoding_controls_accept_encoding() {
        let accept_encoding = |handle: &UreqHandle| {
            handle
                .request_headers(None)
                .into_iter()
                .find(|(name, _)| name == "Accept-Encoding")
                .map(|(_, value)| value)
        };
        let mut handle = UreqHandle::default();
        assert_eq!(accept_encoding(&handle).as_deref(), Some("identity"));

        handle
            .set_option(OptionKey::AcceptEncoding, OptionValue::Text(String::new()))
            .unwrap();
        assert_eq!(accept_encoding(&handle), None);

        handle
            .set_option(OptionKey::AcceptEncoding, OptionValue::Text("br".into()))
            .unwrap();
        assert_eq!(accept_encoding(&handle).as_deref(), Some("br"));
    }

    #[test]
    fn multipart_body_lists_every_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, b"file contents").unwrap();
        let form = Form {
            parts: vec![
                crate::transport::FormPart {
                    name: "field".into(),
                    content: FormContent::Text("value".into()),
                },
                crate::transport::FormPart {
                    name: "upload".into(),
                    content: FormContent::File(path),
                },
            ],
        };
        let body = String::from_utf8(encode_multipart(&form, "XYZ").unwrap()).unwrap();
        assert!(body.starts_with("--XYZ\r\nContent-Disposition: form-data; name=\"field\""));
        assert!(body.contains("filename=\"note.txt\""));
        assert!(body.contains("file contents"));
        assert!(body.ends_with("--XYZ--\r\n"));
    }

    #[test]
    fn low_speed_window_trips_when_too_slow() {
        let mut window = LowSpeedWindow::new(1_000_000, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        let failure = window.record(10).unwrap_err();
        assert_eq!(failure.code, ResultCode::OPERATION_TIMEDOUT);

        let mut disabled = LowSpeedWindow::new(0, Duration::from_secs(1));
        assert!(disabled.record(0).is_ok());
    }
}
