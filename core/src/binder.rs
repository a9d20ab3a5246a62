//! Translate a `RequestDescriptor` into option-set calls on a
//! `TransportHandle`.
//!
//! # Order
//! 1. URL presence is checked first, so a descriptor without one never
//!    opens a file or touches the transport.
//! 2. Headers are validated and collected; `Accept-Encoding: gzip` becomes
//!    the native content-decoding option.
//! 3. IPv4-only resolver flag.
//! 4. Method dispatch and body resolution. This may still add a header
//!    (chunked upload), so the header list is committed afterwards.
//! 5. URL and the HTTP/HTTPS allow-list for the request and for redirects.
//! 6. Everything else, each only when present.
//!
//! Durations are passed to the transport in milliseconds, except the DNS
//! cache and low-speed windows which are whole seconds.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use tracing::trace;

use crate::error::{ConfigError, Error};
use crate::handle::{TransportHandle, UploadSource};
use crate::request::{Body, HttpVersion, Method, Multipart, RequestDescriptor, TlsVersion};
use crate::transport::{
    Feature, Form, FormContent, FormPart, OptionKey, Transport, IPRESOLVE_V4, PROTO_HTTP,
    PROTO_HTTPS,
};

/// Empty `ACCEPT_ENCODING` asks the transport for every encoding it decodes.
const ALL_SUPPORTED_ENCODINGS: &str = "";

/// Apply `request` to `handle`. On error the handle may hold a partial
/// configuration; the caller is expected to `reset` it.
pub fn bind<T: Transport>(
    handle: &mut TransportHandle<T>,
    request: &RequestDescriptor,
) -> Result<(), Error> {
    let url = match request.url.as_deref() {
        Some(url) if !url.is_empty() => url,
        _ => return Err(ConfigError::MissingUrl.into()),
    };

    let mut headers = header_lines(handle, request)?;

    if request.force_ipv4 {
        handle.set_option(OptionKey::IpResolve, IPRESOLVE_V4)?;
    }

    bind_method(handle, request, &mut headers)?;
    if !headers.is_empty() {
        handle.set_header_list(headers)?;
    }

    handle.set_option(OptionKey::Url, url)?;
    handle.set_option(OptionKey::Protocols, PROTO_HTTP | PROTO_HTTPS)?;
    handle.set_option(OptionKey::RedirectProtocols, PROTO_HTTP | PROTO_HTTPS)?;

    bind_transfer_limits(handle, request)?;
    bind_connection(handle, request)?;
    bind_tls(handle, request)?;

    if let Some(size) = request.buffer_size {
        handle.set_option(OptionKey::BufferSize, saturating_i64(size as u64))?;
    }
    if handle.has_debug_sink() {
        handle.set_option(OptionKey::Verbose, 1i64)?;
    }
    handle.set_progress_observer(request.progress.clone());
    handle.set_download_byte_limit(request.download_byte_limit);
    trace!(method = %request.method(), url, "request bound");
    Ok(())
}

fn header_lines<T: Transport>(
    handle: &mut TransportHandle<T>,
    request: &RequestDescriptor,
) -> Result<Vec<String>, Error> {
    let mut lines = Vec::with_capacity(request.headers.len());
    let mut decoding = request.automatic_content_decoding;
    for (name, value) in &request.headers {
        validate_header(name, value)?;
        if name.eq_ignore_ascii_case("accept-encoding") && value.contains("gzip") {
            decoding = true;
            continue;
        }
        lines.push(format!("{name}: {value}"));
    }
    if decoding {
        if !handle.supports(Feature::ContentDecoding) {
            return Err(ConfigError::UnsupportedFeature(
                "automatic content decoding is not supported by this transport".into(),
            )
            .into());
        }
        handle.set_option(OptionKey::AcceptEncoding, ALL_SUPPORTED_ENCODINGS)?;
    }
    Ok(lines)
}

fn validate_header(name: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidHeader {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if name.contains(':') {
        return Err(invalid("name contains ':'"));
    }
    if name.contains(['\r', '\n']) || value.contains(['\r', '\n']) {
        return Err(invalid("contains a line break"));
    }
    Ok(())
}

fn bind_method<T: Transport>(
    handle: &mut TransportHandle<T>,
    request: &RequestDescriptor,
    headers: &mut Vec<String>,
) -> Result<(), Error> {
    let method = request.method();
    if request.download_to.is_some() && method != Method::Get {
        return Err(ConfigError::UnsupportedCombination(format!(
            "downloading to a file is only supported for GET, not {method}"
        ))
        .into());
    }

    match &method {
        Method::Get => {
            handle.set_option(OptionKey::HttpGet, 1i64)?;
            match &request.body {
                None => {}
                Some(Body::Bytes(bytes)) => {
                    attach_bytes(handle, bytes)?;
                    handle.set_option(OptionKey::CustomRequest, "GET")?;
                }
                Some(_) => return Err(only_in_memory_body(&method)),
            }
            if let Some(path) = &request.download_to {
                let file = File::create(path).map_err(|err| ConfigError::file(path, err))?;
                handle.set_download_file(file);
            }
        }
        Method::Post | Method::Put | Method::Patch => {
            handle.set_option(OptionKey::CustomRequest, method.as_str())?;
            match &request.body {
                Some(Body::Multipart(multipart)) if !multipart.is_empty() => {
                    if method != Method::Post {
                        return Err(ConfigError::UnsupportedCombination(format!(
                            "multipart bodies are only supported for POST, not {method}"
                        ))
                        .into());
                    }
                    handle.set_form(multipart_form(multipart)?)?;
                }
                Some(Body::Bytes(bytes)) => attach_bytes(handle, bytes)?,
                Some(Body::File(path)) => {
                    attach_file(handle, path)?;
                    headers.push("Transfer-Encoding: chunked".to_string());
                }
                _ => return Err(ConfigError::MissingBody(method.to_string()).into()),
            }
        }
        Method::Delete => {
            handle.set_option(OptionKey::CustomRequest, "DELETE")?;
            match &request.body {
                None => {}
                Some(Body::Bytes(bytes)) => attach_bytes(handle, bytes)?,
                Some(_) => return Err(only_in_memory_body(&method)),
            }
        }
        Method::Head => {
            if request.body.is_some() {
                return Err(ConfigError::UnsupportedCombination(
                    "HEAD requests cannot carry a body".into(),
                )
                .into());
            }
            handle.set_option(OptionKey::NoBody, 1i64)?;
        }
        Method::Custom(verb) => {
            handle.set_option(OptionKey::CustomRequest, verb.as_str())?;
            match &request.body {
                None => {}
                Some(Body::Bytes(bytes)) => attach_bytes(handle, bytes)?,
                Some(_) => return Err(only_in_memory_body(&method)),
            }
        }
    }
    Ok(())
}

fn only_in_memory_body(method: &Method) -> Error {
    ConfigError::UnsupportedCombination(format!(
        "{method} only supports an in-memory body"
    ))
    .into()
}

fn attach_bytes<T: Transport>(handle: &mut TransportHandle<T>, bytes: &[u8]) -> Result<(), Error> {
    handle.set_option(OptionKey::Post, 1i64)?;
    handle.set_option(OptionKey::PostFieldSize, saturating_i64(bytes.len() as u64))?;
    handle.set_upload(UploadSource::Bytes(Cursor::new(bytes.to_vec())));
    Ok(())
}

fn attach_file<T: Transport>(handle: &mut TransportHandle<T>, path: &Path) -> Result<(), Error> {
    let file = File::open(path).map_err(|err| ConfigError::file(path, err))?;
    let size = file
        .metadata()
        .map_err(|err| ConfigError::file(path, err))?
        .len();
    handle.set_option(OptionKey::Post, 1i64)?;
    handle.set_option(OptionKey::InFileSize, saturating_i64(size))?;
    handle.set_upload(UploadSource::File(file));
    Ok(())
}

fn multipart_form(multipart: &Multipart) -> Result<Form, ConfigError> {
    let mut parts = Vec::with_capacity(multipart.fields.len() + multipart.files.len());
    for (name, value) in &multipart.fields {
        parts.push(FormPart {
            name: name.clone(),
            content: FormContent::Text(value.clone()),
        });
    }
    for (name, path) in &multipart.files {
        std::fs::metadata(path).map_err(|err| ConfigError::file(path, err))?;
        parts.push(FormPart {
            name: name.clone(),
            content: FormContent::File(path.clone()),
        });
    }
    Ok(Form { parts })
}

fn bind_transfer_limits<T: Transport>(
    handle: &mut TransportHandle<T>,
    request: &RequestDescriptor,
) -> Result<(), Error> {
    if let Some(timeout) = request.timeout {
        handle.set_option(OptionKey::Timeout, millis(timeout))?;
    }
    if let Some(timeout) = request.connect_timeout {
        handle.set_option(OptionKey::ConnectTimeout, millis(timeout))?;
    }
    if let Some(timeout) = request.dns_cache_timeout {
        handle.set_option(OptionKey::DnsCacheTimeout, saturating_i64(timeout.as_secs()))?;
    }
    if let Some(low_speed) = request.low_speed {
        handle.set_option(
            OptionKey::LowSpeedLimit,
            saturating_i64(low_speed.bytes_per_second),
        )?;
        handle.set_option(
            OptionKey::LowSpeedTime,
            saturating_i64(low_speed.time.as_secs()),
        )?;
    }
    match request.max_redirects {
        None => {}
        Some(0) => {
            handle.set_option(OptionKey::FollowLocation, 0i64)?;
            handle.set_option(OptionKey::MaxRedirects, 0i64)?;
        }
        Some(max) => {
            handle.set_option(OptionKey::FollowLocation, 1i64)?;
            handle.set_option(OptionKey::MaxRedirects, i64::from(max))?;
        }
    }
    if request.ignore_content_length {
        handle.set_option(OptionKey::IgnoreContentLength, 1i64)?;
    }
    Ok(())
}

fn bind_connection<T: Transport>(
    handle: &mut TransportHandle<T>,
    request: &RequestDescriptor,
) -> Result<(), Error> {
    if let Some(proxy) = &request.proxy {
        handle.set_option(OptionKey::Proxy, proxy.as_str())?;
    }
    if let Some(proxy_type) = request.proxy_type {
        handle.set_option(OptionKey::ProxyType, proxy_type.code())?;
    }
    if let Some(credentials) = &request.credentials {
        handle.set_option(OptionKey::HttpAuth, request.auth_type.mask())?;
        handle.set_option(OptionKey::UserPassword, credentials.user_password())?;
    }
    Ok(())
}

fn bind_tls<T: Transport>(
    handle: &mut TransportHandle<T>,
    request: &RequestDescriptor,
) -> Result<(), Error> {
    if request.insecure {
        handle.set_option(OptionKey::SslVerifyPeer, 0i64)?;
        handle.set_option(OptionKey::SslVerifyHost, 0i64)?;
    }
    if let Some(token) = &request.tls_version {
        let version = TlsVersion::from_token(token)?;
        handle.set_option(OptionKey::SslVersion, version.code())?;
    }
    if let Some(token) = &request.http_version {
        let version = HttpVersion::from_token(token)?;
        handle.set_option(OptionKey::HttpVersion, version.code())?;
    }
    if let Some(cert) = &request.client_cert {
        handle.set_option(OptionKey::SslCert, cert.path.to_string_lossy().into_owned())?;
        if let Some(cert_type) = &cert.cert_type {
            handle.set_option(OptionKey::SslCertType, cert_type.as_str())?;
        }
        if let Some(password) = &cert.key_password {
            handle.set_option(OptionKey::SslKeyPassword, password.as_str())?;
        }
    }
    if let Some(cacert) = &request.cacert {
        handle.set_option(OptionKey::CaInfo, cacert.to_string_lossy().into_owned())?;
    }
    Ok(())
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
