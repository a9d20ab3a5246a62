//! Response value and header-block parsing.

use thiserror::Error;

use crate::transport::{InfoKey, InfoValue};

/// One header block: a status line and the headers that followed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("header line before any status line: {line:?}")]
pub struct HeaderParseError {
    pub line: String,
}

fn is_status_line(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("HTTP/") else {
        return false;
    };
    let mut chars = rest.chars();
    let version_ok = matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(major), Some('.'), Some(minor)) if major.is_ascii_digit() && minor.is_ascii_digit()
    );
    version_ok
        && chars.next() == Some(' ')
        && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Split raw header bytes into blocks, one per status line (one per
/// redirect hop, possibly preceded by a proxy `CONNECT` response).
pub fn parse_header_blocks(raw: &[u8]) -> Result<Vec<HeaderBlock>, HeaderParseError> {
    let text = String::from_utf8_lossy(raw);
    let mut blocks: Vec<HeaderBlock> = Vec::new();
    let mut open = false;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            open = false;
            continue;
        }
        if is_status_line(line) {
            blocks.push(HeaderBlock {
                status_line: line.to_string(),
                headers: Vec::new(),
            });
            open = true;
            continue;
        }
        let current = match blocks.last_mut() {
            Some(block) if open => block,
            _ => {
                return Err(HeaderParseError {
                    line: line.to_string(),
                })
            }
        };
        if let Some((name, value)) = line.split_once(':') {
            current
                .headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(blocks)
}

/// Outcome of a successful call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    url: String,
    status: u16,
    redirect_count: u32,
    raw_headers: Vec<u8>,
    body: Option<Vec<u8>>,
    default_charset: Option<String>,
    final_block: HeaderBlock,
}

impl Response {
    pub(crate) fn new(
        url: String,
        status: u16,
        redirect_count: u32,
        raw_headers: Vec<u8>,
        body: Option<Vec<u8>>,
        default_charset: Option<String>,
    ) -> Self {
        let final_block = parse_header_blocks(&raw_headers)
            .ok()
            .and_then(|blocks| blocks.into_iter().last())
            .unwrap_or_default();
        Self {
            url,
            status,
            redirect_count,
            raw_headers,
            body,
            default_charset,
            final_block,
        }
    }

    /// Effective URL, after redirects.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn redirect_count(&self) -> u32 {
        self.redirect_count
    }

    pub fn raw_headers(&self) -> &[u8] {
        &self.raw_headers
    }

    /// `None` when the body was written to a download file.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn into_body(self) -> Option<Vec<u8>> {
        self.body
    }

    pub fn status_line(&self) -> &str {
        &self.final_block.status_line
    }

    /// Headers of the final block, in arrival order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.final_block.headers
    }

    /// First value of `name` in the final block, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.final_block
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.final_block
            .headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Charset declared by `Content-Type`, else the caller's default hint.
    pub fn charset(&self) -> Option<&str> {
        self.header("content-type")
            .and_then(charset_parameter)
            .or(self.default_charset.as_deref())
    }
}

fn charset_parameter(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        let key = key.trim();
        if key.eq_ignore_ascii_case("charset") || key.eq_ignore_ascii_case("encoding") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then_some(value)
        } else {
            None
        }
    })
}

/// Assemble a response from introspection fields and the accumulated bytes.
/// `fallback_url` is used when the transport cannot report the effective URL.
pub(crate) fn build(
    info: impl Fn(InfoKey) -> Option<InfoValue>,
    fallback_url: &str,
    raw_headers: Vec<u8>,
    body: Option<Vec<u8>>,
    default_charset: Option<String>,
) -> Response {
    let url = match info(InfoKey::EffectiveUrl) {
        Some(InfoValue::Text(url)) => url,
        _ => fallback_url.to_string(),
    };
    let status = match info(InfoKey::ResponseCode) {
        Some(InfoValue::Int(code)) => u16::try_from(code).unwrap_or(0),
        _ => 0,
    };
    let redirect_count = match info(InfoKey::RedirectCount) {
        Some(InfoValue::Int(count)) => u32::try_from(count).unwrap_or(0),
        _ => 0,
    };
    Response::new(url, status, redirect_count, raw_headers, body, default_charset)
}
