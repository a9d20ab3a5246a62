//! Session-wide request defaults.
//!
//! `SessionConfig` is plain data, loadable from JSON. It never touches the
//! transport; `request` turns it plus a method and path into a
//! `RequestDescriptor` that the session binds as usual.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::request::{AuthType, Credentials, Method, ProxyType, RequestDescriptor};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

pub fn default_user_agent() -> String {
    format!("tether/{}", env!("CARGO_PKG_VERSION"))
}

/// Durations as fractional seconds in JSON.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub base_url: String,
    pub headers: Vec<(String, String)>,
    #[serde(with = "seconds")]
    pub timeout: Duration,
    #[serde(with = "seconds")]
    pub connect_timeout: Duration,
    pub max_redirects: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_type: AuthType,
    pub proxy: Option<String>,
    pub proxy_type: Option<ProxyType>,
    pub insecure: bool,
    pub cacert: Option<PathBuf>,
    pub tls_version: Option<String>,
    pub http_version: Option<String>,
    pub buffer_size: Option<usize>,
    pub force_ipv4: bool,
    pub automatic_content_decoding: bool,
    pub ignore_content_length: bool,
    pub download_byte_limit: Option<u64>,
    pub default_response_charset: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: vec![("User-Agent".to_string(), default_user_agent())],
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            username: None,
            password: None,
            auth_type: AuthType::Basic,
            proxy: None,
            proxy_type: None,
            insecure: false,
            cacert: None,
            tls_version: None,
            http_version: None,
            buffer_size: None,
            force_ipv4: false,
            automatic_content_decoding: false,
            ignore_content_length: false,
            download_byte_limit: None,
            default_response_charset: None,
        }
    }
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Join `path` onto the base URL as a sub-path. An absolute
    /// `http(s)://` path wins.
    pub fn url_for(&self, path: &str) -> Result<String, ConfigError> {
        if let Ok(absolute) = Url::parse(path) {
            if matches!(absolute.scheme(), "http" | "https") {
                return Ok(absolute.into());
            }
        }
        match (self.base_url.is_empty(), path.is_empty()) {
            (true, true) => Err(ConfigError::MissingUrl),
            (true, false) => Ok(path.to_string()),
            (false, _) => {
                let invalid = |source| ConfigError::InvalidUrl {
                    url: self.base_url.clone(),
                    source,
                };
                let mut base = Url::parse(&self.base_url).map_err(invalid)?;
                if path.is_empty() {
                    return Ok(base.into());
                }
                if !base.path().ends_with('/') {
                    let directory = format!("{}/", base.path());
                    base.set_path(&directory);
                }
                let joined = base.join(path.trim_start_matches('/')).map_err(invalid)?;
                Ok(joined.into())
            }
        }
    }

    /// Descriptor for `method path` with every session default applied.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestDescriptor, ConfigError> {
        let mut request = RequestDescriptor::new(method, self.url_for(path)?);
        request.headers = self.headers.clone();
        request.timeout = Some(self.timeout);
        request.connect_timeout = Some(self.connect_timeout);
        request.max_redirects = Some(self.max_redirects);
        if let Some(username) = &self.username {
            let password = self.password.clone().unwrap_or_default();
            request.credentials = Some(Credentials::new(username.clone(), password));
        }
        request.auth_type = self.auth_type;
        request.proxy = self.proxy.clone();
        request.proxy_type = self.proxy_type;
        request.insecure = self.insecure;
        request.cacert = self.cacert.clone();
        request.tls_version = self.tls_version.clone();
        request.http_version = self.http_version.clone();
        request.buffer_size = self.buffer_size;
        request.force_ipv4 = self.force_ipv4;
        request.automatic_content_decoding = self.automatic_content_decoding;
        request.ignore_content_length = self.ignore_content_length;
        request.download_byte_limit = self.download_byte_limit;
        Ok(request)
    }

    /// Like `request`, then set per-call headers, replacing session headers
    /// of the same name.
    pub fn request_with_headers(
        &self,
        method: Method,
        path: &str,
        headers: &[(String, String)],
    ) -> Result<RequestDescriptor, ConfigError> {
        let mut request = self.request(method, path)?;
        for (name, value) in headers {
            request
                .headers
                .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            request.headers.push((name.clone(), value.clone()));
        }
        Ok(request)
    }
}

/// Merge `pairs` into the descriptor's URL, keeping any query it already
/// has. A URL that does not parse is left untouched for the binder to
/// report.
pub fn with_query<K, V>(
    mut request: RequestDescriptor,
    pairs: impl IntoIterator<Item = (K, V)>,
) -> RequestDescriptor
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let pairs: Vec<(K, V)> = pairs.into_iter().collect();
    if pairs.is_empty() {
        return request;
    }
    if let Some(raw) = request.url.as_mut() {
        if let Ok(mut url) = Url::parse(raw) {
            url.query_pairs_mut().extend_pairs(&pairs);
            *raw = url.into();
        }
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.auth_type, AuthType::Basic);
        assert!(config.headers[0].1.starts_with("tether/"));
    }

    #[test]
    fn loads_partial_json_over_defaults() {
        let config = SessionConfig::from_json(
            r#"{"base_url": "http://localhost:9001", "timeout": 2.5, "insecure": true,
                "proxy_type": "socks5"}"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:9001");
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.proxy_type, Some(ProxyType::Socks5));
        assert!(config.insecure);
    }

    #[test]
    fn json_round_trips() {
        let mut config = SessionConfig::new("http://example.test");
        config.tls_version = Some("TLSv1_2".into());
        let back = SessionConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn urls_join_on_one_slash() {
        let config = SessionConfig::new("http://host/api/");
        assert_eq!(config.url_for("/items").unwrap(), "http://host/api/items");
        assert_eq!(config.url_for("").unwrap(), "http://host/api/");
        assert_eq!(
            config.url_for("https://other/x").unwrap(),
            "https://other/x"
        );
        assert!(matches!(
            SessionConfig::default().url_for(""),
            Err(ConfigError::MissingUrl)
        ));
    }

    #[test]
    fn base_without_trailing_slash_keeps_its_path() {
        let config = SessionConfig::new("http://host/api");
        assert_eq!(config.url_for("items/1").unwrap(), "http://host/api/items/1");
        assert_eq!(
            config.url_for("../up").unwrap(),
            "http://host/up"
        );
        assert_eq!(SessionConfig::new("http://host").url_for("x").unwrap(), "http://host/x");
        assert_eq!(config.url_for("").unwrap(), "http://host/api");
    }

    #[test]
    fn malformed_base_url_is_reported() {
        let err = SessionConfig::new("http://[bad").url_for("x").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedUrl);
    }

    #[test]
    fn request_carries_defaults() {
        let mut config = SessionConfig::new("http://host");
        config.username = Some("alice".into());
        config.password = Some("pw".into());
        let request = config.request(Method::Get, "test").unwrap();
        assert_eq!(request.url.as_deref(), Some("http://host/test"));
        assert_eq!(request.timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(request.max_redirects, Some(5));
        assert_eq!(request.credentials.unwrap().username, "alice");
    }

    #[test]
    fn call_headers_override_session_headers() {
        let config = SessionConfig::new("http://host");
        let request = config
            .request_with_headers(
                Method::Get,
                "/",
                &[("user-agent".to_string(), "custom/1.0".to_string())],
            )
            .unwrap();
        assert_eq!(request.headers, [("user-agent".to_string(), "custom/1.0".to_string())]);
    }

    #[test]
    fn query_merges_with_existing_parameters() {
        let request = RequestDescriptor::get("http://host/search?a=1#top");
        let request = with_query(request, [("q", "x y")]);
        assert_eq!(request.url.as_deref(), Some("http://host/search?a=1&q=x+y#top"));

        let request = with_query(RequestDescriptor::get("http://host/"), [("k", "v")]);
        assert_eq!(request.url.as_deref(), Some("http://host/?k=v"));
    }
}
