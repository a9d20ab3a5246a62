//! Cookie store for the ureq transport, with Netscape-format jar files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cookie {
    domain: String,
    include_subdomains: bool,
    path: String,
    secure: bool,
    expires: u64,
    name: String,
    value: String,
}

impl Cookie {
    fn matches(&self, url: &Url) -> bool {
        let host = request_host(url);
        let domain = self.domain.trim_start_matches('.');
        let host_ok = host == domain
            || (self.include_subdomains && host.ends_with(&format!(".{domain}")));
        host_ok
            && path_matches(url.path(), &self.path)
            && (!self.secure || url.scheme() == "https")
    }
}

fn request_host(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_ascii_lowercase()
}

/// RFC 6265 path-match: identical, or `cookie_path` is a prefix ending at
/// a `/` boundary of `request_path`.
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    match request_path.strip_prefix(cookie_path) {
        Some(rest) => rest.is_empty() || cookie_path.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// In-memory cookie store with Netscape-format import and export.
#[derive(Debug, Default)]
pub(crate) struct CookieStore {
    cookies: Vec<Cookie>,
    loaded: HashSet<PathBuf>,
}

impl CookieStore {
    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    fn upsert(&mut self, cookie: Cookie) {
        self.cookies.retain(|existing| {
            !(existing.domain == cookie.domain
                && existing.path == cookie.path
                && existing.name == cookie.name)
        });
        self.cookies.push(cookie);
    }

    /// Import a cookie file once per path; a missing file is an empty jar.
    pub fn load_file(&mut self, path: &Path) {
        if !self.loaded.insert(path.to_path_buf()) {
            return;
        }
        let Ok(contents) = fs::read_to_string(path) else {
            return;
        };
        for line in contents.lines() {
            self.insert_netscape_line(line);
        }
    }

    pub fn insert_netscape_line(&mut self, line: &str) {
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        if line.trim().is_empty() || line.starts_with('#') {
            return;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if let [domain, subdomains, path, secure, expires, name, value] = fields[..] {
            self.upsert(Cookie {
                domain: domain.trim_start_matches('.').to_ascii_lowercase(),
                include_subdomains: subdomains.eq_ignore_ascii_case("TRUE"),
                path: path.to_string(),
                secure: secure.eq_ignore_ascii_case("TRUE"),
                expires: expires.parse().unwrap_or(0),
                name: name.to_string(),
                value: value.to_string(),
            });
        }
    }

    /// Record a `Set-Cookie` header received from `url`.
    pub fn store(&mut self, url: &Url, header: &str) {
        let mut attributes = header.split(';');
        let Some((name, value)) = attributes.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let mut cookie = Cookie {
            domain: request_host(url),
            include_subdomains: false,
            path: default_cookie_path(url.path()),
            secure: false,
            expires: 0,
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        };
        let mut expired = false;
        for attribute in attributes {
            let (key, val) = attribute.split_once('=').unwrap_or((attribute, ""));
            let (key, val) = (key.trim(), val.trim());
            if key.eq_ignore_ascii_case("domain") && !val.is_empty() {
                cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
                cookie.include_subdomains = true;
            } else if key.eq_ignore_ascii_case("path") && val.starts_with('/') {
                cookie.path = val.to_string();
            } else if key.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            } else if key.eq_ignore_ascii_case("max-age") {
                expired = val.parse::<i64>().is_ok_and(|age| age <= 0);
            }
        }
        if cookie.name.is_empty() {
            return;
        }
        if expired {
            self.cookies.retain(|existing| {
                !(existing.domain == cookie.domain
                    && existing.path == cookie.path
                    && existing.name == cookie.name)
            });
        } else {
            self.upsert(cookie);
        }
    }

    pub fn header_for(&self, url: &Url) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|cookie| cookie.matches(url))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    pub fn to_netscape(&self) -> String {
        let mut out = String::from("# Netscape HTTP Cookie File\n\n");
        let flag = |value: bool| if value { "TRUE" } else { "FALSE" };
        for cookie in &self.cookies {
            let domain = if cookie.include_subdomains {
                format!(".{}", cookie.domain)
            } else {
                cookie.domain.clone()
            };
            out.push_str(&format!(
                "{domain}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                flag(cookie.include_subdomains),
                cookie.path,
                flag(cookie.secure),
                cookie.expires,
                cookie.name,
                cookie.value
            ));
        }
        out
    }
}

fn default_cookie_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(slash) => request_path[..slash].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn host_ignores_credentials_port_and_case() {
        let mut store = CookieStore::default();
        store.store(&parts("https://user:pw@Example.COM:8443/path/page?q#f"), "k=v");
        assert_eq!(
            store.header_for(&parts("https://example.com/path/other")).as_deref(),
            Some("k=v")
        );
        assert_eq!(store.cookies[0].domain, "example.com");
        assert_eq!(store.cookies[0].path, "/path");
    }

    #[test]
    fn cookie_path_matches_only_on_segment_boundaries() {
        let mut store = CookieStore::default();
        store.store(&parts("http://a.test/app/login"), "s=1; Path=/app");
        assert_eq!(store.header_for(&parts("http://a.test/app")).as_deref(), Some("s=1"));
        assert_eq!(store.header_for(&parts("http://a.test/app/x")).as_deref(), Some("s=1"));
        assert_eq!(store.header_for(&parts("http://a.test/application")), None);
        assert_eq!(store.header_for(&parts("http://a.test/ap")), None);

        assert!(path_matches("/docs/a", "/docs/"));
        assert!(path_matches("/anything", "/"));
    }

    #[test]
    fn cookies_are_scoped_by_host_path_and_scheme() {
        let mut store = CookieStore::default();
        store.store(&parts("http://a.test/app/login"), "session=abc; Path=/app");
        store.store(&parts("http://a.test/"), "token=1; Secure");
        store.store(&parts("http://a.test/"), "wide=1; Domain=a.test");

        assert_eq!(
            store.header_for(&parts("http://a.test/app/x")).as_deref(),
            Some("session=abc; wide=1")
        );
        assert_eq!(
            store.header_for(&parts("http://sub.a.test/")).as_deref(),
            Some("wide=1")
        );
        assert_eq!(
            store.header_for(&parts("https://a.test/")).as_deref(),
            Some("token=1; wide=1")
        );
        assert_eq!(store.header_for(&parts("http://b.test/")), None);
    }

    #[test]
    fn max_age_zero_removes_cookie() {
        let mut store = CookieStore::default();
        let url = parts("http://a.test/");
        store.store(&url, "k=v");
        store.store(&url, "k=; Max-Age=0");
        assert_eq!(store.header_for(&url), None);
    }

    #[test]
    fn netscape_export_can_be_reimported() {
        let mut store = CookieStore::default();
        store.store(&parts("http://a.test/"), "k=v");
        store.store(&parts("http://a.test/"), "w=1; Domain=a.test; Secure");
        let exported = store.to_netscape();
        assert!(exported.starts_with("# Netscape HTTP Cookie File"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jar.txt");
        fs::write(&path, &exported).unwrap();
        let mut reloaded = CookieStore::default();
        reloaded.load_file(&path);
        assert_eq!(reloaded.cookies, store.cookies);
    }
}
