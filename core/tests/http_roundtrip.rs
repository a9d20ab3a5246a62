//! End-to-end calls through the ureq transport against the live mock server.
//!
//! # Design
//! The mock server is started once per test binary on a random port, in a
//! background thread with its own runtime. Each test drives a fresh
//! `Session` over real HTTP and checks what the server saw (via the `/test`
//! echo route) as well as what the session reported back.

#![cfg(feature = "ureq")]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mock_server::{Echo, BASIC_PASSWORD, BASIC_USER, PICTURE, VERY_LARGE_SIZE};
use tether_core::config::{with_query, SessionConfig};
use tether_core::response::parse_header_blocks;
use tether_core::{
    AuthType, Body, Credentials, ErrorKind, Method, RequestDescriptor, Session, SessionRegistry,
    UreqTransport,
};

fn server() -> &'static str {
    static BASE: OnceLock<String> = OnceLock::new();
    BASE.get_or_init(|| {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                mock_server::run(listener).await
            })
            .unwrap();
        });
        format!("http://{addr}")
    })
}

fn url(path: &str) -> String {
    format!("{}{path}", server())
}

fn session() -> Session<UreqTransport> {
    Session::with_registry(UreqTransport::new(), Arc::new(SessionRegistry::new()))
}

fn echo(response: &tether_core::Response) -> Echo {
    serde_json::from_slice(response.body().unwrap()).unwrap()
}

// --- methods and bodies ---

#[test]
fn get_reaches_the_echo_route() {
    let response = session()
        .request(&RequestDescriptor::get(url("/test")).header("X-Custom", "yes"))
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.url(), url("/test"));
    assert_eq!(response.redirect_count(), 0);
    assert!(response.status_line().starts_with("HTTP/1.1 200"));
    let seen = echo(&response);
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.headers["x-custom"], "yes");
}

#[test]
fn encodings_are_only_advertised_when_decoding_is_on() {
    let mut request = RequestDescriptor::get(url("/test"));
    let seen = echo(&session().request(&request).unwrap());
    assert_eq!(seen.headers.get("accept-encoding").map(String::as_str), Some("identity"));

    request.automatic_content_decoding = true;
    let seen = echo(&session().request(&request).unwrap());
    assert_ne!(seen.headers.get("accept-encoding").map(String::as_str), Some("identity"));
}

#[test]
fn post_sends_in_memory_body() {
    let response = session()
        .request(&RequestDescriptor::post(url("/test"), "a=1&b=2"))
        .unwrap();
    let seen = echo(&response);
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.body, "a=1&b=2");
    assert_eq!(seen.headers["content-type"], "application/x-www-form-urlencoded");
}

#[test]
fn put_streams_file_body_with_exact_length() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("body.json");
    std::fs::write(&path, br#"{"title":"from file"}"#).unwrap();

    let response = session()
        .request(
            &RequestDescriptor::put(url("/test"), Body::File(path))
                .header("Content-Type", "application/json"),
        )
        .unwrap();
    let seen = echo(&response);
    assert_eq!(seen.method, "PUT");
    assert_eq!(seen.body, r#"{"title":"from file"}"#);
    assert_eq!(seen.headers["content-length"], "21");
    assert!(!seen.headers.contains_key("transfer-encoding"));
}

#[test]
fn patch_and_custom_verbs_keep_their_label() {
    let mut session = session();
    let response = session
        .request(&RequestDescriptor::new(Method::Patch, url("/test")).body("patched"))
        .unwrap();
    assert_eq!(echo(&response).method, "PATCH");
    assert_eq!(echo(&response).body, "patched");

    let response = session
        .request(&RequestDescriptor::new(Method::parse("PURGE"), url("/test")))
        .unwrap();
    assert_eq!(echo(&response).method, "PURGE");
}

#[test]
fn delete_without_body() {
    let response = session()
        .request(&RequestDescriptor::new(Method::Delete, url("/test")))
        .unwrap();
    assert_eq!(echo(&response).method, "DELETE");
}

#[test]
fn head_skips_the_body() {
    let response = session()
        .request(&RequestDescriptor::new(Method::Head, url("/picture")))
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.body().unwrap_or_default().is_empty());
    assert_eq!(response.header("content-type"), Some("image/png"));
}

#[test]
fn multipart_post_sends_fields_and_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"attached text").unwrap();

    let form = tether_core::Multipart {
        fields: vec![("title".into(), "report".into())],
        files: vec![("attachment".into(), path)],
    };
    let response = session()
        .request(&RequestDescriptor::post(url("/test"), Body::Multipart(form)))
        .unwrap();
    let seen = echo(&response);
    assert!(seen.headers["content-type"].starts_with("multipart/form-data; boundary="));
    assert!(seen.body.contains("name=\"title\""));
    assert!(seen.body.contains("report"));
    assert!(seen.body.contains("filename=\"notes.txt\""));
    assert!(seen.body.contains("attached text"));
}

#[test]
fn binary_body_is_kept_byte_for_byte() {
    let response = session()
        .request(&RequestDescriptor::get(url("/picture")))
        .unwrap();
    assert_eq!(response.body(), Some(PICTURE));
}

// --- session defaults ---

#[test]
fn config_defaults_and_query_reach_the_server() {
    let config = SessionConfig::new(server());
    let request = with_query(
        config.request(Method::Get, "/test").unwrap(),
        [("q", "two words"), ("page", "2")],
    );
    let response = session().request(&request).unwrap();
    let seen = echo(&response);
    assert_eq!(seen.query.as_deref(), Some("q=two+words&page=2"));
    assert!(seen.headers["user-agent"].starts_with("tether/"));
}

#[test]
fn session_is_reused_across_calls() {
    let mut session = session();
    for body in ["one", "two", "three"] {
        let response = session
            .request(&RequestDescriptor::post(url("/test"), body))
            .unwrap();
        assert_eq!(echo(&response).body, body);
    }
    let response = session.request(&RequestDescriptor::get(url("/test"))).unwrap();
    let seen = echo(&response);
    assert_eq!(seen.method, "GET");
    assert!(seen.body.is_empty());
}

// --- redirects ---

#[test]
fn redirect_is_followed_and_every_hop_recorded() {
    let response = session()
        .request(&RequestDescriptor::get(url("/redirect")).max_redirects(5))
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.url(), url("/test"));
    assert_eq!(response.redirect_count(), 1);

    let blocks = parse_header_blocks(response.raw_headers()).unwrap();
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].status_line.contains("302"));
}

#[test]
fn zero_redirects_returns_the_redirect_itself() {
    let response = session()
        .request(&RequestDescriptor::get(url("/redirect")).max_redirects(0))
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.header("location"), Some("/test"));
    assert_eq!(response.redirect_count(), 0);
}

#[test]
fn see_other_after_post_switches_to_get() {
    let response = session()
        .request(&RequestDescriptor::post(url("/redirect-303"), "payload").max_redirects(3))
        .unwrap();
    let seen = echo(&response);
    assert_eq!(seen.method, "GET");
    assert!(seen.body.is_empty());
}

#[test]
fn too_many_redirects_is_classified() {
    let err = session()
        .request(&RequestDescriptor::get(url("/redirect-chain/3")).max_redirects(2))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyRedirects);

    let response = session()
        .request(&RequestDescriptor::get(url("/redirect-chain/3")).max_redirects(3))
        .unwrap();
    assert_eq!(response.redirect_count(), 3);
    assert_eq!(response.body(), Some(&b"done"[..]));
}

#[test]
fn redirect_to_another_scheme_is_refused() {
    let err = session()
        .request(&RequestDescriptor::get(url("/evil-redirect")).max_redirects(5))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedProtocol);
}

// --- headers ---

#[test]
fn repeated_response_headers_are_all_kept() {
    let response = session()
        .request(&RequestDescriptor::get(url("/repetitiveheader")))
        .unwrap();
    let values: Vec<_> = response.header_all("x-repeat").collect();
    assert_eq!(values, ["one", "two"]);
}

#[test]
fn charset_comes_from_content_type_or_default() {
    let mut session = session();
    session.set_default_charset(Some("UTF-8".into()));

    let response = session.request(&RequestDescriptor::get(url("/charset"))).unwrap();
    assert_eq!(response.charset(), Some("ISO-8859-1"));

    let response = session.request(&RequestDescriptor::get(url("/picture"))).unwrap();
    assert_eq!(response.charset(), Some("UTF-8"));
}

#[test]
fn basic_auth_credentials_are_sent() {
    let mut session = session();
    let response = session
        .request(&RequestDescriptor::get(url("/basic-auth")))
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = session
        .request(
            &RequestDescriptor::get(url("/basic-auth"))
                .credentials(Credentials::new(BASIC_USER, BASIC_PASSWORD), AuthType::Basic),
        )
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[test]
fn digest_only_auth_is_a_config_error() {
    let err = session()
        .request(
            &RequestDescriptor::get(url("/basic-auth"))
                .credentials(Credentials::new("u", "p"), AuthType::Digest),
        )
        .unwrap_err();
    assert!(err.is_config());
    assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
}

#[test]
fn error_status_is_a_response_not_an_error() {
    let response = session()
        .request(&RequestDescriptor::get(url("/status/503")))
        .unwrap();
    assert_eq!(response.status(), 503);
}

// --- cookies ---

#[test]
fn cookie_jar_is_written_and_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("cookies.txt");

    let mut session = session();
    session.enable_cookie_persistence(Some(&jar)).unwrap();
    session.request(&RequestDescriptor::get(url("/setcookie"))).unwrap();

    let saved = std::fs::read_to_string(&jar).unwrap();
    assert!(saved.contains("tether\tdelicious"), "{saved}");

    let response = session.request(&RequestDescriptor::get(url("/test"))).unwrap();
    assert_eq!(echo(&response).headers["cookie"], "tether=delicious");

    // A new session picks the cookie up from the jar file.
    let mut reloaded = self::session();
    reloaded.enable_cookie_persistence(Some(&jar)).unwrap();
    let response = reloaded.request(&RequestDescriptor::get(url("/test"))).unwrap();
    assert_eq!(echo(&response).headers["cookie"], "tether=delicious");
}

#[test]
fn in_memory_cookies_survive_between_calls_only() {
    let mut session = session();
    session.enable_cookie_persistence(None).unwrap();
    session.request(&RequestDescriptor::get(url("/setcookie"))).unwrap();
    let response = session.request(&RequestDescriptor::get(url("/test"))).unwrap();
    assert_eq!(echo(&response).headers["cookie"], "tether=delicious");

    session.reset().unwrap();
    let response = session.request(&RequestDescriptor::get(url("/test"))).unwrap();
    assert!(!echo(&response).headers.contains_key("cookie"));
}

#[test]
fn without_persistence_cookies_are_not_sent() {
    let mut session = session();
    session.request(&RequestDescriptor::get(url("/setcookie"))).unwrap();
    let response = session.request(&RequestDescriptor::get(url("/test"))).unwrap();
    assert!(!echo(&response).headers.contains_key("cookie"));
}

// --- limits, timeouts, interrupts ---

#[test]
fn total_timeout_is_classified() {
    let err = session()
        .request(&RequestDescriptor::get(url("/timeout")).timeout(Duration::from_millis(300)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[test]
fn refused_connection_is_classified() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = session()
        .request(&RequestDescriptor::get(format!("http://{addr}/")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
}

#[test]
fn download_limit_stops_large_bodies() {
    let err = session()
        .request(&RequestDescriptor::get(url("/very-large")).download_byte_limit(1000))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert!(err.to_string().contains("download byte limit exceeded"));
}

#[test]
fn large_download_goes_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("large.bin");
    let response = session()
        .request(&RequestDescriptor::get(url("/very-large")).download_to(&target))
        .unwrap();
    assert_eq!(response.body(), None);
    assert_eq!(
        std::fs::metadata(&target).unwrap().len(),
        VERY_LARGE_SIZE as u64
    );
}

#[test]
fn interrupt_during_download_aborts() {
    let mut session = session();
    let interrupt = session.interrupt_handle();
    let request = RequestDescriptor::get(url("/very-large")).on_progress(move |progress| {
        if progress.download_now > 0 {
            interrupt.interrupt();
        }
    });
    let err = session.request(&request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert!(session.progress().download_now < VERY_LARGE_SIZE as u64);

    // The session is usable again straight away.
    assert!(session.request(&RequestDescriptor::get(url("/test"))).is_ok());
}

#[test]
fn debug_sink_records_the_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("trace.log");

    let mut session = session();
    session.set_debug_sink(Some(&trace)).unwrap();
    session.request(&RequestDescriptor::get(url("/test"))).unwrap();
    session.disable_debug_sink();

    let written = std::fs::read_to_string(&trace).unwrap();
    assert!(written.contains("> GET "), "{written}");
    assert!(written.contains("< HTTP/1.1 200"), "{written}");
}

#[cfg(feature = "tokio")]
#[tokio::test(flavor = "multi_thread")]
async fn async_session_runs_off_the_executor() {
    let session = tether_core::AsyncSession::new(self::session());
    let (first, second) = tokio::join!(
        session.request(RequestDescriptor::post(url("/test"), "first")),
        session.request(RequestDescriptor::post(url("/test"), "second")),
    );
    assert_eq!(echo(&first.unwrap()).body, "first");
    assert_eq!(echo(&second.unwrap()).body, "second");
}
