use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Size of the `/very-large` body.
pub const VERY_LARGE_SIZE: usize = 1024 * 1024;

/// How long `/timeout` waits before answering.
pub const TIMEOUT_DELAY: Duration = Duration::from_millis(1100);

/// How long `/slow` waits before answering.
pub const SLOW_DELAY: Duration = Duration::from_secs(3);

pub const COOKIE_NAME: &str = "tether";
pub const COOKIE_VALUE: &str = "delicious";

pub const BASIC_USER: &str = "user";
pub const BASIC_PASSWORD: &str = "pass";

/// What `/test` saw of the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub query: Option<String>,
    /// Lower-cased header names; repeated headers joined with ", ".
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/test", any(echo))
        .route("/timeout", get(timeout))
        .route("/slow", get(slow))
        .route("/redirect", any(redirect))
        .route("/redirect-303", any(redirect_see_other))
        .route("/redirect-chain/{hops}", get(redirect_chain))
        .route("/evil-redirect", get(evil_redirect))
        .route("/setcookie", get(set_cookie))
        .route("/repetitiveheader", get(repetitive_header))
        .route("/very-large", get(very_large))
        .route("/picture", get(picture))
        .route("/charset", get(charset))
        .route("/basic-auth", get(basic_auth))
        .route("/status/{code}", any(status))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn echo(
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        seen.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    Json(Echo {
        method: method.to_string(),
        query,
        headers: seen,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn timeout() -> &'static str {
    tokio::time::sleep(TIMEOUT_DELAY).await;
    "too late"
}

async fn slow() -> &'static str {
    tokio::time::sleep(SLOW_DELAY).await;
    "finally"
}

async fn redirect() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/test")]).into_response()
}

async fn redirect_see_other() -> Response {
    (StatusCode::SEE_OTHER, [(header::LOCATION, "/test")]).into_response()
}

async fn redirect_chain(Path(hops): Path<u32>) -> Response {
    if hops == 0 {
        return "done".into_response();
    }
    let next = format!("/redirect-chain/{}", hops - 1);
    (StatusCode::FOUND, [(header::LOCATION, next)]).into_response()
}

async fn evil_redirect() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "file:///etc/passwd")]).into_response()
}

async fn set_cookie() -> Response {
    let cookie = format!("{COOKIE_NAME}={COOKIE_VALUE}; Path=/");
    ([(header::SET_COOKIE, cookie)], "cookie set").into_response()
}

async fn repetitive_header() -> Response {
    let mut headers = HeaderMap::new();
    headers.append("x-repeat", HeaderValue::from_static("one"));
    headers.append("x-repeat", HeaderValue::from_static("two"));
    (headers, "repeated").into_response()
}

async fn very_large() -> Vec<u8> {
    vec![b'x'; VERY_LARGE_SIZE]
}

/// A 1x1 transparent PNG.
pub const PICTURE: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

async fn picture() -> Response {
    ([(header::CONTENT_TYPE, "image/png")], PICTURE).into_response()
}

async fn charset() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=ISO-8859-1")],
        "caf\u{e9}",
    )
        .into_response()
}

async fn basic_auth(headers: HeaderMap) -> Response {
    use base64::Engine as _;
    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{BASIC_USER}:{BASIC_PASSWORD}"))
    );
    let authorized = headers
        .get(header::AUTHORIZATION)
        .is_some_and(|value| value.as_bytes() == expected.as_bytes());
    if authorized {
        "authorized".into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"tether\"")],
            "unauthorized",
        )
            .into_response()
    }
}

async fn status(Path(code): Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}
