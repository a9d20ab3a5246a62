//! Standalone fixture server for poking at tether by hand.
//!
//! `mock-server [addr]` binds `addr`, else `TETHER_FIXTURE_ADDR`, else
//! `127.0.0.1:9001`.

use std::net::SocketAddr;

use tokio::net::TcpListener;

const DEFAULT_ADDR: &str = "127.0.0.1:9001";

fn listen_addr() -> Result<SocketAddr, std::io::Error> {
    let raw = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TETHER_FIXTURE_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    raw.parse().map_err(|err| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("bad listen address {raw:?}: {err}"),
        )
    })
}

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(listen_addr()?).await?;
    let addr = listener.local_addr()?;
    println!("fixture server listening on http://{addr} (echo at /test)");
    mock_server::run(listener).await
}
