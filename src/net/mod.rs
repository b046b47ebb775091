//! Transport-agnostic socket plumbing shared by the TCP sender.
//!
//! Adapted from `net/mod.rs` + `net/tls/mod.rs`, collapsed from their
//! `sqlx_rt`-generic, multi-runtime form down to a single `tokio`-specific
//! one: this crate only ever runs on tokio, so the `MaybeTlsStream` enum is
//! generic over nothing and there is no `_rt-async-std` / `_rt-tokio` cfg
//! split to preserve.

mod tls;

pub(crate) use tls::MaybeTlsStream;

use crate::config::Options;
use crate::error::{Error, Result};
use tokio::net::TcpStream;

/// Opens a plain TCP connection to `options.host:options.port` and, if the
/// protocol requires TLS, immediately upgrades it.
pub(crate) async fn connect_tcp(options: &Options) -> Result<MaybeTlsStream<TcpStream>> {
    connect_raw(&options.host, options.port, options.is_tls(), options).await
}

/// The stream type used by the `stdlib_http` minimal HTTP/1.1 client: a
/// one-shot connection per request, dialed the same way the TCP transport
/// dials its long-lived stream.
pub(crate) type HttpStream = MaybeTlsStream<TcpStream>;

pub(crate) async fn connect_http_stream(
    host: &str,
    port: u16,
    is_tls: bool,
    options: &Options,
) -> Result<HttpStream> {
    connect_raw(host, port, is_tls, options).await
}

async fn connect_raw(
    host: &str,
    port: u16,
    is_tls: bool,
    options: &Options,
) -> Result<MaybeTlsStream<TcpStream>> {
    let stream = TcpStream::connect((host, port)).await.map_err(Error::Io)?;
    stream.set_nodelay(true).map_err(Error::Io)?;

    if is_tls {
        let connector = tls::configure_tls_connector(options)?;
        let domain = host.to_string();
        let server_name = rustls::pki_types::ServerName::try_from(domain)
            .map_err(Error::tls)?;
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(Error::Io)?;
        Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
    } else {
        Ok(MaybeTlsStream::Raw(stream))
    }
}
