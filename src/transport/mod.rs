//! The two wire transports this crate speaks: HTTP(S) request/response and
//! TCP(S) persistent streaming. `Transport` is the seam the `Sender`
//! programs against, mirroring the way `sqlx-core`'s `Connection` trait
//! lets it stay agnostic of which database backend it's talking to
//! (`connection.rs`).

mod http;
mod tcp;

use crate::buffer::ProtocolVersion;
use crate::config::{Options, Protocol, ProtocolVersionSetting};
use crate::error::Result;

pub(crate) use http::HttpTransport;
pub(crate) use tcp::TcpTransport;

pub(crate) enum Transport {
    Http(HttpTransport),
    Tcp(TcpTransport),
}

impl Transport {
    pub(crate) async fn connect(options: &Options) -> Result<(Self, ProtocolVersion)> {
        match options.protocol {
            Protocol::Http | Protocol::Https => {
                let http = HttpTransport::new(options)?;
                let version = http
                    .negotiate_protocol_version(options.protocol_version)
                    .await?;
                Ok((Transport::Http(http), version))
            }
            Protocol::Tcp | Protocol::Tcps => {
                let tcp = TcpTransport::connect(options).await?;
                let version = match options.protocol_version {
                    ProtocolVersionSetting::Fixed(v) => v,
                    // TCP has no settings endpoint to probe; default to the
                    // conservative, universally-understood dialect.
                    ProtocolVersionSetting::Auto => ProtocolVersion::V1,
                };
                Ok((Transport::Tcp(tcp), version))
            }
        }
    }

    pub(crate) async fn send(&mut self, body: Vec<u8>) -> Result<()> {
        match self {
            Transport::Http(t) => t.send(body, "n").await,
            Transport::Tcp(t) => t.send(&body).await,
        }
    }

    pub(crate) async fn close(self) -> Result<()> {
        match self {
            Transport::Http(_) => Ok(()),
            Transport::Tcp(t) => t.close().await,
        }
    }
}
