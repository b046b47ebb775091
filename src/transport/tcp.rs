//! TCP(S) transport: a persistent, unacknowledged streaming connection with
//! an optional JWK/ECDSA-P256 challenge-response handshake.
//!
//! The connect-then-authenticate shape and the `MaybeTlsStream` plumbing
//! are grounded in the `net/tls/mod.rs` pattern (see `crate::net`); the
//! manual length-prefixed-line reading below follows the hand-rolled binary
//! parsing style in `mssql/connection/ssrp.rs` rather than reaching for a
//! framed-codec crate, since the handshake is one line in, one line out.

use base64::Engine;
use ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::SecretKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::net::{connect_tcp, MaybeTlsStream};

const MAX_CHALLENGE_LEN: usize = 512;

pub(crate) struct TcpTransport {
    stream: MaybeTlsStream<TcpStream>,
}

impl TcpTransport {
    pub(crate) async fn connect(options: &Options) -> Result<Self> {
        let stream = connect_tcp(options).await?;
        let mut transport = TcpTransport { stream };

        if let (Some(username), Some(token)) = (&options.username, &options.token) {
            transport.authenticate(username, token).await?;
        }

        Ok(transport)
    }

    /// JWK-style challenge-response: send the key id, read the server's
    /// newline-terminated challenge, sign it with the ECDSA P-256 private
    /// key decoded from `token` (a base64url d-coefficient, QuestDB's JWK
    /// convention) using SHA-256, DER-encode the signature, and send the
    /// base64 encoding of the DER bytes back.
    async fn authenticate(&mut self, username: &str, token: &str) -> Result<()> {
        self.stream
            .write_all(format!("{}\n", username).as_bytes())
            .await
            .map_err(Error::Io)?;

        let challenge = self.read_challenge_line().await?;

        let d_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| Error::auth(format!("invalid token encoding: {}", e)))?;
        let secret_key = SecretKey::from_slice(&d_bytes)
            .map_err(|e| Error::auth(format!("invalid private key: {}", e)))?;
        let signing_key = SigningKey::from(secret_key);

        let signature: Signature = signing_key.sign(&challenge);
        let der_signature = signature.to_der();
        let encoded = base64::engine::general_purpose::STANDARD.encode(der_signature.as_bytes());

        self.stream
            .write_all(format!("{}\n", encoded).as_bytes())
            .await
            .map_err(Error::Io)?;

        Ok(())
    }

    async fn read_challenge_line(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.stream.read(&mut byte).await.map_err(Error::Io)?;
            if n == 0 {
                return Err(Error::auth("connection closed during authentication"));
            }
            if byte[0] == b'\n' {
                return Ok(buf);
            }
            buf.push(byte[0]);
            if buf.len() > MAX_CHALLENGE_LEN {
                return Err(Error::auth("authentication challenge exceeded maximum length"));
            }
        }
    }

    /// There is no per-row server acknowledgement on this transport: a
    /// successful `write_all` only proves the kernel accepted the bytes,
    /// not that the server ingested the rows.
    pub(crate) async fn send(&mut self, body: &[u8]) -> Result<()> {
        self.stream.write_all(body).await.map_err(Error::Io)?;
        self.stream.flush().await.map_err(Error::Io)
    }

    /// Graceful shutdown. Any bytes not yet flushed by the caller before
    /// calling this are lost — TCP has no flush-on-close contract.
    pub(crate) async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(Error::Io)
    }
}
