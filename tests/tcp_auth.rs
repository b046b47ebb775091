//! Exercises the TCP challenge-response handshake (scenario 7): the server
//! sends a 512-byte challenge ending in `\n`; the client must send its key
//! id first, then reply with a base64-encoded, DER-encoded ECDSA/SHA-256
//! signature over the first 511 challenge bytes; rows sent afterward must
//! arrive unmodified.

use base64::Engine;
use ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::SecretKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use linesender::config::ProtocolVersionSetting;
use linesender::{Options, Protocol, ProtocolVersion, Sender};

async fn read_line(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed before line terminator");
        if byte[0] == b'\n' {
            return buf;
        }
        buf.push(byte[0]);
    }
}

#[tokio::test]
async fn tcp_auth_handshake_then_row_delivery() -> Result<(), linesender::Error> {
    let d_bytes = [0x11u8; 32];
    let secret_key = SecretKey::from_slice(&d_bytes).unwrap();
    let signing_key = SigningKey::from(secret_key);
    let verifying_key: VerifyingKey = *signing_key.verifying_key();
    let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(d_bytes);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let key_id = read_line(&mut stream).await;
        assert_eq!(key_id, b"admin");

        let challenge: Vec<u8> = (0..511).map(|i| b'a' + (i % 26) as u8).collect();
        let mut to_send = challenge.clone();
        to_send.push(b'\n');
        stream.write_all(&to_send).await.unwrap();

        let sig_b64 = read_line(&mut stream).await;
        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(&sig_b64)
            .unwrap();
        let signature = Signature::from_der(&sig_bytes).unwrap();
        verifying_key.verify(&challenge, &signature).unwrap();

        let mut row_bytes = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            row_bytes.extend_from_slice(&buf[..n]);
            if row_bytes.ends_with(b"\n") {
                break;
            }
        }
        row_bytes
    });

    let options = Options::new(Protocol::Tcp, "127.0.0.1")
        .port(addr.port())
        .username("admin")
        .token(token)
        .protocol_version(ProtocolVersionSetting::Fixed(ProtocolVersion::V1))
        .auto_flush(false);

    let mut sender = Sender::connect(options).await?;
    sender.table("t")?.int_column("n", 1)?.at_now().await?;
    sender.flush().await?;
    sender.close().await?;

    let row_bytes = server.await.unwrap();
    assert_eq!(std::str::from_utf8(&row_bytes).unwrap(), "t n=1i\n");
    Ok(())
}
