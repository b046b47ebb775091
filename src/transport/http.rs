//! HTTP(S) transport: one `POST /write` per flush, retried with exponential
//! backoff, plus the `GET /settings` protocol-version probe.
//!
//! The `reqwest::Client` construction and base-URL assembly follow
//! `SnowflakeConnection::establish` (`snowflake/connection.rs`): build one
//! client up front, carry it for the connection's lifetime, favor a typed
//! `serde` struct for the JSON response over dynamic `serde_json::Value`
//! indexing.
//!
//! When `stdlib_http` is enabled, requests instead go over a minimal,
//! hand-rolled HTTP/1.1 client built directly on `crate::net`'s
//! `MaybeTlsStream`, one connection per request. This mirrors the
//! `sqlx-rt` pattern of a compile-time pluggable transport layer, except
//! the choice here is a runtime value (`Options::stdlib_http`) since both
//! implementations are always compiled in.

use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::buffer::ProtocolVersion;
use crate::config::{Options, ProtocolVersionSetting};
use crate::error::{is_retryable_status, Error, Result};
use crate::net;

pub(crate) struct HttpTransport {
    client: reqwest::Client,
    options: Options,
    base_url: String,
    auth_header: Option<(&'static str, String)>,
    request_min_throughput: u64,
    request_timeout: Duration,
    retry_timeout: Duration,
    stdlib_http: bool,
    is_tls: bool,
}

#[derive(Deserialize)]
struct SettingsResponse {
    config: SettingsConfig,
}

#[derive(Deserialize)]
struct SettingsConfig {
    #[serde(rename = "line.proto.support.versions")]
    line_proto_support_versions: Vec<i64>,
}

impl HttpTransport {
    pub(crate) fn new(options: &Options) -> Result<Self> {
        let scheme = if options.is_tls() { "https" } else { "http" };
        let base_url = format!("{}://{}:{}", scheme, options.host, options.port);

        let mut builder = reqwest::Client::builder().timeout(options.request_timeout);
        if options.is_tls() {
            match tls_verify_choice(options) {
                TlsVerifyChoice::DangerAcceptInvalid => {
                    builder = builder.danger_accept_invalid_certs(true);
                }
                TlsVerifyChoice::Default => {
                    if let Some(ca_path) = &options.tls_ca {
                        let pem = std::fs::read(ca_path).map_err(Error::Io)?;
                        let cert = reqwest::Certificate::from_pem(&pem)
                            .map_err(|e| Error::tls(e.to_string()))?;
                        builder = builder.add_root_certificate(cert);
                    }
                }
            }
        }
        let client = builder
            .build()
            .map_err(|e| Error::HttpTransport(e.to_string()))?;

        let auth_header = build_auth_header(options);

        Ok(HttpTransport {
            client,
            options: options.clone(),
            base_url,
            auth_header,
            request_min_throughput: options.request_min_throughput,
            request_timeout: options.request_timeout,
            retry_timeout: options.retry_timeout,
            stdlib_http: options.stdlib_http,
            is_tls: options.is_tls(),
        })
    }

    /// Resolves the wire protocol version to use. When `options.protocol_version`
    /// is `Auto`, probes `GET /settings` and picks the highest version the
    /// server advertises that this client also understands.
    pub(crate) async fn negotiate_protocol_version(
        &self,
        setting: ProtocolVersionSetting,
    ) -> Result<ProtocolVersion> {
        match setting {
            ProtocolVersionSetting::Fixed(v) => Ok(v),
            ProtocolVersionSetting::Auto => {
                let url = format!("{}/settings", self.base_url);
                let resp = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| Error::HttpTransport(e.to_string()))?;

                if !resp.status().is_success() {
                    // Older servers with no /settings endpoint only ever spoke v1.
                    debug!("GET /settings returned {}, assuming protocol v1", resp.status());
                    return Ok(ProtocolVersion::V1);
                }

                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| Error::HttpTransport(e.to_string()))?;
                let parsed: SettingsResponse = serde_json::from_slice(&body)
                    .map_err(|e| Error::HttpTransport(e.to_string()))?;
                let versions = parsed.config.line_proto_support_versions;

                let mut best: Option<ProtocolVersion> = None;
                for v in &versions {
                    let candidate = match v {
                        1 => Some(ProtocolVersion::V1),
                        2 => Some(ProtocolVersion::V2),
                        3 => Some(ProtocolVersion::V3),
                        _ => None,
                    };
                    if let Some(c) = candidate {
                        if best.map(|b| c > b).unwrap_or(true) {
                            best = Some(c);
                        }
                    }
                }
                best.ok_or_else(|| Error::ProtocolVersion(versions))
            }
        }
    }

    /// Sends one buffered batch, retrying on transient failures with
    /// exponential backoff plus jitter, bounded by `retry_timeout`. The
    /// caller is responsible for resending the exact same bytes on every
    /// attempt; this method never mutates the sender-side buffer.
    pub(crate) async fn send(&self, body: Vec<u8>, precision_suffix: &str) -> Result<()> {
        let timeout = self.compute_request_timeout(body.len());
        let deadline = std::time::Instant::now() + self.retry_timeout;
        let mut attempt: u32 = 0;

        loop {
            let attempt_result = if self.stdlib_http {
                self.send_once_stdlib(&body, precision_suffix, timeout).await
            } else {
                self.send_once_reqwest(&body, precision_suffix, timeout).await
            };

            let err = match attempt_result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            let retryable = match &err {
                Error::Http { status, .. } => is_retryable_status(*status),
                Error::HttpTransport(_) => true,
                _ => false,
            };
            if !retryable || std::time::Instant::now() >= deadline {
                return Err(err);
            }

            let backoff = self.backoff_delay(attempt);
            warn!(
                "ILP write failed (attempt {}), retrying in {:?}: {}",
                attempt + 1,
                backoff,
                err
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn send_once_reqwest(
        &self,
        body: &[u8],
        precision_suffix: &str,
        timeout: Duration,
    ) -> Result<()> {
        let url = format!("{}/write?precision={}", self.base_url, precision_suffix);
        let mut req = self
            .client
            .post(&url)
            .timeout(timeout)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.to_vec());
        if let Some((name, value)) = &self.auth_header {
            req = req.header(*name, value.clone());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::HttpTransport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let status_code = status.as_u16();
        let response_body = resp.text().await.unwrap_or_default();
        Err(Error::Http {
            status: status_code,
            body: response_body,
        })
    }

    /// A minimal, non-pooled HTTP/1.1 client: one TCP(+TLS) connection per
    /// request, `Connection: close`, response read until the header
    /// terminator and `Content-Length` bytes of body. No redirects, no
    /// chunked transfer-encoding support — the server this crate targets
    /// never uses either for `/write` responses.
    async fn send_once_stdlib(
        &self,
        body: &[u8],
        precision_suffix: &str,
        timeout: Duration,
    ) -> Result<()> {
        let fut = self.send_once_stdlib_inner(body, precision_suffix);
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::HttpTransport("request timed out".to_string()))?
    }

    async fn send_once_stdlib_inner(&self, body: &[u8], precision_suffix: &str) -> Result<()> {
        let mut stream = net::connect_http_stream(
            &self.options.host,
            self.options.port,
            self.is_tls,
            &self.options,
        )
        .await?;

        let mut request = format!(
            "POST /write?precision={} HTTP/1.1\r\nHost: {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n",
            precision_suffix,
            self.options.host,
            body.len()
        );
        if let Some((name, value)) = &self.auth_header {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes()).await.map_err(Error::Io)?;
        stream.write_all(body).await.map_err(Error::Io)?;
        stream.flush().await.map_err(Error::Io)?;

        let (status, response_body) = read_http_response(&mut stream).await?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(Error::Http {
                status,
                body: response_body,
            })
        }
    }

    /// `ceil(len / min_throughput) * 1000 + request_timeout`: scales the
    /// per-request timeout with payload size so large batches over slow
    /// links aren't cut off prematurely.
    fn compute_request_timeout(&self, len: usize) -> Duration {
        let throughput_component_ms = if self.request_min_throughput == 0 {
            0
        } else {
            ((len as u64) + self.request_min_throughput - 1) / self.request_min_throughput * 1000
        };
        self.request_timeout + Duration::from_millis(throughput_component_ms)
    }

    /// First retry after ~10ms, doubling each step, capped at 1000ms, plus
    /// up to 50% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = 10u64.saturating_mul(1u64 << attempt.min(10));
        let capped_ms = base_ms.min(1000);
        let jitter_ms = rand::thread_rng().gen_range(0..=(capped_ms / 2).max(1));
        Duration::from_millis(capped_ms + jitter_ms)
    }
}

async fn read_http_response(
    stream: &mut net::HttpStream,
) -> Result<(u16, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        let n = stream.read(&mut chunk).await.map_err(Error::Io)?;
        if n == 0 {
            return Err(Error::HttpTransport(
                "connection closed before response headers were complete".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| Error::HttpTransport(format!("malformed status line: '{}'", status_line)))?;

    let content_length: usize = lines
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.map_err(Error::Io)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length.max(body.len().min(content_length)));

    Ok((status, String::from_utf8_lossy(&body).to_string()))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn build_auth_header(options: &Options) -> Option<(&'static str, String)> {
    if let (Some(user), Some(pass)) = (&options.username, &options.password) {
        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            format!("{}:{}", user, pass),
        );
        Some(("Authorization", format!("Basic {}", encoded)))
    } else if let Some(token) = &options.token {
        Some(("Authorization", format!("Bearer {}", token)))
    } else {
        None
    }
}

enum TlsVerifyChoice {
    Default,
    DangerAcceptInvalid,
}

fn tls_verify_choice(options: &Options) -> TlsVerifyChoice {
    match options.tls_verify {
        crate::config::TlsVerify::On => TlsVerifyChoice::Default,
        crate::config::TlsVerify::UnsafeOff => TlsVerifyChoice::DangerAcceptInvalid,
    }
}
