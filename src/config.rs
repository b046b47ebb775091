//! Configuration string parsing and connection options.
//!
//! Grounded in the `FromStr` connection-string parsers of
//! `mssql/options/parse.rs` and `snowflake/options.rs`, and in the fluent
//! builder pattern of `SnowflakeConnectOptions`'s chained setter methods.
//! Unlike those URL-based grammars, this crate's configuration string is
//! the compact `protocol::k=v;k=v;...` grammar, so the parser is a
//! hand-rolled key/value scanner rather than `url::Url::parse`.

use crate::buffer::ProtocolVersion;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

const ENV_VAR: &str = "QDB_CLIENT_CONF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Tcps,
}

impl Protocol {
    fn default_port(self) -> u16 {
        match self {
            Protocol::Http | Protocol::Https => 9000,
            Protocol::Tcp | Protocol::Tcps => 9009,
        }
    }

    fn is_http(self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }

    fn is_tls(self) -> bool {
        matches!(self, Protocol::Https | Protocol::Tcps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersionSetting {
    Auto,
    Fixed(ProtocolVersion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVerify {
    On,
    UnsafeOff,
}

/// Connection, buffer, timeout, and auth configuration. Immutable once a
/// `Sender` is constructed from it.
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) protocol: Protocol,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) protocol_version: ProtocolVersionSetting,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) auto_flush: bool,
    pub(crate) auto_flush_rows: Option<u64>,
    pub(crate) auto_flush_interval: Option<Duration>,
    pub(crate) tls_verify: TlsVerify,
    pub(crate) tls_ca: Option<PathBuf>,
    pub(crate) init_buf_size: usize,
    pub(crate) max_buf_size: usize,
    pub(crate) request_min_throughput: u64,
    pub(crate) request_timeout: Duration,
    pub(crate) retry_timeout: Duration,
    pub(crate) max_name_len: usize,
    pub(crate) stdlib_http: bool,
}

impl Options {
    pub fn new(protocol: Protocol, host: impl Into<String>) -> Self {
        let port = protocol.default_port();
        Options {
            protocol,
            host: host.into(),
            port,
            protocol_version: ProtocolVersionSetting::Auto,
            username: None,
            password: None,
            token: None,
            auto_flush: true,
            auto_flush_rows: None,
            auto_flush_interval: None,
            tls_verify: TlsVerify::On,
            tls_ca: None,
            init_buf_size: 65536,
            max_buf_size: 100 * 1024 * 1024,
            request_min_throughput: 100 * 1024,
            request_timeout: Duration::from_millis(10_000),
            retry_timeout: Duration::from_millis(10_000),
            max_name_len: 127,
            stdlib_http: false,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn protocol_version(mut self, v: ProtocolVersionSetting) -> Self {
        self.protocol_version = v;
        self
    }

    pub fn auto_flush(mut self, on: bool) -> Self {
        self.auto_flush = on;
        self
    }

    pub fn auto_flush_rows(mut self, rows: u64) -> Self {
        self.auto_flush_rows = Some(rows);
        self
    }

    pub fn auto_flush_interval(mut self, d: Duration) -> Self {
        self.auto_flush_interval = Some(d);
        self
    }

    pub fn tls_verify(mut self, v: TlsVerify) -> Self {
        self.tls_verify = v;
        self
    }

    pub fn tls_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca = Some(path.into());
        self
    }

    pub fn init_buf_size(mut self, n: usize) -> Self {
        self.init_buf_size = n;
        self
    }

    pub fn max_buf_size(mut self, n: usize) -> Self {
        self.max_buf_size = n;
        self
    }

    pub fn request_min_throughput(mut self, bytes_per_sec: u64) -> Self {
        self.request_min_throughput = bytes_per_sec;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn retry_timeout(mut self, d: Duration) -> Self {
        self.retry_timeout = d;
        self
    }

    pub fn max_name_len(mut self, n: usize) -> Self {
        self.max_name_len = n;
        self
    }

    pub fn stdlib_http(mut self, on: bool) -> Self {
        self.stdlib_http = on;
        self
    }

    pub(crate) fn is_http(&self) -> bool {
        self.protocol.is_http()
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.protocol.is_tls()
    }

    /// Row/interval auto-flush defaults differ by transport: HTTP favors
    /// bigger batches (75,000 rows / 1s), TCP flushes more eagerly
    /// (600 rows / 1s) since it has no server ack to cushion loss.
    pub(crate) fn effective_auto_flush_rows(&self) -> u64 {
        self.auto_flush_rows.unwrap_or(if self.is_http() { 75_000 } else { 600 })
    }

    pub(crate) fn effective_auto_flush_interval(&self) -> Duration {
        self.auto_flush_interval
            .unwrap_or_else(|| Duration::from_millis(1_000))
    }

    /// Validates the cross-field invariants on `Options`:
    /// `init_buf_size <= max_buf_size`; TCP requires both username and
    /// token if either is present.
    pub fn validate(&self) -> Result<()> {
        if self.init_buf_size > self.max_buf_size {
            return Err(Error::configuration(format!(
                "init_buf_size ({}) must not exceed max_buf_size ({})",
                self.init_buf_size, self.max_buf_size
            )));
        }
        if !self.protocol.is_http() && (self.username.is_some() != self.token.is_some()) {
            return Err(Error::configuration(
                "TCP authentication requires both username and token to be set",
            ));
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self> {
        let conf = std::env::var(ENV_VAR)
            .map_err(|_| Error::configuration(format!("environment variable {} is not set", ENV_VAR)))?;
        conf.parse()
    }
}

impl std::str::FromStr for Options {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (proto_str, rest) = s.split_once("::").ok_or_else(|| {
            Error::configuration(format!(
                "Invalid protocol: '{}', accepted protocols: 'http', 'https', 'tcp', 'tcps'",
                s
            ))
        })?;

        let protocol = match proto_str {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "tcp" => Protocol::Tcp,
            "tcps" => Protocol::Tcps,
            other => {
                return Err(Error::configuration(format!(
                    "Invalid protocol: '{}', accepted protocols: 'http', 'https', 'tcp', 'tcps'",
                    other
                )))
            }
        };

        let mut addr: Option<(String, Option<u16>)> = None;
        let mut options = Options::new(protocol, "");
        let mut seen_keys = std::collections::HashSet::new();

        for pair in split_body(rest)? {
            let (key, value) = split_kv(&pair)?;
            validate_value_chars(&value)?;

            if !seen_keys.insert(key.clone()) {
                return Err(Error::configuration(format!("Duplicate key: '{}'", key)));
            }

            match key.as_str() {
                "addr" => addr = Some(parse_addr(&value)?),
                "username" => options = options.username(value),
                "password" => options = options.password(value),
                "token" => options = options.token(value),
                "protocol_version" => {
                    options.protocol_version = match value.as_str() {
                        "auto" => ProtocolVersionSetting::Auto,
                        "1" => ProtocolVersionSetting::Fixed(ProtocolVersion::V1),
                        "2" => ProtocolVersionSetting::Fixed(ProtocolVersion::V2),
                        "3" => ProtocolVersionSetting::Fixed(ProtocolVersion::V3),
                        other => {
                            return Err(Error::configuration(format!(
                                "Invalid protocol_version: '{}'",
                                other
                            )))
                        }
                    };
                }
                "auto_flush" => {
                    options.auto_flush = parse_on_off(&key, &value)?;
                }
                "auto_flush_rows" => {
                    options.auto_flush_rows = Some(parse_nonneg(&key, &value)?);
                }
                "auto_flush_interval" => {
                    options.auto_flush_interval =
                        Some(Duration::from_millis(parse_nonneg(&key, &value)?));
                }
                "tls_verify" => {
                    options.tls_verify = match value.as_str() {
                        "on" => TlsVerify::On,
                        "unsafe_off" => TlsVerify::UnsafeOff,
                        other => {
                            return Err(Error::configuration(format!(
                                "Invalid tls_verify: '{}', expected 'on' or 'unsafe_off'",
                                other
                            )))
                        }
                    };
                }
                "tls_ca" => options.tls_ca = Some(PathBuf::from(value)),
                "init_buf_size" => options.init_buf_size = parse_positive(&key, &value)? as usize,
                "max_buf_size" => options.max_buf_size = parse_positive(&key, &value)? as usize,
                "request_min_throughput" => {
                    options.request_min_throughput = parse_positive(&key, &value)?
                }
                "request_timeout" => {
                    options.request_timeout = Duration::from_millis(parse_positive(&key, &value)?)
                }
                "retry_timeout" => {
                    options.retry_timeout = Duration::from_millis(parse_nonneg(&key, &value)?)
                }
                "max_name_len" => options.max_name_len = parse_positive(&key, &value)? as usize,
                "stdlib_http" => options.stdlib_http = parse_on_off(&key, &value)?,
                "tls_roots" | "tls_roots_password" => {
                    return Err(Error::configuration(format!(
                        "'{}' is no longer supported, use 'tls_ca' to set a custom CA bundle",
                        key
                    )))
                }
                "bufferSize" | "copy_buffer" | "copyBuffer" => {
                    return Err(Error::configuration(format!(
                        "'{}' is no longer supported, use 'init_buf_size'/'max_buf_size'",
                        key
                    )))
                }
                other => return Err(Error::configuration(format!("Unknown key: '{}'", other))),
            }
        }

        let (host, port) = addr.ok_or_else(|| Error::configuration("Missing 'addr' key"))?;
        if host.is_empty() {
            return Err(Error::configuration("'addr' must specify a host"));
        }
        options.host = host;
        options.port = port.unwrap_or_else(|| protocol.default_port());

        options.validate()?;
        Ok(options)
    }
}

/// Splits the `k=v;k=v;` body on unescaped semicolons; `;;` is a literal
/// semicolon embedded in a value, not a separator.
fn split_body(body: &str) -> Result<Vec<String>> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == ';' {
            if chars.peek() == Some(&';') {
                chars.next();
                current.push(';');
            } else {
                pairs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        pairs.push(current);
    }
    Ok(pairs.into_iter().filter(|p| !p.is_empty()).collect())
}

fn split_kv(pair: &str) -> Result<(String, String)> {
    let (k, v) = pair
        .split_once('=')
        .ok_or_else(|| Error::configuration(format!("Malformed key=value pair: '{}'", pair)))?;
    Ok((k.to_string(), v.to_string()))
}

fn validate_value_chars(value: &str) -> Result<()> {
    for ch in value.chars() {
        let code = ch as u32;
        if (0x00..=0x1f).contains(&code) || (0x7f..=0x9f).contains(&code) {
            return Err(Error::configuration(format!(
                "Control character U+{:04X} is not allowed in configuration values",
                code
            )));
        }
    }
    Ok(())
}

fn parse_addr(value: &str) -> Result<(String, Option<u16>)> {
    match value.rsplit_once(':') {
        Some((host, port_str)) if !port_str.is_empty() && port_str.chars().all(|c| c.is_ascii_digit()) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| Error::configuration(format!("Invalid port in addr: '{}'", value)))?;
            if port == 0 {
                return Err(Error::configuration("Port must be positive"));
            }
            Ok((host.to_string(), Some(port)))
        }
        _ => Ok((value.to_string(), None)),
    }
}

fn parse_on_off(key: &str, value: &str) -> Result<bool> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(Error::configuration(format!(
            "Invalid value for '{}': '{}', expected 'on' or 'off'",
            key, other
        ))),
    }
}

fn parse_nonneg(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::configuration(format!("Invalid non-negative integer for '{}': '{}'", key, value)))
}

fn parse_positive(key: &str, value: &str) -> Result<u64> {
    let n = parse_nonneg(key, value)?;
    if n == 0 {
        return Err(Error::configuration(format!("'{}' must be positive", key)));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_http_config() {
        let opts: Options = "http::addr=localhost:9000;".parse().unwrap();
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.port, 9000);
        assert_eq!(opts.protocol, Protocol::Http);
    }

    #[test]
    fn addr_without_port_uses_protocol_default() {
        let opts: Options = "tcp::addr=localhost;".parse().unwrap();
        assert_eq!(opts.port, 9009);
    }

    #[test]
    fn rejects_invalid_protocol() {
        let err = "Http::addr=localhost;".parse::<Options>().unwrap_err();
        match err {
            Error::Configuration(msg) => assert!(msg.contains("Invalid protocol")),
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    fn double_semicolon_is_escaped_literal() {
        let opts: Options = "http::addr=localhost:9000;username=a;;b;".parse().unwrap();
        assert_eq!(opts.username.as_deref(), Some("a;b"));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = "http::addr=localhost;addr=otherhost;"
            .parse::<Options>()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_key() {
        let err = "http::addr=localhost;bogus=1;".parse::<Options>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_legacy_keys_with_guidance() {
        let err = "http::addr=localhost;bufferSize=100;"
            .parse::<Options>()
            .unwrap_err();
        match err {
            Error::Configuration(msg) => assert!(msg.contains("init_buf_size")),
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    fn rejects_control_characters_in_values() {
        let err = "http::addr=localhost;username=a\u{0007}b;"
            .parse::<Options>()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn tcp_requires_username_and_token_together() {
        let err = "tcp::addr=localhost;username=bob;"
            .parse::<Options>()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn init_buf_size_over_max_is_rejected() {
        let err = "http::addr=localhost;init_buf_size=1000;max_buf_size=100;"
            .parse::<Options>()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
