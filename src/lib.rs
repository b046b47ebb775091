//! Client for ingesting row-oriented time-series data over the Influx Line
//! Protocol, with HTTP(S) and TCP(S) transports, server-driven
//! protocol-version negotiation, and TLS.
//!
//! ```no_run
//! use linesender::{Options, Protocol, Sender};
//!
//! # async fn run() -> linesender::Result<()> {
//! let options = Options::new(Protocol::Http, "localhost");
//! let mut sender = Sender::connect(options).await?;
//! sender
//!     .table("prices")?
//!     .symbol("instrument", "EURUSD")?
//!     .float_column("bid", 1.0195)?
//!     .float_column("ask", 1.0221)?
//!     .at_now()
//!     .await?;
//! sender.flush().await?;
//! sender.close().await?;
//! # Ok(())
//! # }
//! ```
#![warn(future_incompatible, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod buffer;
pub mod config;
pub mod error;
mod net;
mod sender;
mod transport;
pub mod value;

pub use buffer::ProtocolVersion;
pub use config::{Options, Protocol, ProtocolVersionSetting, TlsVerify};
pub use error::Error;
pub use sender::Sender;
pub use value::{ArrayValue, DecimalValue, NestedF64};

pub type Result<T> = std::result::Result<T, Error>;
