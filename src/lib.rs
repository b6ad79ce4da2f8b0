#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # eavesdrop
//!
//! The `eavesdrop` crate watches the HTTP traffic of the process it runs in.
//!
//! Sessions are built by a [`SessionFactory`]. Once an [`Eavesdrop`] is
//! started, its interceptor sits first in the factory's default and ephemeral
//! configurations and in its protocol registry, so every HTTP(S) request made
//! through a session is re-issued on the real [`Transport`] and mirrored back
//! to the caller unchanged. When an exchange ends, an [`ExchangeRecord`] is
//! added to a [`CaptureStore`].
//!
//! - Response bodies are captured chunk by chunk, in arrival order.
//! - Redirects are reported to the caller and followed; server trust is
//!   accepted and other challenges get default handling.
//! - A cancelled exchange leaves no record; a completed or failed one leaves
//!   exactly one.
//! - Records render as `curl` commands and as browsable [JSON trees](json).
//!
//! ## Capturing
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eavesdrop::{Eavesdrop, Request, SessionFactory};
//!
//! # async fn run() -> Result<(), eavesdrop::Error> {
//! let factory = Arc::new(SessionFactory::http()?);
//! let eavesdrop = Eavesdrop::new(factory.clone());
//! eavesdrop.start();
//!
//! let mut changes = eavesdrop.store().subscribe();
//! let request = Request::new(http::Method::POST, "http://httpbin.org/post")?
//!   .with_header("content-type", "application/json")?
//!   .with_body(r#"{"k":"v"}"#);
//! let response = factory.default_session().send(request).await?;
//! println!("{}", response.status_code());
//!
//! changes.recv().await.ok();
//! if let Some(record) = eavesdrop.store().latest() {
//!   println!("{}", record.curl());
//! }
//! eavesdrop.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! Anything implementing [`Transport`] can carry the traffic. The built-in
//! [`HttpTransport`] speaks HTTP/1.1 and follows redirects according to a
//! [`redirect::Policy`].
//!
//! ## Optional Features
//!
//! The following are a list of [Cargo features][cargo-features] that can be
//! enabled or disabled:
//!
//! - **tls**: Provides https support to [`HttpTransport`].
//! - **serde**: Provides serialization and deserialization of records.
//! - **charset**: Improved support for decoding text.
//!
//! [cargo-features]: https://doc.rust-lang.org/stable/cargo/reference/manifest.html#the-features-section
mod body;
mod client;
mod connector;
mod errors;
mod interceptor;
/// JSON trees
pub mod json;
mod lifecycle;
mod protocol;
mod publisher;
/// record info
pub mod record;
/// Redirect Handling
pub mod redirect;
mod request;
mod response;
mod session;
mod socket;
mod store;
#[cfg(feature = "tls")]
mod tls;
/// Transport abstraction
pub mod transport;

pub use body::{read_body_stream, Body, BodyStream, BoxedReader};
pub use client::{HttpTransport, HttpTransportBuilder, TransportConfig};
pub use errors::{Error, Result};
pub use http::header;
pub use http::uri;
pub use http::Method;
pub use http::{StatusCode, Version};
pub use interceptor::{is_interceptable, Interceptor};
pub use lifecycle::Eavesdrop;
pub use protocol::{same_protocol, Protocol, ProtocolRegistry, SharedProtocol};
pub use publisher::Publisher;
pub use record::{ExchangeDraft, ExchangeRecord, StatusClass};
pub use request::Request;
pub use response::Response;
pub use session::{ConfigurationKind, Session, SessionConfiguration, SessionFactory};
pub use store::{CaptureStore, StoreEvent};
pub use transport::{DataTask, Transport, TransportEvent};

pub(crate) const CR_LF: &[u8] = &[13, 10];
pub(crate) const SPACE: &[u8] = &[32];
pub(crate) const COLON_SPACE: &[u8] = &[58, 32];
