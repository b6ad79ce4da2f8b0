//! engine error
use std::io::ErrorKind;
use std::num::ParseIntError;
use thiserror::Error as ThisError;
/// A `Result` alias where the `Err` case is `eavesdrop::Error`.
pub type Result<T> = std::result::Result<T, Error>;
/// The Errors that may occur while an exchange travels through a transport.
#[derive(ThisError, Debug)]
pub enum Error {
  #[error(transparent)]
  #[cfg(feature = "tls")]
  /// tls Error
  Tls(#[from] tokio_rustls::rustls::Error),
  /// Error
  #[error(transparent)]
  IO(#[from] std::io::Error),
  /// http::Error
  #[error(transparent)]
  Http(http::Error),
  /// ParseIntError
  #[error(transparent)]
  IntError(#[from] ParseIntError),
  /// The exchange was cancelled before it completed.
  #[error("cancelled")]
  Cancelled,
  /// The loader owning the exchange was invalidated.
  #[error("session invalidated")]
  SessionInvalidated,
  /// Unknown Error
  #[error("{0}")]
  Other(String),
}

impl From<http::Error> for Error {
  fn from(value: http::Error) -> Self {
    Error::Http(value)
  }
}

impl From<http::header::InvalidHeaderValue> for Error {
  fn from(value: http::header::InvalidHeaderValue) -> Self {
    Error::Http(http::Error::from(value))
  }
}

impl From<http::uri::InvalidUri> for Error {
  fn from(value: http::uri::InvalidUri) -> Self {
    Error::Http(http::Error::from(value))
  }
}

pub(crate) fn new_io_error(error_kind: ErrorKind, msg: &str) -> Error {
  Error::IO(std::io::Error::new(error_kind, msg))
}
#[cfg(feature = "tls")]
pub(crate) fn builder<E: Into<Box<dyn std::error::Error + Send + Sync>>>(e: E) -> Error {
  Error::Other(e.into().to_string())
}
