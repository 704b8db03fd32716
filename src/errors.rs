//! capture and shipping errors
use std::io::ErrorKind;
use std::num::ParseIntError;
use thiserror::Error as ThisError;
/// A `Result` alias where the `Err` case is `pagetap::Error`.
pub type Result<T> = std::result::Result<T, Error>;
/// The Errors that may occur when packing or shipping captured traffic.
///
/// Capture-path failures never surface as this type outside the crate: the
/// interception hooks swallow them after logging.
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
  /// serde_json::Error
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  /// ParseIntError
  #[error(transparent)]
  IntError(#[from] ParseIntError),
  /// A URL that is not an absolute http/https URL
  #[error("invalid url: {0}")]
  InvalidUrl(String),
  /// A single wire item does not fit in an envelope even alone
  #[error("item exceeds size limit ({size}B > {limit}B). id={id}")]
  ItemTooLarge {
    /// id of the offending item
    id: String,
    /// serialized size of the item wrapped in an envelope
    size: usize,
    /// usable envelope byte limit
    limit: usize,
  },
  /// The ingestion endpoint answered with a non-success status
  #[error("POST failed ({}): {detail}", status.as_u16())]
  IngestRejected {
    /// envelopes accepted before this one
    dispatched: usize,
    /// response status
    status: http::StatusCode,
    /// response body text, or the reason phrase when the body is empty
    detail: String,
  },
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

impl From<http::header::InvalidHeaderName> for Error {
  fn from(value: http::header::InvalidHeaderName) -> Self {
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
