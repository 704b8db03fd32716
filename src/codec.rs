//! Body codec: classify a payload as textual or binary and encode it under a
//! byte budget.
//!
//! The reported `body_size` is always the original payload length, even when
//! `body` only holds the first `max_bytes` bytes.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Content-type fragments treated as textual, besides any `text/*` type.
const TEXTUAL_FAMILIES: &[&str] = &[
  "application/json",
  "application/xml",
  "application/xhtml",
  "application/javascript",
  "application/x-www-form-urlencoded",
];

/// How a captured body is represented in an event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
  /// UTF-8 text
  Text,
  /// standard base64 of the raw bytes
  Base64,
  /// no body
  #[default]
  None,
}

/// Result of reading one body through the codec.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BodyCapture {
  /// encoded prefix, `None` when empty or unreadable
  pub body: Option<String>,
  /// original, pre-truncation byte length
  pub body_size: u64,
  /// encoding of `body`
  pub encoding: BodyEncoding,
  /// whether `body` holds fewer bytes than the original
  pub truncated: bool,
  /// read or decode failure, if any
  pub error: Option<String>,
}

impl BodyCapture {
  /// The capture of an absent or empty body.
  pub fn empty() -> BodyCapture {
    BodyCapture::default()
  }

  pub(crate) fn failed(error: impl ToString) -> BodyCapture {
    BodyCapture {
      error: Some(error.to_string()),
      ..BodyCapture::default()
    }
  }
}

/// Returns whether `content_type` belongs to a textual MIME family.
///
/// ```
/// assert!(pagetap::is_textual("application/json; charset=utf-8"));
/// assert!(pagetap::is_textual("TEXT/HTML"));
/// assert!(!pagetap::is_textual("image/png"));
/// ```
pub fn is_textual(content_type: &str) -> bool {
  let ct = content_type.to_ascii_lowercase();
  ct.starts_with("text/") || TEXTUAL_FAMILIES.iter().any(|family| ct.contains(family))
}

/// Encodes an in-memory payload.
pub fn read_body(payload: &[u8], content_type: &str, max_bytes: usize) -> BodyCapture {
  let size = payload.len();
  let prefix = &payload[..size.min(max_bytes)];
  encode_prefix(prefix, size as u64, content_type, max_bytes)
}

/// Reads a payload stream to its end, keeping at most `max_bytes` of it.
///
/// Only the retained prefix is buffered; the remainder is counted and
/// discarded. Read failures produce an empty capture carrying the error.
pub async fn read_body_stream<R>(mut reader: R, content_type: &str, max_bytes: usize) -> BodyCapture
where
  R: AsyncRead + Unpin,
{
  let mut prefix = Vec::new();
  let mut total: u64 = 0;
  let mut buffer = vec![0; 8 * 1024];
  loop {
    let n = match reader.read(&mut buffer).await {
      Ok(0) => break,
      Ok(n) => n,
      Err(err) => return BodyCapture::failed(err),
    };
    let room = max_bytes.saturating_sub(prefix.len());
    prefix.extend_from_slice(&buffer[..n.min(room)]);
    total += n as u64;
  }
  encode_prefix(&prefix, total, content_type, max_bytes)
}

fn encode_prefix(prefix: &[u8], size: u64, content_type: &str, max_bytes: usize) -> BodyCapture {
  if size == 0 {
    return BodyCapture::empty();
  }
  let truncated = size > max_bytes as u64;
  let (body, encoding) = if is_textual(content_type) {
    (decode_text(prefix, content_type), BodyEncoding::Text)
  } else {
    (STANDARD.encode(prefix), BodyEncoding::Base64)
  };
  BodyCapture {
    body: Some(body),
    body_size: size,
    encoding,
    truncated,
    error: None,
  }
}

#[cfg(not(feature = "charset"))]
fn decode_text(prefix: &[u8], _content_type: &str) -> String {
  String::from_utf8_lossy(prefix).into_owned()
}

#[cfg(feature = "charset")]
fn decode_text(prefix: &[u8], content_type: &str) -> String {
  use encoding_rs::{Encoding, UTF_8};
  use mime::Mime;
  let encoding = content_type
    .parse::<Mime>()
    .ok()
    .and_then(|m| {
      m.get_param("charset")
        .and_then(|c| Encoding::for_label(c.as_str().as_bytes()))
    })
    .unwrap_or(UTF_8);
  let (text, _, _) = encoding.decode(prefix);
  text.into_owned()
}
