use crate::body::Body;
use crate::errors::{new_io_error, Error, Result};
use crate::{CR_LF, SPACE};
use std::io::ErrorKind;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// What the ingestion endpoint answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestResponse {
  status: http::StatusCode,
  reason: String,
  headers: http::HeaderMap,
  body: Body,
}

impl IngestResponse {
  /// A response with `status`, its canonical reason and `body`.
  pub fn new(status: http::StatusCode, body: impl Into<Body>) -> IngestResponse {
    IngestResponse {
      status,
      reason: status.canonical_reason().unwrap_or_default().to_string(),
      headers: http::HeaderMap::new(),
      body: body.into(),
    }
  }

  /// Get the `StatusCode` of this `Response`.
  pub fn status_code(&self) -> http::StatusCode {
    self.status
  }

  /// The reason phrase of the status line.
  pub fn reason(&self) -> &str {
    &self.reason
  }

  /// Get the `Headers` of this `Response`.
  pub fn headers(&self) -> &http::HeaderMap {
    &self.headers
  }

  /// The response body.
  pub fn body(&self) -> &Body {
    &self.body
  }

  /// The body as lossy UTF-8 text.
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).to_string()
  }

  /// Whether the status is 2xx.
  pub fn is_success(&self) -> bool {
    self.status.is_success()
  }
}

/// Largest ingestion response body accepted (1 MiB).
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

fn too_large() -> Error {
  new_io_error(ErrorKind::InvalidData, "response body exceeds size limit")
}

/// Parses one HTTP/1.x response off a reader.
pub(crate) struct ResponseReader<T: AsyncRead + Unpin> {
  reader: BufReader<T>,
}

impl<T: AsyncRead + Unpin> ResponseReader<T> {
  pub(crate) fn new(reader: T) -> ResponseReader<T> {
    ResponseReader {
      reader: BufReader::new(reader),
    }
  }

  async fn status_line(&mut self) -> Result<(http::StatusCode, String)> {
    let mut line = Vec::new();
    self.reader.read_until(b'\n', &mut line).await?;
    let line = line.strip_suffix(b"\n").unwrap_or(&line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut parts = line.splitn(3, |b| b == &SPACE[0]);
    match parts.next() {
      Some(b"HTTP/1.0") | Some(b"HTTP/1.1") => {}
      _ => return Err(new_io_error(ErrorKind::InvalidData, "invalid http version")),
    }
    let status = parts
      .next()
      .ok_or_else(|| new_io_error(ErrorKind::InvalidData, "missing status code"))?;
    let status = http::StatusCode::from_bytes(status).map_err(|x| Error::Http(http::Error::from(x)))?;
    let reason = parts
      .next()
      .map(|r| String::from_utf8_lossy(r).trim().to_string())
      .unwrap_or_default();
    Ok((status, reason))
  }

  async fn read_headers(&mut self) -> Result<http::HeaderMap> {
    let mut headers = http::HeaderMap::new();
    let mut header_line = Vec::new();
    loop {
      header_line.clear();
      let length = self.reader.read_until(b'\n', &mut header_line).await?;
      if length == 0 || header_line == CR_LF || header_line == b"\n" {
        break;
      }
      if let Ok((k, v)) = parser_header(&header_line) {
        headers.append(k, v);
      }
    }
    Ok(headers)
  }

  async fn read_body(&mut self, headers: &http::HeaderMap) -> Result<Vec<u8>> {
    let chunked = headers
      .get(http::header::TRANSFER_ENCODING)
      .and_then(|te| te.to_str().ok())
      .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
    if chunked {
      return self.read_chunked_body().await;
    }
    let content_length = headers
      .get(http::header::CONTENT_LENGTH)
      .and_then(|x| x.to_str().ok()?.trim().parse::<u64>().ok());
    let mut body = Vec::new();
    match content_length {
      Some(length) => {
        if length > MAX_RESPONSE_BYTES {
          return Err(too_large());
        }
        self.read_exactly(length, &mut body).await?;
      }
      None => {
        (&mut self.reader)
          .take(MAX_RESPONSE_BYTES + 1)
          .read_to_end(&mut body)
          .await?;
        if body.len() as u64 > MAX_RESPONSE_BYTES {
          return Err(too_large());
        }
      }
    }
    Ok(body)
  }

  /// Appends exactly `length` bytes to `body`, growing it only as data arrives.
  async fn read_exactly(&mut self, length: u64, body: &mut Vec<u8>) -> Result<()> {
    let n = (&mut self.reader).take(length).read_to_end(body).await?;
    if (n as u64) < length {
      return Err(new_io_error(ErrorKind::UnexpectedEof, "response body ended early"));
    }
    Ok(())
  }

  async fn read_chunked_body(&mut self) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut total: u64 = 0;
    let mut line = String::new();
    loop {
      line.clear();
      if self.reader.read_line(&mut line).await? == 0 {
        return Err(new_io_error(ErrorKind::UnexpectedEof, "truncated chunked body"));
      }
      let size = line.split(';').next().unwrap_or_default().trim();
      let size = u64::from_str_radix(size, 16)?;
      if size == 0 {
        break;
      }
      total = total
        .checked_add(size)
        .filter(|total| *total <= MAX_RESPONSE_BYTES)
        .ok_or_else(too_large)?;
      self.read_exactly(size, &mut body).await?;
      let mut crlf = [0; 2];
      self.reader.read_exact(&mut crlf).await?;
    }
    // trailers
    loop {
      line.clear();
      let n = self.reader.read_line(&mut line).await?;
      if n == 0 || line.trim().is_empty() {
        break;
      }
    }
    Ok(body)
  }

  pub(crate) async fn read(mut self) -> Result<IngestResponse> {
    let (status, reason) = self.status_line().await?;
    let headers = self.read_headers().await?;
    let body = self.read_body(&headers).await?;
    Ok(IngestResponse {
      status,
      reason,
      headers,
      body: body.into(),
    })
  }
}

fn parser_header(buffer: &[u8]) -> Result<(http::HeaderName, http::HeaderValue)> {
  let buffer = buffer.strip_suffix(CR_LF).unwrap_or(buffer);
  let buffer = buffer.strip_suffix(b"\n").unwrap_or(buffer);
  let mut parts = buffer.splitn(2, |s| s == &b':');
  let name = http::HeaderName::from_bytes(parts.next().unwrap_or_default())?;
  let value = parts.next().unwrap_or_default();
  let value = value.strip_prefix(SPACE).unwrap_or(value);
  let value = http::HeaderValue::from_bytes(value)?;
  Ok((name, value))
}
