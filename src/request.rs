use crate::body::Body;
use crate::{COLON_SPACE, CR_LF, SPACE};
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderValue, Method};
use url::Url;

/// A request to an ingestion endpoint.
#[derive(Debug, Clone)]
pub(crate) struct IngestRequest {
  method: Method,
  target: Url,
  headers: HeaderMap,
  body: Body,
}

impl IngestRequest {
  /// A one-shot JSON `POST` of `body` to `target`.
  pub(crate) fn post_json(target: &Url, body: impl Into<Body>) -> IngestRequest {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    IngestRequest {
      method: Method::POST,
      target: target.clone(),
      headers,
      body: body.into(),
    }
  }

  fn authority(&self) -> String {
    let host = self.target.host_str().unwrap_or_default();
    match self.target.port() {
      Some(port) => format!("{host}:{port}"),
      None => host.to_string(),
    }
  }

  /// Serializes the request as HTTP/1.1 bytes.
  pub(crate) fn to_raw(&self) -> Bytes {
    let mut raw = Vec::with_capacity(self.body.len() + 256);
    raw.extend(self.method.as_str().as_bytes());
    raw.extend(SPACE);
    raw.extend(self.target.path().as_bytes());
    if let Some(q) = self.target.query() {
      raw.extend(b"?");
      raw.extend(q.as_bytes());
    }
    raw.extend(SPACE);
    raw.extend(b"HTTP/1.1");
    raw.extend(CR_LF);
    if !self.headers.contains_key(HOST) {
      raw.extend(HOST.as_str().as_bytes());
      raw.extend(COLON_SPACE);
      raw.extend(self.authority().as_bytes());
      raw.extend(CR_LF);
    }
    let mut headers = self.headers.clone();
    headers
      .entry(CONTENT_LENGTH)
      .or_insert(HeaderValue::from(self.body.len()));
    for (k, v) in headers.iter() {
      raw.extend(k.as_str().as_bytes());
      raw.extend(COLON_SPACE);
      raw.extend(v.as_bytes());
      raw.extend(CR_LF);
    }
    raw.extend(CR_LF);
    raw.extend(&self.body[..]);
    Bytes::from(raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raw_post_has_host_length_and_body() {
    let target = Url::parse("http://127.0.0.1:8080/http-requests/ingest-http?x=1").unwrap();
    let raw = IngestRequest::post_json(&target, r#"{"items":[]}"#).to_raw();
    let text = String::from_utf8(raw.to_vec()).unwrap();
    assert!(text.starts_with("POST /http-requests/ingest-http?x=1 HTTP/1.1\r\nhost: 127.0.0.1:8080\r\n"));
    assert!(text.contains("content-type: application/json\r\n"));
    assert!(text.contains("connection: close\r\n"));
    assert!(text.contains("content-length: 12\r\n"));
    assert!(text.ends_with("\r\n\r\n{\"items\":[]}"));
  }
}
