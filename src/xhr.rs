//! The legacy event-driven call object and its capturing wrapper.
use crate::codec::{read_body, BodyCapture};
use crate::controller::CaptureContext;
use crate::event::{now_millis, CapturedEvent, CapturedRequest, CapturedResponse, HeaderPairs, ResponseCapture};
use crate::validate::{is_bodyless, normalize_method, resolve_http_url};
use bytes::Bytes;
use std::sync::Arc;

/// Called once when a legacy call completes.
pub type LoadListener = Box<dyn FnOnce(&XhrCompletion) + Send>;

/// A form entry of a multi-part body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEntry {
  /// plain field
  Field {
    /// field name
    name: String,
    /// field value
    value: String,
  },
  /// file field; only the file name is ever captured
  File {
    /// field name
    name: String,
    /// uploaded file name
    file_name: String,
  },
}

/// What page code may hand to `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrBody {
  /// a string
  Text(String),
  /// an array-buffer-like byte view
  Bytes(Bytes),
  /// a binary blob with its own type
  Blob {
    /// blob bytes
    data: Bytes,
    /// blob type, may be empty
    content_type: String,
  },
  /// a multi-part form
  Form(Vec<FormEntry>),
}

impl XhrBody {
  /// The bytes and content type the codec should see for this body.
  ///
  /// Forms flatten to a readable `name=value&...` summary where file fields
  /// become `[file:<name>]` markers.
  fn flatten(&self, header_type: Option<&str>) -> (Bytes, String) {
    match self {
      XhrBody::Text(text) => (
        Bytes::from(text.clone()),
        header_type.unwrap_or("text/plain").to_string(),
      ),
      XhrBody::Bytes(data) => (data.clone(), header_type.unwrap_or_default().to_string()),
      XhrBody::Blob { data, content_type } => {
        let content_type = if content_type.is_empty() {
          header_type.unwrap_or_default()
        } else {
          content_type.as_str()
        };
        (data.clone(), content_type.to_string())
      }
      XhrBody::Form(entries) => {
        let summary = entries
          .iter()
          .map(|entry| match entry {
            FormEntry::Field { name, value } => format!("{name}={value}"),
            FormEntry::File { name, file_name } => format!("{name}=[file:{file_name}]"),
          })
          .collect::<Vec<_>>()
          .join("&");
        (
          Bytes::from(summary),
          "application/x-www-form-urlencoded".to_string(),
        )
      }
    }
  }
}

/// The response body as the call object exposes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum XhrResponseBody {
  /// nothing readable
  #[default]
  Empty,
  /// text response
  Text(String),
  /// array-buffer response
  Bytes(Bytes),
  /// blob response
  Blob(Bytes),
}

impl XhrResponseBody {
  fn bytes(&self) -> Bytes {
    match self {
      XhrResponseBody::Empty => Bytes::new(),
      XhrResponseBody::Text(text) => Bytes::from(text.clone()),
      XhrResponseBody::Bytes(data) | XhrResponseBody::Blob(data) => data.clone(),
    }
  }
}

/// State of a completed legacy call, as seen by load listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XhrCompletion {
  /// numeric status
  pub status: u16,
  /// status text
  pub status_text: String,
  /// all response headers as one `name: value` per line blob
  pub raw_headers: String,
  /// response body
  pub response: XhrResponseBody,
}

/// A legacy event-driven call object.
pub trait Xhr: Send {
  /// Records the method and target.
  fn open(&mut self, method: &str, url: &str);
  /// Sets a request header.
  fn set_request_header(&mut self, name: &str, value: &str);
  /// Registers a completion listener.
  fn add_load_listener(&mut self, listener: LoadListener);
  /// Starts the call.
  fn send(&mut self, body: Option<XhrBody>);
}

/// Constructs legacy call objects.
pub trait XhrFactory: Send + Sync {
  /// A fresh call object.
  fn create(&self) -> Box<dyn Xhr>;
}

/// Parses a raw response-header blob into lower-cased pairs.
pub(crate) fn parse_raw_headers(raw: &str) -> HeaderPairs {
  let mut headers = HeaderPairs::new();
  for line in raw.split('\n') {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if let Some((name, value)) = line.split_once(':') {
      let name = name.trim();
      if !name.is_empty() {
        headers.set(name.to_ascii_lowercase(), value.trim());
      }
    }
  }
  headers
}

pub(crate) struct CapturingXhrFactory {
  original: Arc<dyn XhrFactory>,
  ctx: CaptureContext,
}

impl CapturingXhrFactory {
  pub(crate) fn new(original: Arc<dyn XhrFactory>, ctx: CaptureContext) -> CapturingXhrFactory {
    CapturingXhrFactory { original, ctx }
  }
}

impl XhrFactory for CapturingXhrFactory {
  fn create(&self) -> Box<dyn Xhr> {
    Box::new(CapturingXhr {
      inner: self.original.create(),
      ctx: self.ctx.clone(),
      method: None,
      url: None,
      headers: HeaderPairs::new(),
    })
  }
}

/// Records what the page does with a call object and captures on load.
struct CapturingXhr {
  inner: Box<dyn Xhr>,
  ctx: CaptureContext,
  method: Option<http::Method>,
  url: Option<String>,
  headers: HeaderPairs,
}

impl Xhr for CapturingXhr {
  fn open(&mut self, method: &str, url: &str) {
    self.method = normalize_method(method);
    self.url = resolve_http_url(url, Some(&self.ctx.page_url())).map(String::from);
    self.headers = HeaderPairs::new();
    self.inner.open(method, url);
  }

  fn set_request_header(&mut self, name: &str, value: &str) {
    self.headers.set(name, value);
    self.inner.set_request_header(name, value);
  }

  fn add_load_listener(&mut self, listener: LoadListener) {
    self.inner.add_load_listener(listener);
  }

  fn send(&mut self, body: Option<XhrBody>) {
    let (Some(method), Some(url)) = (self.method.clone(), self.url.clone()) else {
      tracing::debug!("xhr passed through uninstrumented");
      self.inner.send(body);
      return;
    };
    let started = now_millis();
    let max_body_bytes = self.ctx.max_body_bytes();
    let request_body = match &body {
      Some(body) if !is_bodyless(&method) => Some(body.flatten(self.headers.get("content-type"))),
      _ => None,
    };
    let headers = self.headers.clone();
    let ctx = self.ctx.clone();
    self.inner.add_load_listener(Box::new(move |completion: &XhrCompletion| {
      let completion = completion.clone();
      ctx.emit_later("xhr", move |ctx| {
        let request_capture = match &request_body {
          Some((data, content_type)) => read_body(data, content_type, max_body_bytes),
          None => BodyCapture::empty(),
        };
        let response_headers = parse_raw_headers(&completion.raw_headers);
        let content_type = response_headers.get("content-type").unwrap_or_default();
        let response_capture = read_body(&completion.response.bytes(), content_type, max_body_bytes);
        Ok(CapturedEvent {
          ts: started,
          page_url: ctx.page_url(),
          request: CapturedRequest::new(url, method.as_str(), headers, request_capture),
          response: CapturedResponse::Completed(ResponseCapture::new(
            completion.status,
            completion.status_text,
            response_headers,
            response_capture,
          )),
        })
      });
    }));
    self.inner.send(body);
  }
}
