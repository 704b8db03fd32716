//! Sequential submission of envelopes to the ingestion endpoint.
use crate::connector::{Connector, ConnectorBuilder};
use crate::normalize::{NormalizeOptions, RawItem};
use crate::pack::{make_batches, Envelope, PackOptions};
use crate::request::IngestRequest;
use crate::response::{IngestResponse, ResponseReader};
use crate::{Error, Result};
use bytes::Bytes;
use url::Url;

/// Path of the HTTP-request ingestion route, relative to the backend base url.
pub const DEFAULT_INGEST_PATH: &str = "/http-requests/ingest-http";

/// Joins [`DEFAULT_INGEST_PATH`] onto a backend base url.
///
/// ```
/// let url = pagetap::ingest_endpoint("http://localhost:3000/api/").unwrap();
/// assert_eq!(url.as_str(), "http://localhost:3000/api/http-requests/ingest-http");
/// ```
pub fn ingest_endpoint(base: &str) -> Result<Url> {
  let mut url = Url::parse(base).map_err(|e| Error::InvalidUrl(format!("{base}: {e}")))?;
  if !matches!(url.scheme(), "http" | "https") {
    return Err(Error::InvalidUrl(base.to_string()));
  }
  let path = format!(
    "{}{}",
    url.path().trim_end_matches('/'),
    DEFAULT_INGEST_PATH
  );
  url.set_path(&path);
  Ok(url)
}

/// Carries one JSON body to an endpoint and returns what came back.
#[async_trait::async_trait]
pub trait IngestTransport: Send + Sync {
  /// `POST`s `body` with a JSON content type.
  async fn post_json(&self, endpoint: &Url, body: Bytes) -> Result<IngestResponse>;
}

/// HTTP/1.1 transport over plain tokio sockets, one connection per request.
#[derive(Clone)]
pub struct HttpTransport {
  connector: Connector,
}

impl HttpTransport {
  /// A transport with default timeouts.
  pub fn new() -> Result<HttpTransport> {
    HttpTransport::with_connector(ConnectorBuilder::default())
  }

  /// A transport using `builder`'s settings.
  pub fn with_connector(builder: ConnectorBuilder) -> Result<HttpTransport> {
    Ok(HttpTransport {
      connector: builder.build()?,
    })
  }
}

#[async_trait::async_trait]
impl IngestTransport for HttpTransport {
  async fn post_json(&self, endpoint: &Url, body: Bytes) -> Result<IngestResponse> {
    let request = IngestRequest::post_json(endpoint, body);
    let mut socket = self.connector.connect(endpoint).await?;
    socket.write_all(&request.to_raw()).await?;
    socket.flush().await?;
    let read_timeout = socket.read_timeout();
    let reader = ResponseReader::new(socket);
    match read_timeout {
      None => reader.read().await,
      Some(timeout) => tokio::time::timeout(timeout, reader.read())
        .await
        .map_err(|x| crate::errors::new_io_error(std::io::ErrorKind::TimedOut, &x.to_string()))?,
    }
  }
}

/// Submits envelopes one at a time, in order.
pub struct BatchSender<T: IngestTransport = HttpTransport> {
  transport: T,
  endpoint: Url,
}

impl<T: IngestTransport> BatchSender<T> {
  /// A sender posting to `endpoint` through `transport`.
  pub fn new(transport: T, endpoint: Url) -> BatchSender<T> {
    BatchSender { transport, endpoint }
  }

  /// The endpoint envelopes are posted to.
  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  /// Posts every envelope, awaiting each response before the next.
  ///
  /// Empty envelopes are skipped. The first non-2xx answer stops the run
  /// and is returned as [`Error::IngestRejected`]; otherwise the number of
  /// envelopes posted is returned.
  pub async fn send_all(&self, envelopes: &[Envelope]) -> Result<usize> {
    let mut dispatched = 0;
    for (index, envelope) in envelopes.iter().enumerate() {
      if envelope.is_empty() {
        continue;
      }
      let body = Bytes::from(envelope.to_bytes()?);
      let size = body.len();
      let response = self.transport.post_json(&self.endpoint, body).await?;
      if !response.is_success() {
        let text = response.text();
        let detail = if text.is_empty() {
          response.reason().to_string()
        } else {
          text
        };
        tracing::warn!(
          envelope = index,
          status = response.status_code().as_u16(),
          "ingestion rejected an envelope"
        );
        return Err(Error::IngestRejected {
          dispatched,
          status: response.status_code(),
          detail,
        });
      }
      dispatched += 1;
      tracing::info!(envelope = index, items = envelope.len(), bytes = size, "envelope ingested");
    }
    Ok(dispatched)
  }

  /// Normalizes, packs and posts `raw` in one pass.
  pub async fn ship(&self, raw: &[RawItem], normalize_options: &NormalizeOptions, pack_options: &PackOptions) -> Result<usize> {
    let envelopes = make_batches(raw, normalize_options, pack_options)?;
    if envelopes.is_empty() {
      tracing::debug!("nothing to ship");
      return Ok(0);
    }
    self.send_all(&envelopes).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn endpoint_joins_base_path() {
    assert_eq!(
      ingest_endpoint("http://backend:8080").unwrap().as_str(),
      "http://backend:8080/http-requests/ingest-http"
    );
    assert!(ingest_endpoint("file:///tmp").is_err());
    assert!(ingest_endpoint("not a url").is_err());
  }
}
