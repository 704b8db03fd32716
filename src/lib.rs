#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # pagetap
//!
//! The `pagetap` crate observes every HTTP call a monitored page makes,
//! without changing what the page sees, and ships the traffic to an
//! ingestion backend in byte-bounded batches.
//!
//! - Transparent hooks on the page's promise-based call and its legacy
//!   call object, installed and restored by an [`InterceptionController`]
//! - A body codec that keeps text as text, binary as base64 and reports the
//!   original size of truncated bodies
//! - A one-way [bridge] carrying [`CapturedEvent`]s out of the page
//! - A [`normalize`]r producing strict [`WireItem`]s
//! - A greedy [`pack`]er and a sequential [`BatchSender`]
//!
//! ## Capturing
//!
//! ```rust
//! # use std::sync::Arc;
//! # use pagetap::{Fetch, FetchArgs, FetchResponse, NetworkError, Xhr, XhrFactory};
//! # struct Native;
//! # #[async_trait::async_trait]
//! # impl Fetch for Native {
//! #   async fn fetch(&self, _: FetchArgs) -> Result<FetchResponse, NetworkError> {
//! #     Ok(FetchResponse::new(200).header("content-type", "application/json").body(r#"{"ok":true}"#))
//! #   }
//! # }
//! # impl XhrFactory for Native {
//! #   fn create(&self) -> Box<dyn Xhr> { unimplemented!() }
//! # }
//! # async fn run() {
//! let native = Arc::new(Native);
//! let page = Arc::new(pagetap::Page::new("https://example.com/", native.clone(), native));
//! let (emitter, mut receiver) = pagetap::bridge();
//! let controller = pagetap::InterceptionController::new(page.clone(), emitter);
//! controller.install(None);
//!
//! page.fetch(FetchArgs::new("/a?x=1")).await.unwrap();
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.request.url, "https://example.com/a?x=1");
//! # }
//! ```
//!
//! ## Shipping
//!
//! ```rust,no_run
//! # async fn run(items: Vec<pagetap::RawItem>) -> pagetap::Result<()> {
//! let endpoint = pagetap::ingest_endpoint("http://localhost:3000")?;
//! let sender = pagetap::BatchSender::new(pagetap::HttpTransport::new()?, endpoint);
//! let envelopes = pagetap::make_batches(
//!   &items,
//!   &pagetap::NormalizeOptions::default(),
//!   &pagetap::PackOptions::interactive(),
//! )?;
//! let sent = sender.send_all(&envelopes).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - **tls**: https ingestion endpoints.
//! - **charset**: decode textual bodies by their declared charset.
//! - **schema**: JSON Schema for the wire types.
//!
mod body;
mod channel;
mod codec;
mod connector;
mod controller;
mod errors;
mod event;
mod fetch;
mod flags;
mod normalize;
mod pack;
mod page;
mod pcap;
mod request;
mod response;
mod sender;
mod serde_schema;
mod session;
mod socket;
#[cfg(feature = "tls")]
mod tls;
mod validate;
mod xhr;

pub use body::Body;
pub use channel::{bridge, BridgeMessage, EventEmitter, EventReceiver, BRIDGE_MARKER, INTERCEPT_KIND};
pub use codec::{is_textual, read_body, read_body_stream, BodyCapture, BodyEncoding};
pub use connector::{Connector, ConnectorBuilder};
pub use controller::{HookFamily, InterceptionController};
pub use errors::{Error, Result};
pub use event::{now_millis, CapturedEvent, CapturedRequest, CapturedResponse, HeaderPairs, ResponseCapture};
pub use fetch::{Fetch, FetchArgs, FetchResponse, NetworkError};
pub use flags::{CaptureFlags, CaptureTypes, FlagsUpdate, TypesUpdate, DEFAULT_MAX_BODY_BYTES};
pub use http::Method;
pub use http::StatusCode;
pub use normalize::{
  normalize, reason_phrase, Connection, Header, IdFn, Limits, NormalizeOptions, NormalizedBatch, Param,
  RawItem, RawMeta, RawRequest, RawResponse, WireItem, WireResponse, WireUri, DEFAULT_GRAPH,
};
pub use pack::{make_batches, pack, Envelope, PackOptions};
pub use page::{HookSlot, Location, Page};
pub use pcap::{raw_items_from_pcap, PcapRecord, PcapResponse, PcapUri};
pub use response::IngestResponse;
pub use sender::{ingest_endpoint, BatchSender, HttpTransport, IngestTransport, DEFAULT_INGEST_PATH};
pub use session::{CaptureSession, SessionStats, UNKNOWN_PAGE};
pub use socket::Socket;
#[cfg(feature = "tls")]
pub use tls::Certificate;
pub use validate::{normalize_method, resolve_http_url, ALLOWED_METHODS};
pub use xhr::{FormEntry, LoadListener, Xhr, XhrBody, XhrCompletion, XhrFactory, XhrResponseBody};

pub(crate) const CR_LF: &[u8] = &[13, 10];
pub(crate) const SPACE: &[u8] = &[32];
pub(crate) const COLON_SPACE: &[u8] = &[58, 32];
