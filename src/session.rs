//! Collector side of the bridge: keeps captured events grouped by page.
use crate::channel::EventReceiver;
use crate::event::{now_millis, CapturedEvent};
use crate::normalize::RawItem;
use serde::Serialize;
use std::collections::BTreeMap;

/// Dataset key for events whose page URL is empty.
pub const UNKNOWN_PAGE: &str = "(unknown_page)";

/// Running totals of a capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
  /// session start, ms since epoch
  pub started_at: u64,
  /// events stored
  pub total_events: usize,
  /// distinct pages seen
  pub pages: usize,
  /// sum of original request and response body sizes
  pub total_bytes: u64,
}

/// Events received during one capture run.
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
  dataset: BTreeMap<String, Vec<CapturedEvent>>,
  stats: SessionStats,
}

impl CaptureSession {
  /// An empty session starting now.
  pub fn new() -> CaptureSession {
    CaptureSession {
      dataset: BTreeMap::new(),
      stats: SessionStats {
        started_at: now_millis(),
        ..SessionStats::default()
      },
    }
  }

  /// Stores one event under its page.
  pub fn ingest(&mut self, event: CapturedEvent) {
    let key = if event.page_url.is_empty() {
      UNKNOWN_PAGE.to_string()
    } else {
      event.page_url.clone()
    };
    self.stats.total_events += 1;
    self.stats.total_bytes += event.request.body_size + event.response.body_size();
    let page = self.dataset.entry(key).or_default();
    if page.is_empty() {
      self.stats.pages += 1;
    }
    page.push(event);
  }

  /// Drains `receiver` until every emitter is gone.
  pub async fn run(&mut self, receiver: &mut EventReceiver) {
    while let Some(event) = receiver.recv().await {
      self.ingest(event);
    }
    tracing::debug!(
      events = self.stats.total_events,
      pages = self.stats.pages,
      "capture session drained"
    );
  }

  /// Current totals.
  pub fn stats(&self) -> SessionStats {
    self.stats
  }

  /// Events of one page, in arrival order.
  pub fn page(&self, page_url: &str) -> &[CapturedEvent] {
    self.dataset.get(page_url).map(Vec::as_slice).unwrap_or_default()
  }

  /// Page URLs seen so far.
  pub fn pages(&self) -> impl Iterator<Item = &str> {
    self.dataset.keys().map(String::as_str)
  }

  /// Every stored event as a raw item, ordered by capture time.
  ///
  /// Arrival order on the bridge does not follow call completion, so
  /// the sort here is what restores it. Equal timestamps stay grouped by
  /// page, then by arrival.
  pub fn raw_items(&self) -> Vec<RawItem> {
    let mut events = self.dataset.values().flatten().collect::<Vec<_>>();
    events.sort_by_key(|event| event.ts);
    events.into_iter().cloned().map(RawItem::from).collect()
  }
}
