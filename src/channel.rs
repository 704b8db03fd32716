//! One-way bridge carrying captured events out of the page context.
use crate::event::CapturedEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Namespace marker stamped on every message this crate emits.
pub const BRIDGE_MARKER: &str = "pagetap";
/// Message kind of a captured event.
pub const INTERCEPT_KIND: &str = "intercept";

/// A message on the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
  /// namespace marker
  pub marker: String,
  /// message kind
  pub kind: String,
  /// message body
  pub payload: Value,
}

impl BridgeMessage {
  fn is_intercept(&self) -> bool {
    self.marker == BRIDGE_MARKER && self.kind == INTERCEPT_KIND
  }
}

/// Creates a connected emitter/receiver pair. The channel is unbounded.
pub fn bridge() -> (EventEmitter, EventReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (EventEmitter { tx }, EventReceiver { rx })
}

/// The page side of the bridge.
#[derive(Debug, Clone)]
pub struct EventEmitter {
  tx: UnboundedSender<BridgeMessage>,
}

impl EventEmitter {
  /// Posts `event` without waiting; returns `false` once the receiver is gone.
  pub fn emit(&self, event: &CapturedEvent) -> bool {
    let payload = match serde_json::to_value(event) {
      Ok(payload) => payload,
      Err(err) => {
        tracing::debug!("unserializable event dropped: {err}");
        return false;
      }
    };
    self
      .tx
      .send(BridgeMessage {
        marker: BRIDGE_MARKER.to_string(),
        kind: INTERCEPT_KIND.to_string(),
        payload,
      })
      .is_ok()
  }

  /// The raw sender, for producers posting their own messages.
  pub fn sender(&self) -> UnboundedSender<BridgeMessage> {
    self.tx.clone()
  }
}

/// The trusted side of the bridge.
#[derive(Debug)]
pub struct EventReceiver {
  rx: UnboundedReceiver<BridgeMessage>,
}

impl EventReceiver {
  /// Waits for the next captured event, skipping foreign messages.
  ///
  /// Returns `None` once every emitter is dropped and the queue is drained.
  pub async fn recv(&mut self) -> Option<CapturedEvent> {
    while let Some(message) = self.rx.recv().await {
      if let Some(event) = accept(message) {
        return Some(event);
      }
    }
    None
  }

  /// Takes the next captured event if one is already queued.
  pub fn try_recv(&mut self) -> Option<CapturedEvent> {
    loop {
      match self.rx.try_recv() {
        Ok(message) => {
          if let Some(event) = accept(message) {
            return Some(event);
          }
        }
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
      }
    }
  }
}

fn accept(message: BridgeMessage) -> Option<CapturedEvent> {
  if !message.is_intercept() {
    return None;
  }
  match serde_json::from_value(message.payload) {
    Ok(event) => Some(event),
    Err(err) => {
      tracing::debug!("malformed intercept payload ignored: {err}");
      None
    }
  }
}
