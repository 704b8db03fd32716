//! Installs and removes the capture hooks on a page and applies live flags.
use crate::channel::EventEmitter;
use crate::event::CapturedEvent;
use crate::fetch::{CapturingFetch, Fetch};
use crate::flags::{CaptureFlags, FlagsUpdate};
use crate::page::{Location, Page};
use crate::xhr::{CapturingXhrFactory, XhrFactory};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What every installed hook shares: where to post events, the page
/// location and the current byte cap.
#[derive(Debug, Clone)]
pub(crate) struct CaptureContext {
  location: Location,
  emitter: EventEmitter,
  max_body_bytes: Arc<AtomicUsize>,
}

impl CaptureContext {
  pub(crate) fn page_url(&self) -> String {
    self.location.href()
  }

  pub(crate) fn max_body_bytes(&self) -> usize {
    self.max_body_bytes.load(Ordering::Relaxed)
  }

  /// Builds and emits an event off the page's call path.
  ///
  /// Never fails: build errors and panics are logged and dropped.
  pub(crate) fn emit_later<F>(&self, what: &'static str, build: F)
  where
    F: FnOnce(&CaptureContext) -> crate::Result<CapturedEvent> + Send + 'static,
  {
    let ctx = self.clone();
    match Handle::try_current() {
      Ok(handle) => {
        handle.spawn_blocking(move || ctx.finish(what, build));
      }
      Err(_) => ctx.finish(what, build),
    }
  }

  fn finish<F>(&self, what: &'static str, build: F)
  where
    F: FnOnce(&CaptureContext) -> crate::Result<CapturedEvent>,
  {
    match catch_unwind(AssertUnwindSafe(|| build(self))) {
      Ok(Ok(event)) => {
        if !self.emitter.emit(&event) {
          tracing::debug!("{what} capture dropped: receiver closed");
        }
      }
      Ok(Err(err)) => tracing::debug!("{what} capture failed: {err}"),
      Err(_) => tracing::debug!("{what} capture panicked"),
    }
  }
}

/// A hookable family of network primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFamily {
  /// the promise-based call
  Fetch,
  /// the legacy call-object constructor
  Xhr,
}

#[derive(Default)]
struct Originals {
  fetch: Option<Arc<dyn Fetch>>,
  xhr: Option<Arc<dyn XhrFactory>>,
}

struct ControllerState {
  initialized: bool,
  flags: CaptureFlags,
  originals: Originals,
}

/// Owns the capture hooks of one page.
///
/// At most one set of hooks wraps the page at a time; the displaced
/// implementations are kept and put back on `uninstall` or drop.
pub struct InterceptionController {
  page: Arc<Page>,
  ctx: CaptureContext,
  state: Mutex<ControllerState>,
}

impl InterceptionController {
  /// A controller for `page` posting events through `emitter`. Nothing is
  /// hooked until [`install`](Self::install).
  pub fn new(page: Arc<Page>, emitter: EventEmitter) -> InterceptionController {
    let flags = CaptureFlags::default();
    InterceptionController {
      ctx: CaptureContext {
        location: page.location().clone(),
        emitter,
        max_body_bytes: Arc::new(AtomicUsize::new(flags.max_body_bytes)),
      },
      page,
      state: Mutex::new(ControllerState {
        initialized: false,
        flags,
        originals: Originals::default(),
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, ControllerState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Installs the hooks the flags ask for.
  ///
  /// Only the first call installs; later calls just re-apply `initial` when
  /// given.
  pub fn install(&self, initial: Option<&FlagsUpdate>) -> CaptureFlags {
    let mut state = self.lock();
    if let Some(update) = initial {
      state.flags = state.flags.merged(update);
    }
    if !state.initialized {
      state.initialized = true;
      tracing::info!(page = %self.ctx.page_url(), "capture installed");
    }
    self.sync(&mut state);
    state.flags
  }

  /// Merges `update` into the current flags and enables or disables each
  /// hook family to match. Returns the effective flags.
  pub fn apply_flags(&self, update: &FlagsUpdate) -> CaptureFlags {
    let mut state = self.lock();
    state.flags = state.flags.merged(update);
    if state.initialized {
      self.sync(&mut state);
    } else {
      self.ctx.max_body_bytes.store(state.flags.max_body_bytes, Ordering::Relaxed);
    }
    state.flags
  }

  /// The effective flags.
  pub fn flags(&self) -> CaptureFlags {
    self.lock().flags
  }

  /// Whether `family` is currently wrapped.
  pub fn is_hooked(&self, family: HookFamily) -> bool {
    let state = self.lock();
    match family {
      HookFamily::Fetch => state.originals.fetch.is_some(),
      HookFamily::Xhr => state.originals.xhr.is_some(),
    }
  }

  /// Restores every original primitive. A later `install` starts over.
  pub fn uninstall(&self) {
    let mut state = self.lock();
    self.restore(&mut state.originals);
    if state.initialized {
      state.initialized = false;
      tracing::info!(page = %self.ctx.page_url(), "capture removed");
    }
  }

  /// Re-applies every flags value published on `updates` until the sender
  /// or this controller goes away.
  pub fn watch_updates(self: &Arc<Self>, mut updates: watch::Receiver<FlagsUpdate>) -> JoinHandle<()> {
    let controller = Arc::downgrade(self);
    tokio::spawn(async move {
      while updates.changed().await.is_ok() {
        let update = *updates.borrow_and_update();
        let Some(controller) = controller.upgrade() else {
          break;
        };
        controller.apply_flags(&update);
      }
    })
  }

  fn sync(&self, state: &mut ControllerState) {
    let flags = state.flags;
    self.ctx.max_body_bytes.store(flags.max_body_bytes, Ordering::Relaxed);
    if flags.types.http {
      self.hook(&mut state.originals);
    } else {
      self.restore(&mut state.originals);
    }
    for (family, enabled) in [
      ("beacon", flags.types.beacon),
      ("sse", flags.types.sse),
      ("websocket", flags.types.websocket),
    ] {
      if enabled {
        tracing::debug!("{family} capture requested; no hook for this family");
      }
    }
  }

  fn hook(&self, originals: &mut Originals) {
    if originals.fetch.is_none() {
      let slot = self.page.fetch_slot();
      let wrapper = Arc::new(CapturingFetch::new(slot.get(), self.ctx.clone()));
      originals.fetch = Some(slot.replace(wrapper));
      tracing::debug!("fetch hooked");
    }
    if originals.xhr.is_none() {
      let slot = self.page.xhr_slot();
      let wrapper = Arc::new(CapturingXhrFactory::new(slot.get(), self.ctx.clone()));
      originals.xhr = Some(slot.replace(wrapper));
      tracing::debug!("xhr hooked");
    }
  }

  fn restore(&self, originals: &mut Originals) {
    if let Some(original) = originals.fetch.take() {
      self.page.fetch_slot().replace(original);
      tracing::debug!("fetch restored");
    }
    if let Some(original) = originals.xhr.take() {
      self.page.xhr_slot().replace(original);
      tracing::debug!("xhr restored");
    }
  }
}

impl Drop for InterceptionController {
  fn drop(&mut self) {
    let mut state = self.lock();
    self.restore(&mut state.originals);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::bridge;
  use crate::fetch::{FetchArgs, FetchResponse, NetworkError};
  use crate::xhr::{LoadListener, Xhr, XhrBody};

  struct Native;

  #[async_trait::async_trait]
  impl Fetch for Native {
    async fn fetch(&self, _args: FetchArgs) -> Result<FetchResponse, NetworkError> {
      Ok(FetchResponse::new(204))
    }
  }

  struct NoopXhr;

  impl Xhr for NoopXhr {
    fn open(&mut self, _method: &str, _url: &str) {}
    fn set_request_header(&mut self, _name: &str, _value: &str) {}
    fn add_load_listener(&mut self, _listener: LoadListener) {}
    fn send(&mut self, _body: Option<XhrBody>) {}
  }

  impl XhrFactory for Native {
    fn create(&self) -> Box<dyn Xhr> {
      Box::new(NoopXhr)
    }
  }

  fn page() -> (Arc<Page>, Arc<Native>) {
    let native = Arc::new(Native);
    let page = Arc::new(Page::new("https://example.com/", native.clone(), native.clone()));
    (page, native)
  }

  #[test]
  fn second_install_does_not_double_wrap() {
    let (page, _) = page();
    let (emitter, _rx) = bridge();
    let controller = InterceptionController::new(page.clone(), emitter);
    controller.install(None);
    let first = page.fetch_slot().get();
    controller.install(None);
    assert!(Arc::ptr_eq(&first, &page.fetch_slot().get()));
  }

  #[test]
  fn disabling_http_restores_exact_originals() {
    let (page, native) = page();
    let native_fetch: Arc<dyn Fetch> = native.clone();
    let native_xhr: Arc<dyn XhrFactory> = native;
    let (emitter, _rx) = bridge();
    let controller = InterceptionController::new(page.clone(), emitter);
    controller.install(None);
    assert!(controller.is_hooked(HookFamily::Fetch));
    assert!(!Arc::ptr_eq(&page.fetch_slot().get(), &native_fetch));
    let flags = controller.apply_flags(&FlagsUpdate::from_json(r#"{"types":{"http":false}}"#));
    assert!(!flags.types.http);
    assert!(!controller.is_hooked(HookFamily::Xhr));
    assert!(Arc::ptr_eq(&page.fetch_slot().get(), &native_fetch));
    assert!(Arc::ptr_eq(&page.xhr_slot().get(), &native_xhr));
  }

  #[test]
  fn drop_restores_originals() {
    let (page, native) = page();
    let native_fetch: Arc<dyn Fetch> = native;
    let (emitter, _rx) = bridge();
    let controller = InterceptionController::new(page.clone(), emitter);
    controller.install(None);
    drop(controller);
    assert!(Arc::ptr_eq(&page.fetch_slot().get(), &native_fetch));
  }

  #[test]
  fn cap_is_live() {
    let (page, _) = page();
    let (emitter, _rx) = bridge();
    let controller = InterceptionController::new(page, emitter);
    controller.install(None);
    controller.apply_flags(&FlagsUpdate::from_json(r#"{"types":{"http":true},"maxBodyBytes":16}"#));
    assert_eq!(controller.ctx.max_body_bytes(), 16);
  }

  #[test]
  fn build_failures_are_swallowed() {
    let (page, _) = page();
    let (emitter, mut rx) = bridge();
    let controller = InterceptionController::new(page, emitter);
    controller.ctx.emit_later("test", |_| Err(crate::Error::Other("boom".into())));
    controller.ctx.emit_later("test", |_| panic!("boom"));
    assert!(rx.try_recv().is_none());
  }
}
