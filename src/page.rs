//! The host page: its location and the global network primitives it calls
//! through.
use crate::fetch::{Fetch, FetchArgs, FetchResponse, NetworkError};
use crate::xhr::{Xhr, XhrFactory};
use std::sync::{Arc, PoisonError, RwLock};

/// The page URL, shared between the page and anything capturing on its
/// behalf.
#[derive(Debug, Clone, Default)]
pub struct Location {
  href: Arc<RwLock<String>>,
}

impl Location {
  /// Creates a location at `href`.
  pub fn new(href: impl Into<String>) -> Location {
    Location {
      href: Arc::new(RwLock::new(href.into())),
    }
  }

  /// The current page URL.
  pub fn href(&self) -> String {
    self.href.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Moves the page to `href`.
  pub fn set_href(&self, href: impl Into<String>) {
    *self.href.write().unwrap_or_else(PoisonError::into_inner) = href.into();
  }
}

/// A replaceable global implementation together with a register of what it
/// replaced.
///
/// Page code always resolves the slot at call time, so it observes whichever
/// implementation is installed right now.
pub struct HookSlot<T: ?Sized> {
  current: RwLock<Arc<T>>,
}

impl<T: ?Sized> HookSlot<T> {
  /// Creates a slot holding the native implementation.
  pub fn new(native: Arc<T>) -> HookSlot<T> {
    HookSlot {
      current: RwLock::new(native),
    }
  }

  /// The implementation currently installed.
  pub fn get(&self) -> Arc<T> {
    self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Installs `next` and returns the implementation it displaced.
  pub(crate) fn replace(&self, next: Arc<T>) -> Arc<T> {
    let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *current, next)
  }
}

/// A page whose network primitives can be wrapped.
pub struct Page {
  location: Location,
  fetch: HookSlot<dyn Fetch>,
  xhr: HookSlot<dyn XhrFactory>,
}

impl Page {
  /// Creates a page at `href` with its native primitives.
  pub fn new(href: impl Into<String>, fetch: Arc<dyn Fetch>, xhr: Arc<dyn XhrFactory>) -> Page {
    Page {
      location: Location::new(href),
      fetch: HookSlot::new(fetch),
      xhr: HookSlot::new(xhr),
    }
  }

  /// The page location.
  pub fn location(&self) -> &Location {
    &self.location
  }

  /// The promise-based call slot.
  pub fn fetch_slot(&self) -> &HookSlot<dyn Fetch> {
    &self.fetch
  }

  /// The legacy call-object constructor slot.
  pub fn xhr_slot(&self) -> &HookSlot<dyn XhrFactory> {
    &self.xhr
  }

  /// Performs a promise-based call the way page code does.
  pub async fn fetch(&self, args: FetchArgs) -> Result<FetchResponse, NetworkError> {
    let fetch = self.fetch.get();
    fetch.fetch(args).await
  }

  /// Constructs a legacy call object the way page code does.
  pub fn new_xhr(&self) -> Box<dyn Xhr> {
    self.xhr.get().create()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn replace_returns_previous_implementation() {
    let first: Arc<str> = Arc::from("first");
    let slot: HookSlot<str> = HookSlot::new(first.clone());
    let previous = slot.replace(Arc::from("second"));
    assert!(Arc::ptr_eq(&previous, &first));
    assert_eq!(&*slot.get(), "second");
    slot.replace(previous);
    assert!(Arc::ptr_eq(&slot.get(), &first));
  }

  #[test]
  fn location_is_shared() {
    let location = Location::new("https://a.example/");
    let clone = location.clone();
    clone.set_href("https://b.example/");
    assert_eq!(location.href(), "https://b.example/");
  }
}
