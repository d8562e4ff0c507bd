//! Authentication state as an explicit value.
//!
//! An [`AuthSession`] subscribes to an [`AuthProvider`] when started and
//! unsubscribes when closed or dropped. Callers that need the signed-in user are
//! handed the session (or a receiver cloned from it) instead of reading shared
//! global state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hyper::HeaderMap;
use tokio::sync::watch;

use crate::config::internal_token;
use crate::models::SignInProfile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
  pub uid: String,
  pub email: Option<String>,
  pub display_name: Option<String>,
  pub photo_url: Option<String>,
  pub providers: Vec<String>,
}

impl AuthUser {
  pub fn to_profile(&self) -> SignInProfile {
    SignInProfile {
      uid: self.uid.clone(),
      email: self.email.clone(),
      display_name: self.display_name.clone(),
      photo_url: self.photo_url.clone(),
      providers: self.providers.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
  /// The provider has not reported yet.
  Loading,
  SignedOut,
  SignedIn(AuthUser),
}

pub type AuthListener = Box<dyn Fn(AuthState) + Send + Sync>;

/// Handle returned by [`AuthProvider::subscribe`]; dropping it unsubscribes.
pub struct Subscription {
  cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
  pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
    Self {
      cancel: Some(Box::new(cancel)),
    }
  }

  pub fn unsubscribe(mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

pub trait AuthProvider {
  /// Registers `listener` for every state change. Providers may report the current
  /// state immediately.
  fn subscribe(&self, listener: AuthListener) -> Subscription;
}

pub struct AuthSession {
  rx: watch::Receiver<AuthState>,
  subscription: Option<Subscription>,
}

impl AuthSession {
  pub fn start<P: AuthProvider + ?Sized>(provider: &P) -> Self {
    let (tx, rx) = watch::channel(AuthState::Loading);
    let subscription = provider.subscribe(Box::new(move |state| {
      tx.send_replace(state);
    }));
    Self {
      rx,
      subscription: Some(subscription),
    }
  }

  pub fn current(&self) -> AuthState {
    self.rx.borrow().clone()
  }

  pub fn user(&self) -> Option<AuthUser> {
    match &*self.rx.borrow() {
      AuthState::SignedIn(user) => Some(user.clone()),
      _ => None,
    }
  }

  pub fn is_loading(&self) -> bool {
    matches!(*self.rx.borrow(), AuthState::Loading)
  }

  /// Waits for the next state. `None` once the provider has released the session.
  pub async fn changed(&mut self) -> Option<AuthState> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().clone())
  }

  /// A receiver for components that only observe the state.
  pub fn watch(&self) -> watch::Receiver<AuthState> {
    self.rx.clone()
  }

  pub fn close(mut self) {
    if let Some(subscription) = self.subscription.take() {
      subscription.unsubscribe();
    }
  }
}

type Listeners = BTreeMap<u64, Arc<AuthListener>>;

struct ProviderInner {
  state: AuthState,
  listeners: Listeners,
}

/// Provider driven by explicit calls, for local runs and tests.
#[derive(Clone)]
pub struct InMemoryAuthProvider {
  inner: Arc<Mutex<ProviderInner>>,
  next_id: Arc<AtomicU64>,
}

impl InMemoryAuthProvider {
  pub fn new(initial: AuthState) -> Self {
    Self {
      inner: Arc::new(Mutex::new(ProviderInner {
        state: initial,
        listeners: BTreeMap::new(),
      })),
      next_id: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn set_state(&self, state: AuthState) {
    let listeners: Vec<Arc<AuthListener>> = {
      let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
      inner.state = state.clone();
      inner.listeners.values().cloned().collect()
    };
    for listener in listeners {
      listener(state.clone());
    }
  }

  pub fn sign_in(&self, user: AuthUser) {
    self.set_state(AuthState::SignedIn(user));
  }

  pub fn sign_out(&self) {
    self.set_state(AuthState::SignedOut);
  }

  pub fn listener_count(&self) -> usize {
    self.inner.lock().unwrap_or_else(|e| e.into_inner()).listeners.len()
  }
}

impl AuthProvider for InMemoryAuthProvider {
  fn subscribe(&self, listener: AuthListener) -> Subscription {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let listener = Arc::new(listener);
    let current = {
      let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
      inner.listeners.insert(id, listener.clone());
      inner.state.clone()
    };
    if current != AuthState::Loading {
      listener(current);
    }

    let inner = Arc::clone(&self.inner);
    Subscription::new(move || {
      inner.lock().unwrap_or_else(|e| e.into_inner()).listeners.remove(&id);
    })
  }
}

pub fn bearer_token(header_value: Option<&str>) -> Option<&str> {
  let value = header_value?;
  value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))
}

/// True when the request carries `Authorization: Bearer $RUST_INTERNAL_TOKEN`.
/// An unset token rejects every caller.
pub fn is_internal_caller(headers: &HeaderMap) -> bool {
  let expected = internal_token();
  let provided = bearer_token(headers.get("authorization").and_then(|v| v.to_str().ok())).unwrap_or("");
  !expected.is_empty() && provided == expected
}
