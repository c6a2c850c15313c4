//! Cancellation signals.
//!
//! # Design
//! An `AbortSignal` is a latching flag shared through an `Arc`. The single
//! `unset -> set` transition is a compare-exchange, so concurrent aborts run
//! listeners exactly once and later aborts are no-ops. Listeners are one-shot
//! closures; waiters that prefer `.await` use [`AbortSignal::aborted`].
//!
//! `follow` registers a listener on the parent that holds only a `Weak` to
//! the follower, so a chain of followed signals never keeps itself alive.
//! The listener itself stays on the parent until removed; callers that
//! follow a long-lived signal release it with [`AbortSignal::unfollow`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;

type Listener = Box<dyn FnOnce() + Send>;

/// Handle returned by [`AbortSignal::add_listener`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Inner {
    aborted: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
    notify: Notify,
}

impl Inner {
    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self) -> bool {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let fired = std::mem::take(&mut *self.listeners());
        for (_, listener) in fired {
            listener();
        }
        self.notify.notify_waiters();
        true
    }
}

/// A one-shot, listenable abort flag.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl AbortSignal {
    /// A fresh signal that is never set unless a controller or a followed
    /// signal sets it.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// A signal that is already set.
    pub fn already_aborted() -> Self {
        let signal = Self::new();
        signal.inner.set();
        signal
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Run `f` once when the signal becomes set. If it already is, `f` runs
    /// immediately on the calling thread.
    pub fn add_listener(&self, f: impl FnOnce() + Send + 'static) -> ListenerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.inner.listeners();
        if self.is_aborted() {
            drop(listeners);
            f();
        } else {
            listeners.push((id, Box::new(f)));
        }
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners().retain(|(i, _)| *i != id.0);
    }

    /// Resolves once the signal is set; immediately if it already is.
    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    /// Become set as soon as `parent` is set. One-directional.
    ///
    /// Returns the listener registered on `parent`, or `None` when `parent`
    /// was already set and nothing had to be registered.
    pub fn follow(&self, parent: &AbortSignal) -> Option<ListenerId> {
        if parent.is_aborted() {
            self.inner.set();
            return None;
        }
        let follower: Weak<Inner> = Arc::downgrade(&self.inner);
        Some(parent.add_listener(move || {
            if let Some(inner) = follower.upgrade() {
                inner.set();
            }
        }))
    }

    /// Stop following `parent`. Dropping the returned guard removes the
    /// listener `follow` put there.
    pub fn unfollow(parent: &AbortSignal, id: Option<ListenerId>) -> Unfollow {
        Unfollow {
            parent: parent.clone(),
            id,
        }
    }

    /// Listeners still waiting for this signal.
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }

    pub(crate) fn set(&self) -> bool {
        self.inner.set()
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Removes a follow listener from its parent when dropped.
#[must_use = "the listener is removed as soon as this guard is dropped"]
pub struct Unfollow {
    parent: AbortSignal,
    id: Option<ListenerId>,
}

impl Drop for Unfollow {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.parent.remove_listener(id);
        }
    }
}

impl fmt::Debug for Unfollow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unfollow").field("id", &self.id).finish()
    }
}

/// Owner of an `AbortSignal`; the only public way to set one.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Set the signal. Returns `false` if it was already set.
    pub fn abort(&self) -> bool {
        self.signal.set()
    }
}
