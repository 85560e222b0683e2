//! Coalescing queue of pending reload requests.

use log::warn;
use parking_lot::Mutex;

/// Invoked once after the reload that served its request.
pub type ReloadCallback = Box<dyn FnOnce() + Send + 'static>;

/// One request for a reload, optionally carrying a completion callback.
#[derive(Default)]
pub struct ReloadRequest {
    pub callback: Option<ReloadCallback>,
    /// Callback is kept even when the cap is reached
    waiter: bool,
}

impl ReloadRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            waiter: false,
        }
    }

    /// Like [`with_callback`](Self::with_callback), but the callback is
    /// never dropped at capacity. Used when a caller is blocked on it.
    pub fn with_waiter<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            waiter: true,
        }
    }
}

impl std::fmt::Debug for ReloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadRequest")
            .field("has_callback", &self.callback.is_some())
            .field("waiter", &self.waiter)
            .finish()
    }
}

#[derive(Default)]
struct PendingState {
    pending: bool,
    callbacks: Vec<ReloadCallback>,
    dropped: u64,
}

/// Pending flag plus a bounded callback list.
///
/// Any number of requests between two ticks collapse into a single
/// reload. Fire-and-forget callbacks beyond the cap are dropped; the
/// reload itself still happens. Waiter callbacks are never dropped.
pub struct PendingReloads {
    state: Mutex<PendingState>,
    max_callbacks: usize,
}

impl PendingReloads {
    pub fn new(max_callbacks: usize) -> Self {
        Self {
            state: Mutex::new(PendingState::default()),
            max_callbacks,
        }
    }

    /// Marks a reload as pending. Returns `false` if the request's
    /// callback had to be dropped.
    pub fn push(&self, request: ReloadRequest) -> bool {
        let mut state = self.state.lock();
        state.pending = true;

        let Some(callback) = request.callback else {
            return true;
        };
        if !request.waiter && state.callbacks.len() >= self.max_callbacks {
            state.dropped += 1;
            warn!(
                "Pending reload callbacks at capacity ({}), dropping callback",
                self.max_callbacks
            );
            return false;
        }
        state.callbacks.push(callback);
        true
    }

    /// Takes and clears the pending batch. `None` when nothing was
    /// requested since the last take.
    pub fn take(&self) -> Option<Vec<ReloadCallback>> {
        let mut state = self.state.lock();
        if !state.pending {
            return None;
        }
        state.pending = false;
        Some(std::mem::take(&mut state.callbacks))
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    pub fn callback_count(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    /// Callbacks dropped at capacity since creation.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}
