use crate::engine::{ROOT_SCOPE, ScopeId};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tracing::{error, trace, warn};

pub type CompletionHandler = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TrackerState {
    // Multiset: the same scope may be dispatched more than once.
    pending: HashMap<ScopeId, usize>,
    waiters: HashMap<ScopeId, Vec<oneshot::Sender<()>>>,
    on_complete: Option<CompletionHandler>,
    root_completed: bool,
}

/// Pending-scope bookkeeping for one run.
///
/// A scope is pending from dispatch until its completion is reported.
/// Removing the root scope finishes the run: the completion handler fires
/// exactly once and [`wait_root`](Self::wait_root) resolves.
pub struct ScopeTracker {
    state: Mutex<TrackerState>,
    done: watch::Sender<bool>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            done: watch::Sender::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatch(&self, scope: ScopeId) {
        let mut state = self.state();
        *state.pending.entry(scope).or_insert(0) += 1;
        trace!(scope, "Scope dispatched");
    }

    /// Records a completion. Returns `true` only for the call that finished the run.
    pub fn complete(&self, scope: ScopeId) -> bool {
        let (waiters, handler, finished) = {
            let mut state = self.state();
            match state.pending.get(&scope).copied() {
                Some(count) if count > 1 => {
                    state.pending.insert(scope, count - 1);
                    return false;
                }
                Some(_) => {
                    state.pending.remove(&scope);
                }
                None => {
                    warn!(scope, "Completion for a scope that is not pending");
                    return false;
                }
            }
            trace!(scope, "Scope completed");

            let waiters = state.waiters.remove(&scope).unwrap_or_default();
            let finished = scope == ROOT_SCOPE && !state.root_completed;
            if finished {
                state.root_completed = true;
            }
            let handler = if finished { state.on_complete.take() } else { None };
            (waiters, handler, finished)
        };

        for waiter in waiters {
            let _ = waiter.send(());
        }

        if finished {
            if let Some(handler) = handler {
                // A panicking handler must not leave the run looking unfinished.
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(handler)) {
                    error!(panic = %panic_message(&*panic), "Completion handler panicked");
                }
            }
            self.done.send_replace(true);
        }
        finished
    }

    /// Sets the handler run when the root scope completes. Replaces any
    /// previous handler; if the run already finished it runs immediately.
    pub fn on_complete(&self, handler: CompletionHandler) {
        let run_now = {
            let mut state = self.state();
            if state.root_completed {
                Some(handler)
            } else {
                state.on_complete = Some(handler);
                None
            }
        };
        if let Some(handler) = run_now {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(handler)) {
                error!(panic = %panic_message(&*panic), "Completion handler panicked");
            }
        }
    }

    pub fn is_pending(&self, scope: ScopeId) -> bool {
        self.state().pending.contains_key(&scope)
    }

    /// How many outstanding dispatches `scope` has.
    pub fn pending_count(&self, scope: ScopeId) -> usize {
        self.state().pending.get(&scope).copied().unwrap_or(0)
    }

    pub fn pending(&self) -> Vec<ScopeId> {
        let mut scopes: Vec<ScopeId> = self.state().pending.keys().copied().collect();
        scopes.sort_unstable();
        scopes
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Resolves once `scope` is no longer pending. Scope ids are unique
    /// within a run, so a scope that is not pending has already finished.
    pub async fn wait_scope(&self, scope: ScopeId) {
        let rx = {
            let mut state = self.state();
            if !state.pending.contains_key(&scope) {
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.entry(scope).or_default().push(tx);
            rx
        };
        let _ = rx.await;
    }

    pub async fn wait_root(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for ScopeTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic>".to_string())
}
