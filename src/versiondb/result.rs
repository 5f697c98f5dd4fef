//! Completion slots for asynchronous handler and log calls
//!
//! The caller keeps one `HandlerResult` per outstanding call and polls it on
//! later scheduler ticks; the callee keeps a clone and completes it from
//! whatever thread finishes the work.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

const PENDING: u8 = 0;
const READY: u8 = 1;
const FAILED: u8 = 2;

struct Completion<T> {
    state: AtomicU8,
    value: Mutex<Option<T>>,
    error: Mutex<Option<String>>,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            value: Mutex::new(None),
            error: Mutex::new(None),
        }
    }
}

/// Shared completion handle: pending, then either finished with a value or failed
pub struct HandlerResult<T> {
    inner: Arc<Completion<T>>,
}

impl<T> Clone for HandlerResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for HandlerResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandlerResult<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Completion::new()),
        }
    }

    /// Make the slot pending again. Reuses the allocation unless a callee from
    /// an earlier call still holds a clone.
    pub fn reset(&mut self) {
        match Arc::get_mut(&mut self.inner) {
            Some(completion) => {
                *completion.state.get_mut() = PENDING;
                *completion
                    .value
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner) = None;
                *completion
                    .error
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner) = None;
            }
            None => self.inner = Arc::new(Completion::new()),
        }
    }

    pub fn complete(&self, value: T) {
        *self
            .inner
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(value);
        self.inner.state.store(READY, Ordering::Release);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        *self
            .inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
        self.inner.state.store(FAILED, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != PENDING
    }

    pub fn is_error(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FAILED
    }

    /// Move the value out. `None` while pending, after a failure, or once taken.
    pub fn take(&self) -> Option<T> {
        if self.inner.state.load(Ordering::Acquire) != READY {
            return None;
        }
        self.inner
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T: Clone> HandlerResult<T> {
    pub fn get(&self) -> Option<T> {
        if self.inner.state.load(Ordering::Acquire) != READY {
            return None;
        }
        self.inner
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
