use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
enum OneShotInner<T> {
    Pending,
    Complete(T),
    Finalized,
}

impl<T> OneShotInner<T> {
    fn complete(&mut self, val: T) {
        use OneShotInner::*;
        match self {
            Finalized => panic!("invalid state can not call complete on finalized one shot."),
            Complete(..) => panic!("invalid state can not call complete more than once."),
            Pending => *self = Complete(val),
        };
    }

    fn take(&mut self) -> Option<T> {
        use OneShotInner::*;
        match std::mem::replace(self, Finalized) {
            Complete(val) => Some(val),
            prev => {
                *self = prev;
                None
            }
        }
    }
}

/// A single use result slot shared between an in flight operation, which completes it from the
/// driver, and the token that polls it. The value can be taken exactly once.
#[derive(Debug)]
pub struct OneShot<T> {
    inner: Arc<Mutex<OneShotInner<T>>>,
}

impl<T> OneShot<T> {
    pub fn new() -> OneShot<T> {
        OneShot {
            inner: Arc::new(Mutex::new(OneShotInner::Pending)),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, OneShotInner<T>> {
        self.inner
            .lock()
            .expect("failed to lock oneshot result: poisoned")
    }

    pub fn complete(&self, val: T) {
        self.lock_inner().complete(val);
    }

    pub fn take(&self) -> Option<T> {
        self.lock_inner().take()
    }

    /// True once a value was delivered, whether or not it has been taken since.
    pub fn is_complete(&self) -> bool {
        !matches!(*self.lock_inner(), OneShotInner::Pending)
    }
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        OneShot::new()
    }
}

impl<T> Clone for OneShot<T> {
    fn clone(&self) -> Self {
        OneShot {
            inner: self.inner.clone(),
        }
    }
}
