use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Per-card exclusive access.
///
/// The timer tick only ever calls [`try_enter`](Self::try_enter) and skips
/// its turn when the card is held; it never blocks. File operations call
/// [`enter`](Self::enter), which sleep-retries until a deadline.
pub struct ExclusiveAccess<T> {
    inner: Mutex<T>,
}

impl<T> ExclusiveAccess<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn try_enter(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn enter(&self, patience: Duration) -> Result<MutexGuard<'_, T>> {
        let deadline = Instant::now() + patience;
        loop {
            if let Some(guard) = self.try_enter() {
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                return Err(Error::Busy);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn try_enter_does_not_block_while_held() {
        let access = ExclusiveAccess::new(0u32);
        let held = access.try_enter().unwrap();
        assert!(access.try_enter().is_none());
        drop(held);
        assert!(access.try_enter().is_some());
    }

    #[test]
    fn enter_gives_up_with_busy() {
        let access = ExclusiveAccess::new(());
        let _held = access.try_enter().unwrap();
        let result = access.enter(Duration::from_millis(5));
        assert!(matches!(result, Err(Error::Busy)));
    }

    #[test]
    fn enter_waits_for_release() {
        let access = Arc::new(ExclusiveAccess::new(1u32));
        let held = access.try_enter().unwrap();

        let waiter = thread::spawn({
            let access = access.clone();
            move || *access.enter(Duration::from_secs(5)).unwrap() + 1
        });

        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap(), 2);
    }
}
