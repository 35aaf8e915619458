//! Admission control for channel capacity.
//!
//! One unit is reserved per buffered put and returned when that put rolls
//! back or when a take of the stored event commits. Rolling back a take
//! returns nothing: the event is still stored.

use spillway_core::{Error, Result};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counting semaphore over a channel's capacity
#[derive(Debug)]
pub struct CapacityController {
    channel: String,
    total: u64,
    available: Mutex<u64>,
    freed: Condvar,
}

impl CapacityController {
    /// Create a controller with `in_use` units already taken
    pub fn new(channel: impl Into<String>, total: u64, in_use: u64) -> Self {
        Self {
            channel: channel.into(),
            total,
            available: Mutex::new(total.saturating_sub(in_use)),
            freed: Condvar::new(),
        }
    }

    /// Reserve `n` units, waiting up to `timeout` for them to free up
    pub fn acquire(&self, n: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut available = self.available.lock().map_err(|_| Error::LockPoisoned)?;

        while *available < n {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::CapacityExceeded {
                    channel: self.channel.clone(),
                });
            }
            let (guard, _) = self
                .freed
                .wait_timeout(available, deadline - now)
                .map_err(|_| Error::LockPoisoned)?;
            available = guard;
        }

        *available -= n;
        Ok(())
    }

    /// Reserve `n` units if they are free right now
    pub fn try_acquire(&self, n: u64) -> Result<bool> {
        let mut available = self.available.lock().map_err(|_| Error::LockPoisoned)?;
        if *available < n {
            return Ok(false);
        }
        *available -= n;
        Ok(true)
    }

    /// Return `n` units
    pub fn release(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let mut available = self.available.lock().map_err(|_| Error::LockPoisoned)?;
        *available = (*available + n).min(self.total);
        drop(available);
        self.freed.notify_all();
        Ok(())
    }

    /// Units free right now
    pub fn available(&self) -> Result<u64> {
        Ok(*self.available.lock().map_err(|_| Error::LockPoisoned)?)
    }

    /// Configured capacity
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_and_release() {
        let capacity = CapacityController::new("c1", 3, 0);
        capacity.acquire(2, Duration::ZERO).unwrap();
        assert_eq!(capacity.available().unwrap(), 1);

        assert!(!capacity.try_acquire(2).unwrap());
        assert!(capacity.try_acquire(1).unwrap());

        capacity.release(3).unwrap();
        assert_eq!(capacity.available().unwrap(), 3);

        // never above the total
        capacity.release(10).unwrap();
        assert_eq!(capacity.available().unwrap(), 3);
    }

    #[test]
    fn test_timeout_names_channel() {
        let capacity = CapacityController::new("orders", 1, 1);
        let err = capacity.acquire(1, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.to_string(), "Cannot acquire capacity. [channel=orders]");
    }

    #[test]
    fn test_in_use_larger_than_total() {
        let capacity = CapacityController::new("c1", 2, 5);
        assert_eq!(capacity.available().unwrap(), 0);
        assert_eq!(capacity.total(), 2);
    }

    #[test]
    fn test_blocked_acquire_wakes_on_release() {
        let capacity = Arc::new(CapacityController::new("c1", 1, 1));

        let waiter = {
            let capacity = Arc::clone(&capacity);
            thread::spawn(move || capacity.acquire(1, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(50));
        capacity.release(1).unwrap();

        waiter.join().unwrap().expect("acquire should succeed after release");
        assert_eq!(capacity.available().unwrap(), 0);
    }
}
