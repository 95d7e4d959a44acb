use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Upper bound on the limiter capacity, as a guard against fd exhaustion.
pub const MAX_CONCURRENCY: usize = 16_384;

/// Counting gate bounding how many probes are in flight at once.
#[derive(Debug, Clone)]
pub struct Limiter {
    sem: Arc<Semaphore>,
    capacity: usize,
}

/// A held limiter slot. The slot is freed when the permit is dropped.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CONCURRENCY);
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Permit> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::LimiterClosed)?;
        Ok(Permit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(Limiter::new(0).capacity(), 1);
        assert_eq!(Limiter::new(usize::MAX).capacity(), MAX_CONCURRENCY);
    }

    #[tokio::test]
    async fn blocks_when_full_and_resumes_on_release() {
        let limiter = Limiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 2);

        let third = time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(third.is_err(), "third acquire should wait");

        drop(a);
        let third = time::timeout(Duration::from_millis(200), limiter.acquire()).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn release_on_panicking_task() {
        let limiter = Limiter::new(1);
        let l = limiter.clone();
        let handle = tokio::spawn(async move {
            let _permit = l.acquire().await.unwrap();
            panic!("probe blew up");
        });
        assert!(handle.await.is_err());
        assert_eq!(limiter.available(), 1);
    }
}
