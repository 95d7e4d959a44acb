use crate::store::SnapshotStore;
use std::time::Duration;

/// Liveness gate: healthy while the last snapshot is younger than `max_age`.
#[derive(Debug, Clone)]
pub struct Health {
    store: SnapshotStore,
    max_age: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Healthy,
    /// The last snapshot is older than allowed.
    Stale(Duration),
    /// Nothing has been published yet.
    NoSnapshot,
}

impl Health {
    pub fn new(store: SnapshotStore, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    pub fn check(&self) -> Status {
        match self.store.age() {
            None => Status::NoSnapshot,
            Some(age) if age < self.max_age => Status::Healthy,
            Some(age) => Status::Stale(age),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.check() == Status::Healthy
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Snapshot;

    #[tokio::test(start_paused = true)]
    async fn goes_stale_after_max_age() {
        let store = SnapshotStore::new();
        let health = Health::new(store.clone(), Duration::from_secs(600));
        assert_eq!(health.check(), Status::NoSnapshot);

        store.publish(Snapshot::empty());
        assert!(health.is_healthy());

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(health.is_healthy());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(health.check(), Status::Stale(_)));

        store.publish(Snapshot::empty());
        assert!(health.is_healthy());
    }
}
