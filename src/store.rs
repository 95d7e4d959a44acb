use crate::types::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;

/// A snapshot together with when it was published.
#[derive(Debug)]
pub struct Published {
    pub snapshot: Arc<Snapshot>,
    pub published_at: OffsetDateTime,
    at: Instant,
}

impl Published {
    pub fn age(&self) -> Duration {
        self.at.elapsed()
    }
}

/// Holds the most recent snapshot.
///
/// Publication swaps in a new `Arc`; readers clone the current one and never
/// hold a lock across their own work, so a scrape can't stall the next cycle.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Option<Arc<Published>>>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Atomically replace the current snapshot.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Published> {
        let published = Arc::new(Published {
            snapshot: Arc::new(snapshot),
            published_at: OffsetDateTime::now_utc(),
            at: Instant::now(),
        });
        self.tx.send_replace(Some(published.clone()));
        published
    }

    /// The last published snapshot, or `None` before the first cycle completes.
    pub fn current(&self) -> Option<Arc<Published>> {
        self.tx.borrow().clone()
    }

    /// Time since the last publication. `None` means nothing has been published yet.
    pub fn age(&self) -> Option<Duration> {
        self.current().map(|p| p.age())
    }

    /// Receiver notified on every publication.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Published>>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StateCounts;

    fn snap(open: u64) -> Snapshot {
        Snapshot {
            counts: StateCounts {
                open,
                ..Default::default()
            },
            ..Snapshot::empty()
        }
    }

    #[test]
    fn empty_store_has_no_age() {
        let store = SnapshotStore::new();
        assert!(store.current().is_none());
        assert!(store.age().is_none());
    }

    #[tokio::test]
    async fn publish_replaces_and_old_readers_keep_their_copy() {
        let store = SnapshotStore::new();
        store.publish(snap(1));
        let held = store.current().unwrap();
        assert_eq!(held.snapshot.counts.open, 1);

        store.publish(snap(7));
        assert_eq!(held.snapshot.counts.open, 1);
        assert_eq!(store.current().unwrap().snapshot.counts.open, 7);
    }

    #[tokio::test]
    async fn subscribers_see_publication() {
        let store = SnapshotStore::new();
        let mut rx = store.subscribe();
        store.publish(snap(2));
        rx.changed().await.unwrap();
        let seen = rx.borrow().clone().unwrap();
        assert_eq!(seen.snapshot.counts.open, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn age_tracks_elapsed_time() {
        let store = SnapshotStore::new();
        store.publish(snap(0));
        assert!(store.age().unwrap() < Duration::from_millis(1));

        tokio::time::advance(Duration::from_secs(30)).await;
        let age = store.age().unwrap();
        assert!(age >= Duration::from_secs(30) && age < Duration::from_secs(31));
    }
}
