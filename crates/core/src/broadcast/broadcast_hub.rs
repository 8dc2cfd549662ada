use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::subscriber::{Subscriber, SubscriberId};

/// Outcome of one [`BroadcastHub::publish`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers that were too slow for this frame but stay joined.
    pub skipped: usize,
    /// Subscribers dropped because they closed or failed.
    pub removed: usize,
}

/// Fans encoded frames out to every joined subscriber.
///
/// Membership lives behind one mutex that is held only to copy or edit the
/// map. `publish` delivers to a snapshot taken at call time, so joins and
/// leaves from other sessions never observe a half-iterated set.
pub struct BroadcastHub {
    subscribers: Mutex<BTreeMap<SubscriberId, Arc<dyn Subscriber>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn join(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut members = self.members();
            members.insert(id, subscriber);
            members.len()
        };
        log::info!("Subscriber {id} joined ({count} connected)");
        id
    }

    /// Returns false when `id` was not joined; that is not an error.
    pub fn leave(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut members = self.members();
            let removed = members.remove(&id).is_some();
            (removed, members.len())
        };
        if removed {
            log::info!("Subscriber {id} left ({count} connected)");
        } else {
            log::debug!("Subscriber {id} already gone");
        }
        removed
    }

    pub fn publish(&self, frame: Arc<[u8]>) -> PublishReport {
        let snapshot: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .members()
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect();

        let mut report = PublishReport::default();
        let mut dead = Vec::new();
        for (id, subscriber) in snapshot {
            if !subscriber.is_open() {
                dead.push(id);
                continue;
            }
            match subscriber.deliver(&frame) {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_disconnect() => {
                    log::debug!("Dropping subscriber {id}: {e}");
                    dead.push(id);
                }
                Err(e) => {
                    log::debug!("Skipping frame for subscriber {id}: {e}");
                    report.skipped += 1;
                }
            }
        }

        if !dead.is_empty() {
            let mut members = self.members();
            for id in &dead {
                if members.remove(id).is_some() {
                    report.removed += 1;
                }
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.members().keys().copied().collect()
    }

    // Every critical section only inserts, removes or clones entries, so a
    // poisoned map is still consistent.
    fn members(&self) -> MutexGuard<'_, BTreeMap<SubscriberId, Arc<dyn Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
