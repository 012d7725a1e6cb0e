//! Bus counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of bus activity since creation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages handed to the transport
    pub published: u64,
    /// Publish attempts rejected by validation, serialization or transport
    pub publish_failures: u64,
    /// Inbound messages accepted by the listener
    pub delivered: u64,
    /// Responses with no matching pending waiter
    pub unmatched_responses: u64,
    /// Handler invocations that returned an error
    pub handler_failures: u64,
    /// Requests that got no response in time
    pub timeouts: u64,
    /// Inbound messages whose ttl had passed; they are still delivered
    pub expired: u64,
    /// Inbound frames that could not be decoded
    pub malformed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub delivered: AtomicU64,
    pub unmatched_responses: AtomicU64,
    pub handler_failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub expired: AtomicU64,
    pub malformed: AtomicU64,
}

impl StatsCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}
