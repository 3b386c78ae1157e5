//! Pending-send bookkeeping.
//!
//! DESIGN
//! ======
//! Each pending send owns a `oneshot::Sender`. Every resolution path removes
//! the entry from the map under the lock and then fires it, so an ack racing a
//! timeout or a bulk reject can fire at most once: whichever path removes the
//! entry wins, the other finds nothing and is a no-op.
//!
//! Entries are kept in a `BTreeMap` so the cumulative rule ("an ack for N
//! fails everything ordered before N") is a single `split_off`.
//!
//! An ack id can be registered again once its entry resolved, so each entry
//! also carries a ticket unique to its registration. Timers that outlive an
//! entry compare tickets, not ids.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use frames::AckFailure;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{AckError, Acked, ClientError};

type AckResult<K> = Result<Acked<K>, AckError>;

struct Entry<K> {
    ticket: u64,
    tx: oneshot::Sender<AckResult<K>>,
}

/// Registry of sends awaiting acknowledgment.
pub struct AckRegistry<K> {
    pending: Mutex<BTreeMap<K, Entry<K>>>,
    next_ticket: AtomicU64,
}

impl<K> Default for AckRegistry<K> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }
}

impl<K> AckRegistry<K>
where
    K: Clone + Ord + fmt::Display,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending send and hand back its completion.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateAckId`] if `ack_id` is already pending.
    pub fn register(&self, ack_id: K) -> Result<AckFuture<K>, ClientError> {
        let mut pending = self.lock();
        if pending.contains_key(&ack_id) {
            return Err(ClientError::DuplicateAckId(ack_id.to_string()));
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        pending.insert(ack_id, Entry { ticket, tx });
        Ok(AckFuture { rx, ticket })
    }

    /// Apply a server ack for `ack_id`.
    ///
    /// Every pending entry ordered before `ack_id` is failed as
    /// [`AckError::Superseded`] first. The entry itself, if still pending,
    /// succeeds when `success` is set or the failure is a duplicate report.
    /// Returns whether an entry for `ack_id` was pending.
    pub fn acknowledge(&self, ack_id: &K, success: bool, error: Option<AckFailure>) -> bool {
        let (superseded, own) = {
            let mut pending = self.lock();
            let later = pending.split_off(ack_id);
            let superseded = std::mem::replace(&mut *pending, later);
            let own = pending.remove(ack_id);
            (superseded, own)
        };

        for (id, entry) in superseded {
            debug!(ack_id = %id, "registry: superseded by later ack");
            let _ = entry.tx.send(Err(AckError::Superseded));
        }

        let Some(entry) = own else {
            debug!(ack_id = %ack_id, "registry: ack for unknown id ignored");
            return false;
        };

        let duplicate = error.as_ref().is_some_and(AckFailure::is_duplicate);
        let outcome = if success || duplicate {
            Ok(Acked {
                ack_id: ack_id.clone(),
                duplicate,
            })
        } else {
            let failure = error.unwrap_or_else(|| AckFailure::new("Unknown", None));
            Err(AckError::Rejected {
                name: failure.name,
                message: failure.message,
            })
        };
        let _ = entry.tx.send(outcome);
        true
    }

    /// Fail one pending entry. Returns whether it was pending.
    pub fn fail(&self, ack_id: &K, error: AckError) -> bool {
        let removed = self.lock().remove(ack_id);
        match removed {
            Some(entry) => {
                let _ = entry.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every pending entry with `error`. Returns how many were failed.
    pub fn reject_all(&self, error: AckError) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    #[must_use]
    pub fn contains(&self, ack_id: &K) -> bool {
        self.lock().contains_key(ack_id)
    }

    /// Whether the registration identified by `ticket` is still pending
    /// under `ack_id`.
    #[must_use]
    pub fn is_pending(&self, ack_id: &K, ticket: u64) -> bool {
        self.lock()
            .get(ack_id)
            .is_some_and(|entry| entry.ticket == ticket)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<K, Entry<K>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Completion of one sent event.
///
/// Resolves exactly once: with the ack, or with the reason the send failed.
/// If the registry is dropped with the entry still pending it resolves to
/// [`AckError::Closed`].
#[must_use = "an ack future does nothing unless awaited"]
pub struct AckFuture<K> {
    rx: oneshot::Receiver<AckResult<K>>,
    ticket: u64,
}

impl<K> AckFuture<K> {
    /// Identifies this registration among all registrations of the same id.
    #[must_use]
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl<K> Future for AckFuture<K> {
    type Output = AckResult<K>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(AckError::Closed)))
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
