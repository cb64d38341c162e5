use crate::geometry::DimensionKey;
use crate::portal::PortalId;
use cgmath::Point3;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Host-side handle to a participant or other movable entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef(pub u64);

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RelocationError {
    #[error("entity {0:?} no longer exists")]
    EntityGone(EntityRef),
    #[error("host rejected relocation: {0}")]
    Rejected(String),
}

/// A teleport that has been decided but not yet carried out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeleportRequest {
    pub traveler: EntityRef,
    pub source: PortalId,
    pub destination: PortalId,
    /// Tick during which the triggering interaction happened.
    pub raised_tick: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TeleportOutcome {
    Relocated {
        dimension: DimensionKey,
        position: Point3<f64>,
    },
    /// The destination portal was removed between enqueue and flush.
    DestinationMissing,
    RelocationFailed(RelocationError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppliedTeleport {
    pub request: TeleportRequest,
    pub applied_tick: u64,
    pub outcome: TeleportOutcome,
}

impl AppliedTeleport {
    pub fn relocated(&self) -> bool {
        matches!(self.outcome, TeleportOutcome::Relocated { .. })
    }
}

/// Append-only buffer of pending teleports, drained once per tick by [`TeleportQueue::flush`].
#[derive(Debug, Default)]
pub struct TeleportQueue {
    pending: Mutex<Vec<TeleportRequest>>,
    flushing: AtomicBool,
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TeleportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, request: TeleportRequest) {
        log::debug!(
            "[teleport-queue] enqueue traveler={:?} source={} destination={} tick={}",
            request.traveler,
            request.source,
            request.destination,
            request.raised_tick
        );
        self.pending.lock().push(request);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drops every pending request without applying it. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut *self.pending.lock()).len();
        if dropped > 0 {
            log::warn!("[teleport-queue] dropped {dropped} pending teleports");
        }
        dropped
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Takes every pending request and hands each to `apply` in insertion order.
    ///
    /// Requests enqueued while `apply` runs belong to the next flush. A nested call made
    /// from inside `apply` does nothing.
    pub fn flush<F>(&self, tick: u64, mut apply: F) -> Vec<AppliedTeleport>
    where
        F: FnMut(&TeleportRequest) -> TeleportOutcome,
    {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("[teleport-queue] nested flush at tick {tick} ignored");
            return Vec::new();
        }
        let _guard = FlushGuard(&self.flushing);

        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Vec::new();
        }
        let mut applied = Vec::with_capacity(batch.len());
        for request in batch {
            let outcome = apply(&request);
            match &outcome {
                TeleportOutcome::Relocated {
                    dimension,
                    position,
                } => log::info!(
                    "[teleport-queue] relocated traveler={:?} to {} ({:.1}, {:.1}, {:.1})",
                    request.traveler,
                    dimension,
                    position.x,
                    position.y,
                    position.z
                ),
                TeleportOutcome::DestinationMissing => log::warn!(
                    "[teleport-queue] destination {} vanished; traveler={:?} stays put",
                    request.destination,
                    request.traveler
                ),
                TeleportOutcome::RelocationFailed(error) => log::warn!(
                    "[teleport-queue] relocation of traveler={:?} failed: {}",
                    request.traveler,
                    error
                ),
            }
            applied.push(AppliedTeleport {
                request,
                applied_tick: tick,
                outcome,
            });
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(traveler: u64, tick: u64) -> TeleportRequest {
        TeleportRequest {
            traveler: EntityRef(traveler),
            source: PortalId::new_v4(),
            destination: PortalId::new_v4(),
            raised_tick: tick,
        }
    }

    fn relocated() -> TeleportOutcome {
        TeleportOutcome::Relocated {
            dimension: DimensionKey::from("aether"),
            position: Point3::new(0.5, 64.0, 0.5),
        }
    }

    #[test]
    fn flush_applies_in_insertion_order_and_clears() {
        let queue = TeleportQueue::new();
        for (traveler, tick) in [(1, 4), (2, 4), (1, 4), (3, 4)] {
            queue.enqueue(request(traveler, tick));
        }
        let mut seen = Vec::new();
        let applied = queue.flush(4, |request| {
            seen.push(request.traveler.0);
            relocated()
        });
        assert_eq!(seen, vec![1, 2, 1, 3]);
        assert_eq!(applied.len(), 4);
        assert!(applied.iter().all(|entry| entry.applied_tick == 4 && entry.relocated()));
        assert_eq!(queue.pending_len(), 0);
        assert!(queue.flush(5, |_| relocated()).is_empty());
    }

    #[test]
    fn requests_enqueued_during_flush_wait_for_next_tick() {
        let queue = TeleportQueue::new();
        queue.enqueue(request(1, 10));
        let applied = queue.flush(10, |_| {
            queue.enqueue(request(2, 10));
            relocated()
        });
        assert_eq!(applied.len(), 1);
        assert_eq!(queue.pending_len(), 1);

        let next = queue.flush(11, |_| relocated());
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].request.traveler, EntityRef(2));
        assert_eq!(next[0].applied_tick, 11);
    }

    #[test]
    fn nested_flush_is_ignored() {
        let queue = TeleportQueue::new();
        queue.enqueue(request(1, 0));
        queue.enqueue(request(2, 0));
        let mut nested_results = Vec::new();
        let applied = queue.flush(0, |_| {
            nested_results.push(queue.flush(0, |_| relocated()).len());
            relocated()
        });
        assert_eq!(applied.len(), 2);
        assert_eq!(nested_results, vec![0, 0]);
        assert!(!queue.is_flushing());
    }

    #[test]
    fn failed_outcomes_are_reported_not_retried() {
        let queue = TeleportQueue::new();
        queue.enqueue(request(9, 2));
        let applied = queue.flush(2, |request| {
            TeleportOutcome::RelocationFailed(RelocationError::EntityGone(request.traveler))
        });
        assert_eq!(applied.len(), 1);
        assert!(!applied[0].relocated());
        assert_eq!(queue.pending_len(), 0);
    }
}
