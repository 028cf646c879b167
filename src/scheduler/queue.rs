use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{BoostConfig, OrderingPolicy};
use crate::error::{ResourceError, Result};
use crate::scheduler::job::JobSpec;

/// A pending job together with its arrival bookkeeping.
///
/// Requeueing hands the same entry back, so the arrival sequence and enqueue
/// time survive scheduling retries and the FIFO boost keeps aging.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub spec: JobSpec,
    pub enqueued_at: DateTime<Utc>,
    seq: u64,
}

/// Ordered, thread-safe holding area for submitted-but-undispatched jobs.
///
/// `add` never blocks: under a configured bound an over-full queue signals
/// backpressure with a queue-full error instead of dropping the job. The
/// pending set is resorted at each `next` call, so effective priorities are
/// recomputed lazily against the injected clock.
pub struct JobQueue {
    pending: Mutex<Vec<QueuedJob>>,
    notify: Notify,
    ordering: OrderingPolicy,
    bound: Option<usize>,
    clock: Arc<dyn Clock>,
    next_seq: AtomicU64,
}

impl JobQueue {
    pub fn new(ordering: OrderingPolicy, bound: Option<usize>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            notify: Notify::new(),
            ordering,
            bound,
            clock,
            next_seq: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedJob>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a newly submitted job. Signals the dispatch loop.
    pub fn add(&self, spec: JobSpec) -> Result<()> {
        {
            let mut pending = self.lock();
            if let Some(bound) = self.bound {
                if pending.len() >= bound {
                    return Err(ResourceError::QueueFull(spec.job.queue_name.clone()));
                }
            }
            pending.push(QueuedJob {
                spec,
                enqueued_at: self.clock.now(),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Put a dequeued entry back, preserving its arrival bookkeeping.
    ///
    /// Used when no node currently has headroom. Does not signal the loop;
    /// the periodic dispatch tick retries, which avoids a busy spin on a
    /// saturated pool. The bound is not enforced here: the entry was already
    /// admitted once.
    pub fn requeue(&self, entry: QueuedJob) {
        self.lock().push(entry);
    }

    /// Remove and return the next job per the ordering policy.
    pub fn next(&self) -> Option<QueuedJob> {
        let mut pending = self.lock();
        let best = self.best_index(&pending)?;
        Some(pending.remove(best))
    }

    /// The next job per the ordering policy, without removing it.
    pub fn peek(&self) -> Option<JobSpec> {
        let pending = self.lock();
        let best = self.best_index(&pending)?;
        Some(pending[best].spec.clone())
    }

    /// Remove a not-yet-dispatched job by id (cancellation path).
    pub fn remove(&self, job_id: Uuid) -> Option<QueuedJob> {
        let mut pending = self.lock();
        let idx = pending.iter().position(|e| e.spec.job.id == job_id)?;
        Some(pending.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Suspend until a job has (probably) been enqueued. A stored permit
    /// means an `add` that raced with the last drain is not missed.
    pub async fn wait_for_job(&self) {
        self.notify.notified().await;
    }

    fn best_index(&self, pending: &[QueuedJob]) -> Option<usize> {
        if pending.is_empty() {
            return None;
        }
        let now = self.clock.now();
        pending
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| {
                // Max effective priority, then earliest arrival.
                (
                    std::cmp::Reverse(self.effective_priority(e, now)),
                    e.seq,
                )
            })
            .map(|(idx, _)| idx)
    }

    fn effective_priority(&self, entry: &QueuedJob, now: DateTime<Utc>) -> i64 {
        match &self.ordering {
            OrderingPolicy::Fifo => 0,
            OrderingPolicy::PriorityBoost(boost) => boosted_priority(
                entry.spec.job.priority,
                (now - entry.enqueued_at).num_seconds().max(0) as u64,
                boost,
            ),
        }
    }
}

/// `min(cap, base + (wait_secs / secs_between_boosts) * boost_amount)`.
fn boosted_priority(base: i64, wait_secs: u64, boost: &BoostConfig) -> i64 {
    let intervals = if boost.secs_between_boosts == 0 {
        0
    } else {
        (wait_secs / boost.secs_between_boosts) as i64
    };
    let boosted = base.saturating_add(intervals.saturating_mul(boost.boost_amount));
    boosted.min(boost.priority_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::scheduler::job::Job;

    fn spec(name: &str, priority: i64) -> JobSpec {
        JobSpec::new(
            Job::new(name, "noop", "q1", 1).with_priority(priority),
            serde_json::Value::Null,
        )
    }

    fn fifo_queue() -> JobQueue {
        JobQueue::new(OrderingPolicy::Fifo, None, Arc::new(SystemClock))
    }

    #[test]
    fn fifo_order_ignores_priority() {
        let queue = fifo_queue();
        queue.add(spec("first", 0)).unwrap();
        queue.add(spec("second", 100)).unwrap();

        assert_eq!(queue.next().unwrap().spec.job.name, "first");
        assert_eq!(queue.next().unwrap().spec.job.name, "second");
        assert!(queue.next().is_none());
    }

    #[test]
    fn priority_order_breaks_ties_by_arrival() {
        let queue = JobQueue::new(
            OrderingPolicy::PriorityBoost(BoostConfig {
                boost_amount: 0,
                secs_between_boosts: 10,
                priority_cap: 100,
            }),
            None,
            Arc::new(SystemClock),
        );
        queue.add(spec("low", 1)).unwrap();
        queue.add(spec("high-a", 5)).unwrap();
        queue.add(spec("high-b", 5)).unwrap();

        assert_eq!(queue.next().unwrap().spec.job.name, "high-a");
        assert_eq!(queue.next().unwrap().spec.job.name, "high-b");
        assert_eq!(queue.next().unwrap().spec.job.name, "low");
    }

    #[test]
    fn bound_signals_queue_full() {
        let queue = JobQueue::new(OrderingPolicy::Fifo, Some(2), Arc::new(SystemClock));
        queue.add(spec("a", 0)).unwrap();
        queue.add(spec("b", 0)).unwrap();
        assert!(matches!(
            queue.add(spec("c", 0)),
            Err(ResourceError::QueueFull(_))
        ));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn requeue_bypasses_bound() {
        let queue = JobQueue::new(OrderingPolicy::Fifo, Some(1), Arc::new(SystemClock));
        queue.add(spec("a", 0)).unwrap();
        let entry = queue.next().unwrap();
        queue.add(spec("b", 0)).unwrap();
        queue.requeue(entry);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn remove_by_id() {
        let queue = fifo_queue();
        let victim = spec("victim", 0);
        let victim_id = victim.job.id;
        queue.add(spec("a", 0)).unwrap();
        queue.add(victim).unwrap();

        assert!(queue.remove(victim_id).is_some());
        assert!(queue.remove(victim_id).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn peek_does_not_remove() {
        let queue = fifo_queue();
        queue.add(spec("a", 0)).unwrap();
        assert_eq!(queue.peek().unwrap().job.name, "a");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn boost_formula() {
        let boost = BoostConfig {
            boost_amount: 1,
            secs_between_boosts: 10,
            priority_cap: 5,
        };
        assert_eq!(boosted_priority(0, 0, &boost), 0);
        assert_eq!(boosted_priority(0, 9, &boost), 0);
        assert_eq!(boosted_priority(0, 10, &boost), 1);
        assert_eq!(boosted_priority(0, 50, &boost), 5);
        // Capped.
        assert_eq!(boosted_priority(0, 500, &boost), 5);
        assert_eq!(boosted_priority(4, 30, &boost), 5);
    }

    #[tokio::test]
    async fn wait_for_job_sees_prior_add() {
        let queue = fifo_queue();
        queue.add(spec("a", 0)).unwrap();
        // The permit stored by add() must satisfy a later waiter.
        tokio::time::timeout(std::time::Duration::from_secs(1), queue.wait_for_job())
            .await
            .expect("waiter should have been woken by the stored permit");
    }
}
