use std::time::Duration;

/// Priority-aging parameters for the FIFO boost.
///
/// A pending job's effective priority grows linearly with wait time:
/// `effective = min(cap, base + (wait_secs / secs_between_boosts) * boost_amount)`.
/// This prevents starvation of low-priority jobs behind a steady stream of
/// high-priority arrivals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoostConfig {
    /// Priority added per boost interval.
    pub boost_amount: i64,
    /// Seconds a job must wait to earn one boost increment.
    pub secs_between_boosts: u64,
    /// Upper bound on effective priority.
    pub priority_cap: i64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            boost_amount: 1,
            secs_between_boosts: 10,
            priority_cap: 5,
        }
    }
}

/// How the job queue orders pending jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Strict arrival order.
    Fifo,
    /// Base priority descending, aged by the FIFO boost, ties by arrival.
    PriorityBoost(BoostConfig),
}

impl Default for OrderingPolicy {
    fn default() -> Self {
        OrderingPolicy::Fifo
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between periodic dispatch retries and the running-job reaper.
    /// Dispatch is otherwise event-driven (enqueue and completion wakeups).
    pub dispatch_interval: Duration,
    /// Default wall-clock limit for jobs in the Running state. `None` means
    /// unlimited. A job's own `max_run_secs` takes precedence.
    pub default_max_run_secs: Option<u64>,
    /// How long to wait after a kill request before forcibly releasing the
    /// job's reserved load and marking it failed. A load leak is worse than
    /// an inaccurate status.
    pub kill_grace: Duration,
    /// Upper bound on pending jobs. Submissions beyond the bound are
    /// rejected with a queue-full error. `None` means unbounded.
    pub queue_bound: Option<usize>,
    /// Pending-job ordering policy.
    pub ordering: OrderingPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_millis(500),
            default_max_run_secs: None,
            kill_grace: Duration::from_secs(30),
            queue_bound: Some(10_000),
            ordering: OrderingPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_default_max_run_secs(mut self, secs: u64) -> Self {
        self.default_max_run_secs = Some(secs);
        self
    }

    pub fn with_queue_bound(mut self, bound: Option<usize>) -> Self {
        self.queue_bound = bound;
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }
}
