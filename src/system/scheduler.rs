//! Cooperative tick scheduler.
//!
//! Drives the independent periodic activities (inertial sampling, frame
//! submission, fusion/state evaluation) off one shared clock. `due` is
//! non-blocking: it reports which tasks should run now and advances their
//! deadlines; no activity can block another.

/// Handle to a registered periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(usize);

struct PeriodicTask {
    name: &'static str,
    period_s: f64,
    next_due: f64,
}

/// Fixed-rate task registry over a shared clock.
pub struct TickScheduler {
    tasks: Vec<PeriodicTask>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Register a task running at `rate_hz`; first due immediately.
    pub fn add(&mut self, name: &'static str, rate_hz: f64, now: f64) -> TaskId {
        let period_s = 1.0 / rate_hz.max(f64::EPSILON);
        self.tasks.push(PeriodicTask {
            name,
            period_s,
            next_due: now,
        });
        TaskId(self.tasks.len() - 1)
    }

    /// Change a task's rate; takes effect from its next deadline.
    pub fn set_rate(&mut self, id: TaskId, rate_hz: f64) {
        let task = &mut self.tasks[id.0];
        let period_s = 1.0 / rate_hz.max(f64::EPSILON);
        if (task.period_s - period_s).abs() > f64::EPSILON {
            tracing::debug!(task = task.name, rate_hz, "rescheduling periodic task");
            task.period_s = period_s;
        }
    }

    /// All tasks due at `now`, in registration order.
    ///
    /// A task that missed several periods runs once and skips the backlog;
    /// the tick model has no value in replaying stale deadlines.
    pub fn due(&mut self, now: f64) -> Vec<TaskId> {
        let mut due = Vec::new();
        for (idx, task) in self.tasks.iter_mut().enumerate() {
            if now >= task.next_due {
                due.push(TaskId(idx));
                task.next_due = now + task.period_s;
            }
        }
        due
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}
