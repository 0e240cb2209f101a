//! # Task Control Block
//!
//! Defines the task model: the per-slot TCB, the task state machine,
//! the scheduling classes, and the creation parameters.
//!
//! ## Scheduling classes
//!
//! - **Real-time** (`period > 0`): released once per period with a
//!   fresh job of `capacity` ticks that must finish within `deadline`
//!   ticks of the release. Scheduled by the real-time policy and
//!   subject to admission control.
//! - **Aperiodic** (`period == 0`, `capacity > 0`): a one-shot job
//!   executed by the polling server out of its capacity budget.
//! - **Best-effort** (`period == 0`, `capacity == 0`): scheduled by
//!   priority round-robin whenever no real-time work is ready.

use alloc::boxed::Box;
use heapless::String;

use crate::config::NAME_LEN;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///   ┌────────┐  spawn   ┌────────┐  dispatch  ┌─────────┐
///   │  Idle  │ ───────► │ Ready  │ ─────────► │ Running │
///   └────────┘          └────────┘            └─────────┘
///       ▲                 ▲    ▲    tick / yield    │
///       │ kill / exit     │    └───────────────────┘
///       │                 │ expiry / resume         │
///       │             ┌───┴─────┐   delay / block   ▼
///       └──────────── │ Delayed │ ◄───────── ┌─────────┐
///                     │ Blocked │            │ (self)  │
///                     └─────────┘            └─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Unused slot; the free marker of the TCB arena.
    Idle,
    /// Runnable, waiting in its class queue.
    Ready,
    /// Currently executing on the CPU.
    Running,
    /// Parked until `resume` is called (external event).
    Blocked,
    /// Sleeping a known number of ticks in the delay queue.
    Delayed,
}

/// Scheduling class, derived from the creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    RealTime,
    BestEffort,
    Aperiodic,
}

/// Task entry point. Returning from the entry function terminates the
/// task.
pub type TaskFn = extern "C" fn();

// ---------------------------------------------------------------------------
// Creation parameters
// ---------------------------------------------------------------------------

/// Static scheduling parameters of a task, set at spawn time.
///
/// Real-time tasks use `period`/`capacity`/`deadline` (ticks); the
/// priority field is meaningful only for best-effort tasks. Use the
/// constructors rather than filling the struct by hand.
#[derive(Debug, Clone, Copy)]
pub struct TaskParams {
    /// Release interval in ticks. Zero for non-real-time tasks.
    pub period: u32,
    /// Worst-case execution time per job, in ticks. For an aperiodic
    /// job this is its service demand on the polling server.
    pub capacity: u32,
    /// Relative deadline in ticks from each release; `deadline <= period`.
    pub deadline: u32,
    /// Base priority for best-effort scheduling, `0..=255`, higher is
    /// more important.
    pub priority: u8,
}

impl TaskParams {
    /// A hard real-time periodic task `(T, C, D)`.
    pub const fn periodic(period: u32, capacity: u32, deadline: u32) -> Self {
        Self {
            period,
            capacity,
            deadline,
            priority: 0,
        }
    }

    /// A best-effort task with the given round-robin weight.
    pub const fn best_effort(priority: u8) -> Self {
        Self {
            period: 0,
            capacity: 0,
            deadline: 0,
            priority,
        }
    }

    /// An aperiodic job with the given service demand, executed by the
    /// polling server.
    pub const fn aperiodic(capacity: u32) -> Self {
        Self {
            period: 0,
            capacity,
            deadline: 0,
            priority: 0,
        }
    }

    /// Scheduling class implied by these parameters.
    pub const fn class(&self) -> TaskClass {
        if self.period > 0 {
            TaskClass::RealTime
        } else if self.capacity > 0 {
            TaskClass::Aperiodic
        } else {
            TaskClass::BestEffort
        }
    }
}

// ---------------------------------------------------------------------------
// Saved execution context
// ---------------------------------------------------------------------------

/// Opaque saved execution context.
///
/// On the Cortex-M port this is the process stack pointer; the rest of
/// the context lives in the 16-word frame at that address (R4–R11
/// software-saved, then the R0–R3/R12/LR/PC/xPSR hardware frame). Only
/// the arch layer interprets it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub sp: usize,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// One slot of the TCB arena.
///
/// Slots are identified by index; `state == Idle` marks a free slot.
/// The stack is owned by the slot and released exactly when the task
/// transitions back to `Idle`.
pub struct Tcb {
    /// Slot index in the TCB arena.
    pub id: usize,
    /// Short human label.
    pub name: String<NAME_LEN>,
    /// Current execution state.
    pub state: TaskState,
    /// Static base priority (best-effort weight).
    pub priority: u8,
    /// Round-robin aging counter; refilled from `priority`.
    pub priority_rem: u8,
    /// Remaining sleep ticks while `Delayed`.
    pub delay: u32,
    /// Release interval in ticks; `> 0` iff real-time.
    pub period: u32,
    /// Worst-case execution time per job, in ticks.
    pub capacity: u32,
    /// Relative deadline per job, in ticks.
    pub deadline: u32,
    /// Ticks until the next release.
    pub period_rem: u32,
    /// Unexecuted ticks of the current job; zero when no job is in
    /// flight.
    pub capacity_rem: u32,
    /// Ticks until the current job's absolute deadline.
    pub deadline_rem: u32,
    /// Completed real-time jobs.
    pub rtjobs: u32,
    /// Best-effort dispatch passes granted to this task.
    pub bgjobs: u32,
    /// Jobs abandoned at their deadline.
    pub deadline_misses: u32,
    /// Entry point; `None` on a free slot.
    pub entry: Option<TaskFn>,
    /// Owned stack memory; `None` on a free slot.
    pub stack: Option<Box<[u8]>>,
    /// Saved execution context.
    pub context: Context,
    /// Policy-specific scratch word.
    pub other_data: usize,
}

impl Tcb {
    /// An empty slot, as left by `kill` or boot-time clearing.
    pub fn empty(id: usize) -> Self {
        Self {
            id,
            name: String::new(),
            state: TaskState::Idle,
            priority: 0,
            priority_rem: 0,
            delay: 0,
            period: 0,
            capacity: 0,
            deadline: 0,
            period_rem: 0,
            capacity_rem: 0,
            deadline_rem: 0,
            rtjobs: 0,
            bgjobs: 0,
            deadline_misses: 0,
            entry: None,
            stack: None,
            context: Context::default(),
            other_data: 0,
        }
    }

    /// Reset the slot to the free state, dropping the owned stack.
    pub fn clear(&mut self) {
        let id = self.id;
        *self = Tcb::empty(id);
    }

    /// Whether this slot holds a live task.
    #[inline]
    pub fn in_use(&self) -> bool {
        self.state != TaskState::Idle
    }

    /// Whether the task is real-time.
    #[inline]
    pub fn is_rt(&self) -> bool {
        self.period > 0
    }

    /// Scheduling class of the slot's task.
    pub fn class(&self) -> TaskClass {
        if self.period > 0 {
            TaskClass::RealTime
        } else if self.capacity > 0 {
            TaskClass::Aperiodic
        } else {
            TaskClass::BestEffort
        }
    }

    /// Whether a real-time job is in flight (released and not yet
    /// finished or abandoned).
    #[inline]
    pub fn job_active(&self) -> bool {
        self.is_rt() && self.capacity_rem > 0
    }

    /// Release a new job: refill the per-job remainders and restart the
    /// period countdown.
    pub fn release_job(&mut self) {
        self.capacity_rem = self.capacity;
        self.deadline_rem = self.deadline;
        self.period_rem = self.period;
    }

    /// Populate the slot for a new task. The caller provides the
    /// already-allocated stack and prepared context.
    pub fn init(
        &mut self,
        id: usize,
        label: &str,
        params: TaskParams,
        entry: TaskFn,
        stack: Box<[u8]>,
        context: Context,
    ) {
        self.clear();
        self.id = id;
        for c in label.chars() {
            if self.name.push(c).is_err() {
                break;
            }
        }
        self.state = TaskState::Ready;
        self.priority = params.priority;
        self.priority_rem = params.priority;
        self.period = params.period;
        self.capacity = params.capacity;
        self.deadline = params.deadline;
        self.entry = Some(entry);
        self.stack = Some(stack);
        self.context = context;
        if self.is_rt() {
            self.release_job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    extern "C" fn nop_entry() {}

    fn stack() -> Box<[u8]> {
        vec![0u8; 256].into_boxed_slice()
    }

    #[test]
    fn test_class_derivation() {
        assert_eq!(TaskParams::periodic(10, 2, 10).class(), TaskClass::RealTime);
        assert_eq!(TaskParams::best_effort(7).class(), TaskClass::BestEffort);
        assert_eq!(TaskParams::aperiodic(5).class(), TaskClass::Aperiodic);
    }

    #[test]
    fn test_init_releases_first_rt_job() {
        let mut t = Tcb::empty(3);
        t.init(3, "sensor", TaskParams::periodic(10, 2, 8), nop_entry, stack(), Context::default());
        assert_eq!(t.state, TaskState::Ready);
        assert!(t.is_rt());
        assert_eq!(t.capacity_rem, 2);
        assert_eq!(t.deadline_rem, 8);
        assert_eq!(t.period_rem, 10);
        assert!(t.job_active());
        assert_eq!(t.name.as_str(), "sensor");
    }

    #[test]
    fn test_best_effort_has_no_job() {
        let mut t = Tcb::empty(1);
        t.init(1, "shell", TaskParams::best_effort(20), nop_entry, stack(), Context::default());
        assert!(!t.is_rt());
        assert!(!t.job_active());
        assert_eq!(t.priority_rem, 20);
    }

    #[test]
    fn test_clear_frees_stack_and_resets() {
        let mut t = Tcb::empty(2);
        t.init(2, "x", TaskParams::best_effort(1), nop_entry, stack(), Context::default());
        assert!(t.stack.is_some());
        t.clear();
        assert_eq!(t.state, TaskState::Idle);
        assert!(t.stack.is_none());
        assert!(t.entry.is_none());
        assert_eq!(t.id, 2);
    }

    #[test]
    fn test_name_truncation() {
        let mut t = Tcb::empty(0);
        let long = "a-task-name-well-beyond-the-thirty-two-byte-limit";
        t.init(0, long, TaskParams::best_effort(0), nop_entry, stack(), Context::default());
        assert_eq!(t.name.len(), NAME_LEN);
    }
}
