//! # Dispatcher
//!
//! The kernel state machine driven by the timer tick. All scheduler
//! state lives in one [`Kernel`] value (TCB arena, PCB, the four
//! queues, the polling-server bookkeeping) so the tick path mutates a
//! single well-marked place and the whole machine is testable on the
//! host as a logical simulation.
//!
//! ## Tick path
//!
//! Every tick runs with interrupts disabled, split in the port layer's
//! two halves:
//!
//! 1. [`Kernel::tick`] — accounting: delay sweep, execution charge for
//!    the current real-time job, deadline countdown and miss detection,
//!    period countdown and job release. Returns whether selection
//!    should run (`false` while the scheduler is locked).
//! 2. [`Kernel::pick_next`] — selection and state flips: park the
//!    preempted task by class, then pick in strict order: the real-time
//!    policy if the RT queue is non-empty, the polling server's
//!    in-flight aperiodic job, the best-effort policy, the idle task.
//!    The context switch itself is the port layer's business.
//!
//! A tick marks the end of one `TIME_SLICE` of execution by the current
//! task. Charging precedes the deadline countdown, which precedes
//! release, so a job finishing on its deadline tick is not a miss and a
//! job unfinished at its deadline is abandoned, counted, and re-released
//! at the next period boundary.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem::size_of;

use crate::config::{MAX_TASKS, TIME_SLICE};
use crate::errors::KernelError;
use crate::fault::{self, Fault};
use crate::policy::{self, BePolicy, RtPolicy};
use crate::queue::Queue;
use crate::task::{Context, TaskClass, TaskFn, TaskParams, TaskState, Tcb};

/// Slot reserved for the idle task.
pub const IDLE_TASK: usize = 0;

/// Words in a prepared context frame: eight software-saved registers
/// below the eight-word hardware return frame.
const FRAME_WORDS: usize = 16;

/// Smallest stack a task may be spawned with.
pub const MIN_STACK_SIZE: usize = FRAME_WORDS * size_of::<usize>() + 8;

// ---------------------------------------------------------------------------
// Process control block
// ---------------------------------------------------------------------------

/// Singleton processor bookkeeping: active policies and global
/// counters.
pub struct Pcb {
    /// Real-time class policy.
    pub sched_rt: RtPolicy,
    /// Best-effort class policy.
    pub sched_be: BePolicy,
    /// Context switches requested by the running task (yield, delay,
    /// exit, self-kill, server handoff).
    pub coop_switches: u32,
    /// Context switches forced by the tick handler.
    pub preempt_switches: u32,
    /// Timer interrupts taken.
    pub interrupts: u32,
    /// Microseconds of tick time elapsed.
    pub tick_time_us: u64,
}

impl Pcb {
    pub const fn new() -> Self {
        Self {
            sched_rt: RtPolicy::RateMonotonic,
            sched_be: BePolicy::PriorityRoundRobin,
            coop_switches: 0,
            preempt_switches: 0,
            interrupts: 0,
            tick_time_us: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Polling-server handshake
// ---------------------------------------------------------------------------

/// Decision handed to the polling-server task by [`Kernel::server_plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    /// Transfer control to this freshly charged job.
    Run(usize),
    /// Re-enter a job that was preempted mid-dispatch; already paid for.
    Resume(usize),
    /// Nothing serviceable: give up the rest of the budget until the
    /// next release.
    Yield,
}

// ---------------------------------------------------------------------------
// Kernel state
// ---------------------------------------------------------------------------

/// The consolidated kernel state. One instance per core; created by
/// `kernel::init` and mutated only from the tick ISR or from task
/// context with interrupts disabled.
pub struct Kernel {
    /// TCB arena, indexed by slot id.
    pub tcbs: [Tcb; MAX_TASKS],
    /// Processor bookkeeping.
    pub pcb: Pcb,
    /// Ready best-effort tasks; the running best-effort task stays at
    /// the head for quantum extension.
    pub run_queue: Queue,
    /// Sleeping tasks.
    pub delay_queue: Queue,
    /// Ready real-time tasks with an unfinished job.
    pub rt_queue: Queue,
    /// Aperiodic jobs awaiting the polling server.
    pub aperiodic_queue: Queue,
    /// Slot of the task owning the CPU.
    pub current: usize,
    /// Tick handler accounts but never switches while set.
    pub sched_lock: bool,
    /// Polling server slot, once spawned.
    pub server: Option<usize>,
    /// Remaining aperiodic budget in the server's current period.
    pub server_fuel: u32,
    /// Aperiodic job currently executing on the server's budget.
    pub server_job: Option<usize>,
    /// The next switch was requested by the running task.
    coop_pending: bool,
    /// Direct handoff target overriding policy selection once.
    forced_next: Option<usize>,
    /// Stack of a task that terminated itself; released on the next
    /// allocator call from task context, never from the ISR.
    graveyard: Option<Box<[u8]>>,
}

impl Kernel {
    /// Fresh kernel state with empty queues and a cleared arena.
    pub fn new() -> Result<Self, KernelError> {
        Ok(Self {
            tcbs: core::array::from_fn(Tcb::empty),
            pcb: Pcb::new(),
            run_queue: Queue::new(MAX_TASKS)?,
            delay_queue: Queue::new(MAX_TASKS)?,
            rt_queue: Queue::new(MAX_TASKS)?,
            aperiodic_queue: Queue::new(MAX_TASKS)?,
            current: IDLE_TASK,
            sched_lock: true,
            server: None,
            server_fuel: 0,
            server_job: None,
            coop_pending: false,
            forced_next: None,
            graveyard: None,
        })
    }

    /// Select the real-time policy. Takes effect at the next selection;
    /// meant to be called before real-time tasks are admitted, since
    /// the admission bound is policy-specific.
    pub fn set_rt_policy(&mut self, policy: RtPolicy) {
        self.pcb.sched_rt = policy;
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Create a task and enqueue it on its class queue.
    pub fn spawn(
        &mut self,
        entry: TaskFn,
        params: TaskParams,
        name: &str,
        stack_size: usize,
    ) -> Result<usize, KernelError> {
        self.reap();
        if stack_size < MIN_STACK_SIZE {
            return Err(KernelError::InvalidParameter);
        }
        if params.class() == TaskClass::RealTime
            && (params.capacity == 0
                || params.capacity > params.deadline
                || params.deadline > params.period)
        {
            return Err(KernelError::InvalidParameter);
        }
        let slot = self
            .tcbs
            .iter()
            .position(|t| !t.in_use())
            .ok_or(KernelError::TooManyTasks)?;
        if params.class() == TaskClass::RealTime
            && !policy::admit(&self.tcbs, &params, self.pcb.sched_rt)
        {
            return Err(KernelError::AdmissionRefused);
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(stack_size)
            .map_err(|_| KernelError::OutOfMemory)?;
        storage.resize(stack_size, 0u8);
        let mut stack = storage.into_boxed_slice();
        let context = prepare_stack(&mut stack, entry);

        self.tcbs[slot].init(slot, name, params, entry, stack, context);
        match self.tcbs[slot].class() {
            TaskClass::RealTime => must_enqueue(&mut self.rt_queue, slot),
            TaskClass::BestEffort => must_enqueue(&mut self.run_queue, slot),
            TaskClass::Aperiodic => must_enqueue(&mut self.aperiodic_queue, slot),
        }
        Ok(slot)
    }

    /// Remove a task and free its slot and stack.
    ///
    /// Idempotent with respect to the slot: a second call finds it
    /// `Idle` and reports `InvalidId`. Returns whether the caller
    /// killed itself and must dispatch.
    pub fn kill(&mut self, id: usize) -> Result<bool, KernelError> {
        self.reap();
        if id == IDLE_TASK || id >= MAX_TASKS || !self.tcbs[id].in_use() {
            return Err(KernelError::InvalidId);
        }
        self.unlink(id);
        let stack = self.tcbs[id].stack.take();
        let suicide = id == self.current && self.tcbs[id].state == TaskState::Running;
        self.tcbs[id].clear();
        if suicide {
            // Still executing on that stack; release it from the next
            // task-context allocator call instead.
            self.graveyard = stack;
            self.coop_pending = true;
        }
        Ok(suicide)
    }

    /// Termination path for a task whose entry function returned.
    /// Frees the slot and hands control back to the polling server when
    /// the task was an aperiodic job on its budget.
    pub fn exit_current(&mut self) {
        self.reap();
        let id = self.current;
        self.unlink(id);
        let stack = self.tcbs[id].stack.take();
        let was_server_job = self.server_job == Some(id);
        self.tcbs[id].clear();
        self.graveyard = stack;
        self.coop_pending = true;
        if was_server_job {
            self.server_job = None;
            if let Some(s) = self.server {
                if self.tcbs[s].state == TaskState::Ready {
                    self.forced_next = Some(s);
                }
            }
        }
    }

    /// Cooperative give-up by the running task.
    ///
    /// Best-effort: back to the tail of the run queue, quantum
    /// preserved. Real-time: the rest of the current job is forfeited
    /// until the next release; this is also how the polling server
    /// relinquishes leftover budget.
    pub fn yield_current(&mut self) {
        let id = self.current;
        self.coop_pending = true;
        match self.tcbs[id].class() {
            TaskClass::BestEffort => {
                self.tcbs[id].state = TaskState::Ready;
                if self.run_queue.peek() == Some(id) {
                    self.run_queue.rotate();
                }
            }
            TaskClass::RealTime => {
                if self.tcbs[id].capacity_rem > 0 {
                    self.tcbs[id].rtjobs += 1;
                    self.tcbs[id].capacity_rem = 0;
                }
                self.tcbs[id].state = TaskState::Ready;
            }
            TaskClass::Aperiodic => {
                // Stays the server's active job; resumed on its budget.
                self.tcbs[id].state = TaskState::Ready;
            }
        }
    }

    /// Put the running task to sleep for `ticks`. Returns whether a
    /// dispatch is required (`false` for a zero delay).
    pub fn delay_current(&mut self, ticks: u32) -> bool {
        if ticks == 0 {
            return false;
        }
        let id = self.current;
        self.unlink(id);
        self.tcbs[id].state = TaskState::Delayed;
        self.tcbs[id].delay = ticks;
        must_enqueue(&mut self.delay_queue, id);
        self.coop_pending = true;
        true
    }

    /// Park a task until `resume`. Returns whether the caller blocked
    /// itself and must dispatch.
    pub fn block(&mut self, id: usize) -> Result<bool, KernelError> {
        if id >= MAX_TASKS || !self.tcbs[id].in_use() {
            return Err(KernelError::InvalidId);
        }
        if self.tcbs[id].state == TaskState::Blocked {
            return Ok(false);
        }
        self.unlink(id);
        let own = id == self.current && self.tcbs[id].state == TaskState::Running;
        self.tcbs[id].state = TaskState::Blocked;
        if own {
            self.coop_pending = true;
        }
        Ok(own)
    }

    /// Make a blocked task runnable again.
    pub fn resume(&mut self, id: usize) -> Result<(), KernelError> {
        if id >= MAX_TASKS || self.tcbs[id].state != TaskState::Blocked {
            return Err(KernelError::InvalidId);
        }
        self.tcbs[id].state = TaskState::Ready;
        self.enqueue_ready(id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tick path
    // -----------------------------------------------------------------------

    /// Accounting half of the tick. Interrupts are off. Returns whether
    /// the selection half should run.
    pub fn tick(&mut self) -> bool {
        self.pcb.interrupts += 1;
        self.pcb.tick_time_us += TIME_SLICE as u64;
        self.sweep_delays();
        self.charge_current();
        self.sweep_deadlines();
        self.sweep_releases();
        !self.sched_lock
    }

    /// Selection half of the tick, also entered for cooperative
    /// switches. Parks the outgoing task, picks the next one, flips
    /// states and counters, and returns the slot to switch to.
    pub fn pick_next(&mut self) -> usize {
        if let Some(next) = self.forced_next.take() {
            self.finish_switch(next);
            return next;
        }
        let cur = self.current;
        if self.tcbs[cur].state == TaskState::Running {
            self.tcbs[cur].state = TaskState::Ready;
            match self.tcbs[cur].class() {
                TaskClass::RealTime => {
                    if self.tcbs[cur].job_active() {
                        must_enqueue(&mut self.rt_queue, cur);
                    }
                }
                // Best-effort stays at the run-queue head; an aperiodic
                // job stays the server's remembered dispatch.
                TaskClass::BestEffort | TaskClass::Aperiodic => {}
            }
        }
        let mut next = None;
        if !self.rt_queue.is_empty() {
            next = policy::pick_rt(&mut self.rt_queue, &self.tcbs, self.pcb.sched_rt);
        }
        if next.is_none() {
            // An aperiodic job dispatched by the polling server keeps
            // the CPU it paid for whenever no real-time work is ready.
            if let Some(job) = self.server_job {
                if self.tcbs[job].state == TaskState::Ready {
                    next = Some(job);
                }
            }
        }
        if next.is_none() {
            next = policy::pick_be(&mut self.run_queue, &mut self.tcbs);
        }
        let next = match next {
            Some(id) => id,
            None => {
                let idle = &self.tcbs[IDLE_TASK];
                if idle.in_use() && idle.state != TaskState::Delayed {
                    IDLE_TASK
                } else {
                    fault::halt(Fault::NoRunnableTask)
                }
            }
        };
        self.finish_switch(next);
        next
    }

    fn finish_switch(&mut self, next: usize) {
        if next != self.current {
            if self.coop_pending {
                self.pcb.coop_switches += 1;
            } else {
                self.pcb.preempt_switches += 1;
            }
        }
        self.coop_pending = false;
        self.tcbs[next].state = TaskState::Running;
        self.current = next;
    }

    /// Decrement every sleeper; expired ones wake onto their class
    /// queue.
    fn sweep_delays(&mut self) {
        let n = self.delay_queue.count();
        for _ in 0..n {
            let id = match self.delay_queue.remove() {
                Some(id) => id,
                None => break,
            };
            let t = &mut self.tcbs[id];
            if t.delay > 0 {
                t.delay -= 1;
            }
            if t.delay == 0 {
                t.state = TaskState::Ready;
                self.enqueue_ready(id);
            } else {
                must_enqueue(&mut self.delay_queue, id);
            }
        }
    }

    /// Charge one tick of execution to the current real-time job.
    fn charge_current(&mut self) {
        let t = &mut self.tcbs[self.current];
        if t.state == TaskState::Running && t.job_active() {
            t.capacity_rem -= 1;
            if t.capacity_rem == 0 {
                t.rtjobs += 1;
                // Done until the next release; stays off the RT queue.
                t.state = TaskState::Ready;
            }
        }
    }

    /// Count down every in-flight job's deadline; an expired job with
    /// work left is a miss and is abandoned.
    fn sweep_deadlines(&mut self) {
        for id in 0..MAX_TASKS {
            let t = &mut self.tcbs[id];
            if !t.in_use() || !t.job_active() {
                continue;
            }
            if t.deadline_rem > 0 {
                t.deadline_rem -= 1;
            }
            if t.deadline_rem == 0 {
                t.deadline_misses += 1;
                t.capacity_rem = 0;
                if t.state == TaskState::Running {
                    // The abandoned job keeps the CPU until selection;
                    // pick_next will not re-queue it.
                    continue;
                }
                self.rt_queue.purge(id);
            }
        }
    }

    /// Count down every period; wraps release a fresh job and refill
    /// the polling server's fuel.
    fn sweep_releases(&mut self) {
        for id in 0..MAX_TASKS {
            let t = &mut self.tcbs[id];
            if !t.in_use() || !t.is_rt() {
                continue;
            }
            if t.period_rem > 0 {
                t.period_rem -= 1;
            }
            if t.period_rem == 0 {
                t.release_job();
                let state = t.state;
                if self.server == Some(id) {
                    self.server_fuel = self.tcbs[id].capacity;
                }
                if state == TaskState::Ready {
                    must_enqueue(&mut self.rt_queue, id);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Polling server
    // -----------------------------------------------------------------------

    /// Adopt a spawned task as the polling server and prime its fuel.
    pub fn register_server(&mut self, id: usize) {
        self.server = Some(id);
        self.server_fuel = self.tcbs[id].capacity;
    }

    /// Phase A of the server loop: decide what to do with the budget.
    ///
    /// A job preempted mid-dispatch is resumed without a second charge.
    /// Otherwise the aperiodic head is pulled and the budget rule of
    /// the polling server applied: enough fuel pays for the whole job;
    /// too little charges what fuel remains against the job's demand
    /// and re-queues it at the tail.
    pub fn server_plan(&mut self) -> ServerAction {
        if let Some(job) = self.server_job {
            if self.tcbs[job].state == TaskState::Ready {
                return ServerAction::Resume(job);
            }
            // Sleeping or blocked on its own account; wait for it.
            return ServerAction::Yield;
        }
        let job = match self.aperiodic_queue.remove() {
            Some(job) => job,
            None => return ServerAction::Yield,
        };
        let demand = self.tcbs[job].capacity;
        if self.server_fuel >= demand {
            self.server_fuel -= demand;
            self.server_job = Some(job);
            ServerAction::Run(job)
        } else {
            self.tcbs[job].capacity = demand - self.server_fuel;
            self.server_fuel = 0;
            must_enqueue(&mut self.aperiodic_queue, job);
            ServerAction::Yield
        }
    }

    /// Phase B of the server loop: park the server and force the job as
    /// the next dispatch. Control comes back to the server at its next
    /// release, or immediately when the job terminates.
    ///
    /// The server relinquishes its own job remainder here: the fuel
    /// counter is the budget of record, and a period spent dispatching
    /// must not read as a missed server deadline.
    pub fn server_handoff(&mut self, job: usize) {
        let sid = self.current;
        let t = &mut self.tcbs[sid];
        if t.capacity_rem > 0 {
            t.rtjobs += 1;
            t.capacity_rem = 0;
        }
        t.state = TaskState::Ready;
        self.coop_pending = true;
        self.forced_next = Some(job);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Release a stack parked by a task that freed itself. Only called
    /// from task context; the tick ISR never touches the heap.
    fn reap(&mut self) {
        self.graveyard = None;
    }

    /// Drop `id` from every queue and the server bookkeeping.
    fn unlink(&mut self, id: usize) {
        self.run_queue.purge(id);
        self.delay_queue.purge(id);
        self.rt_queue.purge(id);
        self.aperiodic_queue.purge(id);
        if self.server_job == Some(id) {
            self.server_job = None;
        }
    }

    /// Queue a newly runnable task on its class queue.
    fn enqueue_ready(&mut self, id: usize) {
        match self.tcbs[id].class() {
            TaskClass::RealTime => {
                if self.tcbs[id].job_active() && !self.rt_queue.contains(id) {
                    must_enqueue(&mut self.rt_queue, id);
                }
            }
            TaskClass::BestEffort => must_enqueue(&mut self.run_queue, id),
            TaskClass::Aperiodic => {
                if self.server_job != Some(id) {
                    must_enqueue(&mut self.aperiodic_queue, id);
                }
            }
        }
    }
}

/// Queue an id into a kernel queue that, by sizing, cannot be full.
/// Overflow here means an invariant already broke.
fn must_enqueue(queue: &mut Queue, id: usize) {
    if queue.add_tail(id).is_err() {
        fault::halt(Fault::QueueOverflow);
    }
}

// ---------------------------------------------------------------------------
// Stack bootstrap
// ---------------------------------------------------------------------------

/// Build the initial context frame for a task on its own stack.
///
/// The frame mirrors what the port layer saves and restores on a
/// context switch: eight software-saved registers at the bottom, then
/// the eight-word hardware return frame whose LR is the termination
/// trampoline and whose PC is the task entry. The first dispatch of
/// the task therefore "returns" into `entry`; returning from `entry`
/// lands in the trampoline.
///
/// ```text
/// [top, 8-byte aligned]
///   xPSR  (Thumb bit)
///   PC    (entry)
///   LR    (task_exit trampoline)
///   R12, R3, R2, R1, R0   (zeroed)
///   R11 .. R4             (zeroed)   <- initial saved stack pointer
/// ```
pub fn prepare_stack(stack: &mut [u8], entry: TaskFn) -> Context {
    const WORD: usize = size_of::<usize>();
    let base = stack.as_ptr() as usize;
    let top = (base + stack.len()) & !0x7;
    let frame = top - FRAME_WORDS * WORD;

    let mut write = |word: usize, value: usize| {
        let off = frame - base + word * WORD;
        stack[off..off + WORD].copy_from_slice(&value.to_ne_bytes());
    };
    for w in 0..13 {
        write(w, 0); // R4-R11, R0-R3, R12
    }
    write(13, task_exit as usize); // LR
    write(14, entry as usize); // PC
    write(15, 0x0100_0000); // xPSR, Thumb bit set

    Context { sp: frame }
}

/// Landing pad for a task entry function that returned. Retires the
/// task and waits for the dispatcher to take the CPU away.
extern "C" fn task_exit() {
    crate::kernel::exit_current();
    loop {
        core::hint::spin_loop();
    }
}
