//! # Kernel
//!
//! Top-level initialization and the public task API. Owns the global
//! [`Kernel`] instance in the singleton pattern the port layer needs:
//! a raw pointer the ISRs dereference, with every task-context access
//! wrapped in a critical section.
//!
//! ## Startup sequence
//!
//! ```text
//! reset handler (cortex-m-rt)
//!   └─► app main()
//!         ├─► kernel::init()     ← heap, queues, idle + polling server
//!         ├─► kernel::spawn()    ← application task set (×N)
//!         └─► kernel::start()    ← timer, priorities, first dispatch
//! ```
//!
//! The scheduler starts locked; the idle task releases the lock the
//! first time it runs, after which preemption is live.

use crate::arch;
use crate::config::{
    CPU_SPEED, DEFAULT_STACK_SIZE, HEAP_SIZE, MAX_TASKS, SERVER_CAPACITY, SERVER_PERIOD,
    TIME_SLICE,
};
use crate::errors::KernelError;
use crate::fault::{self, Fault};
use crate::kprintln;
use crate::policy::{self, RtPolicy};
use crate::sched::{Kernel, ServerAction};
use crate::server;
use crate::sync::critical_section;
use crate::task::{TaskFn, TaskParams, TaskState};

// ---------------------------------------------------------------------------
// Kernel heap (embedded target only; the host has its own allocator)
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod heap {
    use super::HEAP_SIZE;
    use linked_list_allocator::LockedHeap;

    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    static mut ARENA: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

    /// Hand the static arena to the allocator. Called once from
    /// `kernel::init` before anything allocates.
    pub fn init() {
        unsafe {
            ALLOCATOR
                .lock()
                .init(core::ptr::addr_of_mut!(ARENA) as *mut u8, HEAP_SIZE);
        }
    }
}

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// Backing storage for the kernel state. Written once by `init`.
static mut KERNEL: Option<Kernel> = None;

/// Raw pointer to the kernel state for the ISR path, which cannot use
/// references. Set once during `init`, read from PendSV and SysTick.
#[no_mangle]
pub static mut KERNEL_PTR: *mut Kernel = core::ptr::null_mut();

/// Run `f` on the kernel state inside a critical section.
fn with<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    critical_section(|| unsafe {
        if KERNEL_PTR.is_null() {
            fault::halt(Fault::Uninitialized);
        }
        f(&mut *KERNEL_PTR)
    })
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Initialize the kernel: heap, queues, the idle task (slot 0) and the
/// polling server. The scheduler stays locked until the idle task
/// first runs. Must be called exactly once, before `start`.
pub fn init() -> Result<(), KernelError> {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    heap::init();

    unsafe {
        KERNEL = Some(Kernel::new()?);
        // Split borrow through the Option is fine: KERNEL lives for the
        // rest of the program.
        if let Some(k) = (*core::ptr::addr_of_mut!(KERNEL)).as_mut() {
            KERNEL_PTR = k as *mut Kernel;
        }
    }

    kprintln!("===========================================");
    kprintln!("EmberOS");
    kprintln!("===========================================");
    kprintln!("sys clk:    {} kHz", CPU_SPEED / 1000);
    kprintln!("time slice: {} us", TIME_SLICE);
    kprintln!("heap size:  {} bytes", HEAP_SIZE);
    kprintln!("max tasks:  {}", MAX_TASKS);

    spawn(idle_task, TaskParams::best_effort(0), "idle task", DEFAULT_STACK_SIZE)?;
    let server = spawn(
        server::polling_server,
        TaskParams::periodic(SERVER_PERIOD, SERVER_CAPACITY, SERVER_PERIOD),
        "polling server",
        DEFAULT_STACK_SIZE,
    )?;
    with(|k| k.register_server(server));
    Ok(())
}

/// Start the scheduler: program the timer, set interrupt priorities,
/// and launch the first task. Does not return.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start() -> ! {
    let mut cp = match cortex_m::Peripherals::take() {
        Some(cp) => cp,
        None => fault::halt(Fault::Aborted),
    };
    arch::configure_systick(&mut cp.SYST);
    arch::set_interrupt_priorities();
    let first_sp = with(|k| {
        let first = k.pick_next();
        k.tcbs[first].context.sp
    });
    unsafe { arch::start_first_task(first_sp as *const u32) }
}

/// The idle task: releases the scheduler lock on first entry, then
/// parks the CPU between interrupts.
extern "C" fn idle_task() {
    kprintln!("KERNEL: EmberOS is running");
    sched_lock(false);
    loop {
        arch::cpu_idle();
    }
}

// ---------------------------------------------------------------------------
// Task API
// ---------------------------------------------------------------------------

/// Create a task. Real-time tasks pass admission control; aperiodic
/// jobs are deposited with the polling server. The new task becomes
/// runnable immediately but preemption waits for the next tick.
pub fn spawn(
    entry: TaskFn,
    params: TaskParams,
    name: &str,
    stack_size: usize,
) -> Result<usize, KernelError> {
    with(|k| k.spawn(entry, params, name, stack_size))
}

/// Remove a task. Killing the calling task transfers to the
/// dispatcher; a second kill of the same slot reports `InvalidId`.
pub fn kill(id: usize) -> Result<(), KernelError> {
    let suicide = with(|k| k.kill(id))?;
    if suicide {
        arch::reschedule();
    }
    Ok(())
}

/// Give up the CPU voluntarily. A best-effort caller moves to the tail
/// of the run queue with its quantum untouched; a real-time caller
/// signals its current job complete until the next release.
pub fn yield_now() {
    with(|k| k.yield_current());
    arch::reschedule();
}

/// Sleep for at least `ms` milliseconds (rounded up to whole ticks;
/// at most one tick of release jitter on top).
pub fn delay_ms(ms: u32) {
    let ticks = ms_to_ticks(ms);
    if with(|k| k.delay_current(ticks)) {
        arch::reschedule();
    }
}

/// Slot id of the calling task.
pub fn self_id() -> usize {
    with(|k| k.current)
}

/// Identifier of the executing core.
pub fn cpu_id() -> u32 {
    arch::cpu_id()
}

/// Lock or unlock the scheduler. While locked the tick handler keeps
/// accounting but performs no context switch. Used during critical
/// initialization.
pub fn sched_lock(on: bool) {
    with(|k| k.sched_lock = on);
}

/// Select the real-time policy. Call before admitting real-time tasks;
/// the admission bound follows the policy.
pub fn set_rt_policy(policy: RtPolicy) {
    with(|k| k.set_rt_policy(policy));
}

/// Park a task until `resume`. Blocking the calling task dispatches.
pub fn block(id: usize) -> Result<(), KernelError> {
    let own = with(|k| k.block(id))?;
    if own {
        arch::reschedule();
    }
    Ok(())
}

/// Make a blocked task runnable again.
pub fn resume(id: usize) -> Result<(), KernelError> {
    with(|k| k.resume(id))
}

/// Termination path for a returned task entry; also reachable through
/// the stack frame trampoline. Never returns control to the caller's
/// task.
pub fn exit_current() {
    with(|k| k.exit_current());
    arch::reschedule();
}

// ---------------------------------------------------------------------------
// Polling-server glue
// ---------------------------------------------------------------------------

/// Phase A of the polling server: plan the next budget action.
pub(crate) fn server_plan() -> ServerAction {
    with(|k| k.server_plan())
}

/// Phase B of the polling server: hand the CPU to the planned job.
/// Returns when the server is next dispatched.
pub(crate) fn server_dispatch(job: usize) {
    with(|k| k.server_handoff(job));
    arch::reschedule();
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Per-task counters and static parameters.
#[derive(Debug, Clone, Copy)]
pub struct TaskStats {
    pub id: usize,
    pub state: TaskState,
    pub priority: u8,
    pub period: u32,
    pub capacity: u32,
    pub deadline: u32,
    pub rtjobs: u32,
    pub bgjobs: u32,
    pub deadline_misses: u32,
}

/// Global scheduler counters from the PCB.
#[derive(Debug, Clone, Copy)]
pub struct KernelStats {
    pub coop_switches: u32,
    pub preempt_switches: u32,
    pub interrupts: u32,
    pub tick_time_us: u64,
    /// Admitted real-time utilization, scaled by `UTIL_SCALE`.
    pub utilization: u32,
    pub tasks: usize,
}

/// Counters of one task.
pub fn task_stats(id: usize) -> Result<TaskStats, KernelError> {
    with(|k| {
        if id >= MAX_TASKS || !k.tcbs[id].in_use() {
            return Err(KernelError::InvalidId);
        }
        let t = &k.tcbs[id];
        Ok(TaskStats {
            id: t.id,
            state: t.state,
            priority: t.priority,
            period: t.period,
            capacity: t.capacity,
            deadline: t.deadline,
            rtjobs: t.rtjobs,
            bgjobs: t.bgjobs,
            deadline_misses: t.deadline_misses,
        })
    })
}

/// Global scheduler counters.
pub fn kernel_stats() -> KernelStats {
    with(|k| KernelStats {
        coop_switches: k.pcb.coop_switches,
        preempt_switches: k.pcb.preempt_switches,
        interrupts: k.pcb.interrupts,
        tick_time_us: k.pcb.tick_time_us,
        utilization: policy::utilization(&k.tcbs),
        tasks: k.tcbs.iter().filter(|t| t.in_use()).count(),
    })
}

/// Milliseconds to ticks, rounded up so a delay never undershoots.
fn ms_to_ticks(ms: u32) -> u32 {
    let us = ms as u64 * 1_000;
    ((us + TIME_SLICE as u64 - 1) / TIME_SLICE as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_to_ticks_rounds_up() {
        // 1 ms tick: exact conversions.
        assert_eq!(ms_to_ticks(0), 0);
        assert_eq!(ms_to_ticks(1), 1_000 / TIME_SLICE);
        assert_eq!(ms_to_ticks(100), 100_000 / TIME_SLICE);
        // Never undershoots a non-multiple.
        let t = ms_to_ticks(3);
        assert!(t as u64 * TIME_SLICE as u64 >= 3_000);
    }
}
