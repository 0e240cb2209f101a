//! Fatal kernel faults.
//!
//! Conditions that would corrupt scheduler invariants cannot be handled
//! by returning an error code: by the time they are observed, the queues
//! or the TCB arena are already inconsistent. `halt` prints a diagnostic
//! and parks the CPU. On the host (unit tests) it panics instead so the
//! condition is observable.

use crate::kprintln;

/// Unrecoverable kernel fault codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A kernel queue overflowed after admission already accepted the
    /// task; queue capacities equal `MAX_TASKS`, so this is a bug.
    QueueOverflow,
    /// Selection found no runnable task and the idle task is missing.
    NoRunnableTask,
    /// A kernel API was called before `kernel::init`.
    Uninitialized,
    /// The first dispatch returned to the boot path.
    Aborted,
}

/// Halt the system with a diagnostic. Never returns.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn halt(fault: Fault) -> ! {
    kprintln!("KERNEL: fault: {:?}", fault);
    loop {
        crate::arch::cpu_idle();
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn halt(fault: Fault) -> ! {
    kprintln!("KERNEL: fault: {:?}", fault);
    panic!("kernel fault: {:?}", fault);
}
