//! Architecture port layer.
//!
//! The Cortex-M4 port provides the timer, the context-switch machinery
//! and the CPU primitives. The host fallback stubs exist so the
//! portable kernel (and its unit tests) compile off-target; they never
//! switch contexts.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::{
    configure_systick, cpu_id, cpu_idle, reschedule, set_interrupt_priorities, start_first_task,
};

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod hosted {
    /// Identifier of the executing core.
    pub fn cpu_id() -> u32 {
        0
    }

    /// Relax the CPU while nothing is runnable.
    pub fn cpu_idle() {
        core::hint::spin_loop();
    }

    /// Request a context switch. On the host the tests drive selection
    /// directly, so this is a no-op.
    pub fn reschedule() {}
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use hosted::{cpu_id, cpu_idle, reschedule};
