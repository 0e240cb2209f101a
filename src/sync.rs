//! # Critical Sections
//!
//! All shared kernel state is mutated either from the tick ISR or from
//! task context inside a critical section. Interrupts are disabled on
//! entry and restored on exit, so the enclosed operation is atomic with
//! respect to the dispatcher.
//!
//! Keep critical sections short: every microsecond spent here is added
//! to the worst-case tick latency.
//!
//! On the host (unit tests) there is no interrupt source and the
//! closure simply runs.

/// Execute `f` with interrupts disabled.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    cortex_m::interrupt::free(|_| f())
}

/// Execute `f` directly; single-threaded host build.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}
