//! Kernel console output.
//!
//! On the embedded target, messages go out over semihosting. On the
//! host the macro compiles to nothing, so portable kernel code can log
//! unconditionally. Interrupt handlers must not log: semihosting stalls
//! the core for milliseconds per call.

/// Print a line on the kernel console.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[macro_export]
macro_rules! kprintln {
    ($($arg:tt)*) => {{
        let _ = ::cortex_m_semihosting::hprintln!($($arg)*);
    }};
}

/// Print a line on the kernel console (host no-op).
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[macro_export]
macro_rules! kprintln {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
