//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! SysTick as the kernel tick source, PendSV as the context-switch
//! vehicle, and the first-task launch.
//!
//! ## Context switch mechanism
//!
//! The Cortex-M4 uses a split-stack model: the kernel and all exception
//! handlers run on MSP, tasks run in Thread mode on PSP. On exception
//! entry the hardware stacks R0–R3, R12, LR, PC and xPSR onto the
//! process stack; the PendSV handler saves and restores R4–R11, which
//! completes the context. The TCB stores only the resulting PSP — the
//! saved frame on the task's own stack is the rest of the "jump
//! buffer". A task sees a context switch as an ordinary call that
//! returns once it is dispatched again; control never re-enters the
//! middle of a function.
//!
//! ## Interrupt priorities
//!
//! SysTick and PendSV both run at the lowest priority so a context
//! switch never preempts another ISR and pends until the interrupt
//! stack unwinds.

use core::arch::{asm, naked_asm};
use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{CPU_SPEED, TIME_SLICE};

// ---------------------------------------------------------------------------
// CPU primitives
// ---------------------------------------------------------------------------

/// Identifier of the executing core; this port is single-core.
#[inline]
pub fn cpu_id() -> u32 {
    0
}

/// Park the CPU until the next interrupt.
#[inline]
pub fn cpu_idle() {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Program SysTick to fire every `TIME_SLICE` microseconds.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = (CPU_SPEED / 1_000_000) * TIME_SLICE - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3: PendSV in [23:16],
        // SysTick in [31:24].
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3) | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// Context switch request
// ---------------------------------------------------------------------------

/// Pend a context switch. The switch happens in the PendSV handler
/// once no other ISR is active.
#[inline]
pub fn reschedule() {
    // ICSR, PENDSVSET bit.
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
    cortex_m::asm::isb();
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Enter the first task: switch Thread mode to PSP, unwind the prepared
/// frame by hand and branch to the entry point. Called once from
/// `kernel::start`; never returns.
///
/// # Safety
/// `psp` must point at a frame built by `sched::prepare_stack`.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the software-saved R4-R11 of the prepared frame.
        "adds r0, #32",
        "msr psp, r0",
        // Thread mode uses PSP from here on.
        "movs r0, #2",
        "msr control, r0",
        "isb",
        // Unwind the hardware frame manually: R0-R3, R12, LR, PC, xPSR.
        "pop {{r0-r3, r12}}",
        "pop {{r4}}", // LR (exit trampoline; entries are loops)
        "pop {{r5}}", // PC (task entry)
        "pop {{r6}}", // xPSR (rebuilt by the processor)
        "cpsie i",
        "bx r5",
        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception: the context switch itself.
///
/// Saves R4–R11 on the outgoing task's stack, records its PSP, asks the
/// dispatcher for the next task, and restores symmetrically. Runs at
/// the lowest priority with no other ISR active.
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {save_context}",
        "bl {next_context}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        save_context = sym save_current_context,
        next_context = sym next_task_context,
    );
}

/// Record the outgoing task's stack pointer.
///
/// # Safety
/// Called from PendSV with the kernel pointer valid.
unsafe extern "C" fn save_current_context(psp: usize) {
    let kernel = &mut *crate::kernel::KERNEL_PTR;
    kernel.tcbs[kernel.current].context.sp = psp;
}

/// Run selection and hand PendSV the incoming task's stack pointer.
///
/// # Safety
/// Called from PendSV with the kernel pointer valid.
unsafe extern "C" fn next_task_context() -> usize {
    let kernel = &mut *crate::kernel::KERNEL_PTR;
    let next = kernel.pick_next();
    kernel.tcbs[next].context.sp
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception: the kernel tick. Runs the accounting half of the
/// dispatcher and pends a switch unless the scheduler is locked.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    let kernel = &mut *crate::kernel::KERNEL_PTR;
    if kernel.tick() {
        reschedule();
    }
}
