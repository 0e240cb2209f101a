//! # EmberOS Configuration
//!
//! Compile-time constants governing the kernel and scheduler behavior.
//! All limits are fixed at compile time; the heap is carved out of a
//! static arena sized here.

/// Maximum number of tasks the system can manage simultaneously.
/// This bounds the TCB arena and the capacity of every kernel queue.
pub const MAX_TASKS: usize = 30;

/// Scheduling quantum in microseconds. One timer tick elapses every
/// `TIME_SLICE` microseconds; all periods, capacities, deadlines and
/// delays are expressed in ticks of this length.
pub const TIME_SLICE: u32 = 1_000;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI). The SysTick
/// reload value is derived from this and `TIME_SLICE`.
pub const CPU_SPEED: u32 = 16_000_000;

/// Size of the kernel heap in bytes. Task stacks and queue storage are
/// the only heap consumers; each task costs its `stack_size` plus a few
/// words of queue bookkeeping.
pub const HEAP_SIZE: usize = 64 * 1024;

/// Default task stack size in bytes, used by the idle task and the
/// polling server. Must hold the deepest call chain plus the 16-word
/// context frame.
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Maximum length of a task name, in bytes.
pub const NAME_LEN: usize = 32;

/// Polling server period in ticks. The server is released once per
/// period and its fuel is refilled to `SERVER_CAPACITY`.
pub const SERVER_PERIOD: u32 = 20;

/// Polling server capacity in ticks per period: the budget available
/// for aperiodic jobs between consecutive releases.
pub const SERVER_CAPACITY: u32 = 6;

/// Fixed-point scale of the admission-control arithmetic. Utilization
/// terms are computed as `capacity * UTIL_SCALE / period` so the
/// feasibility bounds can be checked without floating point.
pub const UTIL_SCALE: u32 = 10_000;
