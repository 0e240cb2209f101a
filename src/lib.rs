//! # EmberOS — a small real-time kernel
//!
//! A preemptive multitasking kernel core for single-core ARM Cortex-M4
//! microcontrollers, mixing three scheduling classes on one CPU:
//!
//! - **Hard real-time periodic tasks** under rate-monotonic or
//!   earliest-deadline-first scheduling, guarded by a utilization-bound
//!   admission test.
//! - **Best-effort tasks** under priority-weighted round-robin,
//!   running whenever no real-time job is ready.
//! - **Aperiodic jobs** executed by a polling server out of a
//!   periodically refilled capacity budget, so bursty work cannot
//!   disturb the periodic guarantees.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Application Tasks                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                     │
//! │  init · spawn · kill · yield_now · delay_ms · sched_lock  │
//! ├───────────────┬─────────────────────┬────────────────────┤
//! │  Dispatcher   │  Policies           │  Polling Server    │
//! │  sched.rs     │  policy.rs          │  server.rs         │
//! │  ─ tick()     │  ─ pick_rt (RM/EDF) │  ─ plan (budget)   │
//! │  ─ pick_next()│  ─ pick_be (RR)     │  ─ handoff         │
//! │               │  ─ admit (U-bound)  │                    │
//! ├───────────────┴─────────────────────┴────────────────────┤
//! │        Task model (task.rs) · FIFO (queue.rs)             │
//! ├──────────────────────────────────────────────────────────┤
//! │            Arch port (arch/cortex_m4.rs)                  │
//! │      SysTick · PendSV · stack bootstrap · first task      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory model
//!
//! - Fixed TCB arena of `MAX_TASKS` slots; queues hold slot ids, never
//!   pointers.
//! - Task stacks and queue storage come from the kernel heap; a
//!   task's stack is owned by its slot and freed when the slot goes
//!   idle.
//! - All shared state mutation happens in the tick ISR or inside
//!   `sync::critical_section`; the ISR never touches the heap.
//!
//! The scheduler core is fully portable and unit-tested on the host as
//! a logical simulation; only `arch/` and the firmware binary are
//! target-specific.

#![no_std]

extern crate alloc;

// The host test harness links libstd; the kernel itself never uses it.
#[cfg(test)]
extern crate std;

pub mod arch;
pub mod config;
pub mod errors;
pub mod fault;
pub mod kernel;
pub mod klog;
pub mod policy;
pub mod queue;
pub mod sched;
pub mod server;
pub mod sync;
pub mod task;

pub use errors::KernelError;
pub use policy::RtPolicy;
pub use task::TaskParams;
