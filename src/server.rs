//! # Polling Server
//!
//! Aperiodic jobs are ordinary tasks spawned with a service demand and
//! no period; they wait in the aperiodic queue. The polling server is a
//! standing real-time task whose capacity is a budget ("fuel") spent on
//! running them. The fuel refills at each server release, so aperiodic
//! load is bounded like any other real-time task and cannot starve the
//! periodic set.
//!
//! ## Two-phase dispatch
//!
//! Each loop iteration is a complete, explicit state machine:
//!
//! - **Phase A** ([`Kernel::server_plan`], interrupts off): resume a
//!   job that was preempted mid-dispatch, or pull the aperiodic head
//!   and apply the budget rule. Enough fuel pays for the whole job up
//!   front; too little charges the remaining fuel against the job's
//!   demand and re-queues it at the tail for the next release.
//! - **Phase B** ([`Kernel::server_handoff`]): the server parks itself
//!   and forces the job as the next dispatch. Control comes back to
//!   the top of the loop — never into the middle of it — either when
//!   the job terminates or at the server's next release.
//!
//! From the outer scheduler's perspective the server remains the
//! scheduling entity: the job's execution is paid for by the server's
//! budget, not accounted against any queue of its own.

use crate::kernel;
use crate::kprintln;
use crate::sched::ServerAction;

/// Polling-server task body. Spawned by `kernel::init` with the
/// configured server period and capacity.
pub extern "C" fn polling_server() {
    loop {
        match kernel::server_plan() {
            ServerAction::Run(job) | ServerAction::Resume(job) => {
                kprintln!("SERVER: running aperiodic task {}", job);
                kernel::server_dispatch(job);
            }
            ServerAction::Yield => {
                kernel::yield_now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sched::{Kernel, ServerAction, IDLE_TASK};
    use crate::task::{TaskParams, TaskState};

    extern "C" fn nop_entry() {}

    /// Kernel with idle, a (C=3, T=10) server, and the scheduler
    /// unlocked.
    fn booted_with_server() -> (Kernel, usize) {
        let mut k = Kernel::new().unwrap();
        k.spawn(nop_entry, TaskParams::best_effort(0), "idle task", 256)
            .unwrap();
        let server = k
            .spawn(nop_entry, TaskParams::periodic(10, 3, 10), "polling server", 256)
            .unwrap();
        k.register_server(server);
        k.sched_lock = false;
        k.pick_next();
        (k, server)
    }

    /// Advance one tick.
    fn step(k: &mut Kernel) -> usize {
        if k.tick() {
            k.pick_next()
        } else {
            k.current
        }
    }

    /// Run ticks until the server is dispatched, with a safety bound.
    fn run_until_server(k: &mut Kernel, server: usize, bound: u32) -> u32 {
        for t in 1..=bound {
            if step(k) == server {
                return t;
            }
        }
        panic!("server not dispatched within {bound} ticks");
    }

    #[test]
    fn test_empty_queue_yields() {
        let (mut k, server) = booted_with_server();
        assert_eq!(k.current, server);
        assert_eq!(k.server_plan(), ServerAction::Yield);
        k.yield_current();
        assert_eq!(k.pick_next(), IDLE_TASK);
        // The rest of the budget is given up until the next release.
        assert_eq!(k.tcbs[server].capacity_rem, 0);
    }

    #[test]
    fn test_budget_spans_releases() {
        // Jobs of demand {5, 1, 2} against a (C=3, T=10) server: the
        // first job takes 3 fuel of the first release and 2 of the
        // second; the others complete within the release they start in.
        let (mut k, server) = booted_with_server();
        let j5 = k.spawn(nop_entry, TaskParams::aperiodic(5), "j5", 256).unwrap();
        let j1 = k.spawn(nop_entry, TaskParams::aperiodic(1), "j1", 256).unwrap();
        let j2 = k.spawn(nop_entry, TaskParams::aperiodic(2), "j2", 256).unwrap();

        // First release: fuel 3 < 5, so the job is charged the whole
        // budget and re-queued at the tail.
        assert_eq!(k.current, server);
        assert_eq!(k.server_plan(), ServerAction::Yield);
        assert_eq!(k.server_fuel, 0);
        assert_eq!(k.tcbs[j5].capacity, 2);
        assert_eq!(k.aperiodic_queue.peek(), Some(j1));
        k.yield_current();
        assert_eq!(k.pick_next(), IDLE_TASK);

        // Second release at tick 10 refills the fuel.
        let at = run_until_server(&mut k, server, 12);
        assert_eq!(at, 10);
        assert_eq!(k.server_fuel, 3);

        // j1 fits whole: dispatched and terminated within the release.
        match k.server_plan() {
            ServerAction::Run(j) => assert_eq!(j, j1),
            other => panic!("expected Run(j1), got {other:?}"),
        }
        assert_eq!(k.server_fuel, 2);
        k.server_handoff(j1);
        assert_eq!(k.pick_next(), j1);
        k.exit_current();
        assert_eq!(k.pick_next(), server);
        assert_eq!(k.tcbs[j1].state, TaskState::Idle);
        assert!(k.tcbs[j1].stack.is_none());

        // j2 drains the remaining fuel in the same release.
        match k.server_plan() {
            ServerAction::Run(j) => assert_eq!(j, j2),
            other => panic!("expected Run(j2), got {other:?}"),
        }
        assert_eq!(k.server_fuel, 0);
        k.server_handoff(j2);
        assert_eq!(k.pick_next(), j2);
        k.exit_current();
        assert_eq!(k.pick_next(), server);

        // The carried-over job cannot run on zero fuel: degenerate
        // partial charge, queue unchanged, server waits.
        assert_eq!(k.server_plan(), ServerAction::Yield);
        assert_eq!(k.tcbs[j5].capacity, 2);
        k.yield_current();
        assert_eq!(k.pick_next(), IDLE_TASK);

        // Third release pays for what is left; the job completes only
        // after tick 20, never before tick 13.
        let at2 = at + run_until_server(&mut k, server, 12);
        assert_eq!(at2, 20);
        match k.server_plan() {
            ServerAction::Run(j) => assert_eq!(j, j5),
            other => panic!("expected Run(j5), got {other:?}"),
        }
        assert_eq!(k.server_fuel, 1);
        k.server_handoff(j5);
        assert_eq!(k.pick_next(), j5);
        k.exit_current();
        assert_eq!(k.pick_next(), server);
        assert_eq!(k.tcbs[j5].state, TaskState::Idle);
        // Dispatching on a budget never reads as a missed deadline.
        assert_eq!(k.tcbs[server].deadline_misses, 0);
    }

    #[test]
    fn test_preempted_job_resumes_without_second_charge() {
        let (mut k, server) = booted_with_server();
        let job = k.spawn(nop_entry, TaskParams::aperiodic(2), "job", 256).unwrap();
        match k.server_plan() {
            ServerAction::Run(j) => assert_eq!(j, job),
            other => panic!("expected Run, got {other:?}"),
        }
        let fuel_after_charge = k.server_fuel;
        assert_eq!(fuel_after_charge, 1);
        k.server_handoff(job);
        assert_eq!(k.pick_next(), job);

        // The server's next release preempts the job mid-dispatch.
        let at = run_until_server(&mut k, server, 12);
        assert_eq!(at, 10);
        assert_eq!(k.tcbs[job].state, TaskState::Ready);

        // Resume is free: the job was already paid for.
        assert_eq!(k.server_plan(), ServerAction::Resume(job));
        assert_eq!(k.server_fuel, 3);
        k.server_handoff(job);
        assert_eq!(k.pick_next(), job);
        k.exit_current();
        assert_eq!(k.pick_next(), server);
        assert_eq!(k.server_job, None);
    }

    #[test]
    fn test_dispatched_job_holds_cpu_over_best_effort() {
        // A job the server paid for keeps the CPU across ticks while
        // only best-effort work is waiting; it yields the CPU to the
        // run queue when it terminates.
        let (mut k, server) = booted_with_server();
        let worker = k
            .spawn(nop_entry, TaskParams::best_effort(5), "worker", 256)
            .unwrap();
        let job = k.spawn(nop_entry, TaskParams::aperiodic(2), "job", 256).unwrap();
        match k.server_plan() {
            ServerAction::Run(j) => assert_eq!(j, job),
            other => panic!("expected Run, got {other:?}"),
        }
        k.server_handoff(job);
        assert_eq!(k.pick_next(), job);
        for _ in 0..3 {
            assert_eq!(step(&mut k), job);
        }
        k.exit_current();
        assert_eq!(k.pick_next(), server);
        assert_eq!(k.server_plan(), ServerAction::Yield);
        k.yield_current();
        assert_eq!(k.pick_next(), worker);
    }

    #[test]
    fn test_server_state_during_dispatch() {
        // While an aperiodic job runs, the server reads as Ready and
        // off the RT queue; the job is the single Running task.
        let (mut k, server) = booted_with_server();
        let job = k.spawn(nop_entry, TaskParams::aperiodic(1), "job", 256).unwrap();
        match k.server_plan() {
            ServerAction::Run(j) => assert_eq!(j, job),
            other => panic!("expected Run, got {other:?}"),
        }
        k.server_handoff(job);
        assert_eq!(k.pick_next(), job);
        assert_eq!(k.tcbs[server].state, TaskState::Ready);
        assert!(!k.rt_queue.contains(server));
        assert_eq!(k.tcbs[job].state, TaskState::Running);
        assert_eq!(k.server_job, Some(job));
    }
}
