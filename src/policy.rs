//! # Scheduler Policies
//!
//! Selection functions for the two scheduling classes, and the
//! admission control that keeps the real-time class feasible.
//!
//! ## Real-time selection
//!
//! Both policies share one interface: scan the real-time queue and
//! extract the best runnable entry.
//!
//! - **Rate monotonic**: ascending period. Static priorities; paired
//!   with the `n(2^(1/n) - 1)` utilization bound.
//! - **Earliest deadline first**: ascending `deadline_rem` (ticks until
//!   the current job's absolute deadline). Dynamic priorities; feasible
//!   up to full utilization.
//!
//! Ties break toward the lower slot id, so tasks released in the same
//! tick are ordered deterministically.
//!
//! ## Best-effort selection
//!
//! Weighted round-robin over the run queue: the head task is granted
//! one tick per unit of `priority_rem`; when its quantum is spent the
//! counter refills from `priority` and the task rotates to the tail.
//! Over one pass of the queue each task receives CPU time proportional
//! to its priority.

use crate::config::{MAX_TASKS, UTIL_SCALE};
use crate::queue::Queue;
use crate::task::{TaskParams, TaskState, Tcb};

/// Real-time policy selector, held in the PCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtPolicy {
    RateMonotonic,
    EarliestDeadlineFirst,
}

/// Best-effort policy selector, held in the PCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BePolicy {
    PriorityRoundRobin,
}

// ---------------------------------------------------------------------------
// Real-time selection
// ---------------------------------------------------------------------------

/// Pick the next real-time task from `queue` under `policy`.
///
/// Scans the whole queue (it is kept short by admission control),
/// dropping entries whose job has finished or been abandoned, and
/// extracts the winner. Returns `None` when no runnable entry remains.
pub fn pick_rt(queue: &mut Queue, tcbs: &[Tcb], policy: RtPolicy) -> Option<usize> {
    let n = queue.count();
    let mut best: Option<(u32, usize)> = None;
    for _ in 0..n {
        let id = queue.remove()?;
        let t = &tcbs[id];
        if t.state != TaskState::Ready || !t.job_active() {
            // Stale entry; drop it instead of re-queueing.
            continue;
        }
        let key = match policy {
            RtPolicy::RateMonotonic => t.period,
            RtPolicy::EarliestDeadlineFirst => t.deadline_rem,
        };
        if best.map_or(true, |b| (key, id) < b) {
            best = Some((key, id));
        }
        if queue.add_tail(id).is_err() {
            // Cannot happen: we just removed the entry.
            return None;
        }
    }
    let (_, winner) = best?;
    let m = queue.count();
    for _ in 0..m {
        if queue.peek() == Some(winner) {
            queue.remove();
            return Some(winner);
        }
        queue.rotate();
    }
    None
}

// ---------------------------------------------------------------------------
// Best-effort selection
// ---------------------------------------------------------------------------

/// Pick the next best-effort task from the run queue.
///
/// The dispatched task stays at the head so consecutive ticks extend
/// its quantum. When every queued task has a zero quantum (all
/// priorities zero), the policy degenerates to plain round-robin
/// instead of spinning.
pub fn pick_be(queue: &mut Queue, tcbs: &mut [Tcb]) -> Option<usize> {
    let passes = queue.count();
    let mut rotations = 0;
    while rotations < passes {
        let head = queue.peek()?;
        let t = &mut tcbs[head];
        if t.state != TaskState::Ready && t.state != TaskState::Running {
            queue.remove();
            continue;
        }
        if t.priority_rem > 0 {
            t.priority_rem -= 1;
            t.bgjobs += 1;
            return Some(head);
        }
        t.priority_rem = t.priority;
        queue.rotate();
        rotations += 1;
    }
    let head = queue.peek()?;
    queue.rotate();
    tcbs[head].bgjobs += 1;
    Some(head)
}

// ---------------------------------------------------------------------------
// Admission control
// ---------------------------------------------------------------------------

/// Least upper utilization bound for rate-monotonic scheduling,
/// `n * (2^(1/n) - 1)` scaled by `UTIL_SCALE`, indexed by `n - 1`.
/// Converges toward ln 2 (6931) for large task sets.
const RMA_BOUND: [u32; MAX_TASKS] = [
    10000, 8284, 7797, 7568, 7434, 7347, 7286, 7240, 7205, 7177, //
    7154, 7135, 7119, 7105, 7094, 7083, 7074, 7066, 7059, 7052, //
    7047, 7041, 7036, 7032, 7028, 7024, 7021, 7017, 7014, 7012,
];

/// One utilization term, `C / T` scaled by `UTIL_SCALE`.
#[inline]
fn util_term(capacity: u32, period: u32) -> u32 {
    (capacity as u64 * UTIL_SCALE as u64 / period as u64) as u32
}

/// Total utilization claimed by the admitted real-time tasks, scaled by
/// `UTIL_SCALE`.
pub fn utilization(tcbs: &[Tcb]) -> u32 {
    tcbs.iter()
        .filter(|t| t.in_use() && t.is_rt())
        .map(|t| util_term(t.capacity, t.period))
        .sum()
}

/// Feasibility check for a new real-time task.
///
/// Sums `C_i / T_i` over the admitted set plus the candidate and
/// compares against the policy's bound, with `n` counting the
/// candidate. All arithmetic is integer, scaled by `UTIL_SCALE`.
pub fn admit(tcbs: &[Tcb], params: &TaskParams, policy: RtPolicy) -> bool {
    let mut util = util_term(params.capacity, params.period);
    let mut n = 1usize;
    for t in tcbs.iter().filter(|t| t.in_use() && t.is_rt()) {
        util += util_term(t.capacity, t.period);
        n += 1;
    }
    let bound = match policy {
        RtPolicy::RateMonotonic => RMA_BOUND[n.min(MAX_TASKS) - 1],
        RtPolicy::EarliestDeadlineFirst => UTIL_SCALE,
    };
    util <= bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Context, TaskParams};
    use alloc::vec;
    use alloc::vec::Vec;

    extern "C" fn nop_entry() {}

    fn arena() -> Vec<Tcb> {
        (0..MAX_TASKS).map(Tcb::empty).collect()
    }

    fn spawn_rt(tcbs: &mut [Tcb], id: usize, period: u32, capacity: u32, deadline: u32) {
        let stack = vec![0u8; 128].into_boxed_slice();
        let params = TaskParams::periodic(period, capacity, deadline);
        tcbs[id].init(id, "rt", params, nop_entry, stack, Context::default());
    }

    fn spawn_be(tcbs: &mut [Tcb], id: usize, priority: u8) {
        let stack = vec![0u8; 128].into_boxed_slice();
        let params = TaskParams::best_effort(priority);
        tcbs[id].init(id, "be", params, nop_entry, stack, Context::default());
    }

    #[test]
    fn test_rma_orders_by_period() {
        let mut tcbs = arena();
        spawn_rt(&mut tcbs, 1, 15, 3, 15);
        spawn_rt(&mut tcbs, 2, 10, 2, 10);
        let mut q = Queue::new(MAX_TASKS).unwrap();
        q.add_tail(1).unwrap();
        q.add_tail(2).unwrap();
        let picked = pick_rt(&mut q, &tcbs, RtPolicy::RateMonotonic);
        assert_eq!(picked, Some(2));
        assert!(!q.contains(2));
        assert!(q.contains(1));
    }

    #[test]
    fn test_edf_orders_by_deadline_rem() {
        let mut tcbs = arena();
        spawn_rt(&mut tcbs, 1, 20, 2, 20);
        spawn_rt(&mut tcbs, 2, 10, 2, 10);
        // Task 1's job is closer to its deadline than task 2's.
        tcbs[1].deadline_rem = 3;
        tcbs[2].deadline_rem = 7;
        let mut q = Queue::new(MAX_TASKS).unwrap();
        q.add_tail(2).unwrap();
        q.add_tail(1).unwrap();
        assert_eq!(pick_rt(&mut q, &tcbs, RtPolicy::EarliestDeadlineFirst), Some(1));
    }

    #[test]
    fn test_ties_break_to_lower_id() {
        let mut tcbs = arena();
        spawn_rt(&mut tcbs, 4, 10, 1, 10);
        spawn_rt(&mut tcbs, 2, 10, 1, 10);
        let mut q = Queue::new(MAX_TASKS).unwrap();
        q.add_tail(4).unwrap();
        q.add_tail(2).unwrap();
        assert_eq!(pick_rt(&mut q, &tcbs, RtPolicy::RateMonotonic), Some(2));
    }

    #[test]
    fn test_pick_rt_drops_finished_jobs() {
        let mut tcbs = arena();
        spawn_rt(&mut tcbs, 1, 10, 2, 10);
        tcbs[1].capacity_rem = 0;
        let mut q = Queue::new(MAX_TASKS).unwrap();
        q.add_tail(1).unwrap();
        assert_eq!(pick_rt(&mut q, &tcbs, RtPolicy::RateMonotonic), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_priority_rr_share_ratio() {
        // Three tasks with priorities 10:5:1 must receive CPU in that
        // ratio over whole passes of the queue.
        let mut tcbs = arena();
        spawn_be(&mut tcbs, 1, 10);
        spawn_be(&mut tcbs, 2, 5);
        spawn_be(&mut tcbs, 3, 1);
        let mut q = Queue::new(MAX_TASKS).unwrap();
        for id in 1..=3 {
            q.add_tail(id).unwrap();
        }
        let mut shares = [0u32; 4];
        // Each pass of the queue grants 10 + 5 + 1 = 16 dispatches.
        for _ in 0..(16 * 8) {
            if let Some(id) = pick_be(&mut q, &mut tcbs) {
                shares[id] += 1;
            }
        }
        assert_eq!(shares[1] / shares[3], 10);
        assert_eq!(shares[2] / shares[3], 5);
    }

    #[test]
    fn test_priority_rr_zero_priorities_round_robin() {
        let mut tcbs = arena();
        spawn_be(&mut tcbs, 1, 0);
        spawn_be(&mut tcbs, 2, 0);
        let mut q = Queue::new(MAX_TASKS).unwrap();
        q.add_tail(1).unwrap();
        q.add_tail(2).unwrap();
        let a = pick_be(&mut q, &mut tcbs).unwrap();
        let b = pick_be(&mut q, &mut tcbs).unwrap();
        let c = pick_be(&mut q, &mut tcbs).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_pick_be_empty_queue() {
        let mut tcbs = arena();
        let mut q = Queue::new(MAX_TASKS).unwrap();
        assert_eq!(pick_be(&mut q, &mut tcbs), None);
    }

    #[test]
    fn test_rma_bound_table_matches_formula() {
        for n in 1..=MAX_TASKS {
            let exact = n as f64 * ((2f64).powf(1.0 / n as f64) - 1.0) * UTIL_SCALE as f64;
            let diff = (RMA_BOUND[n - 1] as f64 - exact).abs();
            assert!(diff <= 1.0, "n={n}: table {} vs {exact}", RMA_BOUND[n - 1]);
        }
    }

    #[test]
    fn test_admission_rma_accepts_low_utilization() {
        // (C=2, T=10) and (C=3, T=15): utilization 0.4, well under the
        // two-task bound of 0.8284.
        let mut tcbs = arena();
        spawn_rt(&mut tcbs, 1, 10, 2, 10);
        let cand = TaskParams::periodic(15, 3, 15);
        assert!(admit(&tcbs, &cand, RtPolicy::RateMonotonic));
    }

    #[test]
    fn test_admission_rma_refuses_overload() {
        // Four admitted tasks at 0.40; a fifth with C=2, T=5 would push
        // the sum to 0.80, over the five-task bound of 0.7434.
        let mut tcbs = arena();
        for id in 1..=4 {
            spawn_rt(&mut tcbs, id, 10, 1, 10);
        }
        assert_eq!(utilization(&tcbs), 4000);
        let cand = TaskParams::periodic(5, 2, 5);
        assert!(!admit(&tcbs, &cand, RtPolicy::RateMonotonic));
        // EDF would still take it: 0.80 <= 1.0.
        assert!(admit(&tcbs, &cand, RtPolicy::EarliestDeadlineFirst));
    }

    #[test]
    fn test_admission_edf_full_utilization() {
        // (1,4), (2,6), (3,8): utilization 0.9583 <= 1.0.
        let mut tcbs = arena();
        spawn_rt(&mut tcbs, 1, 4, 1, 4);
        spawn_rt(&mut tcbs, 2, 6, 2, 6);
        let cand = TaskParams::periodic(8, 3, 8);
        assert!(admit(&tcbs, &cand, RtPolicy::EarliestDeadlineFirst));
        // One more tick of demand anywhere breaks the bound.
        let over = TaskParams::periodic(8, 4, 8);
        assert!(!admit(&tcbs, &over, RtPolicy::EarliestDeadlineFirst));
    }
}
