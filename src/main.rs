//! # EmberOS Demo Firmware
//!
//! Exercises every scheduling class at once:
//!
//! | Task | Class | Parameters | Behavior |
//! |------|-------|------------|----------|
//! | `sensor_task` | real-time | T=10, C=2, D=10 | samples, yields job |
//! | `control_task` | real-time | T=15, C=3, D=15 | control step, yields job |
//! | `crunch_task` ×3 | best-effort | priorities 10, 5, 1 | bulk work |
//! | `burst_generator` | real-time | T=10, C=2, D=10 | spawns aperiodic jobs |
//!
//! With the polling server the periodic set claims 0.9 of the CPU
//! under EDF. Best-effort tasks share what remains roughly 10:5:1.
//! The generator drops a finite aperiodic job into the server's queue
//! at pseudo-random intervals, exercising the budget machinery.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use cortex_m_rt::entry;
    use panic_halt as _;

    use emberos::kernel;
    use emberos::kprintln;
    use emberos::{RtPolicy, TaskParams};

    /// Tiny xorshift PRNG for the burst generator's arrival jitter.
    /// Determinism per boot is fine for a demo.
    struct XorShift(u32);

    impl XorShift {
        fn next(&mut self) -> u32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0 = x;
            x
        }
    }

    /// Periodic sensor sampling. `yield_now` marks the job complete
    /// for this period.
    extern "C" fn sensor_task() {
        let mut sample: u32 = 0;
        loop {
            for _ in 0..500 {
                sample = sample.wrapping_add(3);
            }
            kernel::yield_now();
        }
    }

    /// Periodic control step, longer period and capacity.
    extern "C" fn control_task() {
        let mut state: u32 = 0;
        loop {
            for _ in 0..800 {
                state = state.wrapping_mul(5).wrapping_add(1);
            }
            kernel::yield_now();
        }
    }

    /// Best-effort bulk work: never yields, runs out its quantum.
    extern "C" fn crunch_task() {
        let mut acc: u32 = 0;
        loop {
            acc = acc.wrapping_add(1);
        }
    }

    /// One-shot aperiodic payload; returning terminates the job and
    /// frees its slot.
    extern "C" fn burst_job() {
        let mut work: u32 = 0;
        for _ in 0..20_000 {
            work = work.wrapping_add(7);
        }
    }

    /// Periodic task that feeds the polling server: spawns one
    /// aperiodic job, then sleeps 60–200 ms.
    extern "C" fn burst_generator() {
        let mut rng = XorShift(0xbaad_d00d);
        loop {
            let demand = 1 + rng.next() % 4;
            match kernel::spawn(burst_job, TaskParams::aperiodic(demand), "burst job", 1024) {
                Ok(id) => kprintln!("GEN: queued aperiodic task {} (demand {})", id, demand),
                Err(e) => kprintln!("GEN: spawn failed: {:?}", e),
            }
            kernel::delay_ms(60 + rng.next() % 140);
        }
    }

    /// Application entry: bring the kernel up, create the task set,
    /// start scheduling.
    #[entry]
    fn main() -> ! {
        if let Err(e) = kernel::init() {
            kprintln!("KERNEL: init failed: {:?}", e);
            loop {
                cortex_m::asm::wfi();
            }
        }

        // The full periodic set (server included) claims 0.9 of the
        // CPU, past the rate-monotonic bound; run it under EDF.
        kernel::set_rt_policy(RtPolicy::EarliestDeadlineFirst);

        let mut ok = true;
        ok &= kernel::spawn(sensor_task, TaskParams::periodic(10, 2, 10), "sensor", 1024).is_ok();
        ok &= kernel::spawn(control_task, TaskParams::periodic(15, 3, 15), "control", 1024).is_ok();
        ok &= kernel::spawn(crunch_task, TaskParams::best_effort(10), "logger", 1024).is_ok();
        ok &= kernel::spawn(crunch_task, TaskParams::best_effort(5), "housekeeping", 1024).is_ok();
        ok &= kernel::spawn(crunch_task, TaskParams::best_effort(1), "background", 1024).is_ok();
        ok &= kernel::spawn(burst_generator, TaskParams::periodic(10, 2, 10), "burst generator", 1024)
            .is_ok();
        if !ok {
            kprintln!("KERNEL: task set incomplete");
        }

        kernel::start()
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    // The firmware image only exists for the embedded target; building
    // the binary on the host is a no-op so `cargo test` stays green.
}
