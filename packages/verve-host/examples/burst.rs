//! Schedules a burst of mixed-priority work, a delayed task, and a
//! self-splitting task, then drains it all in real time.
//!
//! Run with `RUST_LOG=trace` to watch the scheduler's decisions.

use verve_host::HostLoop;
use verve_scheduler::{CallbackContext, Priority, ScheduleOptions, Scheduler, TaskOutcome};

fn main() {
    env_logger::init();

    let mut host = HostLoop::new();

    for (label, priority) in [
        ("render", Priority::UserBlocking),
        ("sync state", Priority::Normal),
        ("prefetch", Priority::Low),
        ("warm cache", Priority::Idle),
    ] {
        host.scheduler().schedule(
            priority,
            Box::new(move |_scheduler: &mut Scheduler, ctx: CallbackContext| {
                println!("{label} (timed out: {})", ctx.did_timeout);
                TaskOutcome::Done
            }),
        );
    }

    host.scheduler().schedule_with_options(
        Priority::Normal,
        Box::new(|_scheduler: &mut Scheduler, _ctx: CallbackContext| {
            println!("delayed task, 50ms later");
            TaskOutcome::Done
        }),
        ScheduleOptions { delay: 50.0 },
    );

    host.scheduler().schedule(
        Priority::Normal,
        Box::new(|scheduler: &mut Scheduler, _ctx: CallbackContext| {
            let mut chunk = 0u32;
            while chunk < 3 && !scheduler.should_yield() {
                println!("chunked work, part {chunk}");
                chunk += 1;
            }
            if chunk < 3 {
                TaskOutcome::Continue(Box::new(|_scheduler, _ctx| {
                    println!("chunked work, finishing");
                    TaskOutcome::Done
                }))
            } else {
                TaskOutcome::Done
            }
        }),
    );

    host.run_until_idle();
    println!("all work drained at t={:.1}ms", host.scheduler().now());
}
