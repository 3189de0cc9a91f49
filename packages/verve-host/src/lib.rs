//! Real-time host loop for the verve scheduler.
//!
//! The scheduler core only records its wishes through a bridge; something
//! still has to wake it up. On the web that role falls to a message port
//! or timer; here it is a plain blocking loop that drains the mailbox,
//! sleeps until the next armed timeout, and pumps the work driver.

use std::thread;
use std::time::Duration;

use verve_scheduler::{MailboxBridge, MonotonicClock, Scheduler};

/// Owns a [`Scheduler`] wired to a mailbox bridge and a wall clock, and
/// drives it in real time on the current thread.
pub struct HostLoop {
    scheduler: Scheduler,
    bridge: MailboxBridge,
}

impl HostLoop {
    pub fn new() -> Self {
        let bridge = MailboxBridge::new();
        let scheduler = Scheduler::new(Box::new(bridge.clone()), Box::new(MonotonicClock::new()));
        Self { scheduler, bridge }
    }

    /// The owned scheduler, for scheduling and cancelling work.
    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Runs until the scheduler has nothing left: no requested work burst
    /// and no armed timeout. Callback panics propagate; the wake-up that
    /// the driver re-requested survives in the mailbox, so calling
    /// `run_until_idle` again resumes draining the remaining queue.
    pub fn run_until_idle(&mut self) {
        loop {
            if self.bridge.take_callback_request() {
                self.scheduler.perform_work_until_deadline();
                continue;
            }
            match self.bridge.take_timeout() {
                Some(delay_ms) => {
                    tracing::trace!("sleeping {}ms until the next timer", delay_ms);
                    if delay_ms > 0.0 {
                        thread::sleep(Duration::from_secs_f64(delay_ms / 1000.0));
                    }
                    self.scheduler.handle_timeout();
                }
                None => break,
            }
        }
        tracing::debug!("host loop idle");
    }
}

impl Default for HostLoop {
    fn default() -> Self {
        Self::new()
    }
}
