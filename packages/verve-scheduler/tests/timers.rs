use std::cell::RefCell;
use std::rc::Rc;

use verve_scheduler::{
    CallbackContext, MailboxBridge, ManualClock, Priority, ScheduleOptions, Scheduler, TaskOutcome,
};

fn fixture() -> (Scheduler, MailboxBridge, ManualClock) {
    let bridge = MailboxBridge::new();
    let clock = ManualClock::new();
    let scheduler = Scheduler::new(Box::new(bridge.clone()), Box::new(clock.clone()));
    (scheduler, bridge, clock)
}

fn pump(scheduler: &mut Scheduler, bridge: &MailboxBridge) {
    while bridge.take_callback_request() {
        scheduler.perform_work_until_deadline();
    }
}

fn delay(ms: f64) -> ScheduleOptions {
    ScheduleOptions { delay: ms }
}

#[test]
fn test_delayed_task_promotes_through_timeout() {
    let (mut scheduler, bridge, clock) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        scheduler.schedule_with_options(
            Priority::Normal,
            Box::new(move |_scheduler: &mut Scheduler, _ctx: CallbackContext| {
                log.borrow_mut().push("x");
                TaskOutcome::Done
            }),
            delay(100.0),
        );
    }

    // Parked in the timer queue: nothing ready, a timeout armed instead.
    assert!(scheduler.first_task().is_none());
    assert!(scheduler.has_pending_work());
    assert_eq!(bridge.armed_timeout(), Some(100.0));
    assert!(!bridge.has_callback_request());

    clock.set(50.0);
    assert!(scheduler.first_task().is_none());

    clock.set(100.0);
    bridge.take_timeout();
    scheduler.handle_timeout();

    // Promoted and the host woken.
    assert!(scheduler.first_task().is_some());
    assert!(bridge.has_callback_request());

    pump(&mut scheduler, &bridge);
    assert_eq!(*log.borrow(), vec!["x"]);
    assert!(!scheduler.has_pending_work());
}

#[test]
fn test_earlier_timer_rearms_the_timeout() {
    let (mut scheduler, bridge, _clock) = fixture();

    let noop =
        || Box::new(|_scheduler: &mut Scheduler, _ctx: CallbackContext| TaskOutcome::Done);

    scheduler.schedule_with_options(Priority::Normal, noop(), delay(100.0));
    assert_eq!(bridge.armed_timeout(), Some(100.0));
    assert_eq!(bridge.timeout_requests(), 1);

    // Sooner start supersedes the armed timeout.
    scheduler.schedule_with_options(Priority::Normal, noop(), delay(50.0));
    assert_eq!(bridge.armed_timeout(), Some(50.0));
    assert_eq!(bridge.timeout_requests(), 2);
    assert_eq!(bridge.timeout_cancels(), 1);

    // A later start changes nothing.
    scheduler.schedule_with_options(Priority::Normal, noop(), delay(200.0));
    assert_eq!(bridge.armed_timeout(), Some(50.0));
    assert_eq!(bridge.timeout_requests(), 2);
}

#[test]
fn test_timeout_rearms_while_timers_remain() {
    let (mut scheduler, bridge, clock) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    for (name, start) in [("x", 100.0), ("y", 300.0)] {
        let log = log.clone();
        scheduler.schedule_with_options(
            Priority::Normal,
            Box::new(move |_scheduler: &mut Scheduler, _ctx: CallbackContext| {
                log.borrow_mut().push(name);
                TaskOutcome::Done
            }),
            delay(start),
        );
    }

    clock.set(100.0);
    bridge.take_timeout();
    scheduler.handle_timeout();
    pump(&mut scheduler, &bridge);

    // x drained; the loop re-armed for y's start.
    assert_eq!(*log.borrow(), vec!["x"]);
    assert_eq!(bridge.armed_timeout(), Some(200.0));

    clock.set(300.0);
    bridge.take_timeout();
    scheduler.handle_timeout();
    pump(&mut scheduler, &bridge);

    assert_eq!(*log.borrow(), vec!["x", "y"]);
    assert!(!scheduler.has_pending_work());
}

#[test]
fn test_timeout_chains_when_nothing_promotes() {
    let (mut scheduler, bridge, clock) = fixture();

    scheduler.schedule_with_options(
        Priority::Normal,
        Box::new(|_scheduler: &mut Scheduler, _ctx: CallbackContext| TaskOutcome::Done),
        delay(100.0),
    );

    // Timeout fired early (hosts only guarantee "at least"): nothing is due
    // yet, so a fresh timeout is armed for the remainder.
    clock.set(40.0);
    bridge.take_timeout();
    scheduler.handle_timeout();

    assert!(!bridge.has_callback_request());
    assert_eq!(bridge.armed_timeout(), Some(60.0));
}

#[test]
fn test_cancelled_timer_is_discarded_silently() {
    let (mut scheduler, bridge, clock) = fixture();

    let handle = scheduler.schedule_with_options(
        Priority::Normal,
        Box::new(|_scheduler: &mut Scheduler, _ctx: CallbackContext| {
            panic!("cancelled task must not run");
        }),
        delay(100.0),
    );
    scheduler.cancel(&handle);

    clock.set(100.0);
    bridge.take_timeout();
    scheduler.handle_timeout();

    // The tombstone was discarded at the root; no work, no wake-up.
    assert!(!bridge.has_callback_request());
    assert!(!scheduler.has_pending_work());
}

#[test]
fn test_ready_work_defers_timer_arming_to_the_loop() {
    let (mut scheduler, bridge, _clock) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        scheduler.schedule(
            Priority::Normal,
            Box::new(move |_scheduler: &mut Scheduler, _ctx: CallbackContext| {
                log.borrow_mut().push("ready");
                TaskOutcome::Done
            }),
        );
    }
    scheduler.schedule_with_options(
        Priority::Normal,
        Box::new(|_scheduler: &mut Scheduler, _ctx: CallbackContext| TaskOutcome::Done),
        delay(50.0),
    );

    // Ready work exists, so no timeout was armed at schedule time.
    assert_eq!(bridge.timeout_requests(), 0);

    pump(&mut scheduler, &bridge);

    // Once the ready queue drained, the loop armed for the earliest timer.
    assert_eq!(*log.borrow(), vec!["ready"]);
    assert_eq!(bridge.armed_timeout(), Some(50.0));
}

#[test]
fn test_delays_become_eligible_in_start_order() {
    let (mut scheduler, bridge, clock) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    for (name, start) in [("late", 80.0), ("early", 20.0)] {
        let log = log.clone();
        scheduler.schedule_with_options(
            Priority::Normal,
            Box::new(move |_scheduler: &mut Scheduler, _ctx: CallbackContext| {
                log.borrow_mut().push(name);
                TaskOutcome::Done
            }),
            delay(start),
        );
    }

    // Both due by now; promotion order follows start times.
    clock.set(200.0);
    bridge.take_timeout();
    scheduler.handle_timeout();
    pump(&mut scheduler, &bridge);

    assert_eq!(*log.borrow(), vec!["early", "late"]);
}
