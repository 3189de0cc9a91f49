use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::clock::{Clock, MonotonicClock};
use crate::heap::MinHeap;
use crate::host::{HostBridge, NullBridge};
use crate::profiling::Profiler;
use crate::task::{CallbackContext, Priority, Task, TaskCallback, TaskHandle, TaskOutcome};

const DEFAULT_FRAME_INTERVAL_MS: f64 = 5.0;
const MAX_FRAME_RATE: u32 = 125;

/// Options for `schedule_with_options`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScheduleOptions {
    /// Earliest-start delay in milliseconds. Negative values are treated
    /// as zero.
    pub delay: f64,
}

/// Cooperative priority scheduler.
///
/// Owns two deadline-ordered queues: ready work sorted by expiration time
/// and delayed work sorted by start time. Ready tasks are dispatched in
/// short bursts from `perform_work_until_deadline`, yielding back to the
/// host whenever the frame budget elapses so host-level activity is never
/// starved. All state is single-threaded; callbacks get the scheduler
/// handed back in, which is how re-entrant scheduling works.
pub struct Scheduler {
    task_queue: MinHeap<Rc<Task>>,
    timer_queue: MinHeap<Rc<Task>>,
    next_task_id: u32,
    current_task: Option<Rc<Task>>,
    current_priority: Priority,
    is_performing_work: bool,
    is_host_callback_scheduled: bool,
    is_host_timeout_scheduled: bool,
    is_message_loop_running: bool,
    is_paused: bool,
    frame_interval_ms: f64,
    work_started_at: f64,
    clock: Box<dyn Clock>,
    bridge: Box<dyn HostBridge>,
    profiler: Profiler,
}

impl Scheduler {
    pub fn new(bridge: Box<dyn HostBridge>, clock: Box<dyn Clock>) -> Self {
        Self {
            task_queue: MinHeap::new(),
            timer_queue: MinHeap::new(),
            next_task_id: 1,
            current_task: None,
            current_priority: Priority::Normal,
            is_performing_work: false,
            is_host_callback_scheduled: false,
            is_host_timeout_scheduled: false,
            is_message_loop_running: false,
            is_paused: false,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            work_started_at: 0.0,
            clock,
            bridge,
            profiler: Profiler::default(),
        }
    }

    /// Current time in milliseconds, from the scheduler's clock.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Schedules `callback` at `priority` with no delay.
    pub fn schedule(&mut self, priority: Priority, callback: TaskCallback) -> TaskHandle {
        self.schedule_with_options(priority, callback, ScheduleOptions::default())
    }

    /// Schedules `callback` at `priority`. A positive `options.delay`
    /// parks the task in the timer queue until its start time; otherwise
    /// it is immediately ready, ordered by its expiration deadline.
    pub fn schedule_with_options(
        &mut self,
        priority: Priority,
        callback: TaskCallback,
        options: ScheduleOptions,
    ) -> TaskHandle {
        let current_time = self.clock.now();
        let priority = priority.coerced();
        let delay = options.delay.max(0.0);
        let start_time = current_time + delay;
        let expiration_time = start_time + priority.timeout_ms();

        let task = Rc::new(Task {
            id: self.take_task_id(),
            priority,
            start_time,
            expiration_time,
            sort_index: Cell::new(0.0),
            callback: RefCell::new(Some(callback)),
            is_queued: Cell::new(false),
        });
        tracing::trace!(
            "scheduling task {} at {:?} (delay {}ms)",
            task.id,
            priority,
            delay
        );

        if start_time > current_time {
            // Delayed task.
            task.sort_index.set(start_time);
            self.timer_queue.push(task.clone());
            let is_earliest_timer = self
                .timer_queue
                .peek()
                .map_or(false, |root| Rc::ptr_eq(root, &task));
            if self.task_queue.is_empty() && is_earliest_timer {
                // All work is delayed and this is the soonest start, so the
                // armed timeout (if any) is stale.
                if self.is_host_timeout_scheduled {
                    self.bridge.cancel_host_timeout();
                } else {
                    self.is_host_timeout_scheduled = true;
                }
                self.bridge.request_host_timeout(start_time - current_time);
            }
        } else {
            task.sort_index.set(expiration_time);
            self.task_queue.push(task.clone());
            self.profiler.mark_task_start(&task, current_time);
            task.is_queued.set(true);
            // Wake the host unless it is already on its way, or we are
            // inside the work loop (which re-checks the queue itself).
            if !self.is_host_callback_scheduled && !self.is_performing_work {
                self.is_host_callback_scheduled = true;
                self.request_host_callback();
            }
        }

        TaskHandle { task }
    }

    /// Cancels a task. O(1): the callback is nulled and the entry is left
    /// to be discarded when it surfaces at a heap root. Cancelling a task
    /// that already completed is a no-op.
    pub fn cancel(&mut self, handle: &TaskHandle) {
        if handle.task.is_queued.get() {
            let current_time = self.clock.now();
            self.profiler.mark_task_canceled(&handle.task, current_time);
            handle.task.is_queued.set(false);
        }
        *handle.task.callback.borrow_mut() = None;
    }

    /// The highest-priority ready task, if any. Hosts that coalesce work
    /// use this to inspect what would run next.
    pub fn first_task(&self) -> Option<TaskHandle> {
        self.task_queue.peek().map(|task| TaskHandle { task: task.clone() })
    }

    /// True while either queue holds live or tombstoned entries.
    pub fn has_pending_work(&self) -> bool {
        !self.task_queue.is_empty() || !self.timer_queue.is_empty()
    }

    /// The priority of the running callback, or `Normal` outside of one.
    pub fn current_priority(&self) -> Priority {
        self.current_priority
    }

    /// Runs `f` synchronously at `priority`, restoring the previous
    /// priority on every exit path, unwinding included.
    pub fn run_with_priority<R>(
        &mut self,
        priority: Priority,
        f: impl FnOnce(&mut Scheduler) -> R,
    ) -> R {
        self.with_priority(priority.coerced(), f)
    }

    /// Runs `f` at no higher than `Normal` priority: an Immediate,
    /// UserBlocking or Normal caller drops to Normal, a Low or Idle caller
    /// keeps its own level.
    pub fn run_next<R>(&mut self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        let priority = match self.current_priority {
            Priority::Immediate | Priority::UserBlocking | Priority::Normal => Priority::Normal,
            other => other,
        };
        self.with_priority(priority, f)
    }

    /// Wraps `f` so every later invocation runs at the priority that was
    /// current when `wrap_callback` was called, not when the wrapper runs.
    pub fn wrap_callback<R, F>(&self, mut f: F) -> impl FnMut(&mut Scheduler) -> R
    where
        F: FnMut(&mut Scheduler) -> R,
    {
        let captured = self.current_priority;
        move |scheduler: &mut Scheduler| scheduler.with_priority(captured, |s| f(s))
    }

    fn with_priority<R>(&mut self, priority: Priority, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        let previous = self.current_priority;
        self.current_priority = priority;
        let result = catch_unwind(AssertUnwindSafe(|| f(self)));
        self.current_priority = previous;
        match result {
            Ok(value) => value,
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Stops the work loop between tasks. Observable only with the `debug`
    /// feature; without it the paused flag is never read.
    pub fn pause_execution(&mut self) {
        if cfg!(feature = "debug") {
            self.is_paused = true;
        }
    }

    /// Clears the paused flag and wakes the host if work is waiting.
    pub fn continue_execution(&mut self) {
        if !cfg!(feature = "debug") {
            return;
        }
        self.is_paused = false;
        if !self.is_host_callback_scheduled && !self.is_performing_work {
            self.is_host_callback_scheduled = true;
            self.request_host_callback();
        }
    }

    /// Sets the yield budget from a target frame rate. `0` restores the
    /// 5 ms default; rates above 125 fps are rejected.
    pub fn force_frame_rate(&mut self, fps: u32) {
        if fps > MAX_FRAME_RATE {
            tracing::error!(
                "frame rates above {} fps are not supported; keeping {}ms",
                MAX_FRAME_RATE,
                self.frame_interval_ms
            );
            return;
        }
        self.frame_interval_ms = if fps > 0 {
            (1000 / fps) as f64
        } else {
            DEFAULT_FRAME_INTERVAL_MS
        };
    }

    /// True once the current host invocation has used up its frame budget.
    /// Long-running callbacks poll this and return a continuation to split
    /// their work.
    pub fn should_yield(&self) -> bool {
        self.clock.now() - self.work_started_at >= self.frame_interval_ms
    }

    /// Reserved; paint signalling is handled by the host's own frame
    /// primitive.
    pub fn request_paint(&mut self) {}

    /// Begins recording profiling events.
    pub fn start_profiling(&mut self) {
        self.profiler.start_logging();
    }

    /// Stops recording and returns the event buffer as bytes, or `None`
    /// if profiling was not active.
    pub fn stop_profiling(&mut self) -> Option<Vec<u8>> {
        self.profiler.stop_logging()
    }

    /// Host entry point for the armed timeout: promotes due timers, then
    /// either wakes the host (ready work exists) or re-arms for the next
    /// start time.
    pub fn handle_timeout(&mut self) {
        let current_time = self.clock.now();
        self.is_host_timeout_scheduled = false;
        self.advance_timers(current_time);

        if self.is_host_callback_scheduled {
            return;
        }
        if self.task_queue.peek().is_some() {
            self.is_host_callback_scheduled = true;
            self.request_host_callback();
        } else if let Some(start_time) = self.timer_queue.peek().map(|t| t.start_time) {
            self.bridge.request_host_timeout(start_time - current_time);
        }
    }

    /// Host entry point for the requested callback: anchors the frame
    /// budget, flushes work, and re-requests itself while work remains.
    /// A panicking callback propagates, but the reschedule still happens
    /// so the queue keeps draining.
    pub fn perform_work_until_deadline(&mut self) {
        if self.is_performing_work || !self.is_message_loop_running {
            return;
        }
        let current_time = self.clock.now();
        self.work_started_at = current_time;

        let result = catch_unwind(AssertUnwindSafe(|| self.flush_work(current_time)));
        match result {
            Ok(true) => self.bridge.request_host_callback(),
            Ok(false) => self.is_message_loop_running = false,
            Err(payload) => {
                self.bridge.request_host_callback();
                resume_unwind(payload);
            }
        }
    }

    fn take_task_id(&mut self) -> u32 {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    fn request_host_callback(&mut self) {
        if !self.is_message_loop_running {
            self.is_message_loop_running = true;
            self.bridge.request_host_callback();
        }
    }

    /// Promotes every timer whose start time has passed, discarding
    /// tombstones along the way. The only mechanism that moves tasks from
    /// the timer queue to the task queue.
    fn advance_timers(&mut self, current_time: f64) {
        loop {
            let timer = match self.timer_queue.peek() {
                Some(timer) => timer.clone(),
                None => break,
            };
            if timer.callback.borrow().is_none() {
                self.timer_queue.pop();
                continue;
            }
            if timer.start_time > current_time {
                break;
            }
            self.timer_queue.pop();
            timer.sort_index.set(timer.expiration_time);
            self.task_queue.push(timer.clone());
            self.profiler.mark_task_start(&timer, current_time);
            timer.is_queued.set(true);
        }
    }

    fn flush_work(&mut self, initial_time: f64) -> bool {
        self.profiler.mark_scheduler_unsuspended(initial_time);

        self.is_host_callback_scheduled = false;
        if self.is_host_timeout_scheduled {
            // A host callback superseded the timeout; advance_timers in the
            // work loop covers whatever the timeout would have promoted.
            self.is_host_timeout_scheduled = false;
            self.bridge.cancel_host_timeout();
        }

        self.is_performing_work = true;
        let previous_priority = self.current_priority;

        let result = catch_unwind(AssertUnwindSafe(|| self.work_loop(initial_time)));
        if result.is_err() {
            let current_time = self.clock.now();
            if let Some(task) = self.current_task.as_ref() {
                self.profiler.mark_task_errored(task, current_time);
                task.is_queued.set(false);
            }
        }

        self.current_task = None;
        self.current_priority = previous_priority;
        self.is_performing_work = false;
        self.profiler.mark_scheduler_suspended(self.clock.now());

        match result {
            Ok(has_more_work) => has_more_work,
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Dispatches ready tasks until the queue drains, the frame budget
    /// forces a yield, or a continuation hands control back. Returns true
    /// iff more work remains and the caller should reschedule.
    fn work_loop(&mut self, initial_time: f64) -> bool {
        let mut current_time = initial_time;
        self.advance_timers(current_time);
        self.current_task = self.task_queue.peek().cloned();

        while let Some(task) = self.current_task.clone() {
            if cfg!(feature = "debug") && self.is_paused {
                break;
            }
            if task.expiration_time > current_time && self.should_yield() {
                // Not overdue yet; give the host its turn. Overdue tasks
                // run regardless of the budget.
                break;
            }

            let callback = task.callback.borrow_mut().take();
            match callback {
                Some(callback) => {
                    // The callback slot is already empty: if the callback
                    // unwinds, the entry is a tombstone and never retried.
                    self.current_priority = task.priority;
                    let did_timeout = task.expiration_time <= current_time;
                    self.profiler.mark_task_run(&task, current_time);
                    let outcome = callback(self, CallbackContext { did_timeout });
                    current_time = self.clock.now();
                    match outcome {
                        TaskOutcome::Continue(continuation) => {
                            // The task keeps its heap position and id; only
                            // the callback is replaced.
                            *task.callback.borrow_mut() = Some(continuation);
                            self.profiler.mark_task_yield(&task, current_time);
                            self.advance_timers(current_time);
                            return true;
                        }
                        TaskOutcome::Done => {
                            self.profiler.mark_task_completed(&task, current_time);
                            task.is_queued.set(false);
                            // A re-entrant schedule may have displaced the
                            // root; only pop if this task still is it.
                            let still_root = self
                                .task_queue
                                .peek()
                                .map_or(false, |root| Rc::ptr_eq(root, &task));
                            if still_root {
                                self.task_queue.pop();
                            }
                            self.advance_timers(current_time);
                        }
                    }
                }
                None => {
                    // Tombstone.
                    self.task_queue.pop();
                }
            }
            self.current_task = self.task_queue.peek().cloned();
        }

        if self.current_task.is_some() {
            return true;
        }
        if let Some(start_time) = self.timer_queue.peek().map(|t| t.start_time) {
            self.bridge.request_host_timeout(start_time - current_time);
        }
        false
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Box::new(NullBridge), Box::new(MonotonicClock::new()))
    }
}
