use std::cell::RefCell;
use std::rc::Rc;

/// The capability set a host lends to the scheduler: "run me again soon"
/// and a single re-armable timeout. The yield policy lives in the
/// scheduler, not here; a bridge only arranges future invocations of
/// `Scheduler::perform_work_until_deadline` and `Scheduler::handle_timeout`.
pub trait HostBridge {
    /// Arrange one future invocation of the work driver, as soon as the
    /// host can make one. The scheduler never issues a second request
    /// while one is outstanding.
    fn request_host_callback(&mut self);

    /// Arrange a single invocation of the timeout handler after at least
    /// `delay_ms`. At most one timeout is armed at a time; a new request
    /// supersedes the old one.
    fn request_host_timeout(&mut self, delay_ms: f64);

    /// Disarm any armed timeout.
    fn cancel_host_timeout(&mut self);
}

/// Bridge that drops every request. For embedders that poll the scheduler
/// on their own cadence and don't need to be told when work appears.
pub struct NullBridge;

impl HostBridge for NullBridge {
    fn request_host_callback(&mut self) {}

    fn request_host_timeout(&mut self, _delay_ms: f64) {}

    fn cancel_host_timeout(&mut self) {}
}

#[derive(Default)]
struct Mailbox {
    callback_requested: bool,
    armed_timeout_ms: Option<f64>,
    callback_requests: u32,
    timeout_requests: u32,
    timeout_cancels: u32,
}

/// Single-threaded mailbox bridge. The scheduler writes requests through
/// the [`HostBridge`] impl; the host keeps a clone of the handle and drains
/// them from its own loop. Cumulative counters are kept so hosts (and
/// tests) can observe how often each capability was exercised.
#[derive(Clone, Default)]
pub struct MailboxBridge {
    inner: Rc<RefCell<Mailbox>>,
}

impl MailboxBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the pending callback request, if any.
    pub fn take_callback_request(&self) -> bool {
        let mut mailbox = self.inner.borrow_mut();
        std::mem::take(&mut mailbox.callback_requested)
    }

    pub fn has_callback_request(&self) -> bool {
        self.inner.borrow().callback_requested
    }

    /// Consumes the armed timeout, returning its delay in milliseconds.
    pub fn take_timeout(&self) -> Option<f64> {
        self.inner.borrow_mut().armed_timeout_ms.take()
    }

    pub fn armed_timeout(&self) -> Option<f64> {
        self.inner.borrow().armed_timeout_ms
    }

    pub fn callback_requests(&self) -> u32 {
        self.inner.borrow().callback_requests
    }

    pub fn timeout_requests(&self) -> u32 {
        self.inner.borrow().timeout_requests
    }

    pub fn timeout_cancels(&self) -> u32 {
        self.inner.borrow().timeout_cancels
    }
}

impl HostBridge for MailboxBridge {
    fn request_host_callback(&mut self) {
        let mut mailbox = self.inner.borrow_mut();
        mailbox.callback_requested = true;
        mailbox.callback_requests += 1;
    }

    fn request_host_timeout(&mut self, delay_ms: f64) {
        let mut mailbox = self.inner.borrow_mut();
        mailbox.armed_timeout_ms = Some(delay_ms);
        mailbox.timeout_requests += 1;
    }

    fn cancel_host_timeout(&mut self) {
        let mut mailbox = self.inner.borrow_mut();
        mailbox.armed_timeout_ms = None;
        mailbox.timeout_cancels += 1;
    }
}
