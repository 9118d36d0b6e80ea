//! Start/stop requests from the engine to the USB stack tasks.
//!
//! The engine calls its collaborators synchronously from inside `run()`, so
//! the port only records the wanted level here. The stack tasks pick it up
//! on their next await. A request that is overwritten before the task woke
//! is never seen; only the latest level matters.

use embassy_sync::signal::Signal;

use super::OtgMutex;

pub struct StackSignals {
    gadget: Signal<OtgMutex, bool>,
    host: Signal<OtgMutex, bool>,
    sof: Signal<OtgMutex, bool>,
    rearm: Signal<OtgMutex, ()>,
}

impl Default for StackSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl StackSignals {
    pub const fn new() -> Self {
        Self {
            gadget: Signal::new(),
            host: Signal::new(),
            sof: Signal::new(),
            rearm: Signal::new(),
        }
    }

    pub fn request_gadget(&self, on: bool) {
        self.gadget.signal(on);
    }

    pub fn request_host(&self, on: bool) {
        self.host.signal(on);
    }

    pub fn request_sof(&self, on: bool) {
        self.sof.signal(on);
    }

    /// Tells the OTG task that a timer channel changed outside its loop.
    pub fn notify_rearm(&self) {
        self.rearm.signal(());
    }

    pub async fn gadget_request(&self) -> bool {
        self.gadget.wait().await
    }

    pub async fn host_request(&self) -> bool {
        self.host.wait().await
    }

    pub async fn sof_request(&self) -> bool {
        self.sof.wait().await
    }

    pub async fn rearmed(&self) {
        self.rearm.wait().await;
    }

    pub fn take_gadget(&self) -> Option<bool> {
        self.gadget.try_take()
    }

    pub fn take_host(&self) -> Option<bool> {
        self.host.try_take()
    }

    pub fn take_sof(&self) -> Option<bool> {
        self.sof.try_take()
    }

    pub fn take_rearm(&self) -> bool {
        self.rearm.try_take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_request_wins() {
        let stacks = StackSignals::new();
        stacks.request_gadget(true);
        stacks.request_gadget(false);
        assert_eq!(stacks.take_gadget(), Some(false));
        assert_eq!(stacks.take_gadget(), None);
    }

    #[test]
    fn stacks_are_independent() {
        let stacks = StackSignals::new();
        stacks.request_host(true);
        stacks.request_sof(true);
        assert_eq!(stacks.take_gadget(), None);
        assert_eq!(stacks.take_host(), Some(true));
        assert_eq!(stacks.take_sof(), Some(true));
        assert!(!stacks.take_rearm());
    }
}
