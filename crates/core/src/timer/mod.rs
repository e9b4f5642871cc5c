use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use crate::host::{TimerHost, TimerId};

/// Opaque reference to a timer tracked by a [`TimerRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Default)]
struct Tracked {
    next_handle: u64,
    timeouts: HashMap<TimerHandle, TimerId>,
    intervals: HashMap<TimerHandle, TimerId>,
}

impl Tracked {
    fn allocate(&mut self) -> TimerHandle {
        self.next_handle += 1;
        TimerHandle(self.next_handle)
    }
}

/// Scoped owner of one component's timeouts and intervals.
///
/// Everything scheduled through the registry is cancelled by
/// [`clear_all`](Self::clear_all) or when the registry is dropped.
pub struct TimerRegistry {
    host: Rc<dyn TimerHost>,
    tracked: Rc<RefCell<Tracked>>,
}

impl TimerRegistry {
    pub fn new(host: Rc<dyn TimerHost>) -> Self {
        Self {
            host,
            tracked: Rc::new(RefCell::new(Tracked::default())),
        }
    }

    /// Returns the host this registry schedules on.
    pub fn host(&self) -> &Rc<dyn TimerHost> {
        &self.host
    }

    /// Schedules `callback` once after `delay`.
    ///
    /// When the timer fires the registry drops its own entry before invoking
    /// the callback, so the callback may freely schedule or clear timers on
    /// this registry.
    pub fn add_timeout(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerHandle {
        let handle = self.tracked.borrow_mut().allocate();
        let tracked: Weak<RefCell<Tracked>> = Rc::downgrade(&self.tracked);

        let id = self.host.set_timeout(
            delay,
            Box::new(move || {
                if let Some(tracked) = tracked.upgrade() {
                    tracked.borrow_mut().timeouts.remove(&handle);
                }
                callback();
            }),
        );

        tracing::trace!(?handle, ?delay, "timeout scheduled");
        self.tracked.borrow_mut().timeouts.insert(handle, id);
        handle
    }

    /// Schedules `callback` every `period` until removed or cleared.
    pub fn add_interval(&self, period: Duration, callback: impl FnMut() + 'static) -> TimerHandle {
        let handle = self.tracked.borrow_mut().allocate();
        let id = self.host.set_interval(period, Box::new(callback));

        tracing::trace!(?handle, ?period, "interval scheduled");
        self.tracked.borrow_mut().intervals.insert(handle, id);
        handle
    }

    /// Cancels a pending timeout. Handles that already fired or were removed
    /// are ignored.
    pub fn remove_timeout(&self, handle: TimerHandle) {
        let id = self.tracked.borrow_mut().timeouts.remove(&handle);
        if let Some(id) = id {
            self.host.clear(id);
        }
    }

    /// Cancels an interval. Unknown handles are ignored.
    pub fn remove_interval(&self, handle: TimerHandle) {
        let id = self.tracked.borrow_mut().intervals.remove(&handle);
        if let Some(id) = id {
            self.host.clear(id);
        }
    }

    pub fn clear_all_timeouts(&self) {
        let ids: Vec<TimerId> = self.tracked.borrow_mut().timeouts.drain().map(|(_, id)| id).collect();
        for id in ids {
            self.host.clear(id);
        }
    }

    pub fn clear_all_intervals(&self) {
        let ids: Vec<TimerId> = self.tracked.borrow_mut().intervals.drain().map(|(_, id)| id).collect();
        for id in ids {
            self.host.clear(id);
        }
    }

    /// Cancels everything this registry is tracking. Once this returns, none
    /// of the previously scheduled callbacks will run. Safe to call
    /// repeatedly.
    pub fn clear_all(&self) {
        self.clear_all_timeouts();
        self.clear_all_intervals();
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        let tracked = self.tracked.borrow();
        tracked.timeouts.contains_key(&handle) || tracked.intervals.contains_key(&handle)
    }

    pub fn pending_timeouts(&self) -> usize {
        self.tracked.borrow().timeouts.len()
    }

    pub fn pending_intervals(&self) -> usize {
        self.tracked.borrow().intervals.len()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.clear_all();
    }
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self.tracked.borrow();
        f.debug_struct("TimerRegistry")
            .field("timeouts", &tracked.timeouts.len())
            .field("intervals", &tracked.intervals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::host::EventLoop;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn registry() -> (EventLoop, TimerRegistry) {
        let host = EventLoop::new();
        let registry = TimerRegistry::new(Rc::new(host.clone()));
        (host, registry)
    }

    fn counter() -> (Rc<Cell<u32>>, impl Fn() -> Box<dyn FnMut()>) {
        let count = Rc::new(Cell::new(0));
        let source = count.clone();
        let make = move || {
            let count = source.clone();
            Box::new(move || count.set(count.get() + 1)) as Box<dyn FnMut()>
        };
        (count, make)
    }

    #[test]
    fn fired_timeouts_untrack_themselves() {
        let (host, registry) = registry();
        let (count, make) = counter();
        let mut callback = make();
        let handle = registry.add_timeout(ms(10), move || callback());

        assert!(registry.is_pending(handle));
        host.advance(ms(10));
        assert_eq!(count.get(), 1);
        assert!(!registry.is_pending(handle));
        assert_eq!(registry.pending_timeouts(), 0);

        registry.remove_timeout(handle);
        registry.remove_timeout(handle);
    }

    #[test]
    fn cleared_timeouts_never_fire() {
        for pending in [0_u64, 1, 5, 32] {
            let (host, registry) = registry();
            let (count, make) = counter();
            for i in 0..pending {
                let mut callback = make();
                registry.add_timeout(ms(10 * (i + 1)), move || callback());
            }

            registry.clear_all();
            registry.clear_all();
            host.advance(ms(10 * (pending + 2)));

            assert_eq!(count.get(), 0, "{pending} cleared timeouts must stay silent");
            assert_eq!(host.pending_timers(), 0);
        }
    }

    #[test]
    fn intervals_repeat_until_removed() {
        let (host, registry) = registry();
        let (count, make) = counter();
        let handle = registry.add_interval(ms(100), make());

        host.advance(ms(350));
        assert_eq!(count.get(), 3);
        assert!(registry.is_pending(handle));

        registry.remove_interval(handle);
        registry.remove_interval(handle);
        host.advance(ms(500));
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn clearing_one_kind_leaves_the_other() {
        let (host, registry) = registry();
        let (count, make) = counter();
        let mut once = make();
        registry.add_timeout(ms(50), move || once());
        registry.add_interval(ms(20), make());

        registry.clear_all_intervals();
        host.advance(ms(100));
        assert_eq!(count.get(), 1);

        let (count, make) = counter();
        let mut once = make();
        registry.add_timeout(ms(50), move || once());
        registry.add_interval(ms(20), make());
        registry.clear_all_timeouts();
        host.advance(ms(50));
        assert_eq!(count.get(), 2);
        assert_eq!(registry.pending_intervals(), 1);
    }

    #[test]
    fn dropping_the_registry_cancels_everything() {
        let (host, registry) = registry();
        let (count, make) = counter();
        let mut callback = make();
        registry.add_timeout(ms(10), move || callback());
        registry.add_interval(ms(10), make());

        drop(registry);
        host.advance(ms(100));
        assert_eq!(count.get(), 0);
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn callbacks_may_clear_their_own_registry() {
        let (host, registry) = registry();
        let registry = Rc::new(registry);
        let (count, make) = counter();

        let mut later = make();
        registry.add_timeout(ms(20), move || later());
        let inner = Rc::downgrade(&registry);
        registry.add_timeout(ms(10), move || {
            if let Some(registry) = inner.upgrade() {
                registry.clear_all();
            }
        });

        host.advance(ms(50));
        assert_eq!(count.get(), 0);
    }
}
