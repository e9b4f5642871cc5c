use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    rc::Rc,
    time::Duration,
};

/// Identifier of a timer issued by a [`TimerHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// Identifier of a pending animation-frame request issued by a [`FrameHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

/// Macrotask timer facility.
///
/// Implementations run callbacks on the same thread that scheduled them and
/// never while a `TimerHost` method is executing. [`clear`](Self::clear) is
/// synchronous: once it returns, the callback will not run. Clearing an
/// unknown or already-fired id is a no-op.
pub trait TimerHost {
    /// Time elapsed since the host started.
    fn now(&self) -> Duration;

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerId;

    fn clear(&self, id: TimerId);
}

/// Per-frame callback facility, modelled on `requestAnimationFrame`.
///
/// A callback receives the frame timestamp and runs at most once. Callbacks
/// requested while a frame is being dispatched run on the following frame.
pub trait FrameHost {
    fn request_frame(&self, callback: Box<dyn FnOnce(Duration)>) -> FrameId;

    /// Cancels a pending request. Unknown ids are ignored.
    fn cancel_frame(&self, id: FrameId);
}

/// Shortest period accepted for intervals. Zero-period intervals would
/// otherwise spin forever inside a single [`EventLoop::advance`].
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Deterministic single-threaded event loop with a virtual clock.
///
/// Time only moves when [`advance`](Self::advance),
/// [`advance_to`](Self::advance_to) or [`run_frame`](Self::run_frame) is
/// called. Due timers fire in order of due time, ties broken by scheduling
/// order. Cloning yields another handle to the same loop.
#[derive(Clone, Default)]
pub struct EventLoop {
    state: Rc<RefCell<LoopState>>,
}

#[derive(Default)]
struct LoopState {
    now: Duration,
    next_seq: u64,
    timers: BTreeMap<TimerId, TimerEntry>,
    frames: BTreeMap<FrameId, Box<dyn FnOnce(Duration)>>,
}

impl LoopState {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

struct TimerEntry {
    due: Duration,
    seq: u64,
    task: TimerTask,
}

enum TimerTask {
    Timeout(Option<Box<dyn FnOnce()>>),
    Interval {
        period: Duration,
        // `None` while the callback is running.
        callback: Option<Box<dyn FnMut()>>,
    },
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the virtual clock forward by `by`, firing every timer that
    /// becomes due on the way.
    pub fn advance(&self, by: Duration) {
        let target = self.now() + by;
        self.advance_to(target);
    }

    /// Moves the virtual clock to `target`, firing due timers in order.
    /// Targets in the past leave the clock untouched.
    pub fn advance_to(&self, target: Duration) {
        while let Some(id) = self.next_due(target) {
            self.fire(id);
        }
        let mut state = self.state.borrow_mut();
        if target > state.now {
            state.now = target;
        }
    }

    /// Advances by one frame interval, then dispatches every frame callback
    /// that was pending before the frame started.
    pub fn run_frame(&self, interval: Duration) {
        self.advance(interval);
        let (now, batch) = {
            let state = self.state.borrow();
            (state.now, state.frames.keys().copied().collect::<Vec<_>>())
        };
        for id in batch {
            // Re-check each entry: an earlier callback in the batch may have
            // cancelled it.
            let callback = self.state.borrow_mut().frames.remove(&id);
            if let Some(callback) = callback {
                callback(now);
            }
        }
    }

    /// Runs `count` frames spaced by `interval`.
    pub fn run_frames(&self, count: usize, interval: Duration) {
        for _ in 0..count {
            self.run_frame(interval);
        }
    }

    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.state.borrow().frames.len()
    }

    fn next_due(&self, target: Duration) -> Option<TimerId> {
        let state = self.state.borrow();
        state
            .timers
            .iter()
            .filter(|(_, entry)| entry.due <= target)
            .min_by_key(|(_, entry)| (entry.due, entry.seq))
            .map(|(id, _)| *id)
    }

    fn fire(&self, id: TimerId) {
        let mut state = self.state.borrow_mut();
        let (due, repeating) = match state.timers.get(&id) {
            Some(entry) => (entry.due, matches!(entry.task, TimerTask::Interval { .. })),
            None => return,
        };
        state.now = due;

        if !repeating {
            let callback = match state.timers.remove(&id).map(|entry| entry.task) {
                Some(TimerTask::Timeout(callback)) => callback,
                _ => None,
            };
            drop(state);
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        let seq = state.bump();
        let callback = match state.timers.get_mut(&id) {
            Some(TimerEntry {
                due: next_due,
                seq: entry_seq,
                task: TimerTask::Interval { period, callback },
            }) => {
                *next_due = due + *period;
                *entry_seq = seq;
                callback.take()
            }
            _ => None,
        };
        drop(state);

        let Some(mut callback) = callback else {
            return;
        };
        callback();

        // Put the callback back unless the interval was cleared while it ran.
        let mut state = self.state.borrow_mut();
        if let Some(TimerEntry {
            task: TimerTask::Interval { callback: slot, .. },
            ..
        }) = state.timers.get_mut(&id)
        {
            *slot = Some(callback);
        }
    }
}

impl TimerHost for EventLoop {
    fn now(&self) -> Duration {
        self.state.borrow().now
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let mut state = self.state.borrow_mut();
        let seq = state.bump();
        let id = TimerId(seq);
        let due = state.now + delay;
        state.timers.insert(
            id,
            TimerEntry {
                due,
                seq,
                task: TimerTask::Timeout(Some(callback)),
            },
        );
        id
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerId {
        let period = period.max(MIN_INTERVAL);
        let mut state = self.state.borrow_mut();
        let seq = state.bump();
        let id = TimerId(seq);
        let due = state.now + period;
        state.timers.insert(
            id,
            TimerEntry {
                due,
                seq,
                task: TimerTask::Interval {
                    period,
                    callback: Some(callback),
                },
            },
        );
        id
    }

    fn clear(&self, id: TimerId) {
        self.state.borrow_mut().timers.remove(&id);
    }
}

impl FrameHost for EventLoop {
    fn request_frame(&self, callback: Box<dyn FnOnce(Duration)>) -> FrameId {
        let mut state = self.state.borrow_mut();
        let id = FrameId(state.bump());
        state.frames.insert(id, callback);
        id
    }

    fn cancel_frame(&self, id: FrameId) {
        self.state.borrow_mut().frames.remove(&id);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventLoop")
            .field("now", &state.now)
            .field("timers", &state.timers.len())
            .field("frames", &state.frames.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn timeouts_fire_in_due_order() {
        let host = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for (label, delay) in [("late", 30), ("early", 10), ("tie", 10)] {
            let log = log.clone();
            host.set_timeout(ms(delay), Box::new(move || log.borrow_mut().push(label)));
        }

        host.advance(ms(50));
        assert_eq!(*log.borrow(), vec!["early", "tie", "late"]);
        assert_eq!(host.pending_timers(), 0);
        assert_eq!(host.now(), ms(50));
    }

    #[test]
    fn clock_reads_due_time_inside_callback() {
        let host = EventLoop::new();
        let seen = Rc::new(Cell::new(Duration::ZERO));
        let (inner, sink) = (host.clone(), seen.clone());
        host.set_timeout(ms(25), Box::new(move || sink.set(inner.now())));

        host.advance(ms(100));
        assert_eq!(seen.get(), ms(25));
    }

    #[test]
    fn intervals_repeat_until_cleared_from_inside() {
        let host = EventLoop::new();
        let count = Rc::new(Cell::new(0));
        let id = Rc::new(Cell::new(None));

        let (inner, counter, slot) = (host.clone(), count.clone(), id.clone());
        let interval = host.set_interval(
            ms(10),
            Box::new(move || {
                counter.set(counter.get() + 1);
                if counter.get() == 3 {
                    if let Some(id) = slot.get() {
                        inner.clear(id);
                    }
                }
            }),
        );
        id.set(Some(interval));

        host.advance(ms(100));
        assert_eq!(count.get(), 3);
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn zero_period_interval_is_clamped() {
        let host = EventLoop::new();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        host.set_interval(Duration::ZERO, Box::new(move || counter.set(counter.get() + 1)));

        host.advance(ms(5));
        assert_eq!(count.get(), 5);
    }

    #[test]
    fn frames_requested_during_dispatch_wait_for_next_frame() {
        let host = EventLoop::new();
        let stamps = Rc::new(RefCell::new(Vec::new()));

        let (inner, sink) = (host.clone(), stamps.clone());
        host.request_frame(Box::new(move |now| {
            sink.borrow_mut().push(now);
            let sink = sink.clone();
            inner.request_frame(Box::new(move |now| sink.borrow_mut().push(now)));
        }));

        host.run_frame(ms(16));
        assert_eq!(*stamps.borrow(), vec![ms(16)]);
        host.run_frame(ms(16));
        assert_eq!(*stamps.borrow(), vec![ms(16), ms(32)]);
        assert_eq!(host.pending_frames(), 0);
    }

    #[test]
    fn cancelled_frames_never_run() {
        let host = EventLoop::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let id = host.request_frame(Box::new(move |_| flag.set(true)));

        host.cancel_frame(id);
        host.cancel_frame(id);
        host.run_frame(ms(16));
        assert!(!ran.get());
    }
}
