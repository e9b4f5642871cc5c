use std::{
    cell::RefCell,
    collections::HashSet,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{config::RevealConfig, host::TimerHost, timer::TimerRegistry, FlamesError, Result};

/// Ordered mapping from stage name to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSet {
    entries: Vec<(String, bool)>,
}

impl StageSet {
    /// Creates a set with every stage incomplete.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for name in names {
            let name = name.into();
            if !seen.insert(name.clone()) {
                return Err(FlamesError::DuplicateStage(name));
            }
            entries.push((name, false));
        }
        Ok(Self { entries })
    }

    /// `None` for names that are not part of the set.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(stage, _)| stage == name)
            .map(|(_, done)| *done)
    }

    /// True when every stage is complete. Vacuously true for an empty set.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|(_, done)| *done)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> + '_ {
        self.entries.iter().map(|(name, done)| (name.as_str(), *done))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn mark(&mut self, index: usize) {
        if let Some((_, done)) = self.entries.get_mut(index) {
            *done = true;
        }
    }

    fn fill(&mut self, value: bool) {
        for (_, done) in &mut self.entries {
            *done = value;
        }
    }
}

#[derive(Debug)]
struct AnimationRun {
    has_started: bool,
    stages: StageSet,
}

type StageListener = Box<dyn FnMut(&str)>;

/// Drives a [`StageSet`] through time-offset activation.
pub struct StaggeredAnimation {
    delays: Vec<Duration>,
    should_animate: bool,
    run: Rc<RefCell<AnimationRun>>,
    listeners: Rc<RefCell<Vec<StageListener>>>,
    timers: TimerRegistry,
}

impl StaggeredAnimation {
    /// `delays[i]` is the offset of `stages[i]` from the start of a run.
    /// Offsets need not be increasing; callers that rely on ordering must
    /// supply increasing offsets themselves.
    pub fn new<S: Into<String>>(
        host: Rc<dyn TimerHost>,
        stages: impl IntoIterator<Item = S>,
        delays: Vec<Duration>,
        should_animate: bool,
    ) -> Result<Self> {
        let stages = StageSet::new(stages)?;
        check_lengths(&stages, &delays)?;
        Ok(Self {
            delays,
            should_animate,
            run: Rc::new(RefCell::new(AnimationRun {
                has_started: false,
                stages,
            })),
            listeners: Rc::new(RefCell::new(Vec::new())),
            timers: TimerRegistry::new(host),
        })
    }

    pub fn from_config(host: Rc<dyn TimerHost>, config: &RevealConfig) -> Result<Self> {
        Self::new(
            host,
            config.stages.iter().cloned(),
            config.delays(),
            config.should_animate,
        )
    }

    /// Replaces the delay table used by the next [`start_animation`] call.
    /// A run already in flight keeps its schedule.
    ///
    /// [`start_animation`]: Self::start_animation
    pub fn set_delays(&mut self, delays: Vec<Duration>) -> Result<()> {
        check_lengths(&self.run.borrow().stages, &delays)?;
        self.delays = delays;
        Ok(())
    }

    pub fn set_should_animate(&mut self, should_animate: bool) {
        self.should_animate = should_animate;
    }

    pub fn should_animate(&self) -> bool {
        self.should_animate
    }

    /// Registers a listener invoked each time a stage completes.
    pub fn on_stage_complete(&self, listener: impl FnMut(&str) + 'static) {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    /// Begins a new run, replacing any run still in flight.
    ///
    /// With animation disabled every stage completes before this returns.
    pub fn start_animation(&self) {
        self.timers.clear_all();

        if !self.should_animate {
            let names: Vec<String> = {
                let mut run = self.run.borrow_mut();
                run.has_started = true;
                run.stages.fill(true);
                run.stages.names().map(String::from).collect()
            };
            tracing::debug!(stages = names.len(), "animation disabled, stages completed");
            for name in &names {
                notify(&self.listeners, name);
            }
            return;
        }

        {
            let mut run = self.run.borrow_mut();
            run.has_started = true;
            run.stages.fill(false);
        }

        let names: Vec<String> = self.run.borrow().stages.names().map(String::from).collect();
        for (index, (name, delay)) in names.into_iter().zip(&self.delays).enumerate() {
            let run: Weak<RefCell<AnimationRun>> = Rc::downgrade(&self.run);
            let listeners = Rc::downgrade(&self.listeners);
            self.timers.add_timeout(*delay, move || {
                let Some(run) = run.upgrade() else {
                    return;
                };
                run.borrow_mut().stages.mark(index);
                tracing::debug!(stage = %name, "stage completed");
                if let Some(listeners) = listeners.upgrade() {
                    notify(&listeners, &name);
                }
            });
        }
        tracing::debug!(stages = self.delays.len(), "animation started");
    }

    /// Cancels pending stage timers and marks every stage incomplete. Does
    /// not start a new run.
    pub fn reset_animation(&self) {
        self.timers.clear_all();
        let mut run = self.run.borrow_mut();
        run.has_started = false;
        run.stages.fill(false);
    }

    /// `false` for names that are not part of the sequence.
    pub fn is_stage_completed(&self, name: &str) -> bool {
        self.run.borrow().stages.get(name).unwrap_or(false)
    }

    pub fn is_complete(&self) -> bool {
        self.run.borrow().stages.is_complete()
    }

    pub fn has_started(&self) -> bool {
        self.run.borrow().has_started
    }

    /// Copy of the current stage states.
    pub fn stages(&self) -> StageSet {
        self.run.borrow().stages.clone()
    }

    pub fn pending_stages(&self) -> usize {
        self.timers.pending_timeouts()
    }
}

fn check_lengths(stages: &StageSet, delays: &[Duration]) -> Result<()> {
    if stages.len() != delays.len() {
        return Err(FlamesError::StageMismatch {
            stages: stages.len(),
            delays: delays.len(),
        });
    }
    Ok(())
}

fn notify(listeners: &RefCell<Vec<StageListener>>, stage: &str) {
    let mut current = std::mem::take(&mut *listeners.borrow_mut());
    for listener in &mut current {
        listener(stage);
    }
    let mut slot = listeners.borrow_mut();
    current.extend(slot.drain(..));
    *slot = current;
}

impl fmt::Debug for StaggeredAnimation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaggeredAnimation")
            .field("delays", &self.delays)
            .field("should_animate", &self.should_animate)
            .field("run", &*self.run.borrow())
            .field("timers", &self.timers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::host::EventLoop;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn animation(stages: &[&str], delays: &[u64], should_animate: bool) -> (EventLoop, StaggeredAnimation) {
        let host = EventLoop::new();
        let animation = StaggeredAnimation::new(
            Rc::new(host.clone()),
            stages.iter().copied(),
            delays.iter().copied().map(ms).collect(),
            should_animate,
        )
        .unwrap();
        (host, animation)
    }

    fn record_completions(animation: &StaggeredAnimation, host: &EventLoop) -> Rc<RefCell<Vec<(String, Duration)>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (sink, clock) = (log.clone(), host.clone());
        animation.on_stage_complete(move |stage| {
            sink.borrow_mut().push((stage.to_string(), clock.now()));
        });
        log
    }

    #[test]
    fn stages_complete_at_their_offsets() {
        let (host, animation) = animation(&["intro", "reveal", "outro"], &[100, 300, 200], true);
        assert!(!animation.has_started());
        animation.start_animation();
        assert!(animation.has_started());
        assert!(!animation.is_complete());

        host.advance(ms(150));
        assert!(animation.is_stage_completed("intro"));
        assert!(!animation.is_stage_completed("reveal"));
        assert!(!animation.is_stage_completed("outro"));

        host.advance(ms(60));
        assert!(animation.is_stage_completed("outro"));
        assert!(!animation.is_stage_completed("reveal"));

        host.advance(ms(100));
        assert!(animation.is_complete());
        assert_eq!(animation.pending_stages(), 0);
    }

    #[test]
    fn disabled_animation_completes_synchronously() {
        let (host, animation) = animation(&["a", "b", "c"], &[100, 200, 300], false);
        let log = record_completions(&animation, &host);
        animation.start_animation();
        assert!(animation.is_complete());
        assert_eq!(host.pending_timers(), 0);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn restart_discards_the_previous_run() {
        let (host, mut animation) = animation(&["a", "b"], &[100, 200], true);
        let log = record_completions(&animation, &host);
        animation.start_animation();

        host.advance(ms(50));
        animation.set_delays(vec![ms(10), ms(500)]).unwrap();
        animation.start_animation();

        host.advance(ms(10));
        assert!(animation.is_stage_completed("a"));
        host.advance(ms(500));

        let mut fired: HashMap<String, Vec<Duration>> = HashMap::new();
        for (stage, at) in log.borrow().iter() {
            fired.entry(stage.clone()).or_default().push(*at);
        }
        assert_eq!(fired["a"], vec![ms(60)]);
        assert_eq!(fired["b"], vec![ms(550)]);
    }

    #[test]
    fn reset_cancels_pending_stages() {
        let (host, animation) = animation(&["a", "b"], &[10, 100], true);
        animation.start_animation();
        host.advance(ms(20));
        assert!(animation.is_stage_completed("a"));

        animation.reset_animation();
        animation.reset_animation();
        host.advance(ms(200));
        assert!(!animation.has_started());
        assert!(animation.stages().iter().all(|(_, done)| !done));
    }

    #[test]
    fn dropping_the_animation_cancels_its_timers() {
        let (host, animation) = animation(&["a"], &[50], true);
        let log = record_completions(&animation, &host);
        animation.start_animation();
        drop(animation);
        host.advance(ms(100));
        assert!(log.borrow().is_empty());
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn unknown_stage_names_read_as_incomplete() {
        let (_host, animation) = animation(&["a"], &[0], false);
        animation.start_animation();
        assert!(animation.is_stage_completed("a"));
        assert!(!animation.is_stage_completed("missing"));
    }

    #[test]
    fn rejects_malformed_tables() {
        let host: Rc<dyn TimerHost> = Rc::new(EventLoop::new());
        let err = StaggeredAnimation::new(host.clone(), ["a", "b"], vec![ms(1)], true).unwrap_err();
        assert!(matches!(err, FlamesError::StageMismatch { stages: 2, delays: 1 }));

        let err = StaggeredAnimation::new(host.clone(), ["a", "a"], vec![ms(1), ms(2)], true).unwrap_err();
        assert!(matches!(err, FlamesError::DuplicateStage(name) if name == "a"));

        let mut animation = StaggeredAnimation::new(host, ["a"], vec![ms(1)], true).unwrap();
        assert!(animation.set_delays(vec![]).is_err());
    }

    #[test]
    fn builds_from_reveal_config() {
        let host = EventLoop::new();
        let config = RevealConfig::default();
        let animation = StaggeredAnimation::from_config(Rc::new(host.clone()), &config).unwrap();
        animation.start_animation();
        host.advance(ms(*config.delays_ms.iter().max().unwrap()));
        assert!(animation.is_complete());
        assert_eq!(animation.stages().len(), config.stages.len());
    }
}
