use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::PerformanceConfig,
    host::{FrameHost, FrameId},
    probe::CapabilitySnapshot,
    quality::{QualityBudget, QualityLevel},
};

/// Source of heap usage figures, in megabytes.
pub trait MemoryProbe {
    /// `None` when the host offers no heap statistics.
    fn used_heap_mb(&self) -> Option<f64>;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> Option<f64>,
{
    fn used_heap_mb(&self) -> Option<f64> {
        self()
    }
}

/// Memory probe for hosts without heap statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemoryInfo;

impl MemoryProbe for NoMemoryInfo {
    fn used_heap_mb(&self) -> Option<f64> {
        None
    }
}

/// Snapshot of the controller's view of runtime performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Rolling average over the recent measurement windows.
    pub fps: f64,
    /// Zero when the host offers no heap statistics.
    pub memory_usage_mb: f64,
    pub frame_time_ms: f64,
    pub is_performance_low: bool,
    pub quality_level: QualityLevel,
    pub max_particles: u32,
    pub should_reduce_effects: bool,
    /// Live particle count as last reported by the renderer.
    pub particle_count: u32,
}

impl PerformanceMetrics {
    pub fn budget(&self) -> QualityBudget {
        QualityBudget {
            max_particles: self.max_particles,
            should_reduce_effects: self.should_reduce_effects,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Average fps or memory usage crossed the low-performance threshold.
    LowPerformance,
    /// Average fps comfortably exceeded the target.
    Headroom,
    /// The device entered low-power mode mid-session.
    LowPowerMode,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityChange {
    pub from: QualityLevel,
    pub to: QualityLevel,
    pub reason: AdjustmentReason,
}

/// Windowed frame-rate feedback loop over a [`QualityLevel`].
///
/// Moves the level at most one step per adjustment, with a cooldown of
/// `min_frames_for_adjustment` windows between adjustments.
#[derive(Debug, Clone)]
pub struct QualityController {
    config: PerformanceConfig,
    level: QualityLevel,
    reduced_motion: bool,
    low_power: bool,
    frames: u32,
    window_start: Option<Duration>,
    history: VecDeque<f64>,
    windows_since_adjustment: u32,
    metrics: PerformanceMetrics,
}

impl QualityController {
    /// Seeds the controller from a capability snapshot.
    ///
    /// A zero `history_len` or `window_ms` is raised to 1, and a target fps
    /// that is not positive falls back to the default.
    pub fn new(mut config: PerformanceConfig, snapshot: &CapabilitySnapshot) -> Self {
        config.history_len = config.history_len.max(1);
        config.window_ms = config.window_ms.max(1);
        if !config.target_fps.is_finite() || config.target_fps <= 0.0 {
            config.target_fps = PerformanceConfig::default().target_fps;
        }
        let level = QualityLevel::seed_for(snapshot);
        let budget = level
            .budget()
            .with_reduced_motion(snapshot.prefers_reduced_motion);
        let metrics = PerformanceMetrics {
            fps: config.target_fps,
            memory_usage_mb: 0.0,
            frame_time_ms: 1000.0 / config.target_fps,
            is_performance_low: false,
            quality_level: level,
            max_particles: budget.max_particles,
            should_reduce_effects: budget.should_reduce_effects,
            particle_count: 0,
        };
        tracing::debug!(%level, "initial quality seeded");

        Self {
            history: VecDeque::with_capacity(config.history_len),
            config,
            level,
            reduced_motion: snapshot.prefers_reduced_motion,
            low_power: snapshot.is_low_power_mode,
            frames: 0,
            window_start: None,
            windows_since_adjustment: 0,
            metrics,
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    pub fn level(&self) -> QualityLevel {
        self.level
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    /// Per-window fps samples, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    /// Records one animation frame at host time `now`.
    ///
    /// The first frame only anchors the measurement window. Once the frames
    /// since the anchor span at least one window, the window is evaluated and
    /// a new one begins at `now`.
    pub fn record_frame(&mut self, now: Duration, memory: &dyn MemoryProbe) -> Option<QualityChange> {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return None;
        };

        self.frames += 1;
        let elapsed = now.saturating_sub(start);
        if elapsed < self.config.window() {
            return None;
        }

        let change = self.close_window(elapsed, memory);
        self.frames = 0;
        self.window_start = Some(now);
        change
    }

    fn close_window(&mut self, elapsed: Duration, memory: &dyn MemoryProbe) -> Option<QualityChange> {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let instant_fps = f64::from(self.frames) * 1000.0 / elapsed_ms;

        if self.history.len() >= self.config.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(instant_fps);
        let average_fps = self.history.iter().sum::<f64>() / self.history.len() as f64;

        let memory_usage_mb = memory
            .used_heap_mb()
            .filter(|mb| mb.is_finite() && *mb >= 0.0)
            .unwrap_or(0.0);

        let target = self.config.target_fps;
        let is_low = average_fps < target * self.config.low_fps_ratio
            || memory_usage_mb > self.config.memory_threshold_mb;

        self.windows_since_adjustment = self.windows_since_adjustment.saturating_add(1);
        let mut change = None;
        if self.config.enable_auto_adjust
            && self.windows_since_adjustment >= self.config.min_frames_for_adjustment
        {
            let next = if is_low {
                self.level
                    .step_down()
                    .map(|to| (to, AdjustmentReason::LowPerformance))
            } else if average_fps > target * self.config.recovery_fps_ratio {
                self.level.step_up().map(|to| (to, AdjustmentReason::Headroom))
            } else {
                None
            };

            if let Some((to, reason)) = next {
                change = Some(self.transition(to, reason));
            }
        }

        self.metrics.fps = average_fps;
        self.metrics.memory_usage_mb = memory_usage_mb;
        self.metrics.frame_time_ms = if average_fps > 0.0 {
            1000.0 / average_fps
        } else {
            0.0
        };
        self.metrics.is_performance_low = is_low;
        self.refresh_budget();

        tracing::trace!(
            instant_fps,
            average_fps,
            memory_usage_mb,
            is_low,
            level = %self.level,
            "measurement window closed"
        );
        change
    }

    /// Forces a quality level. Automatic adjustment resumes after the usual
    /// cooldown.
    pub fn set_quality_level(&mut self, level: QualityLevel) -> Option<QualityChange> {
        if level == self.level {
            self.windows_since_adjustment = 0;
            return None;
        }
        let change = self.transition(level, AdjustmentReason::Manual);
        self.refresh_budget();
        Some(change)
    }

    pub fn update_particle_count(&mut self, count: u32) {
        self.metrics.particle_count = count;
    }

    /// Folds a fresh capability snapshot into the controller.
    ///
    /// Reduced motion feeds the effect-reduction flag. Entering low-power mode
    /// (for example when the battery drains below its threshold) steps the
    /// level down once and restarts the cooldown.
    pub fn apply_capabilities(&mut self, snapshot: &CapabilitySnapshot) -> Option<QualityChange> {
        self.reduced_motion = snapshot.prefers_reduced_motion;
        let entered_low_power = snapshot.is_low_power_mode && !self.low_power;
        self.low_power = snapshot.is_low_power_mode;

        let change = if entered_low_power {
            self.level
                .step_down()
                .map(|to| self.transition(to, AdjustmentReason::LowPowerMode))
        } else {
            None
        };
        self.refresh_budget();
        change
    }

    fn transition(&mut self, to: QualityLevel, reason: AdjustmentReason) -> QualityChange {
        let change = QualityChange {
            from: self.level,
            to,
            reason,
        };
        tracing::info!(from = %change.from, to = %change.to, ?reason, "quality level changed");
        self.level = to;
        self.windows_since_adjustment = 0;
        change
    }

    fn refresh_budget(&mut self) {
        let budget = self.level.budget().with_reduced_motion(self.reduced_motion);
        self.metrics.quality_level = self.level;
        self.metrics.max_particles = budget.max_particles;
        self.metrics.should_reduce_effects = budget.should_reduce_effects;
    }
}

type ChangeListener = Box<dyn FnMut(&QualityChange)>;

/// Runs a [`QualityController`] on every animation frame of a [`FrameHost`].
///
/// The loop re-registers itself each frame until [`stop`](Self::stop) is
/// called or the monitor is dropped.
pub struct PerformanceMonitor {
    inner: Rc<MonitorInner>,
}

struct MonitorInner {
    host: Rc<dyn FrameHost>,
    controller: RefCell<QualityController>,
    memory: Box<dyn MemoryProbe>,
    listeners: RefCell<Vec<ChangeListener>>,
    pending: Cell<Option<FrameId>>,
    running: Cell<bool>,
}

impl PerformanceMonitor {
    /// Starts measuring on the next frame.
    pub fn start(
        host: Rc<dyn FrameHost>,
        controller: QualityController,
        memory: impl MemoryProbe + 'static,
    ) -> Self {
        let inner = Rc::new(MonitorInner {
            host,
            controller: RefCell::new(controller),
            memory: Box::new(memory),
            listeners: RefCell::new(Vec::new()),
            pending: Cell::new(None),
            running: Cell::new(true),
        });
        MonitorInner::schedule(&inner);
        Self { inner }
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.inner.controller.borrow().metrics().clone()
    }

    pub fn quality_level(&self) -> QualityLevel {
        self.inner.controller.borrow().level()
    }

    pub fn budget(&self) -> QualityBudget {
        self.inner.controller.borrow().metrics().budget()
    }

    pub fn set_quality_level(&self, level: QualityLevel) {
        let change = self.inner.controller.borrow_mut().set_quality_level(level);
        if let Some(change) = change {
            self.inner.notify(&change);
        }
    }

    pub fn update_particle_count(&self, count: u32) {
        self.inner.controller.borrow_mut().update_particle_count(count);
    }

    pub fn apply_capabilities(&self, snapshot: &CapabilitySnapshot) {
        let change = self.inner.controller.borrow_mut().apply_capabilities(snapshot);
        if let Some(change) = change {
            self.inner.notify(&change);
        }
    }

    /// Registers a listener invoked after every quality transition.
    pub fn on_quality_change(&self, listener: impl FnMut(&QualityChange) + 'static) {
        self.inner.listeners.borrow_mut().push(Box::new(listener));
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Cancels the measurement loop. Stopping twice is a no-op.
    pub fn stop(&self) {
        if !self.inner.running.replace(false) {
            return;
        }
        if let Some(id) = self.inner.pending.take() {
            self.inner.host.cancel_frame(id);
        }
        tracing::debug!("performance monitor stopped");
    }
}

impl MonitorInner {
    fn schedule(inner: &Rc<Self>) {
        let weak: Weak<Self> = Rc::downgrade(inner);
        let id = inner.host.request_frame(Box::new(move |now| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.pending.set(None);
            if !inner.running.get() {
                return;
            }

            let change = inner
                .controller
                .borrow_mut()
                .record_frame(now, inner.memory.as_ref());
            if let Some(change) = change {
                inner.notify(&change);
            }

            if inner.running.get() {
                Self::schedule(&inner);
            }
        }));
        inner.pending.set(Some(id));
    }

    fn notify(&self, change: &QualityChange) {
        let mut listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in &mut listeners {
            listener(change);
        }
        let mut slot = self.listeners.borrow_mut();
        listeners.extend(slot.drain(..));
        *slot = listeners;
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("running", &self.inner.running.get())
            .field("controller", &*self.inner.controller.borrow())
            .finish()
    }
}
