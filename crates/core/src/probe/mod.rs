use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::ProbeConfig,
    host::TimerHost,
    timer::{TimerHandle, TimerRegistry},
    FlamesError, Result,
};

const MOBILE_TOKENS: [&str; 7] = [
    "android",
    "webos",
    "iphone",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];
const SLOW_NETWORKS: [&str; 3] = ["slow-2g", "2g", "3g"];
const MOBILE_MAX_WIDTH: u32 = 768;
const TABLET_MAX_WIDTH: u32 = 1024;
const FALLBACK_VIEWPORT: (u32, u32) = (1024, 768);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkSpeed {
    Slow,
    Fast,
    Unknown,
}

impl NetworkSpeed {
    /// Classifies a Network Information API `effectiveType` value.
    pub fn from_effective_type(effective_type: Option<&str>) -> Self {
        match effective_type {
            Some(kind) if SLOW_NETWORKS.contains(&kind.trim().to_ascii_lowercase().as_str()) => {
                Self::Slow
            }
            Some(_) => Self::Fast,
            None => Self::Unknown,
        }
    }
}

/// Viewport width bucket, ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScreenSize {
    #[serde(rename = "xs")]
    Xs,
    #[serde(rename = "sm")]
    Sm,
    #[serde(rename = "md")]
    Md,
    #[serde(rename = "lg")]
    Lg,
    #[serde(rename = "xl")]
    Xl,
    #[serde(rename = "2xl")]
    Xxl,
}

impl ScreenSize {
    pub fn from_width(width: u32) -> Self {
        match width {
            0..=639 => Self::Xs,
            640..=767 => Self::Sm,
            768..=1023 => Self::Md,
            1024..=1279 => Self::Lg,
            1280..=1535 => Self::Xl,
            _ => Self::Xxl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Point-in-time read of the host's characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub device_class: DeviceClass,
    pub has_touch: bool,
    pub supports_haptics: bool,
    pub supports_webgl: bool,
    pub prefers_reduced_motion: bool,
    pub network_speed: NetworkSpeed,
    pub device_memory_gb: f64,
    pub pixel_ratio: f64,
    pub screen_size: ScreenSize,
    pub orientation: Orientation,
    /// Reported asynchronously; stays `None` on hosts without a battery API.
    pub battery_level: Option<f64>,
    pub is_low_power_mode: bool,
}

impl CapabilitySnapshot {
    pub fn is_mobile(&self) -> bool {
        self.device_class == DeviceClass::Mobile
    }

    pub fn is_tablet(&self) -> bool {
        self.device_class == DeviceClass::Tablet
    }
}

impl Default for CapabilitySnapshot {
    fn default() -> Self {
        Self {
            device_class: DeviceClass::Desktop,
            has_touch: false,
            supports_haptics: false,
            supports_webgl: false,
            prefers_reduced_motion: false,
            network_speed: NetworkSpeed::Unknown,
            device_memory_gb: 4.0,
            pixel_ratio: 1.0,
            screen_size: ScreenSize::Lg,
            orientation: Orientation::Landscape,
            battery_level: None,
            is_low_power_mode: false,
        }
    }
}

/// Host introspection queries. `None` means the corresponding API is absent.
pub trait Environment {
    fn user_agent(&self) -> Option<String>;

    /// Inner viewport `(width, height)` in CSS pixels.
    fn viewport(&self) -> Option<(u32, u32)>;

    fn max_touch_points(&self) -> Option<u32>;

    fn supports_vibration(&self) -> bool;

    /// Network Information API `effectiveType`.
    fn network_effective_type(&self) -> Option<String>;

    fn device_memory_gb(&self) -> Option<f64>;

    fn device_pixel_ratio(&self) -> Option<f64>;

    /// Attempts to create a WebGL context on a throwaway canvas.
    fn create_webgl_context(&self) -> Result<bool>;

    /// Evaluates the `prefers-reduced-motion: reduce` media query.
    fn prefers_reduced_motion(&self) -> Option<bool>;
}

impl<E: Environment> Environment for RefCell<E> {
    fn user_agent(&self) -> Option<String> {
        self.borrow().user_agent()
    }

    fn viewport(&self) -> Option<(u32, u32)> {
        self.borrow().viewport()
    }

    fn max_touch_points(&self) -> Option<u32> {
        self.borrow().max_touch_points()
    }

    fn supports_vibration(&self) -> bool {
        self.borrow().supports_vibration()
    }

    fn network_effective_type(&self) -> Option<String> {
        self.borrow().network_effective_type()
    }

    fn device_memory_gb(&self) -> Option<f64> {
        self.borrow().device_memory_gb()
    }

    fn device_pixel_ratio(&self) -> Option<f64> {
        self.borrow().device_pixel_ratio()
    }

    fn create_webgl_context(&self) -> Result<bool> {
        self.borrow().create_webgl_context()
    }

    fn prefers_reduced_motion(&self) -> Option<bool> {
        self.borrow().prefers_reduced_motion()
    }
}

/// Fixed environment description, loadable from JSON. Handy for tests,
/// server-side contexts and the command line driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticEnvironment {
    pub user_agent: Option<String>,
    pub viewport: Option<(u32, u32)>,
    pub max_touch_points: Option<u32>,
    pub vibration: bool,
    pub effective_type: Option<String>,
    pub device_memory_gb: Option<f64>,
    pub pixel_ratio: Option<f64>,
    /// `None` models a host where context creation throws.
    pub webgl: Option<bool>,
    pub reduced_motion: Option<bool>,
}

impl StaticEnvironment {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

impl Environment for StaticEnvironment {
    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }

    fn viewport(&self) -> Option<(u32, u32)> {
        self.viewport
    }

    fn max_touch_points(&self) -> Option<u32> {
        self.max_touch_points
    }

    fn supports_vibration(&self) -> bool {
        self.vibration
    }

    fn network_effective_type(&self) -> Option<String> {
        self.effective_type.clone()
    }

    fn device_memory_gb(&self) -> Option<f64> {
        self.device_memory_gb
    }

    fn device_pixel_ratio(&self) -> Option<f64> {
        self.pixel_ratio
    }

    fn create_webgl_context(&self) -> Result<bool> {
        self.webgl
            .ok_or(FlamesError::CapabilityUnavailable("webgl"))
    }

    fn prefers_reduced_motion(&self) -> Option<bool> {
        self.reduced_motion
    }
}

/// Environment changes the probe reacts to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvironmentEvent {
    Resize,
    /// Resampled after [`ProbeConfig::orientation_settle_ms`].
    OrientationChange,
    ReducedMotionChange,
    /// Battery API level-change notification, `0.0..=1.0`.
    BatteryLevel(f64),
}

/// Samples the environment synchronously. Battery level is left `None`.
pub fn sample(env: &dyn Environment, config: &ProbeConfig) -> CapabilitySnapshot {
    let user_agent = env.user_agent().unwrap_or_default().to_ascii_lowercase();
    let (width, height) = env.viewport().unwrap_or_else(|| {
        tracing::debug!("viewport unavailable, assuming {FALLBACK_VIEWPORT:?}");
        FALLBACK_VIEWPORT
    });
    let has_touch = env.max_touch_points().unwrap_or(0) > 0;

    let is_tablet = user_agent.contains("ipad")
        || (user_agent.contains("android") && !user_agent.contains("mobile"))
        || (has_touch && (MOBILE_MAX_WIDTH..TABLET_MAX_WIDTH).contains(&width));
    let is_mobile = !is_tablet
        && (MOBILE_TOKENS.iter().any(|token| user_agent.contains(token))
            || width < MOBILE_MAX_WIDTH);
    let device_class = if is_mobile {
        DeviceClass::Mobile
    } else if is_tablet {
        DeviceClass::Tablet
    } else {
        DeviceClass::Desktop
    };

    let network_speed = NetworkSpeed::from_effective_type(env.network_effective_type().as_deref());
    let device_memory_gb = env
        .device_memory_gb()
        .filter(|memory| memory.is_finite() && *memory > 0.0)
        .unwrap_or(config.default_memory_gb);
    let pixel_ratio = env
        .device_pixel_ratio()
        .filter(|ratio| ratio.is_finite() && *ratio > 0.0)
        .unwrap_or(1.0);
    let supports_webgl = env.create_webgl_context().unwrap_or_else(|err| {
        tracing::debug!(%err, "webgl probe failed");
        false
    });
    let prefers_reduced_motion = env.prefers_reduced_motion().unwrap_or(false);

    let is_low_power_mode = device_memory_gb < config.low_memory_gb
        || network_speed == NetworkSpeed::Slow
        || prefers_reduced_motion;

    CapabilitySnapshot {
        device_class,
        has_touch,
        supports_haptics: env.supports_vibration(),
        supports_webgl,
        prefers_reduced_motion,
        network_speed,
        device_memory_gb,
        pixel_ratio,
        screen_size: ScreenSize::from_width(width),
        orientation: if width > height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        },
        battery_level: None,
        is_low_power_mode,
    }
}

type ChangeListener = Box<dyn FnMut(&CapabilitySnapshot)>;

/// Keeps a [`CapabilitySnapshot`] current as the environment changes.
///
/// Cloning yields another handle to the same probe.
#[derive(Clone)]
pub struct CapabilityProbe {
    inner: Rc<ProbeInner>,
}

struct ProbeInner {
    env: Rc<dyn Environment>,
    config: ProbeConfig,
    snapshot: RefCell<CapabilitySnapshot>,
    listeners: RefCell<Vec<ChangeListener>>,
    timers: TimerRegistry,
    pending_orientation: Cell<Option<TimerHandle>>,
}

impl CapabilityProbe {
    /// Samples the environment immediately.
    pub fn new(env: Rc<dyn Environment>, host: Rc<dyn TimerHost>, config: ProbeConfig) -> Self {
        let snapshot = sample(env.as_ref(), &config);
        tracing::debug!(
            device_class = ?snapshot.device_class,
            low_power = snapshot.is_low_power_mode,
            "capabilities sampled"
        );
        Self {
            inner: Rc::new(ProbeInner {
                env,
                config,
                snapshot: RefCell::new(snapshot),
                listeners: RefCell::new(Vec::new()),
                timers: TimerRegistry::new(host),
                pending_orientation: Cell::new(None),
            }),
        }
    }

    /// Returns a copy of the current snapshot.
    pub fn snapshot(&self) -> CapabilitySnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Registers a listener invoked after every resample or battery patch.
    pub fn on_change(&self, listener: impl FnMut(&CapabilitySnapshot) + 'static) {
        self.inner.listeners.borrow_mut().push(Box::new(listener));
    }

    pub fn handle(&self, event: EnvironmentEvent) {
        match event {
            EnvironmentEvent::Resize | EnvironmentEvent::ReducedMotionChange => {
                self.inner.resample();
            }
            EnvironmentEvent::OrientationChange => self.schedule_orientation_resample(),
            EnvironmentEvent::BatteryLevel(level) => self.inner.patch_battery(level),
        }
    }

    /// Cancels any pending orientation resample.
    pub fn shutdown(&self) {
        self.inner.timers.clear_all();
        self.inner.pending_orientation.set(None);
    }

    fn schedule_orientation_resample(&self) {
        if let Some(previous) = self.inner.pending_orientation.take() {
            self.inner.timers.remove_timeout(previous);
        }
        let weak: Weak<ProbeInner> = Rc::downgrade(&self.inner);
        let handle = self
            .inner
            .timers
            .add_timeout(self.inner.config.orientation_settle(), move || {
                if let Some(inner) = weak.upgrade() {
                    inner.pending_orientation.set(None);
                    inner.resample();
                }
            });
        self.inner.pending_orientation.set(Some(handle));
    }
}

impl ProbeInner {
    fn resample(&self) {
        let mut next = sample(self.env.as_ref(), &self.config);
        let battery_level = self.snapshot.borrow().battery_level;
        if let Some(level) = battery_level {
            next.battery_level = Some(level);
            next.is_low_power_mode |= level < self.config.low_battery_level;
        }
        *self.snapshot.borrow_mut() = next;
        self.notify();
    }

    fn patch_battery(&self, level: f64) {
        let level = level.clamp(0.0, 1.0);
        {
            let mut snapshot = self.snapshot.borrow_mut();
            snapshot.battery_level = Some(level);
            snapshot.is_low_power_mode |= level < self.config.low_battery_level;
        }
        tracing::debug!(level, "battery level updated");
        self.notify();
    }

    fn notify(&self) {
        let snapshot = self.snapshot.borrow().clone();
        let mut listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in &mut listeners {
            listener(&snapshot);
        }
        // Keep listeners registered from inside a callback.
        let mut slot = self.listeners.borrow_mut();
        listeners.extend(slot.drain(..));
        *slot = listeners;
    }
}

impl fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityProbe")
            .field("snapshot", &*self.inner.snapshot.borrow())
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}
