//! Core library for the FLAMES effects runtime.
//!
//! The crate holds the control logic behind the game's visual flourish:
//! deciding how much effect work the device can afford and when each step of
//! a timed reveal should happen. Nothing here draws anything. Capability
//! sampling feeds the adaptive quality controller, while the timer registry
//! backs the staggered reveal orchestrator. Both pairs schedule through the
//! host traits in [`host`], so the same code runs against a browser shell or
//! the deterministic [`EventLoop`].

pub mod config;
pub mod error;
pub mod host;
pub mod performance;
pub mod probe;
pub mod quality;
pub mod stagger;
pub mod timer;

pub use config::{AppConfig, PerformanceConfig, ProbeConfig, RevealConfig};
pub use error::{FlamesError, Result};
pub use host::{EventLoop, FrameHost, FrameId, TimerHost, TimerId};
pub use performance::{
    AdjustmentReason, MemoryProbe, NoMemoryInfo, PerformanceMetrics, PerformanceMonitor,
    QualityChange, QualityController,
};
pub use probe::{
    CapabilityProbe, CapabilitySnapshot, DeviceClass, Environment, EnvironmentEvent,
    NetworkSpeed, Orientation, ScreenSize, StaticEnvironment,
};
pub use quality::{QualityBudget, QualityLevel};
pub use stagger::{StageSet, StaggeredAnimation};
pub use timer::{TimerHandle, TimerRegistry};
