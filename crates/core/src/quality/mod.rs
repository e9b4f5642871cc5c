use std::fmt;

use serde::{Deserialize, Serialize};

use crate::probe::{CapabilitySnapshot, DeviceClass};

/// Discrete tier governing how much visual-effect work is permitted.
///
/// The derived ordering is the canonical `Low < Medium < High < Ultra`; both
/// stepping directions walk [`QualityLevel::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityLevel {
    /// Every level, lowest first.
    pub const ALL: [QualityLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Ultra];

    fn index(self) -> usize {
        self as usize
    }

    pub fn is_lowest(self) -> bool {
        self.index() == 0
    }

    pub fn is_highest(self) -> bool {
        self.index() == Self::ALL.len() - 1
    }

    /// The next level down, or `None` at [`QualityLevel::Low`].
    pub fn step_down(self) -> Option<Self> {
        self.index()
            .checked_sub(1)
            .map(|index| Self::ALL[index])
    }

    /// The next level up, or `None` at [`QualityLevel::Ultra`].
    pub fn step_up(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Resource limits attached to the level before any reduced-motion
    /// override is applied.
    pub fn budget(self) -> QualityBudget {
        let (max_particles, should_reduce_effects) = match self {
            Self::Low => (25, true),
            Self::Medium => (50, false),
            Self::High => (100, false),
            Self::Ultra => (200, false),
        };
        QualityBudget {
            max_particles,
            should_reduce_effects,
        }
    }

    /// Chooses the starting level from a capability snapshot, before any
    /// frame has been measured.
    pub fn seed_for(snapshot: &CapabilitySnapshot) -> Self {
        let memory = snapshot.device_memory_gb;
        if snapshot.is_low_power_mode {
            return Self::Low;
        }
        match snapshot.device_class {
            DeviceClass::Mobile if memory < 2.0 => Self::Low,
            DeviceClass::Mobile if memory < 4.0 => Self::Medium,
            DeviceClass::Mobile => Self::High,
            _ if memory < 4.0 => Self::Medium,
            _ if memory >= 8.0 => Self::Ultra,
            _ => Self::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete limits a renderer must respect at the current quality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityBudget {
    pub max_particles: u32,
    pub should_reduce_effects: bool,
}

impl QualityBudget {
    /// Applies the user's reduced-motion preference on top of the level's
    /// own flag.
    pub fn with_reduced_motion(self, reduced_motion: bool) -> Self {
        Self {
            should_reduce_effects: self.should_reduce_effects || reduced_motion,
            ..self
        }
    }
}
