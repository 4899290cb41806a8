//! Distance-based level of detail.
//!
//! A unit far from the viewer ticks less often and, past the hide distance, not at all. The
//! evaluation itself runs on a slow timer since distances change gradually.
use glam::Vec3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LodSettings {
    /// Distance at which detail reaches zero.
    pub hide_distance: f32,
    /// Tick interval right next to the viewer.
    pub fast_interval: f32,
    /// Tick interval from half the hide distance outwards.
    pub slow_interval: f32,
    /// Detail multiplier.
    pub priority: f32,
    /// Seconds between LOD evaluations.
    pub evaluation_interval: f32,
    /// Tick interval used before the first evaluation.
    pub initial_interval: f32,
}

impl Default for LodSettings {
    fn default() -> Self {
        Self {
            hide_distance: 125.0,
            fast_interval: 0.015,
            slow_interval: 0.2,
            priority: 1.0,
            evaluation_interval: 2.0,
            initial_interval: 0.03,
        }
    }
}

impl LodSettings {
    pub fn new(hide_distance: f32, fast_interval: f32, slow_interval: f32) -> Self {
        Self {
            hide_distance,
            fast_interval,
            slow_interval,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_evaluation_interval(mut self, seconds: f32) -> Self {
        self.evaluation_interval = seconds;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.hide_distance.is_finite() || self.hide_distance <= 0.0 {
            return Err(Error::InvalidConfig("hide_distance must be > 0".into()));
        }
        if self.fast_interval < 0.0 || self.slow_interval < 0.0 || self.initial_interval < 0.0 {
            return Err(Error::InvalidConfig("tick intervals must be >= 0".into()));
        }
        if self.priority < 0.0 {
            return Err(Error::InvalidConfig("priority must be >= 0".into()));
        }
        if self.evaluation_interval < 0.0 {
            return Err(Error::InvalidConfig(
                "evaluation_interval must be >= 0".into(),
            ));
        }
        Ok(())
    }

    /// Detail and tick interval at `distance` from the viewer.
    pub fn state_at(&self, distance: f32) -> LodState {
        let near = (distance / self.hide_distance).clamp(0.0, 1.0);
        let mid = (2.0 * distance / self.hide_distance).clamp(0.0, 1.0);
        LodState {
            distance,
            detail_level: (1.0 - near) * self.priority,
            tick_interval: self.fast_interval + (self.slow_interval - self.fast_interval) * mid,
        }
    }
}

/// Result of one LOD evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodState {
    pub distance: f32,
    pub detail_level: f32,
    pub tick_interval: f32,
}

impl LodState {
    pub fn is_hidden(&self) -> bool {
        self.detail_level <= 0.0
    }
}

/// Re-evaluates [`LodState`] every `evaluation_interval` seconds.
#[derive(Debug, Clone)]
pub struct LodScheduler {
    settings: LodSettings,
    state: LodState,
    since_evaluation: Option<f32>,
}

impl LodScheduler {
    pub fn new(settings: LodSettings) -> Result<Self> {
        settings.validate()?;
        let state = LodState {
            distance: 0.0,
            detail_level: settings.priority,
            tick_interval: settings.initial_interval,
        };
        Ok(Self {
            settings,
            state,
            since_evaluation: None,
        })
    }

    pub fn settings(&self) -> &LodSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: LodSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        self.since_evaluation = None;
        Ok(())
    }

    pub fn state(&self) -> LodState {
        self.state
    }

    /// Forces an evaluation on the next advance.
    pub fn invalidate(&mut self) {
        self.since_evaluation = None;
    }

    /// Advances the evaluation timer. Returns the new state when an evaluation ran.
    ///
    /// The first call always evaluates.
    pub fn advance(&mut self, dt: f32, position: Vec3, view_point: Vec3) -> Option<LodState> {
        let due = match self.since_evaluation.as_mut() {
            None => true,
            Some(since) => {
                *since += dt;
                *since >= self.settings.evaluation_interval
            }
        };
        if !due {
            return None;
        }
        self.since_evaluation = Some(0.0);
        self.state = self.settings.state_at(position.distance(view_point));
        Some(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formulas_at_reference_distances() {
        let s = LodSettings::default();
        let near = s.state_at(0.0);
        assert_eq!(near.detail_level, 1.0);
        assert!((near.tick_interval - 0.015).abs() < 1e-6);

        let half = s.state_at(62.5);
        assert!((half.detail_level - 0.5).abs() < 1e-6);
        assert!((half.tick_interval - 0.2).abs() < 1e-6);

        let far = s.state_at(125.0);
        assert_eq!(far.detail_level, 0.0);
        assert!(far.is_hidden());
        assert!((far.tick_interval - 0.2).abs() < 1e-6);

        let quarter = s.state_at(31.25);
        assert!((quarter.tick_interval - 0.1075).abs() < 1e-6);
    }

    #[test]
    fn priority_scales_detail() {
        let s = LodSettings::default().with_priority(0.5);
        assert!((s.state_at(0.0).detail_level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn scheduler_evaluates_first_then_on_interval() {
        let mut lod = LodScheduler::new(LodSettings::default()).unwrap();
        assert_eq!(lod.state().tick_interval, 0.03);
        let far = Vec3::new(200.0, 0.0, 0.0);
        assert!(lod.advance(0.016, Vec3::ZERO, far).is_some());
        assert!(lod.state().is_hidden());
        assert!(lod.advance(1.0, Vec3::ZERO, Vec3::ZERO).is_none());
        assert!(lod.state().is_hidden());
        let state = lod.advance(1.0, Vec3::ZERO, Vec3::ZERO).unwrap();
        assert_eq!(state.detail_level, 1.0);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(LodSettings::new(0.0, 0.015, 0.2).validate().is_err());
        assert!(LodScheduler::new(LodSettings::default().with_priority(-1.0)).is_err());
    }
}
